use anyhow::{Context, Result};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use engine_client::containers::Containers;
use engine_client::models::{AttachParameters, ExecConfig};
use engine_client::{EngineClient, EngineError, MultiplexedStream};

use super::{AttachArgs, ExecArgs};

const STDIN_CHUNK: usize = 8 * 1024;

/// Exit status after Ctrl-C, as shells report it.
const INTERRUPTED: u8 = 130;

/// Wait up to 100ms for stdin to become readable.
#[cfg(unix)]
fn stdin_ready(stdin: &std::io::Stdin) -> bool {
    use std::os::fd::AsRawFd;
    let mut pfd = nix::libc::pollfd {
        fd: stdin.as_raw_fd(),
        events: nix::libc::POLLIN,
        revents: 0,
    };
    let ret = unsafe { nix::libc::poll(&mut pfd, 1, 100) };
    ret > 0
}

#[cfg(not(unix))]
fn stdin_ready(_: &std::io::Stdin) -> bool {
    true
}

/// Read stdin on a plain thread that polls, so it notices `shutdown` instead
/// of blocking process exit on a read nobody will finish. The channel
/// closes on EOF.
fn spawn_stdin_reader(shutdown: Arc<AtomicBool>) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel::<Vec<u8>>(64);
    std::thread::spawn(move || {
        use std::io::Read;
        let stdin = std::io::stdin();
        let mut buf = vec![0u8; STDIN_CHUNK];
        loop {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            if !stdin_ready(&stdin) {
                continue;
            }
            match stdin.lock().read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

/// Pump local stdin into the session on its own task and drain output on
/// this one. Local EOF half-closes the session; the session ends when the
/// daemon closes its side.
async fn run_session(stream: MultiplexedStream) -> Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let mut input = spawn_stdin_reader(shutdown.clone());
    let writer = stream.writer();
    let pump = tokio::spawn(async move {
        while let Some(data) = input.recv().await {
            writer.write_all(&data).await?;
        }
        debug!("stdin closed, half-closing session");
        writer.close_write().await?;
        Ok::<_, EngineError>(())
    });

    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    let result = stream.copy_output_to(&mut stdout, &mut stderr).await;

    shutdown.store(true, Ordering::Relaxed);
    pump.abort();
    stream.dispose();
    match result {
        Err(err) if err.is_cancelled() => {
            info!("session interrupted");
            Ok(())
        }
        other => Ok(other?),
    }
}

pub async fn attach_command(
    client: &EngineClient,
    args: AttachArgs,
    cancel: &CancellationToken,
) -> Result<ExitCode> {
    let params = AttachParameters {
        detach_keys: args.detach_keys,
        ..AttachParameters::interactive()
    };
    let stream = client
        .containers()
        .attach(&args.container, args.tty, &params, cancel)
        .await
        .with_context(|| format!("Failed to attach to {}", args.container))?;
    info!(container = %args.container, tty = args.tty, "attached");

    run_session(stream).await?;
    Ok(ExitCode::SUCCESS)
}

pub async fn exec_command(
    client: &EngineClient,
    args: ExecArgs,
    cancel: &CancellationToken,
) -> Result<ExitCode> {
    let containers = client.containers();
    let config = ExecConfig {
        attach_stdin: true,
        attach_stdout: true,
        attach_stderr: true,
        tty: args.tty,
        cmd: args.command,
        env: (!args.env.is_empty()).then_some(args.env),
        working_dir: args.workdir,
        user: args.user,
        ..Default::default()
    };

    let created = containers
        .exec_create(&args.container, &config, cancel)
        .await
        .with_context(|| format!("Failed to create exec instance in {}", args.container))?;
    debug!(exec_id = %created.id, "exec instance created");

    let stream = containers
        .exec_start_with_config(&created.id, &config, cancel)
        .await
        .context("Failed to start exec instance")?;
    run_session(stream).await?;
    let status = exec_exit_status(&containers, &created.id, cancel).await?;
    Ok(ExitCode::from(status))
}

/// The command's exit status. An interrupted session is not asked about:
/// the token is spent and the command may still be running.
async fn exec_exit_status(
    containers: &Containers<'_>,
    exec_id: &str,
    cancel: &CancellationToken,
) -> Result<u8> {
    if cancel.is_cancelled() {
        debug!(exec_id, "exec interrupted");
        return Ok(INTERRUPTED);
    }
    let inspect = containers.exec_inspect(exec_id, cancel).await?;
    let code = inspect
        .get("ExitCode")
        .and_then(|code| code.as_i64())
        .unwrap_or(0);
    debug!(exec_id, code, "exec finished");
    Ok(u8::try_from(code).unwrap_or(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_client::ClientConfig;
    use std::time::Duration;

    #[tokio::test]
    async fn stdin_reader_exits_on_shutdown() {
        let shutdown = Arc::new(AtomicBool::new(true));
        let mut input = spawn_stdin_reader(shutdown);
        let closed = tokio::time::timeout(Duration::from_secs(5), input.recv())
            .await
            .expect("stdin reader kept running after shutdown");
        assert!(closed.is_none());
    }

    #[tokio::test]
    async fn interrupted_exec_skips_inspect() {
        // No daemon listens here; any request would fail.
        let tmp = tempfile::tempdir().unwrap();
        let config = ClientConfig {
            host: format!("unix://{}", tmp.path().join("absent.sock").display()),
            ..Default::default()
        };
        let client = EngineClient::new(config).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let status = exec_exit_status(&client.containers(), "abc123", &cancel)
            .await
            .unwrap();
        assert_eq!(status, INTERRUPTED);
    }
}
