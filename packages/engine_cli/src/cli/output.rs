use anyhow::{Context, Result};
use std::io::Write;
use std::ops::ControlFlow;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::info;

use engine_client::StreamKind;
use engine_client::models::{LogsParameters, StatsParameters};
use engine_client::monitor::{LogLine, StatsSample, deliver};
use engine_client::{EngineClient, Result as EngineResult};

use super::{LogsArgs, StatPathArgs, StatsArgs};

/// An interrupted follow is a normal way to stop.
fn finish(result: EngineResult<usize>, what: &str) -> Result<ExitCode> {
    match result {
        Ok(count) => {
            info!(count, "{what} finished");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) if err.is_cancelled() => Ok(ExitCode::SUCCESS),
        Err(err) => Err(err.into()),
    }
}

fn print_line(line: LogLine) -> ControlFlow<()> {
    let text = match line.timestamp {
        Some(ts) => format!("{} {}", ts.to_rfc3339(), line.text),
        None => line.text,
    };
    let end = if line.partial { "" } else { "\n" };
    let written = match line.stream {
        StreamKind::Stderr => write!(std::io::stderr().lock(), "{text}{end}"),
        _ => {
            let mut out = std::io::stdout().lock();
            write!(out, "{text}{end}").and_then(|()| out.flush())
        }
    };
    // A closed pipe ends the output.
    match written {
        Ok(()) => ControlFlow::Continue(()),
        Err(_) => ControlFlow::Break(()),
    }
}

pub async fn logs_command(
    client: &EngineClient,
    args: LogsArgs,
    cancel: &CancellationToken,
) -> Result<ExitCode> {
    let params = LogsParameters {
        follow: Some(args.follow),
        stdout: Some(true),
        stderr: Some(true),
        timestamps: Some(args.timestamps),
        tail: args.tail,
        ..Default::default()
    };
    let lines = client
        .containers()
        .logs_stream(&args.container, &params, args.tty, cancel)
        .await
        .with_context(|| format!("Failed to read logs of {}", args.container))?;
    finish(deliver(lines, print_line).await, "logs")
}

fn summarize(sample: &StatsSample) -> String {
    let name = sample.name.as_deref().unwrap_or("-").trim_start_matches('/');
    let memory = sample
        .memory_usage()
        .map(|bytes| format!("{:.1}MiB", bytes as f64 / (1024.0 * 1024.0)))
        .unwrap_or_else(|| "-".into());
    let cpu = sample
        .cpu_total_usage()
        .map(|ns| format!("{:.3}s", ns as f64 / 1e9))
        .unwrap_or_else(|| "-".into());
    format!("{name}\tcpu={cpu}\tmem={memory}")
}

pub async fn stats_command(
    client: &EngineClient,
    args: StatsArgs,
    cancel: &CancellationToken,
) -> Result<ExitCode> {
    let params = StatsParameters {
        stream: Some(!args.no_stream),
        one_shot: args.no_stream.then_some(true),
    };
    let samples = client
        .containers()
        .stats_stream(&args.container, &params, cancel)
        .await
        .with_context(|| format!("Failed to read stats of {}", args.container))?;

    let json = args.json;
    let result = deliver(samples, |sample| {
        let line = if json {
            serde_json::to_string(&sample).unwrap_or_default()
        } else {
            summarize(&sample)
        };
        match writeln!(std::io::stdout().lock(), "{line}") {
            Ok(()) => ControlFlow::Continue(()),
            Err(_) => ControlFlow::Break(()),
        }
    })
    .await;
    finish(result, "stats")
}

pub async fn stat_path_command(
    client: &EngineClient,
    args: StatPathArgs,
    cancel: &CancellationToken,
) -> Result<ExitCode> {
    let archive = client
        .containers()
        .get_archive(&args.container, &args.path, true, cancel)
        .await
        .with_context(|| format!("Failed to stat {} in {}", args.path, args.container))?;
    let stat = archive.stat;
    println!("{}", serde_json::to_string_pretty(&stat)?);
    let kind = if stat.is_dir() {
        "directory"
    } else if stat.is_symlink() {
        "symlink"
    } else {
        "file"
    };
    let permissions = format!("{:o}", stat.permissions());
    info!(kind, %permissions, "path stat");
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_of_full_sample() {
        let sample: StatsSample = serde_json::from_value(serde_json::json!({
            "name": "/web-1",
            "memory_stats": {"usage": 3 * 1024 * 1024},
            "cpu_stats": {"cpu_usage": {"total_usage": 1_500_000_000u64}},
        }))
        .unwrap();
        assert_eq!(summarize(&sample), "web-1\tcpu=1.500s\tmem=3.0MiB");
    }

    #[test]
    fn summary_of_sparse_sample() {
        let sample: StatsSample = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(summarize(&sample), "-\tcpu=-\tmem=-");
    }
}
