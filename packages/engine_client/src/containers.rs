//! Container and exec operations.

use bytes::Bytes;
use http::{Method, StatusCode};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::archive::{ArchiveResponse, extract_path_stat};
use crate::client::EngineClient;
use crate::endpoints::{containers, exec};
use crate::error::{EngineError, Result};
use crate::models::{
    ArchiveParameters, AttachParameters, CreateParameters, CreateResponse, ExecConfig,
    ExecCreateResponse, ExecStartConfig, ExtractArchiveParameters, KillParameters,
    ListParameters, LogsParameters, RemoveParameters, RenameParameters, ResizeParameters,
    StatsParameters, StopParameters, TopParameters, WaitResponse,
};
use crate::monitor::{LogStream, ResponseBody, StatsStream, json_stream, log_stream};
use crate::mux::MultiplexedStream;
use crate::request::Call;
use crate::transport::HijackedStream;

pub struct Containers<'a> {
    client: &'a EngineClient,
}

impl<'a> Containers<'a> {
    pub(crate) fn new(client: &'a EngineClient) -> Self {
        Self { client }
    }

    /// Wrap a hijacked session. Sessions with stdin attached need a
    /// half-close to deliver end-of-input, so transports without one are
    /// refused for them.
    fn session(
        &self,
        mut stream: HijackedStream,
        tty: bool,
        stdin: bool,
        cancel: &CancellationToken,
    ) -> Result<MultiplexedStream> {
        if stdin && !stream.can_close_write() {
            stream.dispose();
            warn!("transport cannot half-close; refusing interactive session");
            return Err(EngineError::UnsupportedTransport(
                "cannot shut down the write side on this transport",
            ));
        }
        let max_buffered = self.client.config().mux.max_buffered_bytes;
        MultiplexedStream::new(stream, tty, max_buffered, cancel)
    }

    pub async fn list(&self, params: &ListParameters, cancel: &CancellationToken) -> Result<Value> {
        let call = Call::new(&containers::LIST).query(params)?;
        self.client.call_json(call, cancel).await
    }

    pub async fn inspect(&self, id: &str, cancel: &CancellationToken) -> Result<Value> {
        let call = Call::new(&containers::INSPECT).arg(id);
        self.client.call_json(call, cancel).await
    }

    /// `body` is the daemon's container config object.
    pub async fn create(
        &self,
        params: &CreateParameters,
        body: &Value,
        cancel: &CancellationToken,
    ) -> Result<CreateResponse> {
        let call = Call::new(&containers::CREATE).query(params)?.json(body)?;
        self.client.call_json(call, cancel).await
    }

    pub async fn top(
        &self,
        id: &str,
        params: &TopParameters,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let call = Call::new(&containers::TOP).arg(id).query(params)?;
        self.client.call_json(call, cancel).await
    }

    pub async fn changes(&self, id: &str, cancel: &CancellationToken) -> Result<Value> {
        let call = Call::new(&containers::CHANGES).arg(id);
        self.client.call_json(call, cancel).await
    }

    /// `false` when the container was already running.
    pub async fn start(&self, id: &str, cancel: &CancellationToken) -> Result<bool> {
        let call = Call::new(&containers::START).arg(id);
        let status = self.client.call_status(call, cancel).await?;
        Ok(status != StatusCode::NOT_MODIFIED)
    }

    /// `false` when the container was already stopped.
    pub async fn stop(
        &self,
        id: &str,
        params: &StopParameters,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let call = Call::new(&containers::STOP).arg(id).query(params)?;
        let status = self.client.call_status(call, cancel).await?;
        Ok(status != StatusCode::NOT_MODIFIED)
    }

    pub async fn restart(
        &self,
        id: &str,
        params: &StopParameters,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let call = Call::new(&containers::RESTART).arg(id).query(params)?;
        self.client.call_status(call, cancel).await?;
        Ok(())
    }

    pub async fn kill(
        &self,
        id: &str,
        params: &KillParameters,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let call = Call::new(&containers::KILL).arg(id).query(params)?;
        self.client.call_status(call, cancel).await?;
        Ok(())
    }

    pub async fn pause(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        let call = Call::new(&containers::PAUSE).arg(id);
        self.client.call_status(call, cancel).await?;
        Ok(())
    }

    pub async fn unpause(&self, id: &str, cancel: &CancellationToken) -> Result<()> {
        let call = Call::new(&containers::UNPAUSE).arg(id);
        self.client.call_status(call, cancel).await?;
        Ok(())
    }

    /// Block until the container exits.
    pub async fn wait(&self, id: &str, cancel: &CancellationToken) -> Result<WaitResponse> {
        let call = Call::new(&containers::WAIT).arg(id);
        self.client.call_json(call, cancel).await
    }

    pub async fn remove(
        &self,
        id: &str,
        params: &RemoveParameters,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let call = Call::new(&containers::REMOVE).arg(id).query(params)?;
        self.client.call_status(call, cancel).await?;
        Ok(())
    }

    pub async fn resize_tty(
        &self,
        id: &str,
        size: ResizeParameters,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let call = Call::new(&containers::RESIZE).arg(id).query(&size)?;
        self.client.call_status(call, cancel).await?;
        Ok(())
    }

    pub async fn rename(&self, id: &str, name: &str, cancel: &CancellationToken) -> Result<()> {
        let params = RenameParameters {
            name: name.to_string(),
        };
        let call = Call::new(&containers::RENAME).arg(id).query(&params)?;
        self.client.call_status(call, cancel).await?;
        Ok(())
    }

    /// Filesystem export as a tar stream.
    pub async fn export(&self, id: &str, cancel: &CancellationToken) -> Result<ResponseBody> {
        let call = Call::new(&containers::EXPORT).arg(id);
        self.client.call_stream(call, cancel).await
    }

    /// Raw logs body: framed unless the container has a TTY.
    pub async fn logs(
        &self,
        id: &str,
        params: &LogsParameters,
        cancel: &CancellationToken,
    ) -> Result<ResponseBody> {
        let call = Call::new(&containers::LOGS).arg(id).query(params)?;
        self.client.call_stream(call, cancel).await
    }

    /// Logs as a cancellable stream of lines. `tty` must match how the
    /// container was created.
    pub async fn logs_stream(
        &self,
        id: &str,
        params: &LogsParameters,
        tty: bool,
        cancel: &CancellationToken,
    ) -> Result<LogStream> {
        let body = self.logs(id, params, cancel).await?;
        let timestamps = params.timestamps.unwrap_or(false);
        let max_line = self.client.config().mux.max_line_bytes;
        Ok(log_stream(body, tty, timestamps, max_line, cancel))
    }

    pub async fn stats(
        &self,
        id: &str,
        params: &StatsParameters,
        cancel: &CancellationToken,
    ) -> Result<ResponseBody> {
        let call = Call::new(&containers::STATS).arg(id).query(params)?;
        self.client.call_stream(call, cancel).await
    }

    pub async fn stats_stream(
        &self,
        id: &str,
        params: &StatsParameters,
        cancel: &CancellationToken,
    ) -> Result<StatsStream> {
        let body = self.stats(id, params, cancel).await?;
        Ok(json_stream(body, cancel))
    }

    /// Read a path as a tar stream. With `stat_only` only the path stat is
    /// fetched (HEAD) and `body` is `None`.
    pub async fn get_archive(
        &self,
        id: &str,
        path: &str,
        stat_only: bool,
        cancel: &CancellationToken,
    ) -> Result<ArchiveResponse> {
        let params = ArchiveParameters {
            path: path.to_string(),
        };
        let mut call = Call::new(&containers::GET_ARCHIVE).arg(id).query(&params)?;
        if stat_only {
            call = call.method(Method::HEAD);
        }
        let response = self.client.call_response(call, cancel).await?;
        let stat = extract_path_stat(response.headers())?;
        let body = if stat_only {
            None
        } else {
            Some(ResponseBody::from_incoming(response.into_body()))
        };
        Ok(ArchiveResponse { stat, body })
    }

    /// Extract a tar archive into a directory of the container.
    pub async fn put_archive(
        &self,
        id: &str,
        params: &ExtractArchiveParameters,
        archive: Bytes,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let call = Call::new(&containers::PUT_ARCHIVE)
            .arg(id)
            .query(params)?
            .tar(archive);
        self.client.call_status(call, cancel).await?;
        Ok(())
    }

    pub async fn attach(
        &self,
        id: &str,
        tty: bool,
        params: &AttachParameters,
        cancel: &CancellationToken,
    ) -> Result<MultiplexedStream> {
        let call = Call::new(&containers::ATTACH).arg(id).query(params)?;
        let stream = self.client.call_hijack(call, cancel).await?;
        self.session(stream, tty, params.stdin.unwrap_or(false), cancel)
    }

    pub async fn exec_create(
        &self,
        id: &str,
        config: &ExecConfig,
        cancel: &CancellationToken,
    ) -> Result<ExecCreateResponse> {
        let call = Call::new(&containers::EXEC_CREATE).arg(id).json(config)?;
        self.client.call_json(call, cancel).await
    }

    /// Start an exec instance with nothing attached.
    pub async fn exec_start_detached(
        &self,
        exec_id: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let body = ExecStartConfig {
            detach: true,
            tty: false,
        };
        let call = Call::new(&exec::START).arg(exec_id).json(&body)?;
        self.client.call_status(call, cancel).await?;
        Ok(())
    }

    /// Start an exec instance with stdin, stdout and stderr attached.
    pub async fn exec_start_attached(
        &self,
        exec_id: &str,
        tty: bool,
        cancel: &CancellationToken,
    ) -> Result<MultiplexedStream> {
        let config = ExecConfig {
            attach_stdin: true,
            attach_stdout: true,
            attach_stderr: true,
            tty,
            ..Default::default()
        };
        self.exec_start_with_config(exec_id, &config, cancel).await
    }

    pub async fn exec_start_with_config(
        &self,
        exec_id: &str,
        config: &ExecConfig,
        cancel: &CancellationToken,
    ) -> Result<MultiplexedStream> {
        let body = ExecStartConfig {
            detach: false,
            tty: config.tty,
        };
        let call = Call::new(&exec::START).arg(exec_id).json(&body)?;
        let stream = self.client.call_hijack(call, cancel).await?;
        self.session(stream, config.tty, config.attach_stdin, cancel)
    }

    pub async fn exec_inspect(&self, exec_id: &str, cancel: &CancellationToken) -> Result<Value> {
        let call = Call::new(&exec::INSPECT).arg(exec_id);
        self.client.call_json(call, cancel).await
    }

    pub async fn exec_resize(
        &self,
        exec_id: &str,
        size: ResizeParameters,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let call = Call::new(&exec::RESIZE).arg(exec_id).query(&size)?;
        self.client.call_status(call, cancel).await?;
        Ok(())
    }
}
