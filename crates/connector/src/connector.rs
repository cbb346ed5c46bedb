use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::error::ConnectorError;
use crate::types::RunInfo;

/// The seam between a worker and durable run state (§4.1). Implemented directly
/// in-process (`DirectConnector`) and remotely over HTTP (`RemoteConnector`); callers
/// never match on which.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn init_run_get_info(&self, run_id: u64) -> Result<RunInfo, ConnectorError>;

    async fn run_started(&self, run_id: u64) -> Result<(), ConnectorError>;

    async fn run_progress(
        &self,
        run_id: u64,
        percent: u8,
        text: &str,
    ) -> Result<(), ConnectorError>;

    async fn run_done(&self, run_id: u64) -> Result<(), ConnectorError>;

    async fn run_failed(&self, run_id: u64, error: &str) -> Result<(), ConnectorError>;

    async fn log(&self, run_id: u64, line: &str) -> Result<(), ConnectorError> {
        self.log_multiple(run_id, &[line.to_string()]).await
    }

    async fn log_multiple(&self, run_id: u64, lines: &[String]) -> Result<(), ConnectorError>;

    async fn upload_output_file(
        &self,
        run_id: u64,
        name: &str,
        bytes: Vec<u8>,
        digest: Option<String>,
    ) -> Result<(), ConnectorError>;

    /// Inter-batch interval for `run_cmd_and_log`'s log publisher (§4.1 scheduling
    /// contract): ~1s for the direct connector, ~3s for the remote one.
    fn log_batch_interval(&self) -> Duration;

    /// Runs `cmd`, batching its combined stdout/stderr to `log_multiple` on a fixed
    /// interval, and returns its exit code. See the scheduling contract in §4.1: one
    /// activity reads subprocess output, another periodically flushes it; both run
    /// until the process has exited and the buffer is drained.
    async fn run_cmd_and_log(
        &self,
        run_id: u64,
        mut cmd: Command,
    ) -> Result<i32, ConnectorError> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn()?;
        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let buffer = Arc::new(Mutex::new(VecDeque::new()));
        let stdout_reader = tokio::spawn(read_lines_into(stdout, buffer.clone()));
        let stderr_reader = tokio::spawn(read_lines_into(stderr, buffer.clone()));

        let interval = self.log_batch_interval();
        batch_log_until_exit(
            self,
            run_id,
            &buffer,
            interval,
            ChildExitWaiter { child: &mut child },
            || stdout_reader.is_finished() && stderr_reader.is_finished(),
        )
        .await
    }
}

/// Adapts a running [`tokio::process::Child`] to the [`ExitWaiter`] contract used by
/// [`batch_log_until_exit`].
struct ChildExitWaiter<'a> {
    child: &'a mut tokio::process::Child,
}

impl<'a> ExitWaiter<i32, ConnectorError> for ChildExitWaiter<'a> {
    async fn poll_exit(&mut self) -> Result<i32, ConnectorError> {
        let status = self.child.wait().await?;
        Ok(status.code().unwrap_or(-1))
    }
}

/// A single poll for whether the thing `batch_log_until_exit` is waiting on (a
/// subprocess, a container) has exited yet.
pub trait ExitWaiter<C, E> {
    async fn poll_exit(&mut self) -> Result<C, E>;
}

/// Shared batching contract behind §4.1's log-publishing activity, used by both
/// `run_cmd_and_log` (subprocess stdout/stderr) and the container driver's Docker-log
/// equivalent: periodically drain `buffer` to `log_multiple` while `poll_exit` hasn't
/// resolved, then keep draining on the same interval until `readers_finished` reports
/// the line-reading task(s) have caught up, flushing one last remainder before
/// returning the exit code `poll_exit` produced.
pub async fn batch_log_until_exit<C, E>(
    connector: &(impl Connector + ?Sized),
    run_id: u64,
    buffer: &Mutex<VecDeque<String>>,
    interval: Duration,
    mut poll_exit: impl ExitWaiter<C, E>,
    readers_finished: impl Fn() -> bool,
) -> Result<C, E>
where
    E: From<ConnectorError>,
{
    let mut exit_code: Option<C> = None;
    loop {
        if exit_code.is_none() {
            tokio::select! {
                code = poll_exit.poll_exit() => {
                    exit_code = Some(code?);
                }
                _ = tokio::time::sleep(interval) => {}
            }
        } else {
            tokio::time::sleep(interval).await;
        }

        let batch: Vec<String> = buffer.lock().drain(..).collect();
        if !batch.is_empty() {
            connector.log_multiple(run_id, &batch).await?;
        }

        if exit_code.is_some() && readers_finished() {
            let remainder: Vec<String> = buffer.lock().drain(..).collect();
            if !remainder.is_empty() {
                connector.log_multiple(run_id, &remainder).await?;
            }
            break;
        }
    }

    Ok(exit_code.unwrap())
}

async fn read_lines_into<R>(reader: R, buffer: Arc<Mutex<VecDeque<String>>>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                log::info!("> {line}");
                buffer.lock().push_back(line);
            }
            Ok(None) => break,
            Err(err) => {
                log::warn!("error reading subprocess output: {err}");
                break;
            }
        }
    }
}

/// A single log line as recorded in the log, with its wall-clock timestamp.
pub fn timestamped(line: String) -> (String, chrono::DateTime<Utc>) {
    (line, Utc::now())
}
