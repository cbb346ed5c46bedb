use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::connector::Connector;
use crate::error::ConnectorError;
use crate::types::RunInfo;

const AUTH_HEADER: &str = "X-Reproserver-Authenticate";

/// Connects to the control plane over HTTP: used by the container driver when it runs
/// inside a worker pod, with no direct access to the database or object store.
pub struct RemoteConnector {
    http: reqwest::Client,
    base_url: String,
    shared_secret: String,
}

impl RemoteConnector {
    pub fn new(base_url: impl Into<String>, shared_secret: impl Into<String>) -> Self {
        RemoteConnector {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            shared_secret: shared_secret.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn post_json<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, ConnectorError> {
        let response = self
            .http
            .post(self.url(path))
            .header(AUTH_HEADER, &self.shared_secret)
            .json(body)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::FORBIDDEN {
            return Err(ConnectorError::Forbidden);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectorError::Http(format!("{status}: {body}")));
        }
        Ok(response)
    }
}

#[derive(Serialize)]
struct Empty {}

#[derive(Serialize)]
struct ProgressBody<'a> {
    percent: u8,
    text: &'a str,
}

#[derive(Serialize)]
struct FailedBody<'a> {
    error: &'a str,
}

#[derive(Serialize)]
struct LogLine<'a> {
    msg: &'a str,
    time: String,
}

#[derive(Serialize)]
struct LogBody<'a> {
    lines: Vec<LogLine<'a>>,
}

#[async_trait]
impl Connector for RemoteConnector {
    async fn init_run_get_info(&self, run_id: u64) -> Result<RunInfo, ConnectorError> {
        let response = self
            .post_json(&format!("/runners/run/{run_id}/init"), &Empty {})
            .await?;
        Ok(response.json().await?)
    }

    async fn run_started(&self, run_id: u64) -> Result<(), ConnectorError> {
        self.post_json(&format!("/runners/run/{run_id}/start"), &Empty {})
            .await?;
        Ok(())
    }

    async fn run_progress(
        &self,
        run_id: u64,
        percent: u8,
        text: &str,
    ) -> Result<(), ConnectorError> {
        self.post_json(
            &format!("/runners/run/{run_id}/set-progress"),
            &ProgressBody { percent, text },
        )
        .await?;
        Ok(())
    }

    async fn run_done(&self, run_id: u64) -> Result<(), ConnectorError> {
        self.post_json(&format!("/runners/run/{run_id}/done"), &Empty {})
            .await?;
        Ok(())
    }

    async fn run_failed(&self, run_id: u64, error: &str) -> Result<(), ConnectorError> {
        self.post_json(
            &format!("/runners/run/{run_id}/failed"),
            &FailedBody { error },
        )
        .await?;
        Ok(())
    }

    async fn log_multiple(&self, run_id: u64, lines: &[String]) -> Result<(), ConnectorError> {
        if lines.is_empty() {
            return Ok(());
        }
        let body = LogBody {
            lines: lines
                .iter()
                .map(|msg| LogLine {
                    msg,
                    time: chrono::Utc::now().to_rfc3339(),
                })
                .collect(),
        };
        self.post_json(&format!("/runners/run/{run_id}/log"), &body)
            .await?;
        Ok(())
    }

    async fn upload_output_file(
        &self,
        run_id: u64,
        name: &str,
        bytes: Vec<u8>,
        _digest: Option<String>,
    ) -> Result<(), ConnectorError> {
        let response = self
            .http
            .put(self.url(&format!("/runners/run/{run_id}/output/{name}")))
            .header(AUTH_HEADER, &self.shared_secret)
            .body(bytes)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ConnectorError::Http(format!(
                "output upload failed: {}",
                response.status()
            )));
        }
        Ok(())
    }

    fn log_batch_interval(&self) -> Duration {
        Duration::from_secs(3)
    }
}
