use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hashing::Digest;

use crate::connector::{timestamped, Connector};
use crate::error::ConnectorError;
use crate::store::{ObjectStore, RunStore};
use crate::types::{InputFile, OutputSpec, RunInfo};

const BUNDLE_BUCKET: &str = "experiments";
const INPUT_BUCKET: &str = "inputs";
const OUTPUT_BUCKET: &str = "outputs";

/// Connects to durable state in-process: used by the control plane itself, and by the
/// single-host (`local`) orchestrator strategy which runs the container driver in the
/// same process.
pub struct DirectConnector {
    run_store: Arc<dyn RunStore>,
    object_store: Arc<dyn ObjectStore>,
}

impl DirectConnector {
    pub fn new(run_store: Arc<dyn RunStore>, object_store: Arc<dyn ObjectStore>) -> Self {
        DirectConnector {
            run_store,
            object_store,
        }
    }
}

#[async_trait]
impl Connector for DirectConnector {
    async fn init_run_get_info(&self, run_id: u64) -> Result<RunInfo, ConnectorError> {
        let run = self.run_store.load_run(run_id).await?;

        // Merge parameter defaults with submitted values, tracking which required
        // parameters are still unset.
        let mut params = run
            .parameter_specs
            .iter()
            .map(|p| (p.name.clone(), p.default.clone().unwrap_or_default()))
            .collect::<std::collections::BTreeMap<_, _>>();
        let known_params: BTreeSet<&str> =
            run.parameter_specs.iter().map(|p| p.name.as_str()).collect();
        let mut unset: BTreeSet<String> = run
            .parameter_specs
            .iter()
            .filter(|p| !p.optional)
            .map(|p| p.name.clone())
            .collect();

        for (name, value) in &run.parameter_values {
            if !known_params.contains(name.as_str()) {
                return Err(ConnectorError::BadRequest(format!(
                    "Got parameter value for parameter {name} which does not exist"
                )));
            }
            params.insert(name.clone(), value.clone());
            unset.remove(name);
        }

        if !unset.is_empty() {
            return Err(ConnectorError::BadRequest(format!(
                "Missing value for parameters: {}",
                unset.into_iter().collect::<Vec<_>>().join(", ")
            )));
        }

        // Resolve path names to the (is_input, is_output, path) triple.
        let path_by_name: std::collections::HashMap<_, _> = run
            .path_specs
            .iter()
            .map(|p| (p.name.as_str(), p))
            .collect();

        let mut inputs = Vec::with_capacity(run.input_files.len());
        for submitted in &run.input_files {
            let spec = path_by_name.get(submitted.name.as_str()).ok_or_else(|| {
                ConnectorError::BadRequest(format!(
                    "Got an unknown input file {}",
                    submitted.name
                ))
            })?;
            if !spec.is_input {
                return Err(ConnectorError::BadRequest(format!(
                    "Got an unknown input file {}",
                    submitted.name
                )));
            }
            let link = self
                .object_store
                .presigned_url(INPUT_BUCKET, &submitted.hash)
                .await?;
            inputs.push(InputFile {
                name: submitted.name.clone(),
                hash: submitted.hash.clone(),
                size: submitted.size,
                path: spec.path.clone(),
                link: Some(link),
            });
        }

        let outputs = run
            .path_specs
            .iter()
            .filter(|p| p.is_output)
            .map(|p| OutputSpec {
                name: p.name.clone(),
                path: p.path.clone(),
            })
            .collect();

        // Clear previous log/output state; this is the one mutation allowed before the
        // run is known to be valid, since it must happen exactly once per attempt.
        self.run_store.clear_previous_results(run_id).await?;

        let experiment_url = self
            .object_store
            .presigned_url(BUNDLE_BUCKET, &run.experiment_hash)
            .await?;

        Ok(RunInfo {
            id: run_id,
            experiment_hash: run.experiment_hash,
            parameters: params,
            inputs,
            outputs,
            ports: run.ports,
            extra_config: run.extra_config,
            experiment_url: Some(experiment_url),
        })
    }

    async fn run_started(&self, run_id: u64) -> Result<(), ConnectorError> {
        self.run_store.set_started(run_id).await?;
        Ok(())
    }

    async fn run_progress(
        &self,
        run_id: u64,
        percent: u8,
        text: &str,
    ) -> Result<(), ConnectorError> {
        self.run_store
            .set_progress(run_id, percent, text.to_string())
            .await
    }

    async fn run_done(&self, run_id: u64) -> Result<(), ConnectorError> {
        self.run_store.set_done(run_id).await
    }

    async fn run_failed(&self, run_id: u64, error: &str) -> Result<(), ConnectorError> {
        self.run_store.set_done(run_id).await?;
        self.run_store
            .append_log_lines(run_id, vec![timestamped(error.to_string())])
            .await
    }

    async fn log_multiple(&self, run_id: u64, lines: &[String]) -> Result<(), ConnectorError> {
        let stamped = lines.iter().cloned().map(timestamped).collect();
        self.run_store.append_log_lines(run_id, stamped).await
    }

    async fn upload_output_file(
        &self,
        run_id: u64,
        name: &str,
        bytes: Vec<u8>,
        digest: Option<String>,
    ) -> Result<(), ConnectorError> {
        let size = bytes.len() as u64;
        let hash = digest.unwrap_or_else(|| Digest::of_bytes(&bytes).hash.to_hex());
        self.object_store.put(OUTPUT_BUCKET, &hash, bytes).await?;
        self.run_store
            .append_output_file(run_id, name.to_string(), hash, size)
            .await
    }

    fn log_batch_interval(&self) -> Duration {
        Duration::from_secs(1)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::store::memory::{InMemoryObjectStore, InMemoryRunStore, RunSeed};
    use crate::store::RunStore;
    use crate::types::{ParameterSpec, PathSpec};

    use super::*;

    fn connector() -> (DirectConnector, Arc<InMemoryRunStore>) {
        let run_store = Arc::new(InMemoryRunStore::new());
        let object_store = Arc::new(InMemoryObjectStore::new());
        (
            DirectConnector::new(run_store.clone(), object_store),
            run_store,
        )
    }

    fn seed_basic_run(
        run_store: &InMemoryRunStore,
        run_id: u64,
        required_mode: bool,
        input_files: Vec<crate::types::SubmittedInputFile>,
    ) {
        run_store.seed_run(
            run_id,
            RunSeed {
                experiment_hash: "deadbeef".to_string(),
                parameter_specs: vec![
                    ParameterSpec {
                        name: "cmdline_00000".to_string(),
                        optional: true,
                        default: Some("./count.sh".to_string()),
                        description: None,
                    },
                    ParameterSpec {
                        name: "mode".to_string(),
                        optional: !required_mode,
                        default: None,
                        description: None,
                    },
                ],
                path_specs: vec![PathSpec {
                    name: "output".to_string(),
                    path: "/output".to_string(),
                    is_input: false,
                    is_output: true,
                }],
                parameter_values: BTreeMap::new(),
                input_files,
                ports: Vec::new(),
                extra_config: None,
            },
        );
    }

    #[tokio::test]
    async fn missing_required_parameter_is_rejected() {
        let (connector, run_store) = connector();
        seed_basic_run(&run_store, 1, true, Vec::new());

        let err = connector.init_run_get_info(1).await.unwrap_err();
        assert_eq!(err.to_string(), "Missing value for parameters: mode");
    }

    #[tokio::test]
    async fn unknown_input_file_is_rejected() {
        let (connector, run_store) = connector();
        seed_basic_run(
            &run_store,
            1,
            false,
            vec![crate::types::SubmittedInputFile {
                name: "extra".to_string(),
                hash: "abc".to_string(),
                size: 0,
            }],
        );

        let err = connector.init_run_get_info(1).await.unwrap_err();
        assert_eq!(err.to_string(), "Got an unknown input file extra");
    }

    #[tokio::test]
    async fn init_is_idempotent_on_log_and_outputs() {
        let (connector, run_store) = connector();
        seed_basic_run(&run_store, 1, false, Vec::new());
        run_store
            .append_log_lines(1, vec![timestamped("leftover".to_string())])
            .await
            .unwrap();

        connector.init_run_get_info(1).await.unwrap();
        assert!(run_store.log_lines(1).is_empty());

        connector.init_run_get_info(1).await.unwrap();
        assert!(run_store.log_lines(1).is_empty());
    }

    #[tokio::test]
    async fn run_started_is_idempotent() {
        let (connector, run_store) = connector();
        seed_basic_run(&run_store, 1, false, Vec::new());

        connector.run_started(1).await.unwrap();
        connector.run_started(1).await.unwrap();
        assert!(run_store.is_started(1));
    }
}
