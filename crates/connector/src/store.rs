use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ConnectorError;
use crate::types::RunRecord;

/// Persistence boundary for the `Run` aggregate. `DirectConnector` depends on this
/// trait rather than a concrete database client; wiring a real backend is out of scope
/// here (see the purpose & scope section), but the in-memory implementation below
/// doubles as a test fixture and a reference for what a backend needs to provide.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn load_run(&self, run_id: u64) -> Result<RunRecord, ConnectorError>;

    /// Clears the run's previous log lines and output files. Called once at the start
    /// of `init_run_get_info`, and again only if the run is retried.
    async fn clear_previous_results(&self, run_id: u64) -> Result<(), ConnectorError>;

    /// Sets `started` if unset. Returns whether this call was the one that set it.
    async fn set_started(&self, run_id: u64) -> Result<bool, ConnectorError>;

    async fn set_progress(
        &self,
        run_id: u64,
        percent: u8,
        text: String,
    ) -> Result<(), ConnectorError>;

    /// Sets `done` if unset; idempotent.
    async fn set_done(&self, run_id: u64) -> Result<(), ConnectorError>;

    async fn append_log_lines(
        &self,
        run_id: u64,
        lines: Vec<(String, DateTime<Utc>)>,
    ) -> Result<(), ConnectorError>;

    async fn append_output_file(
        &self,
        run_id: u64,
        name: String,
        hash: String,
        size: u64,
    ) -> Result<(), ConnectorError>;
}

/// Content-addressed blob storage boundary (object-store backend is out of scope; see
/// `RunStore`).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ConnectorError>;

    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), ConnectorError>;

    /// A time-limited download URL a worker can fetch directly, bypassing the control
    /// plane for the transfer itself.
    async fn presigned_url(&self, bucket: &str, key: &str) -> Result<String, ConnectorError>;
}

pub mod memory {
    use std::collections::HashMap;

    use parking_lot::Mutex;

    use super::*;
    use crate::types::{ParameterSpec, PathSpec, Port, SubmittedInputFile};

    #[derive(Debug, Clone)]
    pub struct RunSeed {
        pub experiment_hash: String,
        pub parameter_specs: Vec<ParameterSpec>,
        pub path_specs: Vec<PathSpec>,
        pub parameter_values: std::collections::BTreeMap<String, String>,
        pub input_files: Vec<SubmittedInputFile>,
        pub ports: Vec<Port>,
        pub extra_config: Option<serde_json::Value>,
    }

    struct RunState {
        seed: RunSeed,
        started: bool,
        done: bool,
        progress_percent: u8,
        progress_text: String,
        log: Vec<(String, DateTime<Utc>)>,
        outputs: Vec<(String, String, u64)>,
    }

    /// A `RunStore` backed by an in-process map, for tests and standalone demos.
    pub struct InMemoryRunStore {
        runs: Mutex<HashMap<u64, RunState>>,
    }

    impl Default for InMemoryRunStore {
        fn default() -> Self {
            InMemoryRunStore {
                runs: Mutex::new(HashMap::new()),
            }
        }
    }

    impl InMemoryRunStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn seed_run(&self, run_id: u64, seed: RunSeed) {
            self.runs.lock().insert(
                run_id,
                RunState {
                    seed,
                    started: false,
                    done: false,
                    progress_percent: 0,
                    progress_text: String::new(),
                    log: Vec::new(),
                    outputs: Vec::new(),
                },
            );
        }

        pub fn log_lines(&self, run_id: u64) -> Vec<String> {
            self.runs
                .lock()
                .get(&run_id)
                .map(|r| r.log.iter().map(|(line, _)| line.clone()).collect())
                .unwrap_or_default()
        }

        pub fn output_files(&self, run_id: u64) -> Vec<(String, String, u64)> {
            self.runs
                .lock()
                .get(&run_id)
                .map(|r| r.outputs.clone())
                .unwrap_or_default()
        }

        pub fn is_started(&self, run_id: u64) -> bool {
            self.runs.lock().get(&run_id).map(|r| r.started).unwrap_or(false)
        }

        pub fn is_done(&self, run_id: u64) -> bool {
            self.runs.lock().get(&run_id).map(|r| r.done).unwrap_or(false)
        }
    }

    #[async_trait]
    impl RunStore for InMemoryRunStore {
        async fn load_run(&self, run_id: u64) -> Result<RunRecord, ConnectorError> {
            let runs = self.runs.lock();
            let state = runs.get(&run_id).ok_or(ConnectorError::UnknownRun(run_id))?;
            Ok(RunRecord {
                id: run_id,
                experiment_hash: state.seed.experiment_hash.clone(),
                parameter_specs: state.seed.parameter_specs.clone(),
                path_specs: state.seed.path_specs.clone(),
                parameter_values: state.seed.parameter_values.clone(),
                input_files: state.seed.input_files.clone(),
                ports: state.seed.ports.clone(),
                extra_config: state.seed.extra_config.clone(),
                started: state.started,
                done: state.done,
            })
        }

        async fn clear_previous_results(&self, run_id: u64) -> Result<(), ConnectorError> {
            let mut runs = self.runs.lock();
            let state = runs.get_mut(&run_id).ok_or(ConnectorError::UnknownRun(run_id))?;
            state.log.clear();
            state.outputs.clear();
            Ok(())
        }

        async fn set_started(&self, run_id: u64) -> Result<bool, ConnectorError> {
            let mut runs = self.runs.lock();
            let state = runs.get_mut(&run_id).ok_or(ConnectorError::UnknownRun(run_id))?;
            if state.started {
                log::warn!("Starting run {run_id} which has already been started");
                Ok(false)
            } else {
                state.started = true;
                Ok(true)
            }
        }

        async fn set_progress(
            &self,
            run_id: u64,
            percent: u8,
            text: String,
        ) -> Result<(), ConnectorError> {
            let mut runs = self.runs.lock();
            let state = runs.get_mut(&run_id).ok_or(ConnectorError::UnknownRun(run_id))?;
            state.progress_percent = percent;
            state.progress_text = text;
            Ok(())
        }

        async fn set_done(&self, run_id: u64) -> Result<(), ConnectorError> {
            let mut runs = self.runs.lock();
            let state = runs.get_mut(&run_id).ok_or(ConnectorError::UnknownRun(run_id))?;
            state.done = true;
            Ok(())
        }

        async fn append_log_lines(
            &self,
            run_id: u64,
            lines: Vec<(String, DateTime<Utc>)>,
        ) -> Result<(), ConnectorError> {
            let mut runs = self.runs.lock();
            let state = runs.get_mut(&run_id).ok_or(ConnectorError::UnknownRun(run_id))?;
            state.log.extend(lines);
            Ok(())
        }

        async fn append_output_file(
            &self,
            run_id: u64,
            name: String,
            hash: String,
            size: u64,
        ) -> Result<(), ConnectorError> {
            let mut runs = self.runs.lock();
            let state = runs.get_mut(&run_id).ok_or(ConnectorError::UnknownRun(run_id))?;
            state.outputs.push((name, hash, size));
            Ok(())
        }
    }

    /// An `ObjectStore` backed by an in-process map, for tests and standalone demos.
    #[derive(Default)]
    pub struct InMemoryObjectStore {
        blobs: Mutex<HashMap<(String, String), Vec<u8>>>,
    }

    impl InMemoryObjectStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl ObjectStore for InMemoryObjectStore {
        async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ConnectorError> {
            self.blobs
                .lock()
                .get(&(bucket.to_string(), key.to_string()))
                .cloned()
                .ok_or_else(|| ConnectorError::Store(format!("no such blob {bucket}/{key}")))
        }

        async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<(), ConnectorError> {
            self.blobs
                .lock()
                .insert((bucket.to_string(), key.to_string()), bytes);
            Ok(())
        }

        async fn presigned_url(&self, bucket: &str, key: &str) -> Result<String, ConnectorError> {
            Ok(format!("memory://{bucket}/{key}"))
        }
    }
}
