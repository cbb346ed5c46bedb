use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use connector::{Connector, RunInfo};
use parking_lot::Mutex;
use prometheus::IntGauge;
use tokio::task::JoinHandle;

use crate::launcher::Launcher;

/// Triggers runs and tracks which ones are in flight. `run(id)` returns promptly; the
/// container driver (or, in cluster mode, pod creation) happens in a background task
/// that this orchestrator owns and awaits on shutdown, rather than a bare `tokio::spawn`
/// whose handle is dropped and whose cancellation-on-drop would be invisible.
pub struct Orchestrator {
    connector: Arc<dyn Connector>,
    launcher: Arc<dyn Launcher>,
    in_flight: Arc<Mutex<HashSet<u64>>>,
    tasks: Mutex<HashMap<u64, JoinHandle<()>>>,
    gauge: IntGauge,
}

impl Orchestrator {
    pub fn new(connector: Arc<dyn Connector>, launcher: Arc<dyn Launcher>, gauge: IntGauge) -> Self {
        Orchestrator {
            connector,
            launcher,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            tasks: Mutex::new(HashMap::new()),
            gauge,
        }
    }

    /// True if `run_id` currently has a background task running for it. Used by callers
    /// that want to avoid double-triggering a run.
    pub fn is_in_flight(&self, run_id: u64) -> bool {
        self.in_flight.lock().contains(&run_id)
    }

    pub fn in_flight_count(&self) -> i64 {
        self.gauge.get()
    }

    /// Fetches `run_id`'s info and launches it in the background. Returns as soon as the
    /// background task is spawned; does not await the run itself. Any failure before that
    /// point (bad run id, missing required parameter, ...) is recorded via `run_failed`
    /// before the error is returned, since nothing else will ever mark this run done.
    pub async fn run(&self, run_id: u64) -> Result<(), connector::ConnectorError> {
        let run_info = match self.connector.init_run_get_info(run_id).await {
            Ok(run_info) => run_info,
            Err(err) => {
                if let Err(record_err) = self.connector.run_failed(run_id, &err.to_string()).await {
                    log::error!("failed to record failure for run {run_id}: {record_err}");
                }
                return Err(err);
            }
        };

        self.in_flight.lock().insert(run_id);
        self.gauge.inc();

        let handle = tokio::spawn(run_task(
            self.connector.clone(),
            self.launcher.clone(),
            self.in_flight.clone(),
            self.gauge.clone(),
            run_info,
        ));

        let mut tasks = self.tasks.lock();
        tasks.insert(run_id, handle);
        reap_finished(&mut tasks);

        Ok(())
    }

    /// Waits up to `deadline` for all currently in-flight run tasks to finish, for use
    /// during graceful shutdown. Tasks still running past the deadline are left running;
    /// the process exit will simply drop them.
    pub async fn drain(&self, deadline: Duration) {
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock();
            tasks.drain().map(|(_, handle)| handle).collect()
        };
        let _ = tokio::time::timeout(deadline, join_all(handles)).await;
    }
}

async fn join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

fn reap_finished(tasks: &mut HashMap<u64, JoinHandle<()>>) {
    tasks.retain(|_, handle| !handle.is_finished());
}

async fn run_task(
    connector: Arc<dyn Connector>,
    launcher: Arc<dyn Launcher>,
    in_flight: Arc<Mutex<HashSet<u64>>>,
    gauge: IntGauge,
    run_info: RunInfo,
) {
    let run_id = run_info.id;
    match launcher.launch(&run_info).await {
        Ok(()) => {
            log::info!("run {run_id} successful");
        }
        Err(err) => {
            log::error!("run {run_id} failed: {err}");
            if let Err(err) = connector.run_failed(run_id, &err.to_string()).await {
                log::error!("failed to record failure for run {run_id}: {err}");
            }
        }
    }
    in_flight.lock().remove(&run_id);
    gauge.dec();
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use connector::{DirectConnector, InMemoryObjectStore, InMemoryRunStore, RunSeed};

    use super::*;
    use crate::launcher::LaunchError;

    struct FakeLauncher {
        should_fail: bool,
    }

    #[async_trait]
    impl Launcher for FakeLauncher {
        async fn launch(&self, _run_info: &RunInfo) -> Result<(), LaunchError> {
            if self.should_fail {
                Err(LaunchError(Box::new(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "container exploded",
                ))))
            } else {
                Ok(())
            }
        }
    }

    fn seed(run_store: &InMemoryRunStore, run_id: u64) {
        run_store.seed_run(
            run_id,
            RunSeed {
                experiment_hash: "deadbeef".to_string(),
                parameter_specs: Vec::new(),
                path_specs: Vec::new(),
                parameter_values: BTreeMap::new(),
                input_files: Vec::new(),
                ports: Vec::new(),
                extra_config: None,
            },
        );
    }

    fn seed_with_required_parameter(run_store: &InMemoryRunStore, run_id: u64) {
        run_store.seed_run(
            run_id,
            RunSeed {
                experiment_hash: "deadbeef".to_string(),
                parameter_specs: vec![connector::types::ParameterSpec {
                    name: "mode".to_string(),
                    optional: false,
                    default: None,
                    description: None,
                }],
                path_specs: Vec::new(),
                parameter_values: BTreeMap::new(),
                input_files: Vec::new(),
                ports: Vec::new(),
                extra_config: None,
            },
        );
    }

    fn gauge() -> IntGauge {
        IntGauge::new("test_current_runs", "help").unwrap()
    }

    #[tokio::test]
    async fn successful_run_clears_in_flight_and_gauge() {
        let run_store = Arc::new(InMemoryRunStore::new());
        seed(&run_store, 1);
        let connector: Arc<dyn Connector> = Arc::new(DirectConnector::new(
            run_store.clone(),
            Arc::new(InMemoryObjectStore::new()),
        ));
        let launcher: Arc<dyn Launcher> = Arc::new(FakeLauncher { should_fail: false });
        let gauge = gauge();
        let orchestrator = Orchestrator::new(connector, launcher, gauge.clone());

        orchestrator.run(1).await.unwrap();
        assert!(orchestrator.is_in_flight(1));

        for _ in 0..100 {
            if !orchestrator.is_in_flight(1) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(!orchestrator.is_in_flight(1));
        assert_eq!(gauge.get(), 0);
    }

    #[tokio::test]
    async fn failed_launch_calls_run_failed() {
        let run_store = Arc::new(InMemoryRunStore::new());
        seed(&run_store, 2);
        let connector: Arc<dyn Connector> = Arc::new(DirectConnector::new(
            run_store.clone(),
            Arc::new(InMemoryObjectStore::new()),
        ));
        let launcher: Arc<dyn Launcher> = Arc::new(FakeLauncher { should_fail: true });
        let gauge = gauge();
        let orchestrator = Orchestrator::new(connector, launcher, gauge);

        orchestrator.run(2).await.unwrap();
        orchestrator.drain(Duration::from_secs(1)).await;

        assert!(run_store.is_done(2));
        assert!(run_store
            .log_lines(2)
            .iter()
            .any(|line| line.contains("container exploded")));
    }

    #[tokio::test]
    async fn init_failure_calls_run_failed() {
        let run_store = Arc::new(InMemoryRunStore::new());
        seed_with_required_parameter(&run_store, 3);
        let connector: Arc<dyn Connector> = Arc::new(DirectConnector::new(
            run_store.clone(),
            Arc::new(InMemoryObjectStore::new()),
        ));
        let launcher: Arc<dyn Launcher> = Arc::new(FakeLauncher { should_fail: false });
        let orchestrator = Orchestrator::new(connector, launcher, gauge());

        let err = orchestrator.run(3).await.unwrap_err();
        assert!(err.to_string().contains("mode"));

        assert!(run_store.is_done(3));
        assert!(run_store
            .log_lines(3)
            .iter()
            .any(|line| line.contains("mode")));
        assert!(!orchestrator.is_in_flight(3));
    }
}
