use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use connector::Connector;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{DeleteParams, ListParams, LogParams};
use kube::runtime::watcher;
use kube::runtime::watcher::Event;
use kube::{Api, Client};
use parking_lot::Mutex;
use prometheus::IntGauge;

use crate::error::SupervisorError;
use crate::names::{label_selector, pod_name, service_name, LABEL_RUN};

const CLEANUP_DELAY: Duration = Duration::from_secs(60);
const FAILURE_LOG_LINES: i64 = 300;

/// Watches worker pods this control plane scheduled, reconciling their termination back
/// into run state. A pod's `runner` container exiting 0 means the driver already called
/// `run_done` through the remote connector; any other outcome means the pod died before
/// (or instead of) reporting its own result, and the supervisor calls `run_failed` on its
/// behalf.
pub struct PodSupervisor {
    client: Client,
    namespace: String,
    connector: Arc<dyn Connector>,
    in_flight: Mutex<HashSet<u64>>,
    gauge: IntGauge,
}

impl PodSupervisor {
    pub fn new(
        client: Client,
        namespace: String,
        connector: Arc<dyn Connector>,
        gauge: IntGauge,
    ) -> Self {
        PodSupervisor {
            client,
            namespace,
            connector,
            in_flight: Mutex::new(HashSet::new()),
            gauge,
        }
    }

    pub fn in_flight_count(&self) -> i64 {
        self.gauge.get()
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn services(&self) -> Api<Service> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Runs the full-sync-then-watch loop forever, restarting the watch on any
    /// disconnect or error. Intended to be spawned as a single long-lived background
    /// task owned by the binary.
    pub async fn run(&self) -> Result<(), SupervisorError> {
        self.full_sync().await?;

        let watch_config = watcher::Config::default().labels(&label_selector());
        let mut stream = Box::pin(watcher(self.pods(), watch_config.clone()));

        loop {
            match stream.next().await {
                Some(Ok(event)) => {
                    if let Err(err) = self.handle_event(event).await {
                        log::warn!("error reconciling pod event: {err}");
                    }
                }
                Some(Err(err)) => {
                    log::warn!("pod watch stream error, restarting: {err}");
                    stream = Box::pin(watcher(self.pods(), watch_config.clone()));
                }
                None => {
                    log::warn!("pod watch stream ended, restarting");
                    stream = Box::pin(watcher(self.pods(), watch_config.clone()));
                }
            }
        }
    }

    /// Dispatches a raw watch event, unlike `WatchStreamExt::applied_objects()` which
    /// would silently drop `Delete` events — those are exactly the ones step 4's
    /// deletion handling needs to see.
    async fn handle_event(&self, event: Event<Pod>) -> Result<(), SupervisorError> {
        match event {
            Event::Apply(pod) | Event::InitApply(pod) => self.reconcile(&pod).await,
            Event::Delete(pod) => self.reconcile_deleted(&pod).await,
            Event::Init | Event::InitDone => Ok(()),
        }
    }

    async fn full_sync(&self) -> Result<(), SupervisorError> {
        let list_params = ListParams::default().labels(&label_selector());
        let pods = self.pods().list(&list_params).await?;

        let mut live_run_ids = HashSet::new();
        for pod in &pods.items {
            if let Some(run_id) = run_id_of(pod) {
                live_run_ids.insert(run_id);
                self.in_flight.lock().insert(run_id);
                self.gauge.set(self.in_flight.lock().len() as i64);
                self.reconcile(pod).await?;
            }
        }

        let services = self.services().list(&list_params).await?;
        for service in &services.items {
            if let Some(run_id) = run_id_of_service(service) {
                if !live_run_ids.contains(&run_id) {
                    log::info!("deleting orphaned service for run {run_id}");
                    delete_ignoring_not_found(&self.services(), &service_name(run_id)).await?;
                }
            }
        }

        Ok(())
    }

    async fn reconcile(&self, pod: &Pod) -> Result<(), SupervisorError> {
        if pod.metadata.deletion_timestamp.is_some() {
            return Ok(());
        }
        let Some(run_id) = run_id_of(pod) else {
            return Ok(());
        };

        let Some(terminated) = terminated_container(pod) else {
            return Ok(());
        };

        if self.in_flight.lock().remove(&run_id) {
            self.gauge.dec();
        }

        let runner_succeeded = terminated.name == "runner" && terminated.exit_code == 0;

        if terminated.exit_code != 0 {
            let log_tail = self
                .pods()
                .logs(
                    &pod_name(run_id),
                    &LogParams {
                        container: Some(terminated.name.clone()),
                        tail_lines: Some(FAILURE_LOG_LINES),
                        ..Default::default()
                    },
                )
                .await
                .unwrap_or_else(|err| format!("(could not fetch log: {err})"));
            for line in log_tail.lines() {
                log::warn!("run {run_id} [{}]: {line}", terminated.name);
            }
        }

        if !runner_succeeded {
            self.connector.run_failed(run_id, "Internal error").await?;
        }

        self.schedule_cleanup(run_id);
        Ok(())
    }

    /// A pod disappearing without ever reporting a terminated container — an operator
    /// running `kubectl delete pod`, a node eviction — leaves the run with no other way
    /// to learn it's over, so it's failed on the run's behalf. A no-op if `reconcile`
    /// already handled this run's normal termination: the pod's own scheduled cleanup
    /// deletes it afterwards, which would otherwise double-report the failure.
    async fn reconcile_deleted(&self, pod: &Pod) -> Result<(), SupervisorError> {
        let Some(run_id) = run_id_of(pod) else {
            return Ok(());
        };

        if !self.in_flight.lock().remove(&run_id) {
            return Ok(());
        }
        self.gauge.dec();

        self.connector.run_failed(run_id, "Internal error").await?;
        delete_ignoring_not_found(&self.services(), &service_name(run_id)).await?;
        Ok(())
    }

    fn schedule_cleanup(&self, run_id: u64) {
        let pods = self.pods();
        let services = self.services();
        tokio::spawn(async move {
            tokio::time::sleep(CLEANUP_DELAY).await;
            if let Err(err) = delete_ignoring_not_found(&pods, &pod_name(run_id)).await {
                log::warn!("failed to delete pod for run {run_id}: {err}");
            }
            if let Err(err) = delete_ignoring_not_found(&services, &service_name(run_id)).await {
                log::warn!("failed to delete service for run {run_id}: {err}");
            }
        });
    }
}

struct TerminatedContainer {
    name: String,
    exit_code: i32,
}

fn terminated_container(pod: &Pod) -> Option<TerminatedContainer> {
    let statuses = pod.status.as_ref()?.container_statuses.as_ref()?;
    for status in statuses {
        if let Some(state) = &status.state {
            if let Some(terminated) = &state.terminated {
                return Some(TerminatedContainer {
                    name: status.name.clone(),
                    exit_code: terminated.exit_code,
                });
            }
        }
    }
    None
}

fn run_id_of(pod: &Pod) -> Option<u64> {
    pod.metadata
        .labels
        .as_ref()?
        .get(LABEL_RUN)?
        .parse()
        .ok()
}

fn run_id_of_service(service: &Service) -> Option<u64> {
    service
        .metadata
        .labels
        .as_ref()?
        .get(LABEL_RUN)?
        .parse()
        .ok()
}

async fn delete_ignoring_not_found<K>(api: &Api<K>, name: &str) -> Result<(), SupervisorError>
where
    K: kube::Resource + Clone + std::fmt::Debug + serde::de::DeserializeOwned,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ref response)) if response.code == 404 => Ok(()),
        Err(err) => Err(err.into()),
    }
}
