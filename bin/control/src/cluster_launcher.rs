use std::collections::BTreeMap;

use async_trait::async_trait;
use connector::RunInfo;
use k8s_openapi::api::core::v1::{Pod, Service, ServicePort, ServiceSpec};
use kube::api::{Api, ObjectMeta, PostParams};
use kube::Client;
use orchestrator::{LaunchError, Launcher};

use supervisor::{pod_name, service_name, INTERNAL_PROXY_PORT, LABEL_APP, LABEL_APP_VALUE, LABEL_RUN};

/// Schedules a worker pod for each run, following the reference cluster runner's own
/// pod-and-service creation. The runner container's own entrypoint (`reproserver-worker`)
/// does the actual driving; this launcher only gets it scheduled.
pub struct ClusterLauncher {
    client: Client,
    namespace: String,
    pod_spec: serde_yaml::Value,
    override_runner_image: Option<String>,
}

impl ClusterLauncher {
    pub fn new(
        client: Client,
        namespace: String,
        pod_spec: serde_yaml::Value,
        override_runner_image: Option<String>,
    ) -> Self {
        ClusterLauncher {
            client,
            namespace,
            pod_spec,
            override_runner_image,
        }
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn services(&self) -> Api<Service> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn labels(run_id: u64) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_APP.to_string(), LABEL_APP_VALUE.to_string()),
            (LABEL_RUN.to_string(), run_id.to_string()),
        ])
    }

    fn build_pod(&self, run_id: u64) -> Result<Pod, LaunchError> {
        let mut spec_value = self.pod_spec.clone();
        append_runner_arg(&mut spec_value, run_id, self.override_runner_image.as_deref())?;
        let spec = serde_yaml::from_value(spec_value)
            .map_err(|err| LaunchError(Box::new(err)))?;

        Ok(Pod {
            metadata: ObjectMeta {
                name: Some(pod_name(run_id)),
                labels: Some(Self::labels(run_id)),
                ..Default::default()
            },
            spec: Some(spec),
            ..Default::default()
        })
    }

    fn build_service(&self, run_id: u64) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(service_name(run_id)),
                labels: Some(Self::labels(run_id)),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(Self::labels(run_id)),
                ports: Some(vec![ServicePort {
                    protocol: Some("TCP".to_string()),
                    port: INTERNAL_PROXY_PORT as i32,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Launcher for ClusterLauncher {
    async fn launch(&self, run_info: &RunInfo) -> Result<(), LaunchError> {
        let run_id = run_info.id;
        let pod = self.build_pod(run_id)?;
        self.pods()
            .create(&PostParams::default(), &pod)
            .await
            .map_err(|err| LaunchError(Box::new(err)))?;
        log::info!("pod created: {}", pod_name(run_id));

        let service = self.build_service(run_id);
        self.services()
            .create(&PostParams::default(), &service)
            .await
            .map_err(|err| LaunchError(Box::new(err)))?;
        log::info!("service created: {}", service_name(run_id));

        Ok(())
    }
}

/// Appends the run id to the `runner` container's args, and applies the image override
/// if configured, mirroring the reference pod-spec patching step.
fn append_runner_arg(
    spec_value: &mut serde_yaml::Value,
    run_id: u64,
    override_image: Option<&str>,
) -> Result<(), LaunchError> {
    let containers = spec_value
        .get_mut("containers")
        .and_then(|v| v.as_sequence_mut())
        .ok_or_else(|| {
            LaunchError(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "pod spec has no containers list",
            )))
        })?;

    for container in containers {
        if container.get("name").and_then(|v| v.as_str()) == Some("runner") {
            let args = container
                .as_mapping_mut()
                .and_then(|m| m.get_mut("args"))
                .and_then(|v| v.as_sequence_mut());
            if let Some(args) = args {
                args.push(serde_yaml::Value::String(run_id.to_string()));
            }
            if let Some(image) = override_image {
                if let Some(mapping) = container.as_mapping_mut() {
                    mapping.insert(
                        serde_yaml::Value::String("image".to_string()),
                        serde_yaml::Value::String(image.to_string()),
                    );
                }
            }
        }
    }

    Ok(())
}
