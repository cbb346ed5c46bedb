use std::collections::{HashMap, VecDeque};
use std::io::Read;
use std::sync::Arc;

use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, UploadToContainerOptions, WaitContainerOptions,
};
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use connector::{batch_log_until_exit, Connector, RunInfo};
use futures::StreamExt;
use parking_lot::Mutex;

use crate::client::DockerOnceCell;
use crate::error::DriverError;
use crate::image_cache::ImagePullCache;

const REGISTRY_ENV: &str = "REGISTRY";
const DEFAULT_REGISTRY: &str = "localhost:5000";

/// Runs a single experiment bundle in a container on this host, following the sequence
/// of the original Docker runner: acquire the image, stage inputs, run, collect outputs,
/// always clean up. Never calls `run_failed` itself — the caller decides what a returned
/// `DriverError` means for the run's final state.
pub struct ContainerDriver {
    docker: DockerOnceCell,
    image_pull_cache: ImagePullCache,
    http: reqwest::Client,
}

impl ContainerDriver {
    pub fn new() -> Self {
        ContainerDriver {
            docker: DockerOnceCell::new(),
            image_pull_cache: ImagePullCache::new(),
            http: reqwest::Client::new(),
        }
    }

    /// Runs `run_info`'s bundle, binding exposed ports to `bind_host` (`0.0.0.0` for the
    /// single-host orchestrator, `127.0.0.1` inside a worker pod where the proxy sidecar
    /// handles external reachability).
    pub async fn run(
        &self,
        connector: &dyn Connector,
        run_info: &RunInfo,
        bind_host: &str,
    ) -> Result<(), DriverError> {
        let required = run_info.required_extras();
        if !required.is_empty() {
            return Err(DriverError::UnsupportedExtraConfig(required));
        }

        let docker = self.docker.get().await?;
        let image = fully_qualified_image_name(&run_info.experiment_hash);

        connector
            .run_progress(run_info.id, 0, "Pulling image")
            .await?;
        self.image_pull_cache.pull(docker, &image).await?;

        let container_name = format!("run_{}", run_info.id);
        create_container(docker, &container_name, &image, run_info, bind_host).await?;

        let result = self.run_in_container(docker, connector, run_info, &container_name).await;

        let _ = docker
            .remove_container(
                &container_name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await;

        result
    }

    async fn run_in_container(
        &self,
        docker: &Docker,
        connector: &dyn Connector,
        run_info: &RunInfo,
        container_name: &str,
    ) -> Result<(), DriverError> {
        self.load_input_files(docker, run_info, container_name).await?;

        connector.run_started(run_info.id).await?;

        docker.start_container::<String>(container_name, None).await?;

        let exit_code = self
            .stream_logs_until_done(docker, connector, run_info.id, container_name)
            .await?;
        if exit_code != 0 {
            return Err(DriverError::ScriptFailed(exit_code));
        }
        connector.run_done(run_info.id).await?;

        let warnings = self.upload_output_files(docker, connector, run_info, container_name).await?;
        if !warnings.is_empty() {
            connector.log_multiple(run_info.id, &warnings).await?;
        }

        Ok(())
    }

    async fn stream_logs_until_done(
        &self,
        docker: &Docker,
        connector: &dyn Connector,
        run_id: u64,
        container_name: &str,
    ) -> Result<i64, DriverError> {
        let buffer = Arc::new(Mutex::new(VecDeque::new()));
        let mut log_stream = docker.logs(
            container_name,
            Some(LogsOptions::<String> {
                follow: true,
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );
        let reader_buffer = buffer.clone();
        let reader = tokio::spawn(async move {
            while let Some(chunk) = log_stream.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message } | LogOutput::StdErr { message }) => {
                        for line in String::from_utf8_lossy(&message).lines() {
                            log::info!("> {line}");
                            reader_buffer.lock().push_back(line.to_string());
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        log::warn!("error streaming container logs: {err}");
                        break;
                    }
                }
            }
        });

        let wait_stream = docker.wait_container(container_name, None::<WaitContainerOptions<String>>);
        let interval = connector.log_batch_interval();
        batch_log_until_exit(
            connector,
            run_id,
            &buffer,
            interval,
            ContainerExitWaiter { wait_stream },
            || reader.is_finished(),
        )
        .await
    }

    async fn load_input_files(
        &self,
        docker: &Docker,
        run_info: &RunInfo,
        container_name: &str,
    ) -> Result<(), DriverError> {
        for input in &run_info.inputs {
            let link = input
                .link
                .as_ref()
                .expect("init_run_get_info always fills in input links");
            log::info!("downloading input file {}", input.name);
            let bytes = self.http.get(link).send().await?.bytes().await?;

            let mut builder = tar::Builder::new(Vec::new());
            let mut header = tar::Header::new_gnu();
            header.set_size(bytes.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, input.path.trim_start_matches('/'), &bytes[..])?;
            let tar_bytes = builder.into_inner()?;

            docker
                .upload_to_container(
                    container_name,
                    Some(UploadToContainerOptions {
                        path: "/",
                        ..Default::default()
                    }),
                    tar_bytes.into(),
                )
                .await?;
        }
        Ok(())
    }

    async fn upload_output_files(
        &self,
        docker: &Docker,
        connector: &dyn Connector,
        run_info: &RunInfo,
        container_name: &str,
    ) -> Result<Vec<String>, DriverError> {
        let mut warnings = Vec::new();
        for output in &run_info.outputs {
            log::info!("fetching output file {}", output.name);
            let chunks: Result<Vec<bytes::Bytes>, _> = docker
                .download_from_container(
                    container_name,
                    Some(DownloadFromContainerOptions {
                        path: output.path.clone(),
                    }),
                )
                .collect::<Vec<_>>()
                .await
                .into_iter()
                .collect();
            let chunks = match chunks {
                Ok(chunks) => chunks,
                Err(_) => {
                    warnings.push(format!("Couldn't get output {}", output.name));
                    continue;
                }
            };
            let tar_bytes: Vec<u8> = chunks.into_iter().flatten().collect();

            let mut archive = tar::Archive::new(&tar_bytes[..]);
            let mut file_bytes = None;
            for entry in archive.entries()? {
                let mut entry = entry?;
                let mut data = Vec::new();
                entry.read_to_end(&mut data)?;
                file_bytes = Some(data);
                break;
            }
            let Some(file_bytes) = file_bytes else {
                warnings.push(format!("Couldn't get output {}", output.name));
                continue;
            };

            connector
                .upload_output_file(run_info.id, &output.name, file_bytes, None)
                .await?;
        }
        Ok(warnings)
    }
}

impl Default for ContainerDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn fully_qualified_image_name(experiment_hash: &str) -> String {
    let registry = std::env::var(REGISTRY_ENV).unwrap_or_else(|_| DEFAULT_REGISTRY.to_string());
    format!("{registry}/rpuz_exp_{experiment_hash}")
}

/// Turns the `cmdline_<N>` parameters into the `cmd <line> run <N>` arguments the
/// experiment image's entrypoint expects, in ascending order of `N`.
fn cmdline_args(parameters: &std::collections::BTreeMap<String, String>) -> Vec<String> {
    let mut numbered: Vec<(u64, &String)> = parameters
        .iter()
        .filter_map(|(name, value)| {
            name.strip_prefix("cmdline_")
                .and_then(|n| n.parse::<u64>().ok())
                .map(|n| (n, value))
        })
        .collect();
    numbered.sort_by_key(|(n, _)| *n);

    let mut cmd = Vec::with_capacity(numbered.len() * 4);
    for (index, value) in numbered {
        cmd.push("cmd".to_string());
        cmd.push(value.clone());
        cmd.push("run".to_string());
        cmd.push(index.to_string());
    }
    cmd
}

async fn create_container(
    docker: &Docker,
    container_name: &str,
    image: &str,
    run_info: &RunInfo,
    bind_host: &str,
) -> Result<(), DriverError> {
    log::info!("creating container {container_name} with image {image}");

    let mut exposed_ports = HashMap::new();
    let mut port_bindings = HashMap::new();
    for port in &run_info.ports {
        let key = format!("{}/tcp", port.port_number);
        exposed_ports.insert(key.clone(), HashMap::new());
        port_bindings.insert(
            key,
            Some(vec![PortBinding {
                host_ip: Some(bind_host.to_string()),
                host_port: Some(port.port_number.to_string()),
            }]),
        );
    }

    let cmd = cmdline_args(&run_info.parameters);

    let config = Config {
        image: Some(image.to_string()),
        cmd: Some(cmd),
        exposed_ports: Some(exposed_ports),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        host_config: Some(HostConfig {
            port_bindings: Some(port_bindings),
            ..Default::default()
        }),
        ..Default::default()
    };

    let options = Some(CreateContainerOptions {
        name: container_name,
        platform: None,
    });

    match docker.create_container(options.clone(), config.clone()).await {
        Ok(_) => Ok(()),
        Err(err) if is_transient(&err) => {
            log::warn!("transient error creating container, retrying once: {err}");
            docker.create_container(options, config).await?;
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// A connection hiccup talking to the daemon, as opposed to a rejection of the request
/// itself (bad image, name conflict, ...), which retrying would only repeat.
fn is_transient(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::HyperResponseError { .. }
            | bollard::errors::Error::RequestTimeoutError
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_name_uses_registry_env_var_or_default() {
        std::env::remove_var(REGISTRY_ENV);
        assert_eq!(
            fully_qualified_image_name("deadbeef"),
            "localhost:5000/rpuz_exp_deadbeef"
        );
    }

    #[test]
    fn cmdline_args_are_ordered_by_index_not_lexically() {
        let mut parameters = std::collections::BTreeMap::new();
        parameters.insert("cmdline_00002".to_string(), "second.sh".to_string());
        parameters.insert("cmdline_00000".to_string(), "first.sh".to_string());
        parameters.insert("mode".to_string(), "fast".to_string());

        assert_eq!(
            cmdline_args(&parameters),
            vec!["cmd", "first.sh", "run", "0", "cmd", "second.sh", "run", "2"]
        );
    }
}
