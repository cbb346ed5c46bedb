use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single parameter declared by a bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub optional: bool,
    pub default: Option<String>,
    pub description: Option<String>,
}

/// A path a bundle declares inside its container, optionally readable (input) and/or
/// writable (output).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSpec {
    pub name: String,
    pub path: String,
    pub is_input: bool,
    pub is_output: bool,
}

/// A network port a run wants exposed from its container.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Port {
    pub port_number: u16,
    #[serde(default = "default_scheme")]
    pub scheme: PortScheme,
}

fn default_scheme() -> PortScheme {
    PortScheme::Http
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PortScheme {
    Http,
    Tcp,
}

/// An input file resolved for a specific run: its content address, size, destination
/// path inside the container, and (once vended) a signed download link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputFile {
    pub name: String,
    pub hash: String,
    pub size: u64,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// A declared output file location: where the driver should look for it inside the
/// container once the run finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    pub path: String,
}

/// Everything the container driver needs to run a bundle, as produced by
/// `Connector::init_run_get_info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    pub id: u64,
    pub experiment_hash: String,
    pub parameters: BTreeMap<String, String>,
    pub inputs: Vec<InputFile>,
    pub outputs: Vec<OutputSpec>,
    pub ports: Vec<Port>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_config: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment_url: Option<String>,
}

impl RunInfo {
    /// `extra_config.required`, if any: feature names the driver is expected to honour.
    pub fn required_extras(&self) -> Vec<String> {
        self.extra_config
            .as_ref()
            .and_then(|v| v.get("required"))
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A record of a declared run, as held by a `RunStore`. This is the input to
/// `init_run_get_info`'s validation before it becomes a `RunInfo`.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: u64,
    pub experiment_hash: String,
    pub parameter_specs: Vec<ParameterSpec>,
    pub path_specs: Vec<PathSpec>,
    pub parameter_values: BTreeMap<String, String>,
    pub input_files: Vec<SubmittedInputFile>,
    pub ports: Vec<Port>,
    pub extra_config: Option<serde_json::Value>,
    pub started: bool,
    pub done: bool,
}

#[derive(Debug, Clone)]
pub struct SubmittedInputFile {
    pub name: String,
    pub hash: String,
    pub size: u64,
}
