pub const LABEL_APP: &str = "app";
pub const LABEL_APP_VALUE: &str = "run";
pub const LABEL_RUN: &str = "run";
pub const INTERNAL_PROXY_PORT: u16 = 5597;

pub fn pod_name(run_id: u64) -> String {
    format!("run-{run_id}")
}

pub fn service_name(run_id: u64) -> String {
    format!("run-{run_id}")
}

pub fn label_selector() -> String {
    format!("{LABEL_APP}={LABEL_APP_VALUE}")
}
