//! Configuration for the porter core.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the porter trust core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Base URL of the organization backend.
    pub backend_url: String,
    /// Request timeout for backend calls.
    pub request_timeout: Duration,
    /// Interval between periodic sync cycles while online.
    pub sync_interval: Duration,
    /// Root directory for durable state (`key/`, `queue/`, `revocations/`).
    pub data_dir: PathBuf,
    /// Identifier of this device, assigned at enrollment.
    pub device_id: String,
    /// Identifier of the porter operating the device.
    pub porter_id: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            backend_url: "https://api.porter.example".into(),
            request_timeout: Duration::from_secs(30),
            sync_interval: Duration::from_secs(300),
            data_dir: PathBuf::from("porter-data"),
            device_id: "unenrolled".into(),
            porter_id: "unassigned".into(),
        }
    }
}
