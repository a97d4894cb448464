//! Server configuration.
//!
//! Configuration is a YAML file with three sections (`app`, `server`,
//! `pool`), every field optional. Coroutine stack size comes from the
//! `BANYAN_STACK_SIZE` environment variable instead, so it can be tuned per
//! deployment without touching the config file.
//!
//! ```yaml
//! app:
//!   debug: false
//!   allow_origin: ["https://example.com"]
//!   auto_reload: true
//!   watch_paths: ["src"]
//! server:
//!   addr: "0.0.0.0:9501"
//!   worker_num: 4
//!   task_num: 16
//! pool:
//!   default_init_list: ["mysql", "redis"]
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Application-level switches.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppSection {
    /// Debug mode: faults come back as 200 responses carrying the message
    /// and a trace instead of bare 4xx/5xx bodies.
    pub debug: bool,
    /// Origins granted cross-origin access (matched case-insensitively).
    pub allow_origin: Vec<String>,
    /// Arm the hot-reload watcher on worker 0.
    pub auto_reload: bool,
    /// Paths scanned by the hot-reload watcher.
    pub watch_paths: Vec<PathBuf>,
}

/// Listener and worker-pool sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub addr: String,
    /// Number of request workers.
    pub worker_num: usize,
    /// Number of task workers; defaults to `worker_num * 4`.
    pub task_num: Option<usize>,
    /// Binding-table rows reserved per worker.
    pub bind_capacity_per_worker: usize,
    /// Reload-table rows reserved per worker.
    pub reload_capacity_per_worker: usize,
    /// Hot-reload scan interval in milliseconds.
    pub reload_interval_ms: u64,
    /// Directory served for the static favicon asset.
    pub public_dir: PathBuf,
    /// Where to record the server pid, if anywhere.
    pub pid_file: Option<PathBuf>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:9501".to_string(),
            worker_num: 4,
            task_num: None,
            bind_capacity_per_worker: 2000,
            reload_capacity_per_worker: 500,
            reload_interval_ms: 1000,
            public_dir: PathBuf::from("public"),
            pid_file: None,
        }
    }
}

/// Connection pools opened once by worker 0 at startup.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PoolSection {
    pub default_init_list: Vec<String>,
}

/// Full server configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub server: ServerSection,
    pub pool: PoolSection,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: AppConfig = serde_yaml::from_str(&raw)?;
        Ok(config)
    }

    /// Effective task-worker count.
    pub fn task_num(&self) -> usize {
        self.server.task_num.unwrap_or(self.server.worker_num * 4)
    }

    /// Total binding-table capacity.
    pub fn bind_capacity(&self) -> usize {
        self.server.worker_num * self.server.bind_capacity_per_worker
    }

    /// Total reload-table capacity.
    pub fn reload_capacity(&self) -> usize {
        self.server.worker_num * self.server.reload_capacity_per_worker
    }
}

/// Coroutine stack size from `BANYAN_STACK_SIZE` (decimal or `0x`-hex).
///
/// Defaults to 64 KiB, enough for the dispatch pipeline plus a typical
/// handler call chain.
pub fn stack_size() -> usize {
    std::env::var("BANYAN_STACK_SIZE")
        .ok()
        .and_then(|s| {
            if let Some(hex) = s.strip_prefix("0x") {
                usize::from_str_radix(hex, 16).ok()
            } else {
                s.parse().ok()
            }
        })
        .unwrap_or(0x10000)
}
