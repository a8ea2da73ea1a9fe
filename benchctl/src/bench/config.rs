//! Deployment-wide config (`config/common_config.json`)

use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::BenchError;
use crate::filesys::file::File;

pub const MAINTENANCE_MODE: &str = "maintenance_mode";
pub const PAUSE_SCHEDULER: &str = "pause_scheduler";
pub const RELEASE_BENCH: &str = "release_bench";
pub const SHALLOW_CLONE: &str = "shallow_clone";
pub const REBASE_ON_PULL: &str = "rebase_on_pull";
pub const RESTART_SUPERVISOR_ON_UPDATE: &str = "restart_supervisor_on_update";
pub const RESTART_SYSTEMD_ON_UPDATE: &str = "restart_systemd_on_update";
pub const SUPERVISOR_RESTART_CMD: &str = "supervisor_restart_cmd";

/// Typed view over the persisted key-value config.
///
/// Unknown keys are kept as-is so a write never drops settings owned by
/// the framework or edited by hand.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BenchConfig {
    values: Map<String, Value>,
}

impl BenchConfig {
    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Truthiness of a key, `default` when absent
    pub fn flag(&self, key: &str, default: bool) -> bool {
        self.values.get(key).map(truthy).unwrap_or(default)
    }

    pub fn release_bench(&self) -> bool {
        self.flag(RELEASE_BENCH, false)
    }

    pub fn shallow_clone(&self) -> bool {
        self.flag(SHALLOW_CLONE, true)
    }

    pub fn rebase_on_pull(&self) -> bool {
        self.flag(REBASE_ON_PULL, false)
    }

    pub fn restart_supervisor_on_update(&self) -> bool {
        self.flag(RESTART_SUPERVISOR_ON_UPDATE, false)
    }

    pub fn restart_systemd_on_update(&self) -> bool {
        self.flag(RESTART_SYSTEMD_ON_UPDATE, false)
    }

    pub fn maintenance_mode(&self) -> bool {
        self.flag(MAINTENANCE_MODE, false)
    }

    pub fn pause_scheduler(&self) -> bool {
        self.flag(PAUSE_SCHEDULER, false)
    }

    pub fn supervisor_restart_cmd(&self) -> Option<&str> {
        self.get_str(SUPERVISOR_RESTART_CMD).filter(|cmd| !cmd.trim().is_empty())
    }

    /// Both restart policies at once is a configuration error
    pub fn validate_restart_policy(&self) -> Result<(), BenchError> {
        if self.restart_supervisor_on_update() && self.restart_systemd_on_update() {
            return Err(BenchError::ConflictingRestartPolicy);
        }
        Ok(())
    }

    /// Shallow-merge `updates` over the current values
    pub fn merge(&mut self, updates: Map<String, Value>) {
        for (key, value) in updates {
            self.values.insert(key, value);
        }
    }
}

/// The two flags that bracket an update
pub fn maintenance_updates(on: bool) -> Map<String, Value> {
    let flag = Value::from(u8::from(on));
    let mut updates = Map::new();
    updates.insert(MAINTENANCE_MODE.to_string(), flag.clone());
    updates.insert(PAUSE_SCHEDULER.to_string(), flag);
    updates
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes"),
        _ => false,
    }
}

/// Persistence for [`BenchConfig`]
#[derive(Debug, Clone)]
pub struct ConfigStore {
    file: File,
}

impl ConfigStore {
    pub fn new(file: File) -> Self {
        Self { file }
    }

    /// Load the persisted config; a missing file is an empty config
    pub async fn load(&self) -> Result<BenchConfig, BenchError> {
        match self.file.read_optional().await? {
            None => Ok(BenchConfig::default()),
            Some(contents) if contents.trim().is_empty() => Ok(BenchConfig::default()),
            Some(contents) => {
                let value: Value = serde_json::from_str(&contents)?;
                match value {
                    Value::Object(map) => Ok(BenchConfig::from_map(map)),
                    other => Err(BenchError::ConfigError(format!(
                        "{} must hold a JSON object, found {}",
                        self.file.path().display(),
                        other
                    ))),
                }
            }
        }
    }

    /// Read-modify-write: reload from disk, merge, persist.
    pub async fn update(&self, updates: Map<String, Value>) -> Result<BenchConfig, BenchError> {
        let mut config = self.load().await?;
        debug!(keys = ?updates.keys().collect::<Vec<_>>(), "Updating bench config");
        config.merge(updates);
        self.file.write_json(config.as_map()).await?;
        Ok(config)
    }
}
