use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::info;

use crate::bench::Bench;
use crate::errors::BenchError;
use crate::patches::runner::{Patch, PatchOutcome};

/// Legacy redis keys and their replacements, with the default used when
/// neither is set
const REDIS_KEYS: [(&str, &str, &str); 3] = [
    ("celery_broker", "redis_queue", "redis://localhost:6379"),
    ("async_redis_server", "redis_socketio", "redis://localhost:12311"),
    ("cache_redis_server", "redis_cache", "redis://localhost:11311"),
];

/// Fold the pre-v4 `<bench>/config.json` into the common config.
pub struct DeprecateOldConfig;

#[async_trait]
impl Patch for DeprecateOldConfig {
    fn identifier(&self) -> &str {
        "bench.patches.v3.deprecate_old_config"
    }

    async fn execute(&self, bench: &Bench) -> Result<PatchOutcome, BenchError> {
        let legacy = bench.layout().legacy_config_file();
        let Some(contents) = legacy.read_optional().await? else {
            return Ok(PatchOutcome::AppliedWithSkipMarker);
        };

        let legacy_config = match serde_json::from_str::<Value>(&contents)? {
            Value::Object(map) => map,
            _ => {
                return Err(BenchError::ConfigError(format!(
                    "{} is not a JSON object",
                    legacy.path().display()
                )))
            }
        };

        let mut config = bench.config().await?.as_map().clone();
        config.extend(legacy_config);
        rename_redis_keys(&mut config);

        // Overwrite the whole mapping: renamed keys must disappear.
        bench
            .layout()
            .common_config_file()
            .write_json(&config)
            .await?;
        legacy.delete().await?;

        info!(path = %legacy.path().display(), "Merged legacy bench config into common config");
        Ok(PatchOutcome::Applied)
    }
}

fn rename_redis_keys(config: &mut Map<String, Value>) {
    for (from, to, default) in REDIS_KEYS {
        if let Some(value) = config.remove(from) {
            config.insert(to.to_string(), value);
        } else if !config.contains_key(to) {
            config.insert(to.to_string(), Value::from(default));
        }
    }
}
