//! Lenient accessors over the system parameters document.
//!
//! Keys are addressed as `"section.KEY"`. A missing or wrong-typed value never
//! fails the caller: it is logged and the default is returned, which leaves the
//! dependent feature disabled.

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;
use tracing::warn;

pub const DEFAULT_PARAMS_FILE: &str = "/usr/local/bin/xoss-system-parameters.json";

pub fn load(path: impl AsRef<Path>) -> Result<Value> {
    let path = path.as_ref();
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("read system parameters {}", path.display()))?;
    serde_json::from_str(&s).context("parse system parameters json")
}

pub fn lookup<'a>(root: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.').try_fold(root, |v, part| v.get(part))
}

/// Feature switches: absence is worth a warning because it silently disables something.
pub fn bool_param(root: &Value, key: &str, default: bool) -> bool {
    match lookup(root, key) {
        Some(Value::Bool(b)) => *b,
        Some(other) => {
            warn!("param {} is not a boolean ({}), using {}", key, other, default);
            default
        }
        None => {
            warn!("param {} missing, using {}", key, default);
            default
        }
    }
}

pub fn str_param(root: &Value, key: &str) -> Option<String> {
    match lookup(root, key)? {
        Value::String(s) => Some(s.clone()),
        other => {
            warn!("param {} is not a string ({}), ignored", key, other);
            None
        }
    }
}

pub fn u64_param(root: &Value, key: &str, default: u64) -> u64 {
    match lookup(root, key) {
        None => default,
        Some(v) => v.as_u64().unwrap_or_else(|| {
            warn!("param {} is not a non-negative integer ({}), using {}", key, v, default);
            default
        }),
    }
}

pub fn array_param<'a>(root: &'a Value, key: &str) -> Option<&'a [Value]> {
    match lookup(root, key)? {
        Value::Array(items) => Some(items.as_slice()),
        other => {
            warn!("param {} is not a list ({}), ignored", key, other);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_lookup_and_defaults() {
        let doc = json!({
            "camera_params": { "CAMERA_AUTOSTART": true, "LOG_FILE": "/var/log/cam.log" },
            "network_watchdog_params": { "NETWORK_FAILSAFE_ENABLED": "yes", "CHECK_INTERVAL_S": 4 }
        });

        assert!(bool_param(&doc, "camera_params.CAMERA_AUTOSTART", false));
        assert!(!bool_param(&doc, "network_watchdog_params.NETWORK_FAILSAFE_ENABLED", false));
        assert!(!bool_param(&doc, "hmi_params.ENABLED", false));
        assert_eq!(str_param(&doc, "camera_params.LOG_FILE").as_deref(), Some("/var/log/cam.log"));
        assert_eq!(str_param(&doc, "camera_params.CAMERA_AUTOSTART"), None);
        assert_eq!(u64_param(&doc, "network_watchdog_params.CHECK_INTERVAL_S", 2), 4);
        assert_eq!(u64_param(&doc, "network_watchdog_params.MAX_FAILURES", 3), 3);
        assert!(array_param(&doc, "network_watchdog_params.NETWORK_FAILSAFE_MODES_SEQUENCE").is_none());
    }
}
