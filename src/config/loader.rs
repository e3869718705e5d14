//! Layered configuration loading.
//!
//! The effective configuration is the compiled-in defaults with a stack of
//! overlays applied in order:
//!
//! 1. `RHYTHM_FISH_CONFIG_JSON` (inline JSON in the environment)
//! 2. the file named by `RHYTHM_FISH_CONFIG_PATH`
//! 3. `config.json` in the current working directory
//! 4. `RHYTHM_FISH__*` variables, `__` separating nesting levels
//!    (`RHYTHM_FISH__PUNCH__PORT=9061`)
//! 5. the deployment-legacy variables `PUNCH_PORT`, `RELAY_PORT`,
//!    `FLY_APP_NAME`, `FLY_PUBLIC_IP`, `FLY_ALLOC_ID`
//!
//! A source that cannot be read or parsed is reported to stderr and
//! skipped; `load()` always returns a usable `Config`.

use std::path::Path;

use serde_json::{Map, Value};

use super::validation::validate_config;
use super::Config;

/// Direct environment variables kept for deployment compatibility, with the
/// config path each one lands on.
const LEGACY_ENV_VARS: [(&str, &[&str]); 5] = [
    ("PUNCH_PORT", &["punch", "port"]),
    ("RELAY_PORT", &["relay", "port"]),
    ("FLY_APP_NAME", &["diagnostics", "fly_app_name"]),
    ("FLY_PUBLIC_IP", &["diagnostics", "fly_public_ip"]),
    ("FLY_ALLOC_ID", &["diagnostics", "fly_alloc_id"]),
];

#[must_use]
pub fn load() -> Config {
    let defaults = Config::default();
    let mut document = serde_json::to_value(&defaults).unwrap_or(Value::Null);

    for layer in collect_layers() {
        document = overlay(document, layer);
    }

    let config = match serde_json::from_value::<Config>(document) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to deserialize config; using defaults: {err}");
            defaults
        }
    };

    // Warn-only here; main re-validates and propagates.
    if let Err(err) = validate_config(&config) {
        eprintln!("Configuration validation error:\n{err}");
    }

    config
}

/// Gather every overlay that is present, lowest precedence first.
fn collect_layers() -> Vec<Value> {
    let mut layers = Vec::new();

    if let Ok(inline) = std::env::var("RHYTHM_FISH_CONFIG_JSON") {
        if !inline.trim().is_empty() {
            match serde_json::from_str(&inline) {
                Ok(value) => layers.push(value),
                Err(err) => eprintln!("Ignoring RHYTHM_FISH_CONFIG_JSON: {err}"),
            }
        }
    }

    if let Ok(path) = std::env::var("RHYTHM_FISH_CONFIG_PATH") {
        if let Some(value) = read_json_file(Path::new(&path)) {
            layers.push(value);
        }
    }

    if let Some(value) = read_json_file(Path::new("config.json")) {
        layers.push(value);
    }

    layers.push(prefixed_env_layer());
    layers.push(legacy_env_layer());
    layers
}

/// Read and parse one JSON file, or `None` if it is absent or unusable.
fn read_json_file(path: &Path) -> Option<Value> {
    if path.as_os_str().is_empty() || !path.is_file() {
        return None;
    }
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            eprintln!("Failed to read config file {}: {err}", path.display());
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(err) => {
            eprintln!("Ignoring config file {}: {err}", path.display());
            None
        }
    }
}

/// Apply one overlay on top of a base document. Objects merge key by key;
/// any other pairing is replaced by the overlay side.
fn overlay(base: Value, top: Value) -> Value {
    match (base, top) {
        (Value::Object(mut merged), Value::Object(top_map)) => {
            for (key, top_value) in top_map {
                let value = match merged.remove(&key) {
                    Some(base_value) => overlay(base_value, top_value),
                    None => top_value,
                };
                merged.insert(key, value);
            }
            Value::Object(merged)
        }
        (_, top) => top,
    }
}

/// Fold all `RHYTHM_FISH__*` variables into one overlay document.
fn prefixed_env_layer() -> Value {
    let mut layer = Value::Object(Map::new());
    for (key, raw) in std::env::vars() {
        let Some(dotted) = key.strip_prefix("RHYTHM_FISH__") else {
            continue;
        };
        let segments: Vec<String> = dotted
            .split("__")
            .filter(|segment| !segment.is_empty())
            .map(str::to_ascii_lowercase)
            .collect();
        if segments.is_empty() {
            continue;
        }
        let branch = branch_for(&segments, typed_scalar(raw.trim()));
        layer = overlay(layer, branch);
    }
    layer
}

/// The legacy variables, folded the same way.
fn legacy_env_layer() -> Value {
    let mut layer = Value::Object(Map::new());
    for (name, path) in LEGACY_ENV_VARS {
        let Ok(raw) = std::env::var(name) else {
            continue;
        };
        if raw.trim().is_empty() {
            continue;
        }
        let segments: Vec<String> = path.iter().map(|s| (*s).to_string()).collect();
        layer = overlay(layer, branch_for(&segments, typed_scalar(raw.trim())));
    }
    layer
}

/// Build a single-path object from the leaf outward:
/// `["punch", "port"]` + `9061` becomes `{"punch": {"port": 9061}}`.
fn branch_for(segments: &[String], leaf: Value) -> Value {
    segments.iter().rev().fold(leaf, |node, segment| {
        let mut wrapper = Map::new();
        wrapper.insert(segment.clone(), node);
        Value::Object(wrapper)
    })
}

/// Best-effort typing: anything that parses as JSON keeps that type,
/// everything else stays a string.
fn typed_scalar(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::String(String::new());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
