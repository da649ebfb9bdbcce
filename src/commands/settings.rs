use crate::analysis::health::{default_penalties, HealthThresholds, ScoringPolicy};
use crate::models::trend::TrendGranularity;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SETTINGS_SCHEMA_VERSION: i64 = 2;

pub const DEFAULT_DETECTION_ENDPOINT: &str = "https://cvmodel.onrender.com/detect/";

#[derive(Debug, Clone)]
pub struct EffectiveScanSettings {
    pub detection_endpoint: String,
    pub request_timeout: Duration,
    pub scoring: ScoringPolicy,
    pub thresholds: HealthThresholds,
    pub trend_granularity: TrendGranularity,
    pub trend_range_days: u32,
}

impl Default for EffectiveScanSettings {
    fn default() -> Self {
        effective_from_value(&migrate_settings(json!({})))
    }
}

pub fn get_settings(data_dir: &str) -> Result<Value, String> {
    load_settings_from_disk(data_dir)
}

pub fn save_settings(data_dir: &str, settings: Value) -> Result<Value, String> {
    save_settings_to_disk(data_dir, settings)
}

pub fn load_effective_scan_settings(data_dir: &str) -> Result<EffectiveScanSettings, String> {
    let settings = load_settings_from_disk(data_dir)?;
    Ok(effective_from_value(&settings))
}

fn effective_from_value(settings: &Value) -> EffectiveScanSettings {
    let detection_endpoint = settings
        .get("detectionEndpoint")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_DETECTION_ENDPOINT)
        .to_string();

    let timeout_secs = settings
        .get("requestTimeoutSecs")
        .and_then(Value::as_u64)
        .unwrap_or(30)
        .clamp(5, 120);

    let mut penalties = default_penalties();
    if let Some(obj) = settings.get("penalties").and_then(Value::as_object) {
        for (key, value) in obj {
            if let Some(v) = value.as_f64() {
                penalties.insert(key.clone(), v);
            }
        }
    }
    let confidence_scaling = settings
        .get("confidenceScaling")
        .and_then(Value::as_bool)
        .unwrap_or(true);

    let defaults = HealthThresholds::default();
    let good = settings
        .get("goodThreshold")
        .and_then(Value::as_u64)
        .map(|v| v.min(100) as u8)
        .unwrap_or(defaults.good);
    let moderate = settings
        .get("moderateThreshold")
        .and_then(Value::as_u64)
        .map(|v| v.min(100) as u8)
        .filter(|v| *v < good)
        .unwrap_or_else(|| defaults.moderate.min(good.saturating_sub(1)));

    let trend_granularity = settings
        .get("trendGranularity")
        .and_then(Value::as_str)
        .and_then(TrendGranularity::from_setting)
        .unwrap_or(TrendGranularity::Scan);

    let trend_range_days = settings
        .get("trendRangeDays")
        .and_then(Value::as_u64)
        .unwrap_or(90)
        .clamp(7, 365) as u32;

    EffectiveScanSettings {
        detection_endpoint,
        request_timeout: Duration::from_secs(timeout_secs),
        scoring: ScoringPolicy::from_penalty_map(&penalties, confidence_scaling),
        thresholds: HealthThresholds { good, moderate },
        trend_granularity,
        trend_range_days,
    }
}

pub fn load_settings_from_disk(data_dir: &str) -> Result<Value, String> {
    ensure_profile_dir(data_dir)?;
    let path = settings_path(data_dir);

    let stored = read_settings_file(&path)?;
    let migrated = migrate_settings(stored.clone().unwrap_or_else(|| json!({})));
    if stored.as_ref() != Some(&migrated) {
        write_settings_file(&path, &migrated)?;
    }

    Ok(migrated)
}

pub fn save_settings_to_disk(data_dir: &str, settings: Value) -> Result<Value, String> {
    let mut current = load_settings_from_disk(data_dir)?;
    merge_settings(&mut current, &settings);

    let migrated = migrate_settings(current);
    write_settings_file(&settings_path(data_dir), &migrated)?;
    log::info!("saved settings for profile {data_dir}");
    Ok(migrated)
}

fn settings_path(data_dir: &str) -> PathBuf {
    Path::new(data_dir).join(".skinlens").join("settings.json")
}

fn ensure_profile_dir(data_dir: &str) -> Result<(), String> {
    let dir = Path::new(data_dir).join(".skinlens");
    fs::create_dir_all(&dir).map_err(|e| format!("Failed to create .skinlens directory: {e}"))
}

/// `None` when there is no settings file yet. An unreadable document is
/// copied to `settings.json.bak` before defaults take its place.
fn read_settings_file(path: &Path) -> Result<Option<Value>, String> {
    if !path.exists() {
        return Ok(None);
    }

    let raw =
        fs::read_to_string(path).map_err(|e| format!("Failed to read settings.json: {e}"))?;
    match serde_json::from_str::<Value>(&raw) {
        Ok(value) if value.is_object() => Ok(Some(value)),
        parsed => {
            let reason = match parsed {
                Err(e) => e.to_string(),
                Ok(_) => "top level is not an object".to_string(),
            };
            let backup = path.with_extension("json.bak");
            fs::copy(path, &backup)
                .map_err(|e| format!("Failed to back up unreadable settings.json: {e}"))?;
            log::warn!(
                "settings.json is unreadable ({reason}), moved aside to {} and reset to defaults",
                backup.display()
            );
            Ok(Some(json!({})))
        }
    }
}

fn write_settings_file(path: &Path, settings: &Value) -> Result<(), String> {
    let raw = serde_json::to_string_pretty(settings)
        .map_err(|e| format!("Failed to serialize settings: {e}"))?;
    fs::write(path, raw).map_err(|e| format!("Failed to write settings.json: {e}"))
}

fn migrate_settings(input: Value) -> Value {
    let mut out = match input {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    let version = out
        .get("schema_version")
        .and_then(Value::as_i64)
        .unwrap_or(0);

    if version < 1 {
        migrate_legacy_endpoint(&mut out);
    }

    // v2 added trendGranularity and trendRangeDays; both come in with the defaults.
    fill_missing_defaults(&mut out);
    sanitize_settings(&mut out);
    out.insert("schema_version".to_string(), json!(SETTINGS_SCHEMA_VERSION));

    Value::Object(out)
}

fn default_settings() -> Value {
    json!({
        "schema_version": SETTINGS_SCHEMA_VERSION,
        "detectionEndpoint": DEFAULT_DETECTION_ENDPOINT,
        "requestTimeoutSecs": 30,
        "confidenceScaling": true,
        "penalties": default_penalties(),
        "goodThreshold": 80,
        "moderateThreshold": 60,
        "trendGranularity": "scan",
        "trendRangeDays": 90
    })
}

/// Top-level keys only; missing penalty categories are restored by `sanitize_settings`.
fn fill_missing_defaults(settings: &mut Map<String, Value>) {
    if let Value::Object(defaults) = default_settings() {
        for (key, value) in defaults {
            settings.entry(key).or_insert(value);
        }
    }
}

/// Applies a partial update from the settings screen. Unknown keys are
/// ignored and `penalties` is merged per category.
fn merge_settings(target: &mut Value, incoming: &Value) {
    let defaults = default_settings();
    let (Some(target_obj), Some(incoming_obj)) = (target.as_object_mut(), incoming.as_object())
    else {
        return;
    };

    for (key, value) in incoming_obj {
        if key == "schema_version" {
            continue;
        }
        if defaults.get(key).is_none() {
            log::warn!("ignoring unknown setting `{key}`");
            continue;
        }

        match (target_obj.get_mut(key), value) {
            (Some(Value::Object(current)), Value::Object(update)) => {
                for (category, penalty) in update {
                    current.insert(category.clone(), penalty.clone());
                }
            }
            _ => {
                target_obj.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Pre-v1 builds stored the service URL as `apiUrl`.
fn migrate_legacy_endpoint(settings: &mut Map<String, Value>) {
    if let Some(legacy) = settings.remove("apiUrl") {
        settings
            .entry("detectionEndpoint".to_string())
            .or_insert(legacy);
    }
}

/// (key, min, max, default) for every integer setting.
const INTEGER_BOUNDS: [(&str, u64, u64, u64); 4] = [
    ("requestTimeoutSecs", 5, 120, 30),
    ("goodThreshold", 50, 100, 80),
    ("moderateThreshold", 20, 95, 60),
    ("trendRangeDays", 7, 365, 90),
];

fn sanitize_settings(settings: &mut Map<String, Value>) {
    for (key, min, max, default) in INTEGER_BOUNDS {
        let raw = settings.get(key).and_then(Value::as_u64).unwrap_or(default);
        settings.insert(key.to_string(), json!(raw.clamp(min, max)));
    }

    let good = settings.get("goodThreshold").and_then(Value::as_u64).unwrap_or(80);
    let moderate = settings
        .get("moderateThreshold")
        .and_then(Value::as_u64)
        .unwrap_or(60);
    if moderate >= good {
        settings.insert("moderateThreshold".to_string(), json!(good - 1));
    }

    let granularity_ok = settings
        .get("trendGranularity")
        .and_then(Value::as_str)
        .and_then(TrendGranularity::from_setting)
        .is_some();
    if !granularity_ok {
        settings.insert("trendGranularity".to_string(), json!("scan"));
    }

    if !settings.get("confidenceScaling").is_some_and(Value::is_boolean) {
        settings.insert("confidenceScaling".to_string(), json!(true));
    }

    let endpoint_ok = settings
        .get("detectionEndpoint")
        .and_then(Value::as_str)
        .map(|url| url.starts_with("http://") || url.starts_with("https://"))
        .unwrap_or(false);
    if !endpoint_ok {
        settings.insert(
            "detectionEndpoint".to_string(),
            json!(DEFAULT_DETECTION_ENDPOINT),
        );
    }

    let default_penalty_map = default_penalties();
    let penalties = settings
        .entry("penalties".to_string())
        .or_insert_with(|| json!({}));

    if let Some(penalty_obj) = penalties.as_object_mut() {
        for (key, default_value) in default_penalty_map {
            let current = penalty_obj
                .get(&key)
                .and_then(Value::as_f64)
                .filter(|v| v.is_finite())
                .unwrap_or(default_value);
            penalty_obj.insert(key, json!(current.clamp(0.0, 50.0)));
        }
    } else {
        *penalties = json!(default_penalty_map);
    }
}
