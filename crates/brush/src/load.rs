//! The version-3 JSON brush settings format.
//!
//! ```json
//! {
//!   "version": 3,
//!   "settings": {
//!     "opaque": { "base_value": 1.0, "inputs": { "pressure": [[0, 0], [1, 1]] } }
//!   }
//! }
//! ```
//!
//! Unknown setting names warn and are skipped, unknown input names are
//! ignored; a missing version/settings field or an unsupported version
//! fails the whole load without touching the brush.

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::engine::Brush;
use crate::settings::{Input, Setting};

/// Errors that fail a settings load outright.
#[derive(Debug, Error)]
pub enum BrushLoadError {
    #[error("invalid settings JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("settings are not a JSON object")]
    NotAnObject,
    #[error("missing '{0}' field")]
    MissingField(&'static str),
    #[error("unsupported brush setting version: {0}")]
    UnsupportedVersion(i64),
    #[error("no setting could be applied")]
    NothingApplied,
}

fn apply_setting(brush: &mut Brush, name: &str, value: &Value) -> bool {
    let Some(setting) = Setting::from_cname(name) else {
        warn!(setting = name, "unknown setting, skipping");
        return false;
    };
    let Some(obj) = value.as_object() else {
        warn!(setting = name, "wrong type for setting");
        return false;
    };

    let Some(base_value) = obj.get("base_value").and_then(Value::as_f64) else {
        warn!(setting = name, "no 'base_value' field for setting");
        return false;
    };
    brush.set_base_value(setting, base_value as f32);

    let Some(inputs) = obj.get("inputs").and_then(Value::as_object) else {
        warn!(setting = name, "no 'inputs' field for setting");
        return false;
    };
    for (input_name, points_value) in inputs {
        let Some(input) = Input::from_cname(input_name) else {
            continue;
        };
        let Some(point_list) = points_value.as_array() else {
            warn!(setting = name, input = input_name.as_str(), "wrong inputs type");
            return false;
        };

        let mut points = Vec::with_capacity(point_list.len());
        for point in point_list {
            let x = point.get(0).and_then(Value::as_f64).unwrap_or(0.0);
            let y = point.get(1).and_then(Value::as_f64).unwrap_or(0.0);
            points.push([x as f32, y as f32]);
        }
        brush.set_mapping_points(setting, input, points);
    }

    true
}

impl Brush {
    /// Load settings from a version-3 JSON string. On error the brush
    /// keeps the settings it had (individual unknown settings are skipped
    /// with a warning, not treated as errors).
    pub fn load_json(&mut self, source: &str) -> Result<(), BrushLoadError> {
        let root: Value = serde_json::from_str(source)?;
        let root = root.as_object().ok_or(BrushLoadError::NotAnObject)?;

        let version = root
            .get("version")
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
            .ok_or(BrushLoadError::MissingField("version"))?;
        if version != 3 {
            return Err(BrushLoadError::UnsupportedVersion(version));
        }

        let settings = root
            .get("settings")
            .and_then(Value::as_object)
            .ok_or(BrushLoadError::MissingField("settings"))?;

        let mut applied_any = false;
        for (name, value) in settings {
            if apply_setting(self, name, value) {
                applied_any = true;
            }
        }
        if !applied_any {
            return Err(BrushLoadError::NothingApplied);
        }
        Ok(())
    }
}
