//! Physical surface measurements
//!
//! The scale model lives in the designer's UI settings record, keyed
//! separately from calibration. Each field falls back to its default on its
//! own, so a partial record still yields usable values.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::store::KeyValueStore;

/// Key of the designer UI settings record that carries the scale model
pub const UI_KEY: &str = "roman_shield_ui_v1";

pub const DEFAULT_WIDTH_IN: f64 = 31.0;
pub const DEFAULT_HEIGHT_IN: f64 = 40.0;
pub const DEFAULT_CURVE_IN: f64 = 8.0;

/// Surface width, height and curvature depth in inches
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScaleModel {
    pub width_in: f64,
    pub height_in: f64,
    pub curve_in: f64,
}

impl Default for ScaleModel {
    fn default() -> Self {
        Self {
            width_in: DEFAULT_WIDTH_IN,
            height_in: DEFAULT_HEIGHT_IN,
            curve_in: DEFAULT_CURVE_IN,
        }
    }
}

/// Scale fields as stored; `null` and missing both mean "use the default"
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredScale {
    width_in: Option<f64>,
    height_in: Option<f64>,
    curve_in: Option<f64>,
}

/// The part of the UI settings record we care about
#[derive(Debug, Default, Deserialize)]
struct UiSettings {
    #[serde(default)]
    scale: Option<StoredScale>,
}

impl ScaleModel {
    /// Radius of the cylinder the surface is cut from
    pub fn radius_in(&self) -> f64 {
        curvature_radius(self.width_in, self.curve_in)
    }

    /// Parse a UI settings record; any failure yields the defaults
    pub fn from_ui_json(raw: &str) -> Self {
        match serde_json::from_str::<UiSettings>(raw) {
            Ok(ui) => {
                let stored = ui.scale.unwrap_or_default();
                Self {
                    width_in: stored.width_in.unwrap_or(DEFAULT_WIDTH_IN),
                    height_in: stored.height_in.unwrap_or(DEFAULT_HEIGHT_IN),
                    curve_in: stored.curve_in.unwrap_or(DEFAULT_CURVE_IN),
                }
            }
            Err(e) => {
                debug!("Ignoring malformed UI settings: {}", e);
                Self::default()
            }
        }
    }

    /// Read the scale model from the store, falling back to defaults
    pub fn load(store: &dyn KeyValueStore) -> Self {
        match store.get(UI_KEY) {
            Ok(Some(raw)) => Self::from_ui_json(&raw),
            Ok(None) => Self::default(),
            Err(e) => {
                debug!("Could not read UI settings: {}", e);
                Self::default()
            }
        }
    }

    /// Write the scale model into the UI settings record
    ///
    /// Other fields of an existing record are preserved.
    pub fn store(&self, store: &dyn KeyValueStore) -> Result<(), crate::error::StoreError> {
        let mut record = store
            .get(UI_KEY)?
            .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok())
            .filter(|v| v.is_object())
            .unwrap_or_else(|| serde_json::json!({}));
        record["scale"] = serde_json::to_value(self)?;
        store.set(UI_KEY, &record.to_string())
    }
}

/// `R = W²/(8d) + d/2`, infinite when the surface is flat or the input is bad
pub fn curvature_radius(width_in: f64, curve_in: f64) -> f64 {
    if !width_in.is_finite() || width_in <= 0.0 || !curve_in.is_finite() || curve_in <= 0.0 {
        return f64::INFINITY;
    }
    (width_in * width_in) / (8.0 * curve_in) + curve_in / 2.0
}
