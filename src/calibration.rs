//! Calibration state and its persistence
//!
//! The calibration is the keystone quad plus the pixel density used for the
//! inch grid. It is stored as a single JSON record,
//! `{ "quad": [{x,y} × 4], "ppi": number }`, under a fixed key.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::geometry::{rect_quad, Point, Quad};
use crate::store::KeyValueStore;

/// Key of the persisted calibration record
pub const CALIBRATION_KEY: &str = "roman_projector_cal_v1";

pub const DEFAULT_PPI: f64 = 60.0;
pub const MIN_PPI: f64 = 10.0;
pub const MAX_PPI: f64 = 400.0;

/// Fraction of the surface height a fresh quad occupies
const DEFAULT_QUAD_FILL: f64 = 0.85;

/// Current physical-alignment configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationState {
    pub quad: Quad,
    pub pixels_per_inch: f64,
}

impl CalibrationState {
    /// Centered quad sized to the source aspect ratio
    ///
    /// The quad fills 85% of the surface height; its width follows the
    /// source image so a fresh calibration shows the design undistorted.
    pub fn centered(source: (u32, u32), surface: (u32, u32)) -> Self {
        let (w, h) = (source.0.max(1) as f64, source.1.max(1) as f64);
        let aspect = w / h;

        let target_h = surface.1 as f64 * DEFAULT_QUAD_FILL;
        let target_w = target_h * aspect;

        let cx = surface.0 as f64 / 2.0;
        let cy = surface.1 as f64 / 2.0;

        Self {
            quad: rect_quad(cx - target_w / 2.0, cy - target_h / 2.0, target_w, target_h),
            pixels_per_inch: DEFAULT_PPI,
        }
    }

    /// Physical size of the quad's top and left edges in inches
    pub fn extent_in(&self) -> (f64, f64) {
        let (w, h) = crate::geometry::quad_extent(&self.quad);
        (w / self.pixels_per_inch, h / self.pixels_per_inch)
    }
}

/// Clamp a pixel density into the accepted range, defaulting bad values
pub fn sanitize_ppi(ppi: f64) -> f64 {
    if ppi.is_finite() && ppi > 0.0 {
        ppi.clamp(MIN_PPI, MAX_PPI)
    } else {
        DEFAULT_PPI
    }
}

/// Persisted record layout
#[derive(Debug, Serialize, Deserialize)]
struct StoredCalibration {
    quad: Vec<Point>,
    /// Kept loose so a non-numeric value degrades to the default
    #[serde(default)]
    ppi: Option<serde_json::Value>,
}

/// Parse a stored record, rejecting anything that is not a usable quad
pub fn parse_calibration(raw: &str) -> Option<CalibrationState> {
    let stored: StoredCalibration = match serde_json::from_str(raw) {
        Ok(s) => s,
        Err(e) => {
            debug!("Discarding malformed calibration: {}", e);
            return None;
        }
    };

    let quad: Quad = match <[Point; 4]>::try_from(stored.quad) {
        Ok(q) => q,
        Err(points) => {
            debug!("Discarding calibration with {} quad points", points.len());
            return None;
        }
    };
    if !quad.iter().all(Point::is_finite) {
        debug!("Discarding calibration with non-finite quad points");
        return None;
    }

    let ppi = stored
        .ppi
        .as_ref()
        .and_then(serde_json::Value::as_f64)
        .map(sanitize_ppi)
        .unwrap_or(DEFAULT_PPI);

    Some(CalibrationState {
        quad,
        pixels_per_inch: ppi,
    })
}

/// Serialize for storage; `ppi` is clamped on the way out
pub fn serialize_calibration(state: &CalibrationState) -> Result<String, serde_json::Error> {
    let stored = StoredCalibration {
        quad: state.quad.to_vec(),
        ppi: Some(serde_json::json!(sanitize_ppi(state.pixels_per_inch))),
    };
    serde_json::to_string(&stored)
}

/// Persists the calibration under [`CALIBRATION_KEY`]
///
/// Storage failures are never surfaced: calibration simply does not survive
/// a restart.
#[derive(Clone)]
pub struct CalibrationStore {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for CalibrationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalibrationStore")
            .field("key", &CALIBRATION_KEY)
            .finish()
    }
}

impl CalibrationStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn save(&self, state: &CalibrationState) {
        let raw = match serialize_calibration(state) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to serialize calibration: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.set(CALIBRATION_KEY, &raw) {
            warn!("Failed to persist calibration: {}", e);
        }
    }

    pub fn load(&self) -> Option<CalibrationState> {
        match self.store.get(CALIBRATION_KEY) {
            Ok(Some(raw)) => parse_calibration(&raw),
            Ok(None) => None,
            Err(e) => {
                debug!("Could not read calibration: {}", e);
                None
            }
        }
    }

    /// Drop the stored record and build a fresh default
    ///
    /// Without a source image there is nothing to size the quad from, so the
    /// result is `None`. A fresh default is persisted straight away.
    pub fn reset(&self, source: Option<(u32, u32)>, surface: (u32, u32)) -> Option<CalibrationState> {
        if let Err(e) = self.store.remove(CALIBRATION_KEY) {
            warn!("Failed to clear calibration: {}", e);
        }
        let state = CalibrationState::centered(source?, surface);
        self.save(&state);
        Some(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::MemoryStore;

    /// A store where every operation fails
    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "disabled").into())
        }
        fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "quota").into())
        }
        fn remove(&self, _key: &str) -> Result<(), StoreError> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "quota").into())
        }
    }

    fn memory() -> (Arc<MemoryStore>, CalibrationStore) {
        let kv = Arc::new(MemoryStore::default());
        (kv.clone(), CalibrationStore::new(kv))
    }

    #[test]
    fn test_centered_default() {
        let state = CalibrationState::centered((620, 800), (1280, 800));
        let [tl, tr, br, bl] = state.quad;
        assert!((bl.y - tl.y - 680.0).abs() < 1e-9);
        assert!((tr.x - tl.x - 680.0 * 620.0 / 800.0).abs() < 1e-9);
        assert!(((tl.x + br.x) / 2.0 - 640.0).abs() < 1e-9);
        assert!(((tl.y + br.y) / 2.0 - 400.0).abs() < 1e-9);
        assert_eq!(state.pixels_per_inch, DEFAULT_PPI);
    }

    #[test]
    fn test_save_load_round_trip() {
        let (_, store) = memory();
        let state = CalibrationState {
            quad: [
                Point::new(1.0, 2.0),
                Point::new(300.0, 4.0),
                Point::new(310.0, 400.0),
                Point::new(-5.0, 390.0),
            ],
            pixels_per_inch: 72.0,
        };
        store.save(&state);
        assert_eq!(store.load(), Some(state));
    }

    #[test]
    fn test_ppi_clamped_on_save() {
        let (kv, store) = memory();
        let mut state = CalibrationState::centered((100, 100), (400, 400));
        state.pixels_per_inch = 1000.0;
        store.save(&state);

        let raw = kv.get(CALIBRATION_KEY).unwrap().unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["ppi"].as_f64(), Some(MAX_PPI));
        assert_eq!(v["quad"].as_array().map(Vec::len), Some(4));
    }

    #[test]
    fn test_load_rejects_bad_records() {
        assert!(parse_calibration("not json").is_none());
        assert!(parse_calibration(r#"{"ppi": 60}"#).is_none());
        assert!(parse_calibration(r#"{"quad": [{"x":0,"y":0},{"x":1,"y":0},{"x":1,"y":1}]}"#).is_none());
        assert!(parse_calibration(r#"{"quad": "nope"}"#).is_none());
    }

    #[test]
    fn test_load_defaults_bad_ppi() {
        let quad = r#"[{"x":0,"y":0},{"x":10,"y":0},{"x":10,"y":10},{"x":0,"y":10}]"#;
        for ppi in ["", r#","ppi":"sixty""#, r#","ppi":null"#, r#","ppi":-4"#] {
            let raw = format!(r#"{{"quad":{}{}}}"#, quad, ppi);
            let state = parse_calibration(&raw).expect("quad is valid");
            assert_eq!(state.pixels_per_inch, DEFAULT_PPI, "record {}", raw);
        }
    }

    #[test]
    fn test_reset_without_source_is_none() {
        let (kv, store) = memory();
        store.save(&CalibrationState::centered((10, 10), (100, 100)));
        assert!(store.reset(None, (1280, 800)).is_none());
        assert!(kv.get(CALIBRATION_KEY).unwrap().is_none());
        assert!(store.load().is_none());
    }

    #[test]
    fn test_reset_with_source_persists_default() {
        let (_, store) = memory();
        let state = store.reset(Some((620, 800)), (1280, 800)).unwrap();
        assert_eq!(store.load(), Some(state));
    }

    #[test]
    fn test_loads_record_from_browser_tool() {
        let dir = std::env::temp_dir().join(format!("keystone-cal-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("roman_projector_cal_v1.json"),
            r#"{"quad":[{"x":100,"y":50},{"x":500,"y":60},{"x":520,"y":700},{"x":90,"y":690}],"ppi":48}"#,
        )
        .unwrap();

        let store = CalibrationStore::new(Arc::new(crate::store::FileStore::new(&dir)));
        let state = store.load().expect("record under the browser key");
        assert_eq!(state.quad[2], Point::new(520.0, 700.0));
        assert_eq!(state.pixels_per_inch, 48.0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_storage_failures_are_swallowed() {
        let store = CalibrationStore::new(Arc::new(BrokenStore));
        store.save(&CalibrationState::centered((10, 10), (100, 100)));
        assert!(store.load().is_none());
        assert!(store.reset(Some((10, 10)), (100, 100)).is_some());
    }
}
