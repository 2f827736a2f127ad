//! Interactive keystone calibration
//!
//! The controller owns the calibration session and is the only thing that
//! mutates it. Every pointer event runs synchronously: hit-test, mutate,
//! persist, and report whether a repaint is needed.
//!
//! ```text
//! Idle --down on corner i--> DraggingCorner(i) --up--> Idle
//! Idle --down inside quad--> DraggingQuad      --up--> Idle
//! wheel inside quad: scale about centroid, in any state
//! ```

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::calibration::{sanitize_ppi, CalibrationState, CalibrationStore};
use crate::geometry::{
    point_in_quad, quad_center, rotate_quad, scale_quad, translate_quad, Point, CORNER_LABELS,
};
use crate::render::{RenderControls, RenderParams, RenderSnapshot};
use crate::scale::ScaleModel;
use crate::transform::clamp_steps;

/// Pointer input in output-surface pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PointerEvent {
    Down {
        x: f64,
        y: f64,
    },
    Move {
        x: f64,
        y: f64,
        /// Rotate modifier (Shift in the browser UI)
        #[serde(default)]
        rotate: bool,
    },
    Up,
    Wheel {
        x: f64,
        y: f64,
        delta_y: f64,
    },
}

/// Drag state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DragState {
    #[default]
    Idle,
    DraggingCorner(usize),
    DraggingQuad,
}

/// What lies under the pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitTarget {
    Corner(usize),
    Interior,
    Outside,
}

impl HitTarget {
    /// CSS cursor name for hover feedback
    pub fn cursor_hint(&self) -> &'static str {
        match self {
            HitTarget::Corner(_) => "grab",
            HitTarget::Interior => "move",
            HitTarget::Outside => "default",
        }
    }
}

/// Result of handling one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventResponse {
    /// The calibration changed and was persisted
    Repaint,
    /// Nothing visible changed
    Unchanged,
}

/// Interaction tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeystoneSettings {
    pub handle_radius: f64,
    pub hit_margin: f64,
    pub wheel_grow: f64,
    pub wheel_shrink: f64,
}

impl Default for KeystoneSettings {
    fn default() -> Self {
        Self {
            handle_radius: 14.0,
            hit_margin: 6.0,
            wheel_grow: 1.03,
            wheel_shrink: 0.97,
        }
    }
}

/// Mutable state of one calibration session
#[derive(Debug, Clone)]
pub struct CalibrationSession {
    pub source: Option<Arc<RgbaImage>>,
    pub calibration: Option<CalibrationState>,
    pub controls: RenderControls,
}

/// Owns the session and applies operator input to it
#[derive(Debug)]
pub struct KeystoneController {
    session: CalibrationSession,
    store: CalibrationStore,
    settings: KeystoneSettings,
    params: RenderParams,
    drag: DragState,
    last_pointer: Point,
}

impl KeystoneController {
    pub fn new(
        store: CalibrationStore,
        settings: KeystoneSettings,
        params: RenderParams,
        controls: RenderControls,
    ) -> Self {
        Self {
            session: CalibrationSession {
                source: None,
                calibration: None,
                controls: RenderControls {
                    subdivisions: clamp_steps(controls.subdivisions),
                    ..controls
                },
            },
            store,
            settings,
            params,
            drag: DragState::Idle,
            last_pointer: Point::default(),
        }
    }

    pub fn session(&self) -> &CalibrationSession {
        &self.session
    }

    pub fn calibration(&self) -> Option<&CalibrationState> {
        self.session.calibration.as_ref()
    }

    pub fn drag_state(&self) -> DragState {
        self.drag
    }

    pub fn params(&self) -> &RenderParams {
        &self.params
    }

    /// Install a freshly decoded design
    ///
    /// A stored calibration is restored if there is one; otherwise a centred
    /// default sized to this image is created and persisted.
    pub fn load_source(&mut self, source: RgbaImage) {
        let dims = source.dimensions();
        self.session.source = Some(Arc::new(source));
        self.drag = DragState::Idle;

        match self.store.load() {
            Some(saved) => {
                debug!("Restored calibration {:?}", saved.quad);
                self.session.calibration = Some(saved);
            }
            None => {
                info!("No usable stored calibration, using default quad");
                let state = CalibrationState::centered(dims, self.params.surface);
                self.store.save(&state);
                self.session.calibration = Some(state);
            }
        }
    }

    /// Discard the calibration and start over from the default quad
    pub fn reset(&mut self) -> EventResponse {
        let dims = self.session.source.as_ref().map(|s| s.dimensions());
        self.session.calibration = self.store.reset(dims, self.params.surface);
        self.drag = DragState::Idle;
        info!("Calibration reset");
        EventResponse::Repaint
    }

    pub fn set_controls(&mut self, controls: RenderControls) -> EventResponse {
        let controls = RenderControls {
            subdivisions: clamp_steps(controls.subdivisions),
            ..controls
        };
        if controls == self.session.controls {
            return EventResponse::Unchanged;
        }
        self.session.controls = controls;
        EventResponse::Repaint
    }

    pub fn set_pixels_per_inch(&mut self, ppi: f64) -> EventResponse {
        let Some(cal) = self.session.calibration.as_mut() else {
            return EventResponse::Unchanged;
        };
        cal.pixels_per_inch = sanitize_ppi(ppi);
        self.store.save(cal);
        EventResponse::Repaint
    }

    /// Corners first (in TL, TR, BR, BL order), then the interior
    pub fn hit_test(&self, p: Point) -> HitTarget {
        let Some(cal) = self.session.calibration.as_ref() else {
            return HitTarget::Outside;
        };
        let reach = self.settings.handle_radius + self.settings.hit_margin;
        if let Some(i) = cal.quad.iter().position(|c| p.distance(*c) <= reach) {
            return HitTarget::Corner(i);
        }
        if point_in_quad(p, &cal.quad) {
            HitTarget::Interior
        } else {
            HitTarget::Outside
        }
    }

    pub fn handle_event(&mut self, event: PointerEvent) -> EventResponse {
        match event {
            PointerEvent::Down { x, y } => self.pointer_down(Point::new(x, y)),
            PointerEvent::Move { x, y, rotate } => self.pointer_move(Point::new(x, y), rotate),
            PointerEvent::Up => {
                self.drag = DragState::Idle;
                EventResponse::Unchanged
            }
            PointerEvent::Wheel { x, y, delta_y } => self.wheel(Point::new(x, y), delta_y),
        }
    }

    fn pointer_down(&mut self, p: Point) -> EventResponse {
        self.last_pointer = p;
        self.drag = match self.hit_test(p) {
            HitTarget::Corner(i) => {
                debug!("Dragging corner {}", CORNER_LABELS[i]);
                DragState::DraggingCorner(i)
            }
            HitTarget::Interior => DragState::DraggingQuad,
            HitTarget::Outside => DragState::Idle,
        };
        EventResponse::Unchanged
    }

    fn pointer_move(&mut self, p: Point, rotate: bool) -> EventResponse {
        let prev = self.last_pointer;
        self.last_pointer = p;

        let drag = self.drag;
        let Some(cal) = self.session.calibration.as_mut() else {
            return EventResponse::Unchanged;
        };
        let delta = p - prev;

        match drag {
            DragState::Idle => return EventResponse::Unchanged,
            DragState::DraggingCorner(i) => {
                cal.quad[i] = cal.quad[i] + delta;
            }
            DragState::DraggingQuad if rotate => {
                let c = quad_center(&cal.quad);
                let a0 = (prev.y - c.y).atan2(prev.x - c.x);
                let a1 = (p.y - c.y).atan2(p.x - c.x);
                rotate_quad(&mut cal.quad, a1 - a0);
            }
            DragState::DraggingQuad => {
                translate_quad(&mut cal.quad, delta);
            }
        }

        self.store.save(cal);
        EventResponse::Repaint
    }

    fn wheel(&mut self, p: Point, delta_y: f64) -> EventResponse {
        let Some(cal) = self.session.calibration.as_mut() else {
            return EventResponse::Unchanged;
        };
        if !point_in_quad(p, &cal.quad) {
            return EventResponse::Unchanged;
        }
        let factor = if delta_y > 0.0 {
            self.settings.wheel_shrink
        } else {
            self.settings.wheel_grow
        };
        scale_quad(&mut cal.quad, factor);
        self.store.save(cal);
        EventResponse::Repaint
    }

    /// Copy of everything a render pass needs
    pub fn snapshot(&self, scale: ScaleModel) -> RenderSnapshot {
        RenderSnapshot {
            source: self.session.source.clone(),
            calibration: self.session.calibration.clone(),
            controls: self.session.controls,
            scale,
            params: self.params,
        }
    }
}
