//! Scene coordination: viewport fan-out, grid model, status reporting
//!
//! Wires the pool, label engine and grid together. A viewport change flows
//! through external subscribers first, then label placement, then the grid,
//! mirroring the reverse-registration dispatch of the interactive frontend.

use tracing::{debug, info, warn};

use crate::core::Dictionary;
use crate::labels::Labels;
use crate::cluster::EventClusterer;
use crate::pool::{PersonRecord, Rect, TypePool};

// ============================================================================
// Status reporting
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Normal,
    Busy,
    Warning,
}

/// Receiver for coarse progress and error states of long operations.
pub trait StatusSink {
    fn set_state(&mut self, kind: StatusKind, msg: &str);
}

/// Default sink that forwards states to the log.
#[derive(Debug, Default)]
pub struct LogStatus;

impl StatusSink for LogStatus {
    fn set_state(&mut self, kind: StatusKind, msg: &str) {
        match kind {
            StatusKind::Warning => warn!(msg, "status"),
            StatusKind::Busy => debug!(msg, "busy"),
            StatusKind::Normal => debug!(msg, "ready"),
        }
    }
}

/// Marks the sink busy for the duration of an operation. Unless the guard
/// is disarmed, dropping it reports a warning, so early returns and panics
/// surface as failed operations.
struct BusyGuard<'a> {
    status: &'a mut dyn StatusSink,
    warn_msg: &'a str,
    ok: bool,
}

impl<'a> BusyGuard<'a> {
    fn new(status: &'a mut dyn StatusSink, warn_msg: &'a str) -> Self {
        status.set_state(StatusKind::Busy, "");
        Self { status, warn_msg, ok: false }
    }

    fn done(mut self) {
        self.ok = true;
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        if self.ok {
            self.status.set_state(StatusKind::Normal, "");
        } else {
            self.status.set_state(StatusKind::Warning, self.warn_msg);
        }
    }
}

// ============================================================================
// Grid model
// ============================================================================

/// Screen-space guide grid. Horizontal lines are derived from the scale;
/// vertical lines follow the time axis ticks supplied by the host.
#[derive(Debug)]
pub struct GridModel {
    grid_size: f64,
    v_grids: Vec<f64>,
    h_grids: Vec<f64>,
}

impl Default for GridModel {
    fn default() -> Self {
        Self {
            grid_size: 100.0,
            v_grids: Vec::new(),
            h_grids: Vec::new(),
        }
    }
}

impl GridModel {
    pub fn grid_size(&self) -> f64 {
        self.grid_size
    }

    /// Vertical grid positions, supplied from axis ticks.
    pub fn set_v_grids(&mut self, xs: Vec<f64>) {
        self.v_grids = xs;
    }

    pub fn v_grids(&self) -> &[f64] {
        &self.v_grids
    }

    pub fn h_grids(&self) -> &[f64] {
        &self.h_grids
    }

    /// Recompute the horizontal lines for a viewport. The grid disappears
    /// entirely during animated movement.
    pub fn update(&mut self, viewport: Rect, scale: f64, suspended: bool) {
        if suspended {
            self.v_grids.clear();
            self.h_grids.clear();
            return;
        }
        let height = viewport.height * scale;
        // Keep the visual spacing near the nominal size at any zoom.
        let mut dist = self.grid_size * scale;
        while dist < self.grid_size * 0.5 {
            dist *= 2.0;
        }
        while dist > self.grid_size * 1.5 {
            dist /= 2.0;
        }
        self.h_grids.clear();
        let mut y = -dist - (viewport.y * scale - dist) % dist;
        while y <= height {
            self.h_grids.push(y);
            y += dist;
        }
    }
}

// ============================================================================
// Scene
// ============================================================================

type ViewportSubscriber = Box<dyn FnMut(&TypePool, Rect, Rect, f64, bool)>;

/// Owner of the pool and its collaborators, dispatching viewport changes in
/// a fixed structural order.
pub struct Scene {
    pool: TypePool,
    labels: Labels,
    grid: GridModel,
    status: Box<dyn StatusSink>,
    in_transition: u32,
    subscribers: Vec<ViewportSubscriber>,
}

impl Scene {
    pub fn new(col_w: f64, row_h: f64) -> Self {
        Self {
            pool: TypePool::new(col_w, row_h),
            labels: Labels::new(),
            grid: GridModel::default(),
            status: Box::new(LogStatus),
            in_transition: 0,
            subscribers: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: Box<dyn StatusSink>) -> Self {
        self.status = status;
        self
    }

    pub fn pool(&self) -> &TypePool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut TypePool {
        &mut self.pool
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn labels_mut(&mut self) -> &mut Labels {
        &mut self.labels
    }

    pub fn grid(&self) -> &GridModel {
        &self.grid
    }

    pub fn grid_mut(&mut self) -> &mut GridModel {
        &mut self.grid
    }

    // ------------------------------------------------------------------
    // Transitions and viewport dispatch
    // ------------------------------------------------------------------

    pub fn begin_transition(&mut self) {
        self.in_transition += 1;
    }

    pub fn end_transition(&mut self) {
        self.in_transition = self.in_transition.saturating_sub(1);
    }

    pub fn in_transition(&self) -> bool {
        self.in_transition > 0
    }

    /// Subscribe to viewport changes. Later subscribers run before earlier
    /// ones, and all of them before labels and grid.
    pub fn subscribe(&mut self, subscriber: ViewportSubscriber) {
        self.subscribers.insert(0, subscriber);
    }

    /// Fan a camera change out to all viewport consumers. Label placement
    /// is skipped for smooth (animated) frames; the grid hides itself.
    pub fn on_viewport_change(&mut self, svgport: Rect, viewport: Rect, scale: f64, smooth: bool) {
        self.pool.flush();
        let mut subscribers = std::mem::take(&mut self.subscribers);
        for s in &mut subscribers {
            s(&self.pool, svgport, viewport, scale, smooth);
        }
        self.subscribers.append(&mut subscribers);

        if !smooth && self.in_transition == 0 {
            self.labels.update(&mut self.pool, svgport, viewport, scale);
        }
        self.grid
            .update(viewport, scale, smooth || self.in_transition > 0);
    }

    /// Container size changed: notify pool listeners and re-center the lens
    /// on the next update.
    pub fn on_size_change(&mut self, width: f64, height: f64) {
        self.pool.on_size_update(width, height);
        self.labels.reset_lens();
    }

    // ------------------------------------------------------------------
    // High-level operations
    // ------------------------------------------------------------------

    /// Load a person document into the scene, replacing all current data.
    pub fn load_person(&mut self, person: &PersonRecord, dictionary: &Dictionary) -> bool {
        let guard = BusyGuard::new(
            self.status.as_mut(),
            "missing start or end time in person data",
        );
        self.pool.overview_mut().clear_shadow();
        self.pool.clear_events();
        self.labels.reset_lens();
        if !self.pool.read_events(person, dictionary) {
            return false;
        }
        self.pool.setup_bars(person);
        self.pool.update_look();
        self.labels.clear_screen(&mut self.pool);
        info!(
            events = self.pool.event_count(),
            types = self.pool.total_distinct_type_count(),
            "person loaded"
        );
        guard.done();
        true
    }

    /// Cluster rows by their event rhythm and collapse them via proxies.
    pub fn run_clustering(&mut self, clusterer: &mut EventClusterer) {
        let guard = BusyGuard::new(self.status.as_mut(), "error while clustering");
        clusterer.compute(&self.pool);
        clusterer.assign_proxies(&mut self.pool);
        guard.done();
    }

    /// Undo all proxy assignments, restoring one row per type.
    pub fn reset_clustering(&mut self) {
        self.pool.start_bulk_validity();
        for tid in self.pool.all_type_ids() {
            self.pool.set_proxy(tid, tid);
        }
        self.pool.end_bulk_validity();
    }
}
