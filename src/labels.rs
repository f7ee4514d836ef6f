//! Non-overlapping label placement driven by the visible viewport
//!
//! Three strategies, picked from the data and the lens toggle:
//! - by bars: labels stack below the top edge per vertical-bar section
//! - by weight: the heaviest weighted event near the viewport gets the label
//! - lens: labels attach to events inside a movable ellipse, stacked on its
//!   left and right rims

use tracing::trace;

use crate::core::{EventId, TypeId};
use crate::pool::{Rect, TypePool};

pub const LABEL_FONT_SIZE: f64 = 12.0;
pub const LABEL_FONT_GAP: f64 = 12.0;

/// Horizontal gap between a label and its anchor point.
const LABEL_X_GAP: f64 = 30.0;
/// Maximum label text width.
const MAX_LABEL_WIDTH: f64 = 200.0;
/// Base lens diameter.
const LENS_SIZE: f64 = 150.0;

/// Label placement strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelMode {
    Bars,
    Weight,
    Lens,
}

/// One positioned label with its connector line, in screen coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelPlacement {
    pub type_id: TypeId,
    /// Text anchor position.
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub right: bool,
    pub font_size: f64,
    /// Connector line from the label towards the event or row.
    pub line: (f64, f64, f64, f64),
    /// Whether the wrapped text must be recomputed (width or orientation
    /// changed since the last placement).
    pub text_refresh: bool,
    pub event: Option<EventId>,
}

/// Viewport-driven label placement engine.
pub struct Labels {
    use_lens: bool,
    mode_override: Option<LabelMode>,
    lens_init: bool,
    lens: Rect,
    placements: Vec<LabelPlacement>,
}

impl Default for Labels {
    fn default() -> Self {
        Self::new()
    }
}

impl Labels {
    pub fn new() -> Self {
        Self {
            use_lens: false,
            mode_override: None,
            lens_init: false,
            lens: Rect::default(),
            placements: Vec::new(),
        }
    }

    pub fn use_lens(&self) -> bool {
        self.use_lens
    }

    /// Toggle the lens. Clears all label caches so the next update starts
    /// from scratch.
    pub fn set_use_lens(&mut self, pool: &mut TypePool, use_lens: bool) {
        self.use_lens = use_lens;
        self.clear_screen(pool);
    }

    /// Force a particular strategy regardless of data shape.
    pub fn set_mode_override(&mut self, mode: Option<LabelMode>) {
        self.mode_override = mode;
    }

    /// Strategy in effect: explicit override, then lens, then weight when
    /// weighted events exist, bars otherwise.
    pub fn effective_mode(&self, pool: &TypePool) -> LabelMode {
        if let Some(mode) = self.mode_override {
            return mode;
        }
        if self.use_lens {
            LabelMode::Lens
        } else if pool.has_weighted_events() {
            LabelMode::Weight
        } else {
            LabelMode::Bars
        }
    }

    pub fn placements(&self) -> &[LabelPlacement] {
        &self.placements
    }

    pub fn lens_view(&self) -> Rect {
        self.lens
    }

    pub fn lens_initialized(&self) -> bool {
        self.lens_init
    }

    /// Drop lens placement state, e.g. after a container resize.
    pub fn reset_lens(&mut self) {
        self.lens_init = false;
    }

    pub fn set_lens_view(&mut self, x: f64, y: f64, width: f64, height: f64) {
        self.lens = Rect::new(x, y, width, height);
    }

    /// Center the lens at a position, keeping its size.
    pub fn move_lens(&mut self, x: f64, y: f64) {
        self.lens.x = x - self.lens.width * 0.5;
        self.lens.y = y - self.lens.height * 0.5;
    }

    /// Drop every label and its cached text layout.
    pub fn clear_screen(&mut self, pool: &mut TypePool) {
        self.placements.clear();
        for tid in pool.all_type_ids() {
            self.no_show(pool, tid);
        }
    }

    fn no_show(&self, pool: &mut TypePool, tid: TypeId) {
        pool.type_mut(tid).clear_label_cache();
    }

    /// Recompute all placements for the current viewport.
    pub fn update(&mut self, pool: &mut TypePool, svgport: Rect, viewport: Rect, scale: f64) {
        self.placements.clear();
        let mode = self.effective_mode(pool);
        trace!(?mode, scale, "placing labels");
        match mode {
            LabelMode::Bars => self.by_bars(pool, svgport, viewport, scale),
            LabelMode::Weight => self.by_weight(pool, svgport, viewport, scale),
            LabelMode::Lens => self.by_lens(pool, viewport, scale),
        }
    }

    /// Compute a placement with its connector and push it.
    #[allow(clippy::too_many_arguments)]
    fn position_label(
        &mut self,
        pool: &mut TypePool,
        tid: TypeId,
        x: f64,
        y: f64,
        width: f64,
        viewport: Rect,
        scale: f64,
        right: bool,
        event: Option<EventId>,
    ) {
        let (col_w, row_h) = pool.box_size();
        let rx = if right { x - LABEL_X_GAP } else { x + LABEL_X_GAP };
        let text_refresh = !pool.type_at(tid).label_cache_matches(width, right);
        if text_refresh {
            pool.type_mut(tid).set_label_cache(width, right);
        }

        let t_y = (pool.type_at(tid).y() + row_h * 0.5 - viewport.y) * scale;
        let t_x = match event {
            Some(e) => (pool.x_by_event(e) + col_w * 0.5 - viewport.x) * scale,
            None => {
                if right {
                    rx + LABEL_X_GAP
                } else {
                    rx - LABEL_X_GAP
                }
            }
        };
        let line = (
            if right { rx + 5.0 } else { rx - 5.0 },
            y - LABEL_FONT_SIZE * 0.5,
            if right { t_x - 5.0 } else { t_x + 5.0 },
            t_y,
        );
        self.placements.push(LabelPlacement {
            type_id: tid,
            x: rx,
            y,
            width,
            right,
            font_size: LABEL_FONT_SIZE,
            line,
            text_refresh,
            event,
        });
    }

    // ------------------------------------------------------------------
    // By bars
    // ------------------------------------------------------------------

    fn by_bars(&mut self, pool: &mut TypePool, svgport: Rect, viewport: Rect, scale: f64) {
        let (col_w, _) = pool.box_size();
        let mut sections: Vec<Vec<TypeId>> = Vec::new();
        pool.traverse_v_bars(|_, _, bar| {
            if let Some(ix) = bar {
                sections.push(pool.v_bars()[ix].labels.clone());
            }
        });
        for mut section in sections {
            section.sort_by(|a, b| {
                pool.type_at(*a)
                    .y()
                    .partial_cmp(&pool.type_at(*b).y())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            let mut y = LABEL_FONT_GAP;
            for tid in section {
                let t = pool.type_at(tid);
                if !t.is_valid() || !t.show_labels() {
                    continue;
                }
                if t.y() < 0.0 {
                    self.no_show(pool, tid);
                    continue;
                }
                y = y.max(-LABEL_FONT_GAP + (pool.type_at(tid).y() - viewport.y) * scale);
                let rep = pool.resolve_proxy(tid);
                let Some(event) = pool.first_proxied_event(rep) else {
                    continue;
                };
                let x = (pool.x_by_event(event) - col_w - viewport.x) * scale;
                let width = (x - svgport.x - 4.0).clamp(0.0, MAX_LABEL_WIDTH);
                self.position_label(pool, tid, x, y, width, viewport, scale, true, Some(event));
                y += LABEL_FONT_GAP;
            }
        }
    }

    // ------------------------------------------------------------------
    // By weight
    // ------------------------------------------------------------------

    fn by_weight(&mut self, pool: &mut TypePool, svgport: Rect, viewport: Rect, scale: f64) {
        if !pool.has_weighted_events() {
            return;
        }
        let (_, row_h) = pool.box_size();
        for tid in pool.types_with_events() {
            let t = pool.type_at(tid);
            if !t.show_labels() || !t.is_valid() {
                self.no_show(pool, tid);
                continue;
            }
            // Heaviest qualifying weighted event in and just beyond the
            // viewport, over the proxied union so collapsed members stay
            // silent. Below-top-ten weights only qualify when zoomed in.
            let to_x = viewport.x + viewport.width + 200.0;
            let mut best: Option<(EventId, f64)> = None;
            for e in pool.proxied_events(tid) {
                let x = pool.x_by_event(e);
                if x < viewport.x {
                    continue;
                }
                if x >= to_x {
                    break;
                }
                let ev = pool.event(e);
                if !ev.shown() {
                    continue;
                }
                if let Some((_, w)) = best {
                    if w >= ev.weight() {
                        continue;
                    }
                }
                if ev.is_weighted() && (scale > 1.0 || pool.is_in_top_ten_weight(ev.weight())) {
                    best = Some((e, ev.weight()));
                }
            }
            let Some((event, _)) = best else {
                self.no_show(pool, tid);
                continue;
            };
            if !pool.event(event).shown() || pool.type_at(tid).y() < 0.0 {
                self.no_show(pool, tid);
                continue;
            }
            let ex = (pool.x_by_event(event) - viewport.x) * scale - 2.0;
            let ey = (pool.type_at(tid).y() - viewport.y) * scale;
            let width = (ex - svgport.x - 4.0).clamp(0.0, MAX_LABEL_WIDTH);
            if ey + row_h < 0.0
                || ey > svgport.y + svgport.height
                || ex - width > svgport.x + svgport.width
            {
                self.no_show(pool, tid);
                continue;
            }
            self.position_label(pool, tid, ex, ey, width, viewport, scale, true, Some(event));
        }
    }

    // ------------------------------------------------------------------
    // Lens
    // ------------------------------------------------------------------

    fn by_lens(&mut self, pool: &mut TypePool, viewport: Rect, scale: f64) {
        let (col_w, row_h) = pool.box_size();
        let size = (LENS_SIZE * scale * 1.25).min(LENS_SIZE);
        if !self.lens_init || self.lens.width != size || self.lens.height != size {
            let (x, y) = if self.lens_init {
                (
                    self.lens.x + (self.lens.width - size) * 0.5,
                    self.lens.y + (self.lens.height - size) * 0.5,
                )
            } else {
                (
                    (viewport.width * scale - size) * 0.5,
                    (viewport.height * scale - size) * 0.5,
                )
            };
            self.set_lens_view(x, y, size, size);
            self.lens_init = true;
        }
        let lv = self.lens;
        let rx = lv.width * 0.5;
        let ry = lv.height * 0.5;
        let cx = lv.x + rx;
        let cy = lv.y + ry;
        // Ellipse rim x at a given screen y.
        let x_left = |y: f64| cx - (((cy - y) / ry).clamp(-1.0, 1.0)).asin().cos() * rx;
        let x_right = |y: f64| cx + (((cy - y) / ry).clamp(-1.0, 1.0)).asin().cos() * rx;

        let mut already: Vec<TypeId> = Vec::new();
        let mut rows: Vec<(TypeId, EventId, i8)> = Vec::new();
        for tid in pool.types_with_events() {
            let t = pool.type_at(tid);
            if !t.show_labels() || !t.is_valid() {
                self.no_show(pool, tid);
                continue;
            }
            let rep = pool.resolve_proxy(tid);
            if rep != tid {
                self.no_show(pool, tid);
            }
            if already.contains(&rep) {
                continue;
            }
            already.push(rep);
            let y = pool.type_at(rep).y();
            if y < 0.0 {
                self.no_show(pool, rep);
                continue;
            }
            // Whole row must fall inside the lens vertically.
            let min_y = (y - viewport.y) * scale;
            let max_y = (y + row_h - viewport.y) * scale;
            if min_y < lv.y || max_y > lv.y + lv.height {
                self.no_show(pool, rep);
                continue;
            }
            let row_mid = (y + row_h * 0.5 - viewport.y) * scale;
            let left_b = viewport.x + x_left(row_mid) / scale - col_w * 0.5;
            let right_b = viewport.x + x_right(row_mid) / scale;
            let mid = (left_b + right_b) * 0.5;

            // Closest event to either rim, with a doubled bonus for the
            // midpoint so central events win ties.
            let mut best: Option<(EventId, i8)> = None;
            let mut min_d = f64::INFINITY;
            pool.proxied_events_in_x_range(rep, left_b, right_b, |e, x| {
                let dl = (x - left_b).abs();
                let dr = (x - right_b).abs();
                let dm = (x - mid).abs();
                if dl < min_d {
                    min_d = dl;
                    best = Some((e, -1));
                }
                if dr < min_d {
                    min_d = dr;
                    best = Some((e, 1));
                }
                if dm * 2.0 < min_d {
                    min_d = dm * 2.0;
                    best = Some((e, 0));
                }
            });
            match best {
                Some((event, pref)) => rows.push((rep, event, pref)),
                None => self.no_show(pool, rep),
            }
        }

        rows.sort_by(|a, b| {
            pool.type_at(a.0)
                .y()
                .partial_cmp(&pool.type_at(b.0).y())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        // Stack labels along both rims; midpoint preference alternates by
        // row parity.
        let mut y_right = lv.y;
        let mut y_left = lv.y;
        let mut rights: Vec<(TypeId, f64, f64, EventId)> = Vec::new();
        let mut lefts: Vec<(TypeId, f64, f64, EventId)> = Vec::new();
        for (tid, event, pref) in rows {
            let y = pool.type_at(tid).y();
            let right = match pref {
                0 => ((y / row_h).floor() as i64) % 2 != 0,
                p => p < 0,
            };
            let label_y = (y - viewport.y) * scale;
            if right {
                y_right = y_right.max(-LABEL_FONT_GAP + label_y);
                rights.push((tid, x_left(label_y), y_right, event));
                y_right += LABEL_FONT_GAP;
            } else {
                y_left = y_left.max(-LABEL_FONT_GAP + label_y);
                lefts.push((tid, x_right(label_y), y_left, event));
                y_left += LABEL_FONT_GAP;
            }
        }

        // Center each stack vertically when it overflows the lens.
        let shift_right = ((lv.height - (y_right - lv.y)) * 0.5).min(0.0);
        for (tid, x, y, event) in rights {
            self.position_label(
                pool,
                tid,
                x,
                y + shift_right,
                MAX_LABEL_WIDTH,
                viewport,
                scale,
                true,
                Some(event),
            );
        }
        let shift_left = ((lv.height - (y_left - lv.y)) * 0.5).min(0.0);
        for (tid, x, y, event) in lefts {
            self.position_label(
                pool,
                tid,
                x,
                y + shift_left,
                MAX_LABEL_WIDTH,
                viewport,
                scale,
                false,
                Some(event),
            );
        }
    }
}
