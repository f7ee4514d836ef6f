//! Pluggable coordinate mapping: X modes (time/sequence/stacked) and
//! Y modes (flat by first/last event, grouped by hierarchy)

use std::collections::HashMap;

use tracing::warn;

use crate::core::{EventId, Tick, TypeId};

use super::TypePool;

// ============================================================================
// X modes
// ============================================================================

/// Horizontal mapping strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum XMode {
    /// Linear in time, invertible.
    #[default]
    Time,
    /// Global chronological rank times column width. Not invertible.
    Sequence,
    /// Index within the row times column width. Not invertible.
    Stacked,
}

impl XMode {
    pub const ALL: [XMode; 3] = [XMode::Time, XMode::Sequence, XMode::Stacked];

    pub fn name(self) -> &'static str {
        match self {
            Self::Time => "Time",
            Self::Sequence => "Sequence",
            Self::Stacked => "Stacked",
        }
    }

    pub fn show_ticks(self) -> bool {
        true
    }

    /// Whether x is a linear function of time.
    pub fn is_linear(self) -> bool {
        matches!(self, Self::Time)
    }

    /// Whether a time column occupies a constant vertical band.
    pub fn vertical_constant(self) -> bool {
        !matches!(self, Self::Stacked)
    }
}

fn no_impl(what: &str) -> Option<f64> {
    // Explicit unsupported-operation signal; callers receive None.
    warn!(operation = what, "no implementation possible for this x mode");
    None
}

// ============================================================================
// Y modes
// ============================================================================

/// Vertical row assignment strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum YMode {
    /// Flat rows ordered by earliest proxied event, latest starters on top.
    #[default]
    FirstEvent,
    /// Flat rows ordered by latest proxied event.
    LastEvent,
    /// Hierarchy-respecting order by aggregated earliest event.
    GroupFirst,
    /// Hierarchy-respecting order by aggregated latest event.
    GroupLast,
}

impl YMode {
    pub const ALL: [YMode; 4] = [
        YMode::FirstEvent,
        YMode::LastEvent,
        YMode::GroupFirst,
        YMode::GroupLast,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::FirstEvent => "First Event",
            Self::LastEvent => "Last Event",
            Self::GroupFirst => "Groups (First)",
            Self::GroupLast => "Groups (Last)",
        }
    }

    fn grouped(self) -> bool {
        matches!(self, Self::GroupFirst | Self::GroupLast)
    }

    fn by_first(self) -> bool {
        matches!(self, Self::FirstEvent | Self::GroupFirst)
    }
}

// ============================================================================
// Coordinate mapping on the pool
// ============================================================================

impl TypePool {
    pub fn x_mode(&self) -> XMode {
        self.x_mode
    }

    /// Switching the x mode invalidates every derived position.
    pub fn set_x_mode(&mut self, mode: XMode) {
        if self.x_mode != mode {
            self.x_mode = mode;
            self.on_validity_change();
        }
    }

    pub fn y_mode(&self) -> YMode {
        self.y_mode
    }

    pub fn set_y_mode(&mut self, mode: YMode) {
        if self.y_mode != mode {
            self.y_mode = mode;
            self.on_validity_change();
        }
    }

    /// Map a time to an x position. Only the linear mode can answer.
    pub fn x_by_time(&self, time: Tick) -> Option<f64> {
        match self.x_mode {
            XMode::Time => {
                let span = (self.end_time - self.start_time) as f64;
                if span <= 0.0 {
                    return Some(0.0);
                }
                Some((time - self.start_time) as f64 / span * (self.width - self.col_w))
            }
            XMode::Sequence => no_impl("x_by_time[sequence]"),
            XMode::Stacked => no_impl("x_by_time[stacked]"),
        }
    }

    /// Map an event to its x position. Defined for every mode.
    pub fn x_by_event(&self, eid: EventId) -> f64 {
        let e = self.event(eid);
        match self.x_mode {
            XMode::Time => self.x_by_time(e.time()).unwrap_or(0.0),
            XMode::Sequence => e.topo_x() as f64 * self.col_w,
            XMode::Stacked => e.ix_in_type() as f64 * self.col_w,
        }
    }

    /// Inverse mapping from x to time; `None` for non-invertible modes.
    pub fn time_by_x(&self, x: f64) -> Option<f64> {
        match self.x_mode {
            XMode::Time => {
                let usable = self.width - self.col_w;
                if usable <= 0.0 {
                    return Some(self.start_time as f64);
                }
                Some(
                    x / usable * (self.end_time - self.start_time) as f64
                        + self.start_time as f64,
                )
            }
            XMode::Sequence => no_impl("time_by_x[sequence]"),
            XMode::Stacked => no_impl("time_by_x[stacked]"),
        }
    }

    /// Ticks interpreted as Unix seconds; `None` for non-invertible modes.
    pub fn date_by_x(&self, x: f64) -> Option<std::time::SystemTime> {
        let secs = self.time_by_x(x)?;
        if secs >= 0.0 {
            Some(std::time::UNIX_EPOCH + std::time::Duration::from_secs_f64(secs))
        } else {
            Some(std::time::UNIX_EPOCH - std::time::Duration::from_secs_f64(-secs))
        }
    }

    pub fn show_ticks(&self) -> bool {
        self.x_mode.show_ticks()
    }

    pub fn linear_time(&self) -> bool {
        self.x_mode.is_linear()
    }

    pub fn vertical_constant(&self) -> bool {
        self.x_mode.vertical_constant()
    }

    /// Vertical pixel range of a type's row.
    pub fn range_y(&self, tid: TypeId) -> (f64, f64) {
        let y = self.type_at(tid).y();
        (y, y + self.row_h)
    }

    /// Horizontal pixel range of the whole pool; linear mode only.
    pub fn range_x(&self) -> Option<(f64, f64)> {
        Some((
            self.x_by_time(self.start_time)?,
            self.x_by_time(self.end_time)?,
        ))
    }

    pub fn range_time(&self) -> (Tick, Tick) {
        (self.start_time, self.end_time)
    }

    // ------------------------------------------------------------------
    // Y assignment
    // ------------------------------------------------------------------

    /// Assign y positions to every type. `display` is the de-duplicated set
    /// of proxy representatives; all other types inherit the position of
    /// their ultimate proxy. Returns the total height used.
    pub(crate) fn assign_y(&mut self, display: &[TypeId]) -> f64 {
        for &tid in display {
            self.ensure_proxied_events(tid);
        }
        let mut y_map: HashMap<TypeId, f64> = HashMap::new();
        let height = if self.y_mode.grouped() {
            self.assign_y_grouped(display, &mut y_map)
        } else {
            self.assign_y_flat(display, &mut y_map)
        };

        // Propagate positions through proxy chains; unmapped types are
        // parked off screen instead of crashing the layout pass.
        let row_h = self.row_h;
        let order: Vec<TypeId> = self.types_with_events();
        for tid in order {
            if !self.type_at(tid).is_valid() {
                self.type_mut(tid).set_y_raw(-row_h);
                continue;
            }
            let mut pt = tid;
            loop {
                if let Some(&y) = y_map.get(&pt) {
                    self.type_mut(tid).set_y_raw(y);
                    break;
                }
                let next = self.type_at(pt).proxy();
                if next == pt {
                    warn!(
                        group = %self.type_at(tid).group(),
                        type_key = %self.type_at(tid).type_key(),
                        "no y mapping for type"
                    );
                    self.type_mut(tid).set_y_raw(-row_h);
                    break;
                }
                pt = next;
            }
        }
        height
    }

    fn mode_time(&self, tid: TypeId) -> Tick {
        if self.y_mode.by_first() {
            self.type_at(tid).proxied_min_time()
        } else {
            self.type_at(tid).proxied_max_time()
        }
    }

    fn record_y(&self, y_map: &mut HashMap<TypeId, f64>, tid: TypeId, y: f64) {
        y_map.insert(tid, y);
        let proxy = self.type_at(tid).proxy();
        if proxy != tid {
            self.record_y(y_map, proxy, y);
        }
    }

    fn assign_y_flat(&mut self, display: &[TypeId], y_map: &mut HashMap<TypeId, f64>) -> f64 {
        let mut rows: Vec<(TypeId, Tick)> =
            display.iter().map(|&t| (t, self.mode_time(t))).collect();
        if self.y_mode.by_first() {
            rows.sort_by(|a, b| b.1.cmp(&a.1));
        } else {
            rows.sort_by(|a, b| a.1.cmp(&b.1));
        }
        let mut y = 0.0;
        for (tid, _) in rows {
            self.record_y(y_map, tid, y);
            y += self.row_h;
        }
        y
    }

    fn assign_y_grouped(&mut self, display: &[TypeId], y_map: &mut HashMap<TypeId, f64>) -> f64 {
        struct Node {
            time: Tick,
            children: Vec<TypeId>,
        }
        let init = if self.y_mode.by_first() {
            Tick::MAX
        } else {
            Tick::MIN
        };
        let by_first = self.y_mode.by_first();
        let join = |a: Tick, b: Tick| if by_first { a.min(b) } else { a.max(b) };

        let mut nodes: HashMap<TypeId, Node> = HashMap::new();
        let mut roots: Vec<TypeId> = Vec::new();

        for &tid in display {
            let time = self.mode_time(tid);
            let node = nodes.entry(tid).or_insert(Node {
                time: init,
                children: Vec::new(),
            });
            node.time = join(node.time, time);
            let mut child_time = nodes[&tid].time;

            // Walk the parent chain up to the group root, aggregating times.
            let mut cur = tid;
            loop {
                let group = self.type_at(cur).group().to_string();
                let parent_key = self.type_at(cur).parent_key().to_string();
                if self.type_at(cur).is_root() {
                    if !roots.contains(&cur) {
                        roots.push(cur);
                    }
                    break;
                }
                let Some(parent) = self.type_for(&group, &parent_key) else {
                    warn!(group = %group, parent = %parent_key, "no real root found");
                    break;
                };
                let pnode = nodes.entry(parent).or_insert(Node {
                    time: init,
                    children: Vec::new(),
                });
                if !pnode.children.contains(&cur) {
                    pnode.children.push(cur);
                }
                pnode.time = join(pnode.time, child_time);
                child_time = pnode.time;
                cur = parent;
            }
        }

        roots.sort_by(|a, b| {
            let ta = nodes[a].time;
            let tb = nodes[b].time;
            if by_first {
                tb.cmp(&ta)
            } else {
                ta.cmp(&tb)
            }
        });

        // Depth-first assignment. An invalid node contributes no y of its
        // own but its subtree is still traversed.
        let mut y = 0.0;
        let mut stack: Vec<TypeId> = roots.iter().rev().copied().collect();
        while let Some(tid) = stack.pop() {
            let valid = self.type_at(tid).is_valid();
            if valid {
                self.record_y(y_map, tid, y);
            }
            let node = &nodes[&tid];
            if node.children.is_empty() {
                if valid {
                    y += self.row_h;
                }
            } else {
                let mut children = node.children.clone();
                children.sort_by(|a, b| {
                    let ta = nodes[a].time;
                    let tb = nodes[b].time;
                    if by_first {
                        tb.cmp(&ta)
                    } else {
                        ta.cmp(&tb)
                    }
                });
                for c in children.into_iter().rev() {
                    stack.push(c);
                }
            }
        }
        y
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::tests::pool_with_events;

    #[test]
    fn test_time_mode_round_trip() {
        let pool = pool_with_events(0, 100, &[("g", "a", 10), ("g", "a", 20), ("g", "b", 50)]);
        let (start, end) = pool.range_time();
        for t in [start, 25, 50, 99, end] {
            let x = pool.x_by_time(t).unwrap();
            let back = pool.time_by_x(x).unwrap();
            assert!((back - t as f64).abs() < 1e-6, "t={t} back={back}");
        }
    }

    #[test]
    fn test_sequence_mode_not_invertible() {
        let mut pool = pool_with_events(0, 100, &[("g", "a", 10), ("g", "b", 50)]);
        pool.set_x_mode(XMode::Sequence);
        assert!(pool.x_by_time(10).is_none());
        assert!(pool.time_by_x(5.0).is_none());
        assert!(pool.range_x().is_none());
    }

    #[test]
    fn test_sequence_x_uses_rank() {
        let mut pool = pool_with_events(0, 100, &[("g", "a", 10), ("g", "b", 50), ("g", "a", 20)]);
        pool.set_x_mode(XMode::Sequence);
        let col_w = pool.box_size().0;
        let mut xs: Vec<f64> = pool
            .all_event_ids()
            .map(|eid| pool.x_by_event(eid))
            .collect();
        xs.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(xs, vec![0.0, col_w, 2.0 * col_w]);
    }

    #[test]
    fn test_flat_y_assignment_covers_display_types() {
        let mut pool = pool_with_events(0, 100, &[("g", "a", 10), ("g", "b", 50)]);
        pool.update_look();
        let row_h = pool.box_size().1;
        let a = pool.type_for("g", "a").unwrap();
        let b = pool.type_for("g", "b").unwrap();
        let ya = pool.type_at(a).y();
        let yb = pool.type_at(b).y();
        assert!(ya >= 0.0 && yb >= 0.0);
        assert_ne!(ya, yb);
        // First-event mode sorts descending by earliest event: b on top.
        assert_eq!(yb, 0.0);
        assert_eq!(ya, row_h);
    }

    #[test]
    fn test_proxied_type_inherits_proxy_y() {
        let mut pool = pool_with_events(0, 100, &[("g", "a", 10), ("g", "b", 50)]);
        let a = pool.type_for("g", "a").unwrap();
        let b = pool.type_for("g", "b").unwrap();
        pool.set_proxy(a, b);
        pool.flush();
        assert_eq!(pool.type_at(a).y(), pool.type_at(b).y());
        assert_eq!(pool.type_at(b).y(), 0.0);
    }

    #[test]
    fn test_grouped_y_skips_invalid_without_gap() {
        let mut pool = pool_with_events(
            0,
            100,
            &[("g", "a", 10), ("g", "b", 50), ("g", "c", 70)],
        );
        pool.set_y_mode(YMode::GroupLast);
        let b = pool.type_for("g", "b").unwrap();
        pool.set_valid(b, false);
        pool.flush();
        let row_h = pool.box_size().1;
        let a = pool.type_for("g", "a").unwrap();
        let c = pool.type_for("g", "c").unwrap();
        assert_eq!(pool.type_at(b).y(), -row_h);
        let mut ys = [pool.type_at(a).y(), pool.type_at(c).y()];
        ys.sort_by(|x, y| x.partial_cmp(y).unwrap());
        assert_eq!(ys, [0.0, row_h]);
    }
}
