//! Selection and highlight state machine
//!
//! - per-event selected flags with bulk coalescing
//! - selection summaries (single slot / single type) fanned out to listeners
//! - highlight guides for the hovered event (horizontal / vertical / both)

use tracing::debug;

use crate::core::{EventId, TypeId};

use super::{Rect, TypePool};

pub const HIGHLIGHT_NONE: u8 = 0;
pub const HIGHLIGHT_HOR: u8 = 1;
pub const HIGHLIGHT_VER: u8 = 2;
pub const HIGHLIGHT_BOTH: u8 = HIGHLIGHT_HOR | HIGHLIGHT_VER;

/// Summary of the current selection handed to listeners.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectionUpdate {
    /// Selected events, reduced to one representative per event group.
    pub events: Vec<EventId>,
    /// Proxy representatives of the selected events' types.
    pub types: Vec<TypeId>,
    /// All selected events share one time slot.
    pub single_slot: bool,
    /// The single selected type, when there is exactly one.
    pub single_type: Option<TypeId>,
}

type SelectionListener = Box<dyn FnMut(&SelectionUpdate)>;
type HighlightListener = Box<dyn FnMut(Option<EventId>, u8)>;

pub(crate) struct SelectionState {
    in_bulk: u32,
    pub(crate) fix: bool,
    pub(crate) join: bool,
    vertical: bool,
    pub(crate) grey_out: bool,
    pub(crate) has_selection: bool,
    highlight_event: Option<EventId>,
    highlight_mode: u8,
    /// Mode in effect when the guides were last positioned.
    applied_mode: u8,
    ver_guide_x: Option<f64>,
    hor_guide_y: Option<f64>,
    listeners: Vec<SelectionListener>,
    highlight_listeners: Vec<HighlightListener>,
    /// Last dispatched summary, replayed to late-registering listeners.
    last_update: Option<SelectionUpdate>,
}

impl Default for SelectionState {
    fn default() -> Self {
        Self {
            in_bulk: 0,
            fix: false,
            join: false,
            vertical: false,
            grey_out: false,
            has_selection: false,
            highlight_event: None,
            highlight_mode: HIGHLIGHT_HOR,
            applied_mode: HIGHLIGHT_HOR,
            ver_guide_x: None,
            hor_guide_y: None,
            listeners: Vec::new(),
            highlight_listeners: Vec::new(),
            last_update: None,
        }
    }
}

impl SelectionState {
    /// Forget everything bound to event handles; listeners and mode flags
    /// survive a data reload.
    pub(crate) fn reset_data(&mut self) {
        self.has_selection = false;
        self.highlight_event = None;
        self.ver_guide_x = None;
        self.hor_guide_y = None;
        self.last_update = None;
    }
}

impl TypePool {
    // ------------------------------------------------------------------
    // Flags
    // ------------------------------------------------------------------

    pub fn fix_selection(&self) -> bool {
        self.selection.fix
    }

    pub fn set_fix_selection(&mut self, fix: bool) {
        self.selection.fix = fix;
    }

    pub fn join_selections(&self) -> bool {
        self.selection.join
    }

    pub fn set_join_selections(&mut self, join: bool) {
        self.selection.join = join;
    }

    pub fn vertical_selection(&self) -> bool {
        self.selection.vertical
    }

    pub fn set_vertical_selection(&mut self, vertical: bool) {
        self.selection.vertical = vertical;
    }

    pub fn grey_out_rest(&self) -> bool {
        self.selection.grey_out
    }

    pub fn set_grey_out_rest(&mut self, grey_out: bool) {
        self.selection.grey_out = grey_out;
    }

    pub fn has_selection(&self) -> bool {
        self.selection.has_selection
    }

    // ------------------------------------------------------------------
    // Core selection
    // ------------------------------------------------------------------

    /// Set one event's selected flag. A change triggers a summary update
    /// unless a bulk block is open.
    pub fn set_selected(&mut self, eid: EventId, selected: bool) {
        if self.event_mut(eid).set_selected_raw(selected) {
            self.update_selection();
        }
    }

    pub fn start_bulk_selection(&mut self) {
        self.selection.in_bulk += 1;
    }

    pub fn end_bulk_selection(&mut self) {
        self.selection.in_bulk = self.selection.in_bulk.saturating_sub(1);
        if self.selection.in_bulk == 0 {
            self.update_selection();
        }
    }

    fn deselect_all(&mut self) {
        for ix in 0..self.event_count() {
            self.event_mut(EventId(ix as u32)).set_selected_raw(false);
        }
    }

    /// Recompute the selection summary and notify listeners. No-op while a
    /// bulk block is open; the closing end call performs the single pass.
    pub fn update_selection(&mut self) {
        if self.selection.in_bulk > 0 {
            return;
        }
        self.overview.clear_shadow();

        let mut selected: Vec<EventId> = Vec::new();
        for tid in self.types_with_events() {
            if !self.type_at(tid).is_valid() {
                continue;
            }
            for &eid in self.type_at(tid).events() {
                if self.event(eid).shown() && self.event(eid).is_selected() {
                    selected.push(eid);
                }
            }
        }

        let mut only_time = None;
        let mut single_slot = !selected.is_empty();
        let mut types: Vec<TypeId> = Vec::new();
        let mut events: Vec<EventId> = Vec::new();
        for &eid in &selected {
            let time = self.event(eid).time();
            match only_time {
                None => only_time = Some(time),
                Some(t) if t != time => single_slot = false,
                _ => {}
            }
            let pt = self.resolve_proxy(self.event(eid).type_id());
            if !types.contains(&pt) {
                types.push(pt);
            }
            let fog = self.first_of_group(eid);
            if !events.contains(&fog) {
                events.push(fog);
            }
        }
        let single_type = if types.len() == 1 { Some(types[0]) } else { None };
        self.selection.has_selection = !events.is_empty();

        let update = SelectionUpdate {
            events,
            types,
            single_slot,
            single_type,
        };
        debug!(
            events = update.events.len(),
            types = update.types.len(),
            single_slot = update.single_slot,
            "selection updated"
        );
        let mut listeners = std::mem::take(&mut self.selection.listeners);
        for l in &mut listeners {
            l(&update);
        }
        self.selection.listeners.append(&mut listeners);
        self.selection.last_update = Some(update);
        self.overview.on_box_update();
    }

    /// Register a selection listener. The listener immediately receives the
    /// last dispatched summary so late registrants start consistent.
    pub fn add_selection_listener(&mut self, mut listener: SelectionListener) {
        if let Some(last) = &self.selection.last_update {
            listener(last);
        }
        self.selection.listeners.push(listener);
    }

    // ------------------------------------------------------------------
    // Highlighting
    // ------------------------------------------------------------------

    pub fn highlight_mode(&self) -> u8 {
        self.selection.highlight_mode
    }

    pub fn set_highlight_mode(&mut self, mode: u8) {
        self.selection.highlight_mode = mode;
    }

    pub fn highlighted_event(&self) -> Option<EventId> {
        self.selection.highlight_event
    }

    /// Guide positions derived from the highlighted event:
    /// (vertical guide x, horizontal guide y).
    pub fn highlight_guides(&self) -> (Option<f64>, Option<f64>) {
        (self.selection.ver_guide_x, self.selection.hor_guide_y)
    }

    /// Move the highlight to an event (or clear it) and reposition the
    /// guides according to the active mode.
    pub fn set_highlight_event(&mut self, eid: Option<EventId>) {
        let sel = &self.selection;
        if sel.highlight_event == eid && sel.applied_mode == sel.highlight_mode {
            return;
        }
        self.selection.highlight_event = eid;
        self.selection.applied_mode = self.selection.highlight_mode;
        self.overview.clear_shadow();

        let mode = self.selection.highlight_mode;
        self.selection.ver_guide_x = match eid {
            Some(e) if mode & HIGHLIGHT_VER != 0 => Some(self.x_by_event(e)),
            _ => None,
        };
        self.selection.hor_guide_y = match eid {
            Some(e) if mode & HIGHLIGHT_HOR != 0 => {
                Some(self.type_at(self.event(e).type_id()).y())
            }
            _ => None,
        };
        self.overview.on_box_update();

        if self.selection.in_bulk > 0 {
            return;
        }
        let mut listeners = std::mem::take(&mut self.selection.highlight_listeners);
        for l in &mut listeners {
            l(eid, mode);
        }
        self.selection.highlight_listeners.append(&mut listeners);
    }

    pub fn add_highlight_listener(&mut self, listener: HighlightListener) {
        self.selection.highlight_listeners.push(listener);
    }

    /// Hovering an event highlights it in both directions.
    pub fn hover_highlight(&mut self, eid: EventId) {
        self.set_highlight_mode(HIGHLIGHT_BOTH);
        self.set_highlight_event(Some(eid));
    }

    // ------------------------------------------------------------------
    // Interactive selection flows
    // ------------------------------------------------------------------

    /// Rubber-band selection. Only the finalized rectangle applies; the
    /// result is fixed and the rest greyed out.
    pub fn select_in_rect(&mut self, rect: Rect, done: bool) {
        if !done {
            return;
        }
        self.start_bulk_selection();
        if !self.join_selections() {
            self.deselect_all();
        }
        let mut hits: Vec<EventId> = Vec::new();
        for tid in self.types_with_events() {
            if !self.type_at(tid).is_valid() {
                continue;
            }
            let (y0, y1) = self.range_y(tid);
            if rect.y + rect.height < y0 || rect.y > y1 {
                continue;
            }
            self.events_in_x_range(tid, rect.x - self.col_w, rect.x + rect.width, |e, _| {
                hits.push(e);
            });
        }
        for e in hits {
            self.set_selected(e, true);
        }
        self.set_highlight_mode(HIGHLIGHT_NONE);
        self.set_highlight_event(None);
        self.set_fix_selection(true);
        self.set_grey_out_rest(true);
        self.end_bulk_selection();
    }

    /// Point selection at a position: the whole time column in vertical
    /// mode, otherwise the whole row under the cursor. Ignored while the
    /// selection is fixed.
    pub fn select_at(&mut self, x: f64, y: f64) {
        if self.fix_selection() {
            return;
        }
        self.start_bulk_selection();
        if !self.join_selections() {
            self.deselect_all();
        }
        let mut hits: Vec<EventId> = Vec::new();
        if self.vertical_selection() {
            self.events_for_x(x, |e| hits.push(e));
            self.set_highlight_mode(HIGHLIGHT_VER);
        } else {
            for tid in self.types_with_events() {
                let (y0, y1) = self.range_y(tid);
                if y < y0 || y >= y1 {
                    continue;
                }
                for &e in self.type_at(tid).events() {
                    if self.event(e).shown() {
                        hits.push(e);
                    }
                }
            }
            self.set_highlight_mode(HIGHLIGHT_HOR);
        }
        let first = hits.first().copied();
        for e in hits {
            self.set_selected(e, true);
        }
        self.set_highlight_event(first);
        self.set_grey_out_rest(false);
        self.end_bulk_selection();
    }

    /// A click toggles between a fresh fixed selection and a free one.
    pub fn click_at(&mut self, x: f64, y: f64) {
        self.start_bulk_selection();
        self.select_at(x, y);
        let fix = !self.fix_selection();
        self.set_fix_selection(fix);
        self.end_bulk_selection();
    }

    /// Select every event represented by a type row. For an inner hierarchy
    /// node without direct proxied events, events are gathered through
    /// proxy-then-parent ancestry.
    pub fn select_type_row(&mut self, tid: TypeId) {
        self.start_bulk_selection();
        if !self.join_selections() {
            self.deselect_all();
        }
        let mut hits: Vec<EventId> = self
            .proxied_events(tid)
            .into_iter()
            .filter(|&e| self.event(e).shown())
            .collect();
        if hits.is_empty() {
            for tid2 in self.types_with_events() {
                let mut cur = Some(self.resolve_proxy(tid2));
                let belongs = loop {
                    match cur {
                        Some(t) if t == tid => break true,
                        Some(t) => cur = self.parent_of(t),
                        None => break false,
                    }
                };
                if !belongs {
                    continue;
                }
                for &e in self.type_at(tid2).events() {
                    if self.event(e).shown() {
                        hits.push(e);
                    }
                }
            }
        }
        let first = hits.first().copied();
        for e in hits {
            self.set_selected(e, true);
        }
        self.set_highlight_mode(HIGHLIGHT_HOR);
        self.set_highlight_event(first);
        self.set_fix_selection(true);
        self.set_grey_out_rest(false);
        self.end_bulk_selection();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::pool::tests::{person_record, pool_with_events};
    use crate::pool::TypePool;
    use crate::core::Dictionary;

    #[test]
    fn test_single_slot_and_type_summary() {
        let mut pool = pool_with_events(0, 100, &[("g", "a", 10), ("g", "a", 10), ("g", "b", 10)]);
        let seen: Rc<RefCell<Vec<SelectionUpdate>>> = Rc::default();
        let sink = seen.clone();
        pool.add_selection_listener(Box::new(move |u| sink.borrow_mut().push(u.clone())));

        let a = pool.type_for("g", "a").unwrap();
        let b = pool.type_for("g", "b").unwrap();
        // Duplicate at t=10 was deduped; a holds one event.
        let ea = pool.type_at(a).events()[0];
        let eb = pool.type_at(b).events()[0];
        pool.start_bulk_selection();
        pool.set_selected(ea, true);
        pool.set_selected(eb, true);
        pool.end_bulk_selection();

        let last = seen.borrow().last().cloned().unwrap();
        assert!(last.single_slot);
        assert_eq!(last.single_type, None);
        assert_eq!(last.types.len(), 2);
        assert!(pool.has_selection());

        pool.set_selected(eb, false);
        let last = seen.borrow().last().cloned().unwrap();
        assert_eq!(last.single_type, Some(a));
        assert!(last.single_slot);
    }

    #[test]
    fn test_bulk_selection_fires_once() {
        let mut pool = pool_with_events(0, 100, &[("g", "a", 10), ("g", "a", 30), ("g", "b", 50)]);
        let count = Rc::new(RefCell::new(0usize));
        let sink = count.clone();
        pool.add_selection_listener(Box::new(move |_| *sink.borrow_mut() += 1));

        pool.start_bulk_selection();
        for eid in pool.all_event_ids().collect::<Vec<_>>() {
            pool.set_selected(eid, true);
        }
        assert_eq!(*count.borrow(), 0);
        pool.end_bulk_selection();
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn test_replay_on_register() {
        let mut pool = pool_with_events(0, 100, &[("g", "a", 10)]);
        let a = pool.type_for("g", "a").unwrap();
        let ea = pool.type_at(a).events()[0];
        pool.set_selected(ea, true);

        // The listener registers after the fact and still sees the state.
        let seen: Rc<RefCell<Vec<SelectionUpdate>>> = Rc::default();
        let sink = seen.clone();
        pool.add_selection_listener(Box::new(move |u| sink.borrow_mut().push(u.clone())));
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(seen.borrow()[0].events, vec![ea]);
    }

    #[test]
    fn test_select_in_rect() {
        let mut pool = pool_with_events(0, 100, &[("g", "a", 10), ("g", "a", 80), ("g", "b", 20)]);
        pool.update_look();
        let a = pool.type_for("g", "a").unwrap();
        let (y0, _) = pool.range_y(a);
        let x10 = pool.x_by_time(10).unwrap();
        let x20 = pool.x_by_time(20).unwrap();
        // Thin rectangle inside a's row, reaching just past the first event.
        pool.select_in_rect(Rect::new(x10, y0 + 2.0, (x20 - x10) * 0.5, 1.0), true);
        assert!(pool.fix_selection());
        assert!(pool.grey_out_rest());
        assert_eq!(pool.highlight_mode(), HIGHLIGHT_NONE);
        let selected: Vec<_> = pool
            .all_event_ids()
            .filter(|&e| pool.event(e).is_selected())
            .collect();
        assert_eq!(selected.len(), 1);
        assert_eq!(pool.event(selected[0]).time(), 10);
    }

    #[test]
    fn test_select_in_rect_pending_ignored() {
        let mut pool = pool_with_events(0, 100, &[("g", "a", 10)]);
        pool.update_look();
        pool.select_in_rect(Rect::new(0.0, 0.0, 1000.0, 1000.0), false);
        assert!(pool.all_event_ids().all(|e| !pool.event(e).is_selected()));
        assert!(!pool.fix_selection());
    }

    #[test]
    fn test_join_keeps_previous_selection() {
        let mut pool = pool_with_events(0, 100, &[("g", "a", 10), ("g", "b", 50)]);
        pool.update_look();
        let a = pool.type_for("g", "a").unwrap();
        let b = pool.type_for("g", "b").unwrap();
        let ea = pool.type_at(a).events()[0];
        let eb = pool.type_at(b).events()[0];
        pool.set_selected(ea, true);

        pool.set_join_selections(true);
        let (y0, _) = pool.range_y(b);
        let xb = pool.x_by_time(50).unwrap();
        pool.select_in_rect(Rect::new(xb, y0, 1.0, 1.0), true);
        assert!(pool.event(ea).is_selected());
        assert!(pool.event(eb).is_selected());
    }

    #[test]
    fn test_select_at_vertical_column() {
        let mut pool = pool_with_events(0, 100, &[("g", "a", 10), ("g", "b", 10), ("g", "b", 60)]);
        pool.update_look();
        pool.set_vertical_selection(true);
        let x = pool.x_by_time(10).unwrap() + pool.box_size().0 * 0.5;
        pool.select_at(x, 0.0);
        let selected: Vec<_> = pool
            .all_event_ids()
            .filter(|&e| pool.event(e).is_selected())
            .collect();
        assert_eq!(selected.len(), 2);
        assert!(selected.iter().all(|&e| pool.event(e).time() == 10));
        assert_eq!(pool.highlight_mode(), HIGHLIGHT_VER);
    }

    #[test]
    fn test_select_at_ignored_while_fixed() {
        let mut pool = pool_with_events(0, 100, &[("g", "a", 10)]);
        pool.update_look();
        pool.set_fix_selection(true);
        let a = pool.type_for("g", "a").unwrap();
        let (y0, _) = pool.range_y(a);
        pool.select_at(pool.x_by_time(10).unwrap(), y0);
        assert!(!pool.has_selection());
    }

    #[test]
    fn test_highlight_guides() {
        let mut pool = pool_with_events(0, 100, &[("g", "a", 10), ("g", "b", 50)]);
        pool.update_look();
        let a = pool.type_for("g", "a").unwrap();
        let ea = pool.type_at(a).events()[0];

        pool.set_highlight_mode(HIGHLIGHT_BOTH);
        pool.set_highlight_event(Some(ea));
        let (vx, hy) = pool.highlight_guides();
        assert_eq!(vx, Some(pool.x_by_event(ea)));
        assert_eq!(hy, Some(pool.type_at(a).y()));

        // Horizontal-only mode drops the vertical guide.
        pool.set_highlight_mode(HIGHLIGHT_HOR);
        pool.set_highlight_event(Some(ea));
        let (vx, hy) = pool.highlight_guides();
        assert_eq!(vx, None);
        assert!(hy.is_some());

        pool.set_highlight_event(None);
        assert_eq!(pool.highlight_guides(), (None, None));
    }

    #[test]
    fn test_select_type_row_inner_node() {
        let mut dict = Dictionary::new();
        let g = dict.entry("g".to_string()).or_default();
        g.insert(
            "leaf".into(),
            crate::core::TypeSpec {
                parent: Some("mid".into()),
                ..Default::default()
            },
        );
        g.insert("mid".into(), crate::core::TypeSpec::default());
        let mut pool = TypePool::new(8.0, 10.0);
        let person = person_record(0, 100, &[("g", "leaf", 10), ("g", "leaf", 40)]);
        assert!(pool.read_events(&person, &dict));
        pool.update_look();

        // mid has no events of its own; selection flows through ancestry.
        let mid = pool.type_for("g", "mid").unwrap();
        pool.select_type_row(mid);
        assert!(pool.all_event_ids().all(|e| pool.event(e).is_selected()));
        assert!(pool.fix_selection());
        assert_eq!(pool.highlight_mode(), HIGHLIGHT_HOR);
    }

    #[test]
    fn test_grey_out_color() {
        let mut pool = pool_with_events(0, 100, &[("g", "a", 10), ("g", "b", 50)]);
        pool.update_look();
        let a = pool.type_for("g", "a").unwrap();
        let b = pool.type_for("g", "b").unwrap();
        let ea = pool.type_at(a).events()[0];
        let eb = pool.type_at(b).events()[0];

        pool.set_selected(ea, true);
        pool.set_fix_selection(true);
        pool.set_grey_out_rest(true);
        assert_eq!(pool.event_color(eb), "darkgray");
        assert_eq!(pool.event_color(ea), "black");

        pool.set_grey_out_rest(false);
        assert_eq!(pool.event_color(eb), "black");
    }
}
