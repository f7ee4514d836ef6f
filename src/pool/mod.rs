//! TypePool - the central registry of types and events
//!
//! Owns the type/event arenas, coordinate mapping, selection state, validity
//! propagation and the relayout pass. All mutation funnels through the pool;
//! collaborators never touch type or event caches directly.

pub mod coords;
pub mod selection;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::core::{
    Dictionary, Event, EventId, EventRecord, FlagSpec, Tick, Type, TypeId,
};

pub use coords::{XMode, YMode};
pub use selection::{
    SelectionUpdate, HIGHLIGHT_BOTH, HIGHLIGHT_HOR, HIGHLIGHT_NONE, HIGHLIGHT_VER,
};
use selection::SelectionState;

/// Extra padding added around the content bounding box.
const BOX_PAD: f64 = 100.0;

// ============================================================================
// Input shapes beyond single events
// ============================================================================

/// Renderer style properties keyed by attribute name.
pub type StyleMap = HashMap<String, serde_json::Value>;

#[derive(Debug, Clone, Deserialize)]
pub struct HBarRecord {
    pub group: String,
    pub id: String,
}

/// A vertical bar entry: a concrete time or the `"auto"` marker.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum VBarRecord {
    Time(Tick),
    Tag(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct VSpanRecord {
    pub from: Tick,
    #[serde(default)]
    pub to: Option<Tick>,
    #[serde(default, rename = "class")]
    pub style_class: Option<String>,
}

/// The person document: time bounds plus raw events and decorations.
/// A dictionary embedded in the document takes precedence over a separately
/// loaded one.
#[derive(Debug, Clone, Deserialize)]
pub struct PersonRecord {
    #[serde(default)]
    pub start: Option<Tick>,
    #[serde(default)]
    pub end: Option<Tick>,
    #[serde(default)]
    pub dictionary: Option<Dictionary>,
    #[serde(default)]
    pub events: Vec<EventRecord>,
    #[serde(default)]
    pub classes: HashMap<String, StyleMap>,
    #[serde(default)]
    pub h_bars: Vec<HBarRecord>,
    #[serde(default)]
    pub v_bars: Vec<VBarRecord>,
    #[serde(default)]
    pub v_spans: Vec<VSpanRecord>,
}

// ============================================================================
// Derived geometry records
// ============================================================================

/// A horizontal bar row bound to a type.
#[derive(Debug, Clone)]
pub struct HBar {
    pub type_id: TypeId,
    pub y: f64,
}

/// A vertical bar cutting the time axis into sections.
#[derive(Debug, Clone)]
pub struct VBar {
    pub time: Tick,
    /// Types labeled into the section ending at this bar (by-bars label mode).
    pub labels: Vec<TypeId>,
    pub x: f64,
    pub visible: bool,
}

/// A vertical span with a style class.
#[derive(Debug, Clone)]
pub struct VSpan {
    pub start: Tick,
    pub end: Tick,
    pub style_class: String,
    pub x: f64,
    pub width: f64,
    pub visible: bool,
}

/// A connector line between two event centers.
#[derive(Debug, Clone)]
pub struct ConnectorLine {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub color: String,
    pub stroke_width: f64,
}

/// Simple axis-aligned rectangle in pool coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }
}

// ============================================================================
// Collaborator surface
// ============================================================================

/// Overview/minimap collaborator, notified on content box changes.
pub trait Overview {
    fn clear_shadow(&mut self) {}
    fn on_box_update(&mut self) {}
    fn update_camera_rect(&mut self, rect: &Rect) {
        let _ = rect;
    }
}

/// Default overview that ignores every notification.
#[derive(Debug, Default)]
pub struct NullOverview;

impl Overview for NullOverview {}

type SizeListener = Box<dyn FnMut(f64, f64)>;

// ============================================================================
// TypePool
// ============================================================================

pub struct TypePool {
    types: Vec<Type>,
    events: Vec<Event>,
    groups: HashMap<String, HashMap<String, TypeId>>,
    /// Creation order, the basis of every deterministic traversal.
    type_order: Vec<TypeId>,
    named_events: HashMap<String, EventId>,
    event_groups: HashMap<String, Vec<EventId>>,

    pub(crate) start_time: Tick,
    pub(crate) end_time: Tick,
    min_time_diff: Tick,
    pub(crate) col_w: f64,
    pub(crate) row_h: f64,
    pub(crate) width: f64,
    all_width: f64,
    content_box: (f64, f64),

    distinct_types: usize,
    top_ten_weights: Vec<f64>,
    has_weighted: bool,

    pub(crate) x_mode: XMode,
    pub(crate) y_mode: YMode,
    max_connect_slot: f64,
    show_spans: bool,

    h_bars: Vec<HBar>,
    v_bars: Vec<VBar>,
    v_spans: Vec<VSpan>,
    style_classes: HashMap<String, StyleMap>,

    pub(crate) selection: SelectionState,
    in_bulk_validity: u32,
    validity_dirty: bool,

    size_listeners: Vec<SizeListener>,
    overview: Box<dyn Overview>,
}

impl TypePool {
    pub fn new(col_w: f64, row_h: f64) -> Self {
        Self {
            types: Vec::new(),
            events: Vec::new(),
            groups: HashMap::new(),
            type_order: Vec::new(),
            named_events: HashMap::new(),
            event_groups: HashMap::new(),
            start_time: 0,
            end_time: 1,
            min_time_diff: 1,
            col_w,
            row_h,
            width: col_w,
            all_width: col_w,
            content_box: (0.0, 0.0),
            distinct_types: 0,
            top_ten_weights: Vec::new(),
            has_weighted: false,
            x_mode: XMode::default(),
            y_mode: YMode::default(),
            max_connect_slot: 0.0,
            show_spans: true,
            h_bars: Vec::new(),
            v_bars: Vec::new(),
            v_spans: Vec::new(),
            style_classes: HashMap::new(),
            selection: SelectionState::default(),
            in_bulk_validity: 0,
            validity_dirty: false,
            size_listeners: Vec::new(),
            overview: Box::new(NullOverview),
        }
    }

    pub fn set_overview(&mut self, overview: Box<dyn Overview>) {
        self.overview = overview;
    }

    pub(crate) fn overview_mut(&mut self) -> &mut dyn Overview {
        self.overview.as_mut()
    }

    // ------------------------------------------------------------------
    // Arena access
    // ------------------------------------------------------------------

    #[inline]
    pub fn event(&self, id: EventId) -> &Event {
        &self.events[id.index()]
    }

    #[inline]
    pub(crate) fn event_mut(&mut self, id: EventId) -> &mut Event {
        &mut self.events[id.index()]
    }

    #[inline]
    pub fn type_at(&self, id: TypeId) -> &Type {
        &self.types[id.index()]
    }

    #[inline]
    pub(crate) fn type_mut(&mut self, id: TypeId) -> &mut Type {
        &mut self.types[id.index()]
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn all_event_ids(&self) -> impl Iterator<Item = EventId> {
        (0..self.events.len() as u32).map(EventId)
    }

    // ------------------------------------------------------------------
    // Basic state
    // ------------------------------------------------------------------

    pub fn box_size(&self) -> (f64, f64) {
        (self.col_w, self.row_h)
    }

    pub fn min_time_diff(&self) -> Tick {
        self.min_time_diff
    }

    pub fn has_weighted_events(&self) -> bool {
        self.has_weighted
    }

    pub fn total_distinct_type_count(&self) -> usize {
        self.distinct_types
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    /// Width including the padded content box.
    pub fn all_width(&self) -> f64 {
        self.all_width
    }

    pub fn content_box(&self) -> (f64, f64) {
        self.content_box
    }

    pub fn max_connect_slot(&self) -> f64 {
        self.max_connect_slot
    }

    pub fn set_max_connect_slot(&mut self, slots: f64) {
        if self.max_connect_slot == slots {
            return;
        }
        self.overview.clear_shadow();
        self.max_connect_slot = slots;
        self.update_look();
    }

    pub fn show_spans(&self) -> bool {
        self.show_spans
    }

    pub fn set_show_spans(&mut self, show: bool) {
        self.show_spans = show;
    }

    // ------------------------------------------------------------------
    // Type registry
    // ------------------------------------------------------------------

    pub(crate) fn lookup_type(&self, group: &str, key: &str) -> Option<TypeId> {
        self.groups.get(group).and_then(|g| g.get(key)).copied()
    }

    pub fn has_type_for(&self, group: &str, key: &str) -> bool {
        self.lookup_type(group, key).is_some()
    }

    pub fn type_for(&self, group: &str, key: &str) -> Option<TypeId> {
        let Some(g) = self.groups.get(group) else {
            warn!(group, "unknown group");
            return None;
        };
        let found = g.get(key).copied();
        if found.is_none() {
            warn!(group, id = key, "unknown id in group");
        }
        found
    }

    pub fn group_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.groups.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Color of a group, taken from its root type.
    pub fn group_color(&mut self, group: &str) -> String {
        match self.lookup_type(group, "") {
            Some(root) => self.type_color(root, None),
            None => {
                warn!(group, "group root not found");
                "#ccc".to_string()
            }
        }
    }

    fn create_type(&mut self, group: &str, key: &str, dictionary: &Dictionary) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(Type::new(id, group, key, dictionary));
        self.type_order.push(id);
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(key.to_string(), id);
        id
    }

    /// Resolve a dictionary alias chain for an unknown key, creating shared
    /// types for every alias level encountered.
    fn alias_type(&mut self, group: &str, key: &str, dictionary: &Dictionary) -> Option<TypeId> {
        let spec = dictionary.get(group)?.get(key)?;
        if let Some(alias) = spec.alias.clone() {
            let target = match self.lookup_type(group, &alias) {
                Some(t) => Some(t),
                None => {
                    let t = self.alias_type(group, &alias, dictionary);
                    if let Some(t) = t {
                        self.groups
                            .entry(group.to_string())
                            .or_default()
                            .insert(alias, t);
                    }
                    t
                }
            };
            if let Some(t) = target {
                return Some(t);
            }
        }
        Some(self.create_type(group, key, dictionary))
    }

    /// Find or create the type for an event record, synthesizing missing
    /// ancestors up to the group root.
    fn type_for_record(&mut self, record: &EventRecord, dictionary: &Dictionary) -> TypeId {
        let group = &record.group;
        let key = &record.id;
        if let Some(existing) = self.lookup_type(group, key) {
            return existing;
        }
        let tid = match self.alias_type(group, key, dictionary) {
            Some(t) => {
                // The alias target may live under a different key.
                self.groups
                    .entry(group.to_string())
                    .or_default()
                    .insert(key.to_string(), t);
                t
            }
            None => {
                warn!(group = %group, id = %key, "unknown type");
                self.create_type(group, key, dictionary)
            }
        };
        // Fill the parent chain.
        let mut cur = tid;
        loop {
            let parent_key = self.type_at(cur).parent_key().to_string();
            if parent_key.is_empty() && self.type_at(cur).is_root() {
                break;
            }
            if self.has_type_for(group, &parent_key) {
                break;
            }
            cur = self.create_type(group, &parent_key, dictionary);
        }
        if !self.has_type_for(group, "") {
            self.create_type(group, "", dictionary);
        }
        tid
    }

    pub(crate) fn parent_of(&self, tid: TypeId) -> Option<TypeId> {
        let t = self.type_at(tid);
        if t.is_root() {
            return None;
        }
        self.lookup_type(t.group(), t.parent_key())
    }

    /// Types that own at least one event, in creation order.
    pub fn types_with_events(&self) -> Vec<TypeId> {
        self.type_order
            .iter()
            .copied()
            .filter(|&t| self.type_at(t).has_events())
            .collect()
    }

    pub fn all_type_ids(&self) -> Vec<TypeId> {
        self.type_order.clone()
    }

    // ------------------------------------------------------------------
    // Color and flag resolution
    // ------------------------------------------------------------------

    fn ensure_flags(&mut self, tid: TypeId) {
        if self.type_at(tid).all_flags_cache().is_some() {
            return;
        }
        // Fill parent caches first, then merge top-down.
        let mut chain = vec![tid];
        let mut cur = tid;
        while let Some(p) = self.parent_of(cur) {
            if self.type_at(p).all_flags_cache().is_some() {
                chain.push(p);
                break;
            }
            chain.push(p);
            cur = p;
        }
        for &t in chain.iter().rev() {
            if self.type_at(t).all_flags_cache().is_some() {
                continue;
            }
            let mut merged: HashMap<String, FlagSpec> = self.type_at(t).own_flags().clone();
            if let Some(p) = self.parent_of(t) {
                if let Some(pf) = self.type_at(p).all_flags_cache() {
                    for (k, v) in pf.clone() {
                        merged.entry(k).or_insert(v);
                    }
                }
            }
            self.type_mut(t).set_all_flags(merged);
        }
    }

    /// Merged own + inherited flags. Computed once per type (see DESIGN.md).
    pub fn type_flags(&mut self, tid: TypeId) -> HashMap<String, FlagSpec> {
        self.ensure_flags(tid);
        self.type_at(tid).all_flags_cache().cloned().unwrap_or_default()
    }

    /// Resolve a type's color: flag override first, then own color, then the
    /// parent chain, then black.
    pub fn type_color(&mut self, tid: TypeId, flag: Option<&str>) -> String {
        if let Some(flag) = flag {
            let flag = flag.trim();
            if !flag.is_empty() {
                self.ensure_flags(tid);
                if let Some(spec) = self
                    .type_at(tid)
                    .all_flags_cache()
                    .and_then(|f| f.get(flag))
                {
                    return spec.color.clone();
                }
            }
        }
        let mut cur = tid;
        loop {
            if let Some(c) = self.type_at(cur).own_color() {
                return c.to_string();
            }
            match self.parent_of(cur) {
                Some(p) => cur = p,
                None => return "black".to_string(),
            }
        }
    }

    /// Color of an event including grey-out of unselected events while a
    /// fixed selection is active.
    pub fn event_color(&mut self, eid: EventId) -> String {
        let sel = &self.selection;
        if sel.grey_out && sel.has_selection && sel.fix && !self.event(eid).is_selected() {
            return "darkgray".to_string();
        }
        self.event_base_color(eid)
    }

    pub fn event_base_color(&mut self, eid: EventId) -> String {
        let tid = self.event(eid).type_id();
        let flag = self.event(eid).result_flag().to_string();
        self.type_color(tid, if flag.is_empty() { None } else { Some(&flag) })
    }

    /// Description of an event: flag prefix, type description and the number
    /// of visible events of its type.
    pub fn event_desc(&self, eid: EventId) -> String {
        let e = self.event(eid);
        let t = self.type_at(e.type_id());
        format!("{}{} ({})", e.desc_prefix(), t.desc(), self.type_count(e.type_id()))
    }

    // ------------------------------------------------------------------
    // Ingestion
    // ------------------------------------------------------------------

    /// Drop all events, types and decorations and reset the time range.
    pub fn clear_events(&mut self) {
        self.types.clear();
        self.events.clear();
        self.groups.clear();
        self.type_order.clear();
        self.named_events.clear();
        self.event_groups.clear();
        self.top_ten_weights.clear();
        self.has_weighted = false;
        self.start_time = 0;
        self.end_time = 1;
        self.min_time_diff = 1;
        self.distinct_types = 0;
        self.h_bars.clear();
        self.v_bars.clear();
        self.v_spans.clear();
        self.style_classes.clear();
        self.width = self.col_w;
        self.selection.reset_data();
        self.update_look();
    }

    /// Ingest a person document. Returns false (after a warning) when the
    /// required time bounds are missing.
    pub fn read_events(&mut self, person: &PersonRecord, dictionary: &Dictionary) -> bool {
        let (Some(start), Some(end)) = (person.start, person.end) else {
            warn!(
                start = ?person.start,
                end = ?person.end,
                "missing time bounds 'start' or 'end'"
            );
            return false;
        };
        self.has_weighted = false;
        self.start_time = start;
        self.end_time = end;

        let mut all_times: BTreeSet<Tick> = BTreeSet::new();
        for record in &person.events {
            let tid = self.type_for_record(record, dictionary);
            let eid = EventId(self.events.len() as u32);
            let event = Event::new(eid, record, tid);
            if event.is_weighted() {
                self.has_weighted = true;
                self.push_top_ten_weight(event.weight());
            }
            let time = event.time();
            all_times.insert(time);
            if time < start || time > end {
                warn!(time, start, end, "time is out of bounds");
            }
            self.events.push(event);
            self.type_mut(tid).events.push(eid);
            if let Some(name) = &record.event_id {
                self.register_named_event(name, eid);
            }
            if let Some(row_id) = &record.row_id {
                if !row_id.is_empty() {
                    self.event_groups
                        .entry(row_id.clone())
                        .or_default()
                        .push(eid);
                }
            }
        }

        // Global chronological rank per distinct time slot.
        let topo: HashMap<Tick, usize> = all_times
            .iter()
            .enumerate()
            .map(|(ix, &t)| (t, ix))
            .collect();
        for eid in 0..self.events.len() {
            let t = self.events[eid].time();
            self.events[eid].set_topo_x(topo[&t]);
        }

        // Sort per type, dropping duplicates, and derive the time quantum.
        self.distinct_types = 0;
        let mut min_diff: Option<Tick> = None;
        let order = self.types_with_events();
        for tid in order {
            if let Some(d) = self.sort_events(tid) {
                min_diff = Some(min_diff.map_or(d, |m| m.min(d)));
            }
            self.distinct_types += 1;
        }
        if min_diff.is_none() {
            // Slow path: smallest positive gap across all event times.
            let mut last: Option<Tick> = None;
            for &t in &all_times {
                if let Some(prev) = last {
                    let diff = t - prev;
                    if diff > 0 {
                        min_diff = Some(min_diff.map_or(diff, |m| m.min(diff)));
                    }
                }
                last = Some(t);
            }
        }
        match min_diff {
            Some(d) if d > 0 => self.min_time_diff = d,
            other => {
                warn!(min_time_diff = ?other, "minTimeDiff incorrect");
                self.min_time_diff = 1;
            }
        }
        self.width =
            (self.end_time - self.start_time) as f64 / self.min_time_diff as f64 * self.col_w;
        debug!(
            events = self.events.len(),
            types = self.distinct_types,
            min_time_diff = self.min_time_diff,
            "events ingested"
        );
        true
    }

    /// Sort a type's events by time, dropping duplicate occurrences at the
    /// same timestamp. Returns the smallest positive gap between consecutive
    /// distinct timestamps, or `None` with fewer than two distinct times.
    pub(crate) fn sort_events(&mut self, tid: TypeId) -> Option<Tick> {
        let mut evs = std::mem::take(&mut self.type_mut(tid).events);
        evs.sort_by_key(|&e| self.event(e).time());
        let mut kept: Vec<EventId> = Vec::with_capacity(evs.len());
        for eid in evs {
            if let Some(&prev) = kept.last() {
                if self.event(prev).time() == self.event(eid).time() {
                    let pe = self.event(prev);
                    let ce = self.event(eid);
                    if !pe.eq_event(ce, &pe.desc_prefix(), &ce.desc_prefix()) {
                        warn!(
                            time = ce.time(),
                            group = %self.type_at(tid).group(),
                            type_key = %self.type_at(tid).type_key(),
                            "removed non-equal duplicate event"
                        );
                    }
                    continue;
                }
            }
            kept.push(eid);
        }
        let min = kept.first().map(|&e| self.event(e).time());
        let max = kept.last().map(|&e| self.event(e).time());
        let mut min_diff: Option<Tick> = None;
        for pair in kept.windows(2) {
            let diff = self.event(pair[1]).time() - self.event(pair[0]).time();
            if diff > 0 {
                min_diff = Some(min_diff.map_or(diff, |m| m.min(diff)));
            }
        }
        let t = self.type_mut(tid);
        t.events = kept;
        t.set_time_bounds(min, max);
        min_diff
    }

    fn push_top_ten_weight(&mut self, weight: f64) {
        if self.top_ten_weights.contains(&weight) {
            return;
        }
        self.top_ten_weights.push(weight);
        self.top_ten_weights
            .sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        if self.top_ten_weights.len() > 10 {
            self.top_ten_weights.remove(0);
        }
    }

    /// Whether a weight qualifies for the top-ten list. A tie with the
    /// smallest retained weight qualifies (inclusive comparison).
    pub fn is_in_top_ten_weight(&self, weight: f64) -> bool {
        match self.top_ten_weights.first() {
            Some(&min) => weight >= min,
            None => true,
        }
    }

    // ------------------------------------------------------------------
    // Named events and event groups
    // ------------------------------------------------------------------

    pub fn register_named_event(&mut self, name: &str, eid: EventId) {
        if self.named_events.contains_key(name) {
            warn!(id = name, "duplicate event id");
        }
        self.named_events.insert(name.to_string(), eid);
    }

    pub fn named_event(&self, name: &str) -> Option<EventId> {
        let found = self.named_events.get(name).copied();
        if found.is_none() {
            warn!(id = name, "unknown event id");
        }
        found
    }

    pub fn event_group(&self, group_id: &str) -> &[EventId] {
        self.event_groups
            .get(group_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Earliest same-type event of this event's group, cached across the
    /// whole group once computed.
    pub fn first_of_group(&mut self, eid: EventId) -> EventId {
        if let Some(cached) = self.event(eid).first_of_group_cache() {
            return cached;
        }
        let group_id = self.event(eid).event_group_id().to_string();
        if group_id.is_empty() {
            self.event_mut(eid).set_first_of_group(eid);
            return eid;
        }
        let type_key = self
            .type_at(self.event(eid).type_id())
            .type_key()
            .to_string();
        let members: Vec<EventId> = self
            .event_group(&group_id)
            .iter()
            .copied()
            .filter(|&e| self.type_at(self.event(e).type_id()).type_key() == type_key)
            .collect();
        let mut first = eid;
        for &e in &members {
            if self.event(e).time() < self.event(first).time() {
                first = e;
            }
        }
        for e in members {
            self.event_mut(e).set_first_of_group(first);
        }
        self.event_mut(eid).set_first_of_group(first);
        first
    }

    /// Connector lines between an event and the co-members of its group.
    pub fn event_group_lines(&mut self, eid: Option<EventId>) -> Vec<ConnectorLine> {
        self.overview.clear_shadow();
        let mut lines = Vec::new();
        if let Some(eid) = eid {
            let group_id = self.event(eid).event_group_id().to_string();
            let own_x = self.x_by_event(eid) + self.col_w * 0.5;
            let own_y = self.type_at(self.event(eid).type_id()).y() + self.row_h * 0.5;
            let members: Vec<EventId> = self.event_group(&group_id).to_vec();
            for other in members {
                if other == eid || !self.event(other).shown() {
                    continue;
                }
                let x = self.x_by_event(other) + self.col_w * 0.5;
                let y = self.type_at(self.event(other).type_id()).y() + self.row_h * 0.5;
                lines.push(ConnectorLine {
                    x1: own_x,
                    y1: own_y,
                    x2: x,
                    y2: y,
                    color: "black".to_string(),
                    stroke_width: 4.0,
                });
            }
        }
        self.overview.on_box_update();
        lines
    }

    /// Connector lines for an event's explicit connections, resolved
    /// through the named-event index.
    pub fn connection_lines(&mut self, eid: EventId) -> Vec<ConnectorLine> {
        if !self.event(eid).shown() {
            return Vec::new();
        }
        let own_x = self.x_by_event(eid) + self.col_w * 0.5;
        let own_y = self.type_at(self.event(eid).type_id()).y() + self.row_h * 0.5;
        let cons = self.event(eid).connections().to_vec();
        let mut lines = Vec::new();
        for con in cons {
            let Some(other) = self.named_event(&con.event_id) else {
                continue;
            };
            if !self.event(other).shown() {
                continue;
            }
            let x = self.x_by_event(other) + self.col_w * 0.5;
            let y = self.type_at(self.event(other).type_id()).y() + self.row_h * 0.5;
            lines.push(ConnectorLine {
                x1: own_x,
                y1: own_y,
                x2: x,
                y2: y,
                color: con.color.clone().unwrap_or_else(|| "black".to_string()),
                stroke_width: con.stroke_width.unwrap_or(4.0),
            });
        }
        lines
    }

    // ------------------------------------------------------------------
    // Traversals
    // ------------------------------------------------------------------

    /// Number of visible events of a type.
    pub fn type_count(&self, tid: TypeId) -> usize {
        self.type_at(tid)
            .events()
            .iter()
            .filter(|&&e| self.event(e).shown())
            .count()
    }

    /// Visible event at a visible-index, warning when out of bounds.
    pub fn event_by_index(&self, tid: TypeId, ix: usize) -> Option<EventId> {
        let found = self
            .type_at(tid)
            .events()
            .iter()
            .copied()
            .filter(|&e| self.event(e).shown())
            .nth(ix);
        if found.is_none() {
            warn!(ix, "index out of bounds");
        }
        found
    }

    /// First visible event at or after a time.
    pub fn first_event_after(&self, tid: TypeId, time: Tick) -> Option<EventId> {
        self.type_at(tid)
            .events()
            .iter()
            .copied()
            .find(|&e| self.event(e).shown() && self.event(e).time() >= time)
    }

    /// Whether an event is its type's first visible event.
    pub fn is_first_of_type(&self, eid: EventId) -> bool {
        let tid = self.event(eid).type_id();
        self.type_at(tid)
            .events()
            .iter()
            .copied()
            .find(|&e| self.event(e).shown())
            == Some(eid)
    }

    /// Visible events of a type whose projected x falls in `[from_x, to_x)`.
    /// Events are time-sorted, so the scan exits early once past `to_x`;
    /// exact only while the active x mode is monotonic in time (Time mode),
    /// an approximation otherwise.
    pub fn events_in_x_range(
        &self,
        tid: TypeId,
        from_x: f64,
        to_x: f64,
        mut cb: impl FnMut(EventId, f64),
    ) {
        for &eid in self.type_at(tid).events() {
            let x = self.x_by_event(eid);
            if x < from_x {
                continue;
            }
            if x >= to_x {
                break;
            }
            if self.event(eid).shown() {
                cb(eid, x);
            }
        }
    }

    /// Visible events of a type in a time interval `[from, to)`.
    pub fn events_in_time_range(
        &self,
        tid: TypeId,
        from: Tick,
        to: Tick,
        mut cb: impl FnMut(EventId),
    ) {
        for &eid in self.type_at(tid).events() {
            let t = self.event(eid).time();
            if t < from {
                continue;
            }
            if t >= to {
                break;
            }
            if self.event(eid).shown() {
                cb(eid);
            }
        }
    }

    /// Visible events of all valid types inside one pixel column ending at x.
    pub fn events_for_x(&self, x: f64, mut cb: impl FnMut(EventId)) {
        for tid in self.types_with_events() {
            if !self.type_at(tid).is_valid() {
                continue;
            }
            self.events_in_x_range(tid, x - self.col_w, x, |e, _| cb(e));
        }
    }

    /// Visible events of all valid types inside one time quantum ending at `time`.
    pub fn events_for_time(&self, time: Tick, cb: impl FnMut(EventId)) {
        self.events_for_timespan(time - self.min_time_diff, time, cb);
    }

    pub fn events_for_timespan(&self, from: Tick, to: Tick, mut cb: impl FnMut(EventId)) {
        for tid in self.types_with_events() {
            if !self.type_at(tid).is_valid() {
                continue;
            }
            self.events_in_time_range(tid, from, to, &mut cb);
        }
    }

    /// Chronological sweep over all visible events, one callback per
    /// distinct time with the events at that time.
    pub fn traverse_days(&self, mut cb: impl FnMut(Tick, &[EventId])) {
        let mut by_time: BTreeMap<Tick, Vec<EventId>> = BTreeMap::new();
        for tid in self.types_with_events() {
            for &eid in self.type_at(tid).events() {
                if self.event(eid).shown() {
                    by_time.entry(self.event(eid).time()).or_default().push(eid);
                }
            }
        }
        for (time, events) in by_time {
            cb(time, &events);
        }
    }

    // ------------------------------------------------------------------
    // Proxy machinery
    // ------------------------------------------------------------------

    /// Repoint a type's delegation. Refuses assignments that would close a
    /// proxy cycle anywhere along the target's chain. Triggers a deferred
    /// revalidation.
    pub fn set_proxy(&mut self, tid: TypeId, target: TypeId) {
        if tid != target {
            let mut cur = target;
            loop {
                if cur == tid {
                    warn!(
                        type_key = %self.type_at(tid).type_key(),
                        target = %self.type_at(target).type_key(),
                        "proxy assignment would create a cycle"
                    );
                    return;
                }
                let next = self.type_at(cur).proxy();
                if next == cur {
                    break;
                }
                cur = next;
            }
        }
        let old = self.type_at(tid).proxy();
        self.type_mut(old).proxied.remove(&tid);
        self.type_mut(old).proxied_events = None;
        self.type_mut(tid).proxy = target;
        self.type_mut(target).proxied.insert(tid);
        self.type_mut(target).proxied_events = None;
        self.on_validity_change();
    }

    /// Ultimate representative reached by following the proxy chain.
    pub fn resolve_proxy(&self, tid: TypeId) -> TypeId {
        let mut cur = tid;
        while self.type_at(cur).proxy() != cur {
            cur = self.type_at(cur).proxy();
        }
        cur
    }

    pub(crate) fn ensure_proxied_events(&mut self, tid: TypeId) {
        if self.type_at(tid).proxied_events.is_some() {
            return;
        }
        let members: Vec<TypeId> = self.type_at(tid).proxied().collect();
        let mut events: Vec<EventId> = Vec::new();
        for m in members {
            events.extend_from_slice(self.type_at(m).events());
        }
        events.sort_by_key(|&e| self.event(e).time());
        let min = events.first().map(|&e| self.event(e).time());
        let max = events.last().map(|&e| self.event(e).time());
        let t = self.type_mut(tid);
        t.proxied_events = Some(events);
        t.proxied_min_time = min;
        t.proxied_max_time = max;
    }

    /// Sorted union of events across the proxied set (cached).
    pub fn proxied_events(&mut self, tid: TypeId) -> Vec<EventId> {
        self.ensure_proxied_events(tid);
        self.type_at(tid).proxied_events.clone().unwrap_or_default()
    }

    pub fn first_proxied_event(&mut self, tid: TypeId) -> Option<EventId> {
        self.ensure_proxied_events(tid);
        self.type_at(tid)
            .proxied_events
            .as_ref()
            .and_then(|v| v.first().copied())
    }

    /// Visible proxied events whose projected x falls in `[from_x, to_x)`.
    /// Same monotonicity caveat as [`events_in_x_range`](Self::events_in_x_range).
    pub fn proxied_events_in_x_range(
        &mut self,
        tid: TypeId,
        from_x: f64,
        to_x: f64,
        mut cb: impl FnMut(EventId, f64),
    ) {
        self.ensure_proxied_events(tid);
        let events = self.type_at(tid).proxied_events.clone().unwrap_or_default();
        for eid in events {
            let x = self.x_by_event(eid);
            if x < from_x {
                continue;
            }
            if x >= to_x {
                break;
            }
            if self.event(eid).shown() {
                cb(eid, x);
            }
        }
    }

    /// Sparse presence histogram across the proxied events of this type's
    /// fingerprint members, mapped into `[0, width)`.
    pub fn fingerprint_columns(&mut self, tid: TypeId, width: f64) -> Vec<f64> {
        if self.type_at(tid).fingerprint.is_none() {
            let members: Vec<TypeId> = self.type_at(tid).fingerprint_types().iter().copied().collect();
            let mut times: BTreeSet<Tick> = BTreeSet::new();
            for m in members {
                for eid in self.proxied_events(m) {
                    times.insert(self.event(eid).time());
                }
            }
            self.type_mut(tid).fingerprint = Some(times);
        }
        let (min, max) = (self.start_time, self.end_time);
        let span = (max - min) as f64;
        if span <= 0.0 {
            return Vec::new();
        }
        self.type_at(tid)
            .fingerprint
            .as_ref()
            .map(|times| {
                times
                    .iter()
                    .map(|&t| (t - min) as f64 / span * width)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Presence bit vector over time-quantized slots, for clustering.
    pub fn to_bit_vector(&self, tid: TypeId) -> Vec<u8> {
        let len = ((self.end_time - self.start_time) as f64 / self.min_time_diff as f64).ceil()
            as usize;
        let mut vec = vec![0u8; len.max(1)];
        for &eid in self.type_at(tid).events() {
            let e = self.event(eid);
            if !e.shown() {
                continue;
            }
            let slot = ((e.time() - self.start_time) / self.min_time_diff) as usize;
            if let Some(bit) = vec.get_mut(slot) {
                *bit = 1;
            }
        }
        vec
    }

    // ------------------------------------------------------------------
    // Validity
    // ------------------------------------------------------------------

    pub fn set_valid(&mut self, tid: TypeId, valid: bool) {
        if self.type_mut(tid).set_valid_raw(valid) {
            if !valid {
                self.type_mut(tid).clear_label_cache();
            }
            self.on_validity_change();
        }
    }

    pub fn set_show_labels(&mut self, tid: TypeId, show: bool) {
        self.type_mut(tid).set_show_labels_raw(show);
    }

    pub fn start_bulk_validity(&mut self) {
        self.in_bulk_validity += 1;
    }

    pub fn end_bulk_validity(&mut self) {
        self.in_bulk_validity = self.in_bulk_validity.saturating_sub(1);
        if self.in_bulk_validity == 0 {
            self.on_validity_change();
            self.flush();
        }
    }

    /// Mark layout and selection stale. Rapid successive changes coalesce
    /// into a single [`flush`](Self::flush) pass.
    pub fn on_validity_change(&mut self) {
        self.validity_dirty = true;
        if self.in_bulk_validity == 0 {
            // Outside a bulk block the host drives flushing; nothing else
            // to do here beyond marking.
        }
    }

    /// Perform the deferred relayout and selection recompute, if any.
    pub fn flush(&mut self) {
        if !self.validity_dirty {
            return;
        }
        self.validity_dirty = false;
        self.update_look();
        self.update_selection();
    }

    pub fn needs_flush(&self) -> bool {
        self.validity_dirty
    }

    /// Restrict visibility to weighted events, or show everything again.
    pub fn show_only_weighted(&mut self, only_weighted: bool) {
        self.overview.clear_shadow();
        for eid in 0..self.events.len() {
            let show = !only_weighted || self.events[eid].is_weighted();
            self.events[eid].set_shown(show);
        }
        self.update_look();
        self.update_selection();
    }

    // ------------------------------------------------------------------
    // Relayout
    // ------------------------------------------------------------------

    /// One representative per distinct ultimate proxy target, in creation
    /// order of the representative's first member.
    pub fn display_types(&self) -> Vec<TypeId> {
        let mut seen: BTreeSet<TypeId> = BTreeSet::new();
        let mut display = Vec::new();
        for tid in self.types_with_events() {
            let pt = self.resolve_proxy(tid);
            if seen.insert(pt) {
                display.push(pt);
            }
        }
        display
    }

    /// The central relayout pass: recompute display rows, y positions,
    /// event x positions, connector widths and bar/span geometry.
    /// Idempotent: repeated calls without state changes produce identical
    /// output.
    pub fn update_look(&mut self) {
        let display = self.display_types();

        // Sequence-within-row indices over the proxied unions.
        for &tid in &display {
            let events = self.proxied_events(tid);
            for (ix, eid) in events.into_iter().enumerate() {
                self.event_mut(eid).set_ix_in_type(ix);
            }
        }

        let max_y = self.assign_y(&display);

        // Event positions; unchanged x values are skipped downstream via
        // the last-x cache.
        let mut max_x: f64 = 0.0;
        let order = self.types_with_events();
        for tid in order {
            let events: Vec<EventId> = self.type_at(tid).events().to_vec();
            for eid in events {
                if !self.event(eid).shown() {
                    continue;
                }
                let new_x = self.x_by_event(eid);
                max_x = max_x.max(new_x);
                if self.event(eid).last_x() != Some(new_x) {
                    self.event_mut(eid).set_last_x(new_x);
                }
            }
        }

        // Connector widths between consecutive proxied events of one row.
        let max_connect = self.max_connect_slot;
        for &tid in &display {
            let events = self.proxied_events(tid);
            let mut prev: Option<(EventId, Tick, f64)> = None;
            for eid in events {
                if !self.event(eid).shown() {
                    continue;
                }
                let t = self.event(eid).time();
                let x = self.x_by_event(eid);
                if let Some((pe, pt, px)) = prev {
                    let mut dt = (t - pt) as f64 / self.min_time_diff as f64;
                    if dt > max_connect {
                        // Beyond the connect limit the slot resets to a
                        // single column.
                        dt = 1.0;
                    }
                    let dx = if dt > 1.0 { (x - px) / self.col_w } else { 1.0 };
                    if self.event(pe).width_slots() != dx {
                        self.event_mut(pe).set_width_slots(dx);
                    }
                }
                prev = Some((eid, t, x));
            }
            if let Some((pe, _, _)) = prev {
                if self.event(pe).width_slots() != 1.0 {
                    self.event_mut(pe).set_width_slots(1.0);
                }
            }
        }

        let w = max_x.max(self.col_w) + 2.0 * BOX_PAD;
        let h = max_y.max(self.row_h + 2.0 * BOX_PAD);
        self.all_width = w;
        self.content_box = (w, h);

        // Decoration geometry.
        for ix in 0..self.h_bars.len() {
            let tid = self.h_bars[ix].type_id;
            let first = self
                .type_at(tid)
                .proxied()
                .next()
                .unwrap_or(tid);
            self.h_bars[ix].y = self.type_at(first).y();
        }
        let linear = self.linear_time();
        for ix in 0..self.v_bars.len() {
            let time = self.v_bars[ix].time;
            self.v_bars[ix].visible = linear;
            if linear {
                self.v_bars[ix].x = self.x_by_time(time).unwrap_or(0.0);
            }
        }
        let spans_visible = linear && self.show_spans;
        for ix in 0..self.v_spans.len() {
            let (start, end) = (self.v_spans[ix].start, self.v_spans[ix].end);
            self.v_spans[ix].visible = spans_visible;
            if spans_visible {
                let x1 = self.x_by_time(start).unwrap_or(0.0);
                let x2 = self.x_by_time(end).unwrap_or(0.0);
                self.v_spans[ix].x = x1;
                self.v_spans[ix].width = x2 - x1;
            }
        }

        self.overview.on_box_update();
    }

    // ------------------------------------------------------------------
    // Bars, spans and style classes
    // ------------------------------------------------------------------

    pub fn add_h_bar(&mut self, group: &str, type_key: &str, no_update: bool) {
        for tid in self.types_with_events() {
            let t = self.type_at(tid);
            if t.group_id() != crate::core::sanitize_id(group) || t.type_key() != type_key {
                continue;
            }
            self.h_bars.push(HBar { type_id: tid, y: 0.0 });
        }
        if !no_update {
            self.update_look();
        }
    }

    pub fn add_v_bar(&mut self, time: Tick, no_update: bool) {
        self.v_bars.push(VBar {
            time,
            labels: Vec::new(),
            x: 0.0,
            visible: false,
        });
        if !no_update {
            self.update_look();
        }
    }

    pub fn add_v_span(&mut self, from: Tick, to: Option<Tick>, style_class: &str, no_update: bool) {
        let end = to.unwrap_or(from + self.min_time_diff);
        self.v_spans.push(VSpan {
            start: from,
            end,
            style_class: style_class.to_string(),
            x: 0.0,
            width: 0.0,
            visible: false,
        });
        if !no_update {
            self.update_look();
        }
    }

    pub fn h_bars(&self) -> &[HBar] {
        &self.h_bars
    }

    pub fn v_bars(&self) -> &[VBar] {
        &self.v_bars
    }

    pub fn v_spans(&self) -> &[VSpan] {
        &self.v_spans
    }

    #[cfg(test)]
    pub(crate) fn set_bar_labels(&mut self, ix: usize, labels: Vec<TypeId>) {
        self.v_bars[ix].labels = labels;
    }

    /// Iterate the sections cut by the vertical bars: `(from, to, bar)`
    /// where `bar` is the index of the bar opening the section (the section
    /// before the first bar has none).
    pub fn traverse_v_bars(&self, mut cb: impl FnMut(Tick, Tick, Option<usize>)) {
        let mut from = self.start_time;
        let mut prev: Option<usize> = None;
        for (ix, bar) in self.v_bars.iter().enumerate() {
            cb(from, bar.time, prev);
            prev = Some(ix);
            from = bar.time;
        }
        if prev.is_some() {
            cb(from, self.end_time, prev);
        }
    }

    pub fn add_style_class(&mut self, names: &str, styles: &StyleMap) {
        for name in names.split(' ') {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let entry = self.style_classes.entry(name.to_string()).or_default();
            for (k, v) in styles {
                entry.insert(k.clone(), v.clone());
            }
        }
    }

    /// Resolve style classes left to right over the given defaults.
    pub fn get_style_class(&self, names: &str, defaults: &StyleMap) -> StyleMap {
        let mut res = defaults.clone();
        for name in names.split(' ') {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            if let Some(styles) = self.style_classes.get(name) {
                for (k, v) in styles {
                    res.insert(k.clone(), v.clone());
                }
            }
        }
        res
    }

    /// Install bars, spans and style classes from the person document,
    /// including the sliding-window "auto" bar detection.
    pub fn setup_bars(&mut self, person: &PersonRecord) {
        for (names, styles) in &person.classes {
            self.add_style_class(names, styles);
        }
        for bar in &person.h_bars {
            self.add_h_bar(&bar.group, &bar.id, true);
        }
        let mut auto = false;
        for bar in &person.v_bars {
            match bar {
                VBarRecord::Time(t) => self.add_v_bar(*t, true),
                VBarRecord::Tag(tag) if tag == "auto" => auto = true,
                VBarRecord::Tag(tag) => match tag.trim().parse::<Tick>() {
                    Ok(t) => self.add_v_bar(t, true),
                    Err(_) => warn!(tag = %tag, "unrecognized v_bar entry"),
                },
            }
        }
        for span in &person.v_spans {
            self.add_v_span(
                span.from,
                span.to,
                span.style_class.as_deref().unwrap_or(""),
                true,
            );
        }
        if auto {
            self.detect_auto_bars();
        }
    }

    /// Find areas of interest: windows of days where many types see their
    /// first event. Each detected section is labeled with its top types by
    /// accumulated cost.
    fn detect_auto_bars(&mut self) {
        const WINDOW_SIZE: usize = 3;
        const MIN_SLOPE: f64 = 15.0;
        const COOL_SLOPE: f64 = 2.0;

        let mut window_times: Vec<Tick> = Vec::new();
        let mut window_slopes: Vec<f64> = Vec::new();
        let mut bars: Vec<Tick> = Vec::new();
        let mut last_peak = 0.0;
        self.traverse_days(|time, events| {
            let slope = events
                .iter()
                .filter(|&&e| self.is_first_of_type(e))
                .count() as f64;
            window_slopes.push(slope);
            window_times.push(time);
            if window_slopes.len() > WINDOW_SIZE {
                window_slopes.remove(0);
                window_times.remove(0);
            }
            let sum: f64 = window_slopes.iter().sum();
            if sum > MIN_SLOPE && last_peak == 0.0 {
                bars.push(window_times[0]);
                last_peak = sum;
            } else if sum < COOL_SLOPE {
                last_peak = 0.0;
            }
        });
        for t in bars {
            self.add_v_bar(t, true);
        }

        // Label each section with its heaviest first-of-type types.
        let mut sections: Vec<(Tick, Tick, Option<usize>)> = Vec::new();
        self.traverse_v_bars(|from, to, bar| sections.push((from, to, bar)));
        let mut ignore: BTreeSet<TypeId> = BTreeSet::new();
        for (from, to, bar_ix) in sections {
            let Some(bar_ix) = bar_ix else { continue };
            let mut counts: BTreeMap<TypeId, f64> = BTreeMap::new();
            let mut types: Vec<TypeId> = Vec::new();
            self.events_for_timespan(from, to, |e| {
                let tid = self.event(e).type_id();
                if ignore.contains(&tid) {
                    return;
                }
                if self.is_first_of_type(e) {
                    types.push(tid);
                }
                let cost = self.event(e).cost();
                *counts.entry(tid).or_insert(0.0) += if cost != 0.0 { cost } else { 1.0 };
            });
            types.sort_by(|a, b| {
                counts[b]
                    .partial_cmp(&counts[a])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            types.truncate(10);
            for &tid in &types {
                ignore.insert(tid);
            }
            self.v_bars[bar_ix].labels = types;
        }
    }

    // ------------------------------------------------------------------
    // Cost aggregation
    // ------------------------------------------------------------------

    /// Aggregate event costs per time, grouping co-claim events (same event
    /// group id) so a claim is counted once at its earliest time.
    pub fn cost_histogram(&self) -> Vec<(Tick, f64)> {
        use std::collections::hash_map::Entry;

        let mut claims: HashMap<String, (f64, Tick)> = HashMap::new();
        let mut any_cost = false;
        for tid in self.types_with_events() {
            for &eid in self.type_at(tid).events() {
                let e = self.event(eid);
                let cost = e.cost();
                if cost != 0.0 {
                    any_cost = true;
                }
                let t = e.time();
                let per_time = e.event_group_id().is_empty();
                let claim = if per_time {
                    format!("__time__{t}")
                } else {
                    e.event_group_id().to_string()
                };
                match claims.entry(claim) {
                    Entry::Occupied(mut o) => {
                        let (total, first) = o.get_mut();
                        if per_time {
                            *total += cost;
                        } else {
                            if *total != cost {
                                warn!(expected = *total, got = cost, "cost mismatch in claim");
                            }
                            if t < *first {
                                *first = t;
                            }
                        }
                    }
                    Entry::Vacant(v) => {
                        v.insert((cost, t));
                    }
                }
            }
        }
        if !any_cost {
            return Vec::new();
        }
        let mut by_time: BTreeMap<Tick, f64> = BTreeMap::new();
        for (_, (cost, time)) in claims {
            *by_time.entry(time).or_insert(0.0) += cost;
        }
        by_time.into_iter().collect()
    }

    // ------------------------------------------------------------------
    // Size listeners
    // ------------------------------------------------------------------

    pub fn add_size_listener(&mut self, listener: SizeListener) {
        self.size_listeners.push(listener);
    }

    /// Container size changed; fan out to size listeners.
    pub fn on_size_update(&mut self, width: f64, height: f64) {
        let mut listeners = std::mem::take(&mut self.size_listeners);
        for l in &mut listeners {
            l(width, height);
        }
        self.size_listeners.append(&mut listeners);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::TypeSpec;

    /// Pool over a simple synthetic person: events are (group, id, time).
    pub(crate) fn pool_with_events(
        start: Tick,
        end: Tick,
        events: &[(&str, &str, Tick)],
    ) -> TypePool {
        let mut pool = TypePool::new(8.0, 10.0);
        let person = person_record(start, end, events);
        let dict = Dictionary::new();
        assert!(pool.read_events(&person, &dict));
        pool
    }

    pub(crate) fn person_record(
        start: Tick,
        end: Tick,
        events: &[(&str, &str, Tick)],
    ) -> PersonRecord {
        let events = events
            .iter()
            .map(|&(group, id, time)| EventRecord {
                time,
                group: group.into(),
                id: id.into(),
                weight: None,
                cost: None,
                flag: None,
                flag_value: None,
                event_id: None,
                row_id: None,
                connections: vec![],
            })
            .collect();
        PersonRecord {
            start: Some(start),
            end: Some(end),
            dictionary: None,
            events,
            classes: HashMap::new(),
            h_bars: vec![],
            v_bars: vec![],
            v_spans: vec![],
        }
    }

    #[test]
    fn test_read_events_scenario() {
        // Two types in one group, sharing a synthesized root.
        let pool = pool_with_events(0, 100, &[("g", "a", 10), ("g", "a", 20), ("g", "b", 50)]);
        let a = pool.type_for("g", "a").unwrap();
        let b = pool.type_for("g", "b").unwrap();
        assert!(pool.has_type_for("g", ""));
        assert_eq!(pool.type_at(a).events().len(), 2);
        assert_eq!(pool.type_at(b).events().len(), 1);
        assert_eq!(pool.min_time_diff(), 10);
        assert_eq!(pool.total_distinct_type_count(), 2);
    }

    #[test]
    fn test_missing_bounds_rejected() {
        let mut pool = TypePool::new(8.0, 10.0);
        let mut person = person_record(0, 10, &[("g", "a", 5)]);
        person.end = None;
        assert!(!pool.read_events(&person, &Dictionary::new()));
        assert_eq!(pool.event_count(), 0);
    }

    #[test]
    fn test_min_time_diff_with_duplicates() {
        // Times [0,3,3,10]: duplicate 3 is dropped, smallest gap is 3.
        let pool = pool_with_events(0, 20, &[("g", "a", 0), ("g", "a", 3), ("g", "a", 3), ("g", "a", 10)]);
        assert_eq!(pool.min_time_diff(), 3);
        let a = pool.type_for("g", "a").unwrap();
        assert_eq!(pool.type_at(a).events().len(), 3);
    }

    #[test]
    fn test_sort_events_dedup() {
        // Three equal events at time 5 collapse to one; 7 survives.
        let pool = pool_with_events(0, 10, &[("g", "a", 5), ("g", "a", 5), ("g", "a", 5), ("g", "a", 7)]);
        let a = pool.type_for("g", "a").unwrap();
        let times: Vec<Tick> = pool
            .type_at(a)
            .events()
            .iter()
            .map(|&e| pool.event(e).time())
            .collect();
        assert_eq!(times, vec![5, 7]);
    }

    #[test]
    fn test_sort_events_nonequal_duplicate_keeps_first() {
        let mut pool = TypePool::new(8.0, 10.0);
        let mut person = person_record(0, 10, &[("g", "a", 5), ("g", "a", 5)]);
        person.events[0].weight = Some(0.5);
        assert!(pool.read_events(&person, &Dictionary::new()));
        let a = pool.type_for("g", "a").unwrap();
        assert_eq!(pool.type_at(a).events().len(), 1);
        let survivor = pool.type_at(a).events()[0];
        assert!(pool.event(survivor).is_weighted());
    }

    #[test]
    fn test_min_time_diff_slow_path() {
        // One event per type: no per-type gap, the global sweep finds 5.
        let pool = pool_with_events(0, 20, &[("g", "a", 0), ("g", "b", 5), ("g", "c", 12)]);
        assert_eq!(pool.min_time_diff(), 5);
    }

    #[test]
    fn test_ancestor_synthesis() {
        let mut dict = Dictionary::new();
        let g = dict.entry("g".to_string()).or_default();
        g.insert(
            "leaf".into(),
            TypeSpec {
                parent: Some("mid".into()),
                ..Default::default()
            },
        );
        g.insert(
            "mid".into(),
            TypeSpec {
                parent: Some("".into()),
                ..Default::default()
            },
        );
        let mut pool = TypePool::new(8.0, 10.0);
        let person = person_record(0, 10, &[("g", "leaf", 2)]);
        assert!(pool.read_events(&person, &dict));
        assert!(pool.has_type_for("g", "leaf"));
        assert!(pool.has_type_for("g", "mid"));
        assert!(pool.has_type_for("g", ""));
        let leaf = pool.type_for("g", "leaf").unwrap();
        let mid = pool.parent_of(leaf).unwrap();
        assert_eq!(pool.type_at(mid).type_key(), "mid");
    }

    #[test]
    fn test_alias_resolution() {
        let mut dict = Dictionary::new();
        let g = dict.entry("g".to_string()).or_default();
        g.insert(
            "old".into(),
            TypeSpec {
                alias: Some("new".into()),
                ..Default::default()
            },
        );
        g.insert("new".into(), TypeSpec::default());
        let mut pool = TypePool::new(8.0, 10.0);
        let person = person_record(0, 10, &[("g", "old", 2), ("g", "new", 5)]);
        assert!(pool.read_events(&person, &dict));
        // Both keys resolve to the same type.
        assert_eq!(
            pool.lookup_type("g", "old").unwrap(),
            pool.lookup_type("g", "new").unwrap()
        );
        let t = pool.lookup_type("g", "new").unwrap();
        assert_eq!(pool.type_at(t).events().len(), 2);
    }

    #[test]
    fn test_proxy_partition_invariant() {
        let mut pool = pool_with_events(0, 100, &[("g", "a", 10), ("g", "b", 50), ("g", "c", 70)]);
        let a = pool.type_for("g", "a").unwrap();
        let b = pool.type_for("g", "b").unwrap();
        let c = pool.type_for("g", "c").unwrap();
        pool.set_proxy(a, b);
        pool.set_proxy(c, b);

        // Every type with events belongs to exactly one proxied set.
        let with_events = pool.types_with_events();
        let mut seen: BTreeSet<TypeId> = BTreeSet::new();
        for &tid in &with_events {
            if pool.type_at(tid).proxy() == tid {
                for m in pool.type_at(tid).proxied() {
                    assert!(seen.insert(m), "type in two proxied sets");
                }
            }
        }
        for tid in with_events {
            assert!(seen.contains(&tid), "type missing from partition");
        }
    }

    #[test]
    fn test_proxy_idempotence() {
        let mut pool = pool_with_events(0, 100, &[("g", "a", 10), ("g", "b", 50)]);
        let a = pool.type_for("g", "a").unwrap();
        let b = pool.type_for("g", "b").unwrap();
        pool.set_proxy(a, b);
        let before: Vec<TypeId> = pool.type_at(b).proxied().collect();
        // Re-assigning the current proxy leaves the partition unchanged.
        let current = pool.type_at(a).proxy();
        pool.set_proxy(a, current);
        let after: Vec<TypeId> = pool.type_at(b).proxied().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_proxy_cycle_refused() {
        let mut pool = pool_with_events(0, 100, &[("g", "a", 10), ("g", "b", 50)]);
        let a = pool.type_for("g", "a").unwrap();
        let b = pool.type_for("g", "b").unwrap();
        pool.set_proxy(a, b);
        // b now holds a in its proxied set; pointing b at a would close a
        // cycle and must be refused.
        pool.set_proxy(b, a);
        assert_eq!(pool.type_at(b).proxy(), b);
        assert_eq!(pool.resolve_proxy(a), b);
    }

    #[test]
    fn test_proxy_chain_cycle_refused() {
        let mut pool = pool_with_events(
            0,
            100,
            &[("g", "a", 10), ("g", "b", 50), ("g", "c", 80)],
        );
        let a = pool.type_for("g", "a").unwrap();
        let b = pool.type_for("g", "b").unwrap();
        let c = pool.type_for("g", "c").unwrap();
        pool.set_proxy(a, b);
        pool.set_proxy(b, c);
        // c is reachable from a through b; pointing c back at a would close
        // the chain into a loop and must be refused.
        pool.set_proxy(c, a);
        assert_eq!(pool.type_at(c).proxy(), c);
        assert_eq!(pool.resolve_proxy(a), c);
        assert_eq!(pool.resolve_proxy(b), c);
    }

    #[test]
    fn test_proxied_events_union_sorted() {
        let mut pool = pool_with_events(0, 100, &[("g", "a", 30), ("g", "b", 10), ("g", "b", 60)]);
        let a = pool.type_for("g", "a").unwrap();
        let b = pool.type_for("g", "b").unwrap();
        pool.set_proxy(a, b);
        let times: Vec<Tick> = pool
            .proxied_events(b)
            .into_iter()
            .map(|e| pool.event(e).time())
            .collect();
        assert_eq!(times, vec![10, 30, 60]);
        assert_eq!(pool.type_at(b).proxied_min_time(), 10);
        assert_eq!(pool.type_at(b).proxied_max_time(), 60);
    }

    #[test]
    fn test_bit_vector() {
        let pool = pool_with_events(0, 40, &[("g", "a", 0), ("g", "a", 10), ("g", "a", 30)]);
        assert_eq!(pool.min_time_diff(), 10);
        let a = pool.type_for("g", "a").unwrap();
        assert_eq!(pool.to_bit_vector(a), vec![1, 1, 0, 1]);
    }

    #[test]
    fn test_top_ten_weights() {
        let mut pool = TypePool::new(8.0, 10.0);
        let mut person = person_record(
            0,
            100,
            &[
                ("g", "a", 1), ("g", "a", 2), ("g", "a", 3), ("g", "a", 4),
                ("g", "a", 5), ("g", "a", 6), ("g", "a", 7), ("g", "a", 8),
                ("g", "a", 9), ("g", "a", 10), ("g", "a", 11), ("g", "a", 12),
            ],
        );
        for (ix, e) in person.events.iter_mut().enumerate() {
            e.weight = Some((ix + 1) as f64 * 0.01);
        }
        assert!(pool.read_events(&person, &Dictionary::new()));
        assert!(pool.has_weighted_events());
        // Twelve distinct weights: the two smallest fall out.
        assert!(!pool.is_in_top_ten_weight(0.01));
        assert!(!pool.is_in_top_ten_weight(0.02));
        assert!(pool.is_in_top_ten_weight(0.03)); // tie with the retained minimum
        assert!(pool.is_in_top_ten_weight(0.12));
    }

    #[test]
    fn test_named_events_and_connections() {
        let mut pool = TypePool::new(8.0, 10.0);
        let mut person = person_record(0, 100, &[("g", "a", 10), ("g", "b", 50)]);
        person.events[0].event_id = Some("e-first".into());
        person.events[1].connections = vec![crate::core::ConnectionRecord {
            event_id: "e-first".into(),
            color: Some("red".into()),
            stroke_width: Some(2.0),
        }];
        assert!(pool.read_events(&person, &Dictionary::new()));
        pool.update_look();
        let b = pool.type_for("g", "b").unwrap();
        let eid = pool.type_at(b).events()[0];
        let lines = pool.connection_lines(eid);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].color, "red");
        assert_eq!(lines[0].stroke_width, 2.0);
    }

    #[test]
    fn test_first_of_group() {
        let mut pool = TypePool::new(8.0, 10.0);
        let mut person = person_record(0, 100, &[("g", "a", 30), ("g", "a", 10), ("g", "b", 20)]);
        for e in person.events.iter_mut() {
            e.row_id = Some("claim-1".into());
        }
        assert!(pool.read_events(&person, &Dictionary::new()));
        let a = pool.type_for("g", "a").unwrap();
        let late = *pool
            .type_at(a)
            .events()
            .iter()
            .find(|&&e| pool.event(e).time() == 30)
            .unwrap();
        let first = pool.first_of_group(late);
        // Earliest same-type member of the group wins; b's event is ignored.
        assert_eq!(pool.event(first).time(), 10);
        assert_eq!(pool.event(first).type_id(), a);
    }

    #[test]
    fn test_traverse_days() {
        let pool = pool_with_events(0, 100, &[("g", "a", 10), ("g", "b", 10), ("g", "a", 30)]);
        let mut seen: Vec<(Tick, usize)> = Vec::new();
        pool.traverse_days(|t, evs| seen.push((t, evs.len())));
        assert_eq!(seen, vec![(10, 2), (30, 1)]);
    }

    #[test]
    fn test_v_bar_sections() {
        let mut pool = pool_with_events(0, 100, &[("g", "a", 10)]);
        pool.add_v_bar(20, true);
        pool.add_v_bar(60, true);
        let mut sections = Vec::new();
        pool.traverse_v_bars(|from, to, bar| sections.push((from, to, bar)));
        assert_eq!(
            sections,
            vec![(0, 20, None), (20, 60, Some(0)), (60, 100, Some(1))]
        );
    }

    #[test]
    fn test_style_classes() {
        let mut pool = TypePool::new(8.0, 10.0);
        let mut styles = StyleMap::new();
        styles.insert("color".into(), serde_json::json!("red"));
        pool.add_style_class("alert major", &styles);
        let mut defaults = StyleMap::new();
        defaults.insert("color".into(), serde_json::json!("gray"));
        defaults.insert("opacity".into(), serde_json::json!(0.2));
        let resolved = pool.get_style_class("major", &defaults);
        assert_eq!(resolved["color"], serde_json::json!("red"));
        assert_eq!(resolved["opacity"], serde_json::json!(0.2));
        let untouched = pool.get_style_class("other", &defaults);
        assert_eq!(untouched["color"], serde_json::json!("gray"));
    }

    #[test]
    fn test_cost_histogram_groups() {
        let mut pool = TypePool::new(8.0, 10.0);
        let mut person = person_record(0, 100, &[("g", "a", 10), ("g", "b", 20), ("g", "c", 40)]);
        // a and b share a claim with equal costs, counted once at time 10.
        person.events[0].row_id = Some("claim".into());
        person.events[1].row_id = Some("claim".into());
        person.events[0].cost = Some(crate::core::CostValue::Num(5.0));
        person.events[1].cost = Some(crate::core::CostValue::Num(5.0));
        person.events[2].cost = Some(crate::core::CostValue::Num(2.0));
        assert!(pool.read_events(&person, &Dictionary::new()));
        assert_eq!(pool.cost_histogram(), vec![(10, 5.0), (40, 2.0)]);
    }

    #[test]
    fn test_bulk_validity_coalesces_into_flush() {
        let mut pool = pool_with_events(0, 100, &[("g", "a", 10), ("g", "b", 50)]);
        pool.flush();
        let a = pool.type_for("g", "a").unwrap();
        let b = pool.type_for("g", "b").unwrap();
        pool.start_bulk_validity();
        pool.set_valid(a, false);
        pool.set_valid(b, false);
        pool.set_valid(a, true);
        assert!(pool.needs_flush());
        pool.end_bulk_validity();
        // The bulk end performed the single deferred pass.
        assert!(!pool.needs_flush());
        assert_eq!(pool.type_at(b).y(), -pool.box_size().1);
        assert!(pool.type_at(a).y() >= 0.0);
    }

    #[test]
    fn test_update_look_idempotent() {
        let mut pool = pool_with_events(0, 100, &[("g", "a", 10), ("g", "a", 40), ("g", "b", 50)]);
        pool.update_look();
        let a = pool.type_for("g", "a").unwrap();
        let snapshot: Vec<(f64, Option<f64>)> = pool
            .all_event_ids()
            .map(|e| (pool.event(e).width_slots(), pool.event(e).last_x()))
            .collect();
        let y_a = pool.type_at(a).y();
        let box1 = pool.content_box();
        pool.update_look();
        let snapshot2: Vec<(f64, Option<f64>)> = pool
            .all_event_ids()
            .map(|e| (pool.event(e).width_slots(), pool.event(e).last_x()))
            .collect();
        assert_eq!(snapshot, snapshot2);
        assert_eq!(y_a, pool.type_at(a).y());
        assert_eq!(box1, pool.content_box());
    }

    #[test]
    fn test_show_only_weighted() {
        let mut pool = TypePool::new(8.0, 10.0);
        let mut person = person_record(0, 100, &[("g", "a", 10), ("g", "a", 20)]);
        person.events[0].weight = Some(0.5);
        assert!(pool.read_events(&person, &Dictionary::new()));
        pool.show_only_weighted(true);
        let shown: Vec<bool> = pool.all_event_ids().map(|e| pool.event(e).shown()).collect();
        assert_eq!(shown.iter().filter(|&&s| s).count(), 1);
        pool.show_only_weighted(false);
        assert!(pool.all_event_ids().all(|e| pool.event(e).shown()));
    }

    #[test]
    fn test_out_of_bounds_time_kept() {
        // Out-of-range times warn but are not dropped.
        let pool = pool_with_events(10, 20, &[("g", "a", 5), ("g", "a", 15)]);
        let a = pool.type_for("g", "a").unwrap();
        assert_eq!(pool.type_at(a).events().len(), 2);
    }

    #[test]
    fn test_fingerprint_columns() {
        let mut pool = pool_with_events(0, 100, &[("g", "a", 0), ("g", "a", 50), ("g", "b", 100)]);
        let a = pool.type_for("g", "a").unwrap();
        let root = pool.type_for("g", "").unwrap();
        let mut members = BTreeSet::new();
        members.insert(a);
        assert!(pool.type_mut(root).set_fingerprint_types(members));
        let cols = pool.fingerprint_columns(root, 100.0);
        assert_eq!(cols, vec![0.0, 50.0]);
    }
}
