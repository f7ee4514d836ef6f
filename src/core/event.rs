//! Event records and their parsed in-pool representation
//!
//! - EventRecord / ConnectionRecord: serde shapes of the input JSON
//! - Event: the pool-owned occurrence with layout and selection state

use serde::Deserialize;

use crate::core::types::TypeId;

/// Unit-agnostic timestamp tick.
pub type Tick = i64;

/// Handle into the pool's event arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(pub u32);

impl EventId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// ============================================================================
// Input shapes
// ============================================================================

/// A connection to another event, referenced by its registered name.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionRecord {
    pub event_id: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub stroke_width: Option<f64>,
}

/// Cost values arrive either as numbers or numeric strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CostValue {
    Num(f64),
    Text(String),
}

impl CostValue {
    /// Best-effort numeric value; anything unparseable counts as 0.
    pub fn as_f64(&self) -> f64 {
        let v = match self {
            Self::Num(n) => *n,
            Self::Text(s) => s.trim().parse().unwrap_or(f64::NAN),
        };
        if v.is_nan() {
            0.0
        } else {
            v
        }
    }
}

/// One raw input event as it appears in the person JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct EventRecord {
    pub time: Tick,
    pub group: String,
    pub id: String,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub cost: Option<CostValue>,
    #[serde(default)]
    pub flag: Option<String>,
    #[serde(default)]
    pub flag_value: Option<String>,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub row_id: Option<String>,
    #[serde(default)]
    pub connections: Vec<ConnectionRecord>,
}

// ============================================================================
// Pool-owned event
// ============================================================================

/// Weight annotation for emphasized events.
/// The raw weight's sign encodes polarity; magnitude drives the halo radius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightInfo {
    pub weight: f64,
    pub radius: f64,
    pub negative: bool,
}

impl WeightInfo {
    pub fn from_raw(raw: f64) -> Self {
        Self {
            weight: raw.abs(),
            radius: 4.0 + 160.0 * raw.abs(),
            negative: raw < 0.0,
        }
    }
}

/// A single timestamped occurrence, owned by exactly one type.
#[derive(Debug, Clone)]
pub struct Event {
    id: EventId,
    time: Tick,
    weight: Option<WeightInfo>,
    cost: f64,
    result_flag: String,
    flag_value: String,
    event_group: String,
    connections: Vec<ConnectionRecord>,
    type_id: TypeId,
    shown: bool,
    selected: bool,
    /// Global chronological rank of this event's time slot.
    topo_x: usize,
    /// Position among the proxy row's events, assigned during relayout.
    ix_in_type: usize,
    /// Last committed x position, used to skip untouched draw updates.
    last_x: Option<f64>,
    /// Connector width in column-width multiples.
    width_slots: f64,
    /// Cached earliest same-type event of this event's group.
    first_of_group: Option<EventId>,
}

impl Event {
    pub fn new(id: EventId, record: &EventRecord, type_id: TypeId) -> Self {
        let weight = record
            .weight
            .filter(|w| *w != 0.0)
            .map(WeightInfo::from_raw);
        Self {
            id,
            time: record.time,
            weight,
            cost: record.cost.as_ref().map_or(0.0, CostValue::as_f64),
            result_flag: record.flag.as_deref().unwrap_or("").trim().to_string(),
            flag_value: record.flag_value.clone().unwrap_or_default(),
            event_group: record.row_id.clone().unwrap_or_default(),
            connections: record.connections.clone(),
            type_id,
            shown: true,
            selected: false,
            topo_x: 0,
            ix_in_type: 0,
            last_x: None,
            width_slots: 1.0,
            first_of_group: None,
        }
    }

    #[inline]
    pub fn id(&self) -> EventId {
        self.id
    }

    #[inline]
    pub fn time(&self) -> Tick {
        self.time
    }

    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn is_weighted(&self) -> bool {
        self.weight.is_some()
    }

    /// Weight magnitude; unweighted events report 0.
    pub fn weight(&self) -> f64 {
        self.weight.map_or(0.0, |w| w.weight)
    }

    pub fn weight_info(&self) -> Option<WeightInfo> {
        self.weight
    }

    pub fn cost(&self) -> f64 {
        self.cost
    }

    pub fn result_flag(&self) -> &str {
        &self.result_flag
    }

    pub fn flag_value(&self) -> &str {
        &self.flag_value
    }

    pub fn event_group_id(&self) -> &str {
        &self.event_group
    }

    pub fn connections(&self) -> &[ConnectionRecord] {
        &self.connections
    }

    #[inline]
    pub fn shown(&self) -> bool {
        self.shown
    }

    pub fn set_shown(&mut self, shown: bool) {
        self.shown = shown;
    }

    #[inline]
    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub(crate) fn set_selected_raw(&mut self, selected: bool) -> bool {
        let old = self.selected;
        self.selected = selected;
        old != selected
    }

    pub fn topo_x(&self) -> usize {
        self.topo_x
    }

    pub(crate) fn set_topo_x(&mut self, ix: usize) {
        self.topo_x = ix;
    }

    pub fn ix_in_type(&self) -> usize {
        self.ix_in_type
    }

    pub(crate) fn set_ix_in_type(&mut self, ix: usize) {
        self.ix_in_type = ix;
    }

    pub fn last_x(&self) -> Option<f64> {
        self.last_x
    }

    pub(crate) fn set_last_x(&mut self, x: f64) {
        self.last_x = Some(x);
    }

    pub fn width_slots(&self) -> f64 {
        self.width_slots
    }

    pub(crate) fn set_width_slots(&mut self, w: f64) {
        self.width_slots = w;
    }

    pub(crate) fn first_of_group_cache(&self) -> Option<EventId> {
        self.first_of_group
    }

    pub(crate) fn set_first_of_group(&mut self, eid: EventId) {
        self.first_of_group = Some(eid);
    }

    /// Events compare equal on time, weight and description. Duplicate
    /// detection during [`sort`](crate::pool::TypePool) relies on this.
    pub fn eq_event(&self, other: &Event, own_desc: &str, other_desc: &str) -> bool {
        if self.id == other.id {
            return true;
        }
        self.time == other.time && self.weight() == other.weight() && own_desc == other_desc
    }

    /// Description prefix contributed by the event itself; the type
    /// description is appended by the pool.
    pub fn desc_prefix(&self) -> String {
        if self.result_flag.is_empty() && self.flag_value.is_empty() {
            String::new()
        } else if self.result_flag.is_empty() {
            format!("{}: ", self.flag_value)
        } else {
            format!("{} [{}]: ", self.flag_value, self.result_flag)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(time: Tick) -> EventRecord {
        EventRecord {
            time,
            group: "g".into(),
            id: "a".into(),
            weight: None,
            cost: None,
            flag: None,
            flag_value: None,
            event_id: None,
            row_id: None,
            connections: vec![],
        }
    }

    #[test]
    fn test_weight_polarity() {
        let mut r = record(0);
        r.weight = Some(-0.5);
        let e = Event::new(EventId(0), &r, TypeId(0));
        let w = e.weight_info().unwrap();
        assert!(w.negative);
        assert_eq!(w.weight, 0.5);
        assert_eq!(w.radius, 4.0 + 160.0 * 0.5);

        r.weight = Some(0.25);
        let e = Event::new(EventId(1), &r, TypeId(0));
        assert!(!e.weight_info().unwrap().negative);
    }

    #[test]
    fn test_zero_weight_is_unweighted() {
        let mut r = record(0);
        r.weight = Some(0.0);
        let e = Event::new(EventId(0), &r, TypeId(0));
        assert!(!e.is_weighted());
        assert_eq!(e.weight(), 0.0);
    }

    #[test]
    fn test_cost_parsing() {
        assert_eq!(CostValue::Num(2.5).as_f64(), 2.5);
        assert_eq!(CostValue::Text("17".into()).as_f64(), 17.0);
        assert_eq!(CostValue::Text("n/a".into()).as_f64(), 0.0);
    }

    #[test]
    fn test_event_equality() {
        let mut a = record(5);
        a.weight = Some(0.3);
        let mut b = record(5);
        b.weight = Some(0.3);
        let ea = Event::new(EventId(0), &a, TypeId(0));
        let eb = Event::new(EventId(1), &b, TypeId(0));
        assert!(ea.eq_event(&eb, "d", "d"));
        assert!(!ea.eq_event(&eb, "d", "other"));

        b.weight = Some(0.4);
        let eb = Event::new(EventId(2), &b, TypeId(0));
        assert!(!ea.eq_event(&eb, "d", "d"));
    }

    #[test]
    fn test_desc_prefix() {
        let mut r = record(0);
        r.flag = Some("abnormal".into());
        r.flag_value = Some("7.1".into());
        let e = Event::new(EventId(0), &r, TypeId(0));
        assert_eq!(e.desc_prefix(), "7.1 [abnormal]: ");
    }
}
