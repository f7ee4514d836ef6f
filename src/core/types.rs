//! Type registry entries and the dictionary that describes them
//!
//! A `Type` is a named category of events inside a group. Types form a
//! parent hierarchy (from the dictionary) and carry a proxy handle used to
//! collapse rows: every type delegates its visual identity to its proxy,
//! initially itself.

use std::collections::{BTreeSet, HashMap};

use serde::Deserialize;
use tracing::warn;

use crate::core::event::{EventId, Tick};

/// Handle into the pool's type arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl TypeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// ============================================================================
// Dictionary shapes
// ============================================================================

/// Flag override carried by a dictionary entry, inherited down the parent chain.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FlagSpec {
    pub color: String,
}

/// Dictionary entry for one (group, id) pair.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TypeSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub flags: HashMap<String, FlagSpec>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
}

/// group -> type id -> spec.
pub type Dictionary = HashMap<String, HashMap<String, TypeSpec>>;

/// Sanitized identifier usable in renderer element ids.
pub fn sanitize_id(raw: &str) -> String {
    raw.replace(['.', '#', '*'], "_")
}

/// Combined "group__id" identifier, sanitized.
pub fn type_key_id(group: &str, id: &str) -> String {
    sanitize_id(&format!("{group}__{id}"))
}

/// Human readable description of a type. Diagnosis and procedure codes get
/// the domain formatting rule: a dot is inserted after the three (numeric
/// start) or four (letter start) character prefix of the raw code.
pub fn type_desc(group: &str, id: &str, dictionary: &Dictionary, full: bool) -> String {
    let spec = dictionary.get(group).and_then(|g| g.get(id));
    let Some(spec) = spec else {
        return if full {
            format!("{group} {id}")
        } else {
            id.to_string()
        };
    };
    let desc = if full { &spec.desc } else { &spec.name };
    if group != "diagnosis" && group != "procedure" {
        return desc.clone();
    }
    let rid = match id.find("__") {
        Some(pos) => &id[pos + 2..],
        None => id,
    };
    if rid.starts_with("HIERARCHY") || rid.is_empty() {
        return desc.clone();
    }
    let desc = if desc == rid { "" } else { desc.as_str() };
    let suffix = if desc.is_empty() {
        String::new()
    } else {
        format!(": {desc}")
    };
    if rid.contains('.') {
        return format!("{rid}{suffix}");
    }
    let letter_start = !rid.chars().next().is_some_and(|c| c.is_ascii_digit());
    let cut = if letter_start { 4 } else { 3 };
    let cut = cut.min(rid.len());
    format!("{}.{}{suffix}", &rid[..cut], &rid[cut..])
}

// ============================================================================
// Type
// ============================================================================

/// One named category of events inside a group.
#[derive(Debug, Clone)]
pub struct Type {
    id: TypeId,
    group: String,
    group_id: String,
    type_key: String,
    name: String,
    desc: String,
    color: Option<String>,
    flags: HashMap<String, FlagSpec>,
    /// Own flags merged with inherited ones. Filled on first query and never
    /// invalidated afterwards; the dictionary is fixed per load.
    all_flags: Option<HashMap<String, FlagSpec>>,
    parent_key: String,
    pub(crate) events: Vec<EventId>,
    min_time: Option<Tick>,
    max_time: Option<Tick>,
    /// Representative this type delegates its row to. Self by default.
    pub(crate) proxy: TypeId,
    /// Types currently delegating to this one, including itself while it is
    /// its own proxy.
    pub(crate) proxied: BTreeSet<TypeId>,
    pub(crate) proxied_events: Option<Vec<EventId>>,
    pub(crate) proxied_min_time: Option<Tick>,
    pub(crate) proxied_max_time: Option<Tick>,
    y: f64,
    valid: bool,
    show_labels: bool,
    fingerprint_types: BTreeSet<TypeId>,
    pub(crate) fingerprint: Option<BTreeSet<Tick>>,
    /// (available width, right-aligned) of the last wrapped label text.
    label_cache: Option<(f64, bool)>,
}

impl Type {
    pub fn new(id: TypeId, group: &str, type_key: &str, dictionary: &Dictionary) -> Self {
        let spec = dictionary.get(group).and_then(|g| g.get(type_key));
        let mut parent_key = spec
            .and_then(|s| s.parent.clone())
            .unwrap_or_default();
        if parent_key == type_key && !type_key.is_empty() {
            warn!(parent = %parent_key, id = %type_key, "type declares itself as parent");
            parent_key = String::new();
        }
        let mut proxied = BTreeSet::new();
        proxied.insert(id);
        Self {
            id,
            group: group.to_string(),
            group_id: sanitize_id(group),
            type_key: type_key.to_string(),
            name: type_desc(group, type_key, dictionary, false),
            desc: type_desc(group, type_key, dictionary, true),
            color: spec.and_then(|s| s.color.clone()),
            flags: spec.map(|s| s.flags.clone()).unwrap_or_default(),
            all_flags: None,
            parent_key,
            events: Vec::new(),
            min_time: None,
            max_time: None,
            proxy: id,
            proxied,
            proxied_events: None,
            proxied_min_time: None,
            proxied_max_time: None,
            y: 0.0,
            valid: true,
            show_labels: true,
            fingerprint_types: BTreeSet::new(),
            fingerprint: None,
            label_cache: None,
        }
    }

    #[inline]
    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Sanitized group identifier.
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Identifier of this type inside its group; empty for the group root.
    pub fn type_key(&self) -> &str {
        &self.type_key
    }

    pub fn is_root(&self) -> bool {
        self.type_key.is_empty()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn desc(&self) -> &str {
        &self.desc
    }

    pub fn own_color(&self) -> Option<&str> {
        self.color.as_deref()
    }

    pub fn parent_key(&self) -> &str {
        &self.parent_key
    }

    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }

    pub fn events(&self) -> &[EventId] {
        &self.events
    }

    pub fn min_time(&self) -> Option<Tick> {
        if self.min_time.is_none() {
            warn!(type_key = %self.type_key, "min time queried on empty type");
        }
        self.min_time
    }

    pub fn max_time(&self) -> Option<Tick> {
        if self.max_time.is_none() {
            warn!(type_key = %self.type_key, "max time queried on empty type");
        }
        self.max_time
    }

    pub(crate) fn set_time_bounds(&mut self, min: Option<Tick>, max: Option<Tick>) {
        self.min_time = min;
        self.max_time = max;
    }

    #[inline]
    pub fn proxy(&self) -> TypeId {
        self.proxy
    }

    pub fn has_real_proxy(&self) -> bool {
        self.proxy != self.id
    }

    /// Types currently delegating to this one.
    pub fn proxied(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.proxied.iter().copied()
    }

    pub fn proxied_count(&self) -> usize {
        self.proxied.len()
    }

    /// Min time across the proxied set. Falls back to `Tick::MAX` so an
    /// empty aggregate sorts last instead of crashing layout.
    pub fn proxied_min_time(&self) -> Tick {
        match self.proxied_min_time {
            Some(t) => t,
            None => {
                warn!(type_key = %self.type_key, "no proxied min time");
                Tick::MAX
            }
        }
    }

    pub fn proxied_max_time(&self) -> Tick {
        match self.proxied_max_time {
            Some(t) => t,
            None => {
                warn!(type_key = %self.type_key, "no proxied max time");
                Tick::MIN
            }
        }
    }

    /// Merged own + inherited flags, as resolved by the pool. The merge is
    /// computed once; later flag mutations are not reflected (documented
    /// limitation, see DESIGN.md).
    pub(crate) fn all_flags_cache(&self) -> Option<&HashMap<String, FlagSpec>> {
        self.all_flags.as_ref()
    }

    pub(crate) fn set_all_flags(&mut self, flags: HashMap<String, FlagSpec>) {
        self.all_flags = Some(flags);
    }

    pub fn own_flags(&self) -> &HashMap<String, FlagSpec> {
        &self.flags
    }

    #[inline]
    pub fn y(&self) -> f64 {
        self.y
    }

    pub(crate) fn set_y_raw(&mut self, y: f64) {
        self.y = y;
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub(crate) fn set_valid_raw(&mut self, valid: bool) -> bool {
        let old = self.valid;
        self.valid = valid;
        old != valid
    }

    pub fn show_labels(&self) -> bool {
        self.show_labels
    }

    pub(crate) fn set_show_labels_raw(&mut self, show: bool) {
        self.show_labels = show;
        if !show {
            self.label_cache = None;
        }
    }

    /// Records which sub-types roll into this type's fingerprint.
    /// Returns whether the member set changed, which drops the cached
    /// presence histogram.
    pub fn set_fingerprint_types(&mut self, types: BTreeSet<TypeId>) -> bool {
        let changed = self.fingerprint_types != types;
        self.fingerprint_types = types;
        if changed {
            self.fingerprint = None;
        }
        changed
    }

    pub fn fingerprint_types(&self) -> &BTreeSet<TypeId> {
        &self.fingerprint_types
    }

    /// Label text must be re-wrapped when width or orientation changed.
    pub fn label_cache_matches(&self, width: f64, right: bool) -> bool {
        self.label_cache == Some((width, right))
    }

    pub(crate) fn set_label_cache(&mut self, width: f64, right: bool) {
        self.label_cache = Some((width, right));
    }

    pub(crate) fn clear_label_cache(&mut self) {
        self.label_cache = None;
    }
}
