//! Platform-agnostic data model shared by the pool, clusterer and labels

pub mod event;
pub mod types;

pub use event::{ConnectionRecord, CostValue, Event, EventId, EventRecord, Tick, WeightInfo};
pub use types::{sanitize_id, type_desc, type_key_id, Dictionary, FlagSpec, Type, TypeId, TypeSpec};
