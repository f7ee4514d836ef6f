//! Interactive timeline engine for typed event streams
//!
//! A person document (typed events over a time range) is ingested into a
//! pool that maintains:
//! - coordinate mapping between time/rank and screen space
//! - row collapsing via proxy delegation and type hierarchy
//! - selection and highlight state with listener fan-out
//! - decoration geometry (bars, spans, connector lines)
//!
//! On top of the pool sit density-based clustering of similar rows,
//! viewport-driven label placement and a scene coordinator.

pub mod cluster;
pub mod core;
pub mod labels;
pub mod pool;
pub mod scene;

pub use cluster::EventClusterer;
pub use core::{Dictionary, Event, EventId, EventRecord, Tick, Type, TypeId, TypeSpec};
pub use labels::{LabelMode, LabelPlacement, Labels};
pub use pool::{PersonRecord, Rect, TypePool, XMode, YMode};
pub use scene::{GridModel, Scene, StatusKind, StatusSink};
