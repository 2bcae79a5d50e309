//! Incremental reactive dataflow.
//!
//! - [`graph`]: outlets with eager decoherence and version-deduplicated
//!   recoherence, including per-key tracking for map-valued nodes.
//! - [`record`] and [`expression`]: records bound to the graph and the
//!   compiler turning expressions into wired outlets.
//! - [`window`]: pane management for windowed, optionally keyed aggregation.
//! - [`stream`]: declarative streams instantiated into live conduits,
//!   including modal and rate-decoupled operators.
//! - [`state`]: state tags, persisters and stores.

pub mod arena;
pub mod config;
pub mod expression;
pub mod form;
pub mod graph;
pub mod record;
pub mod schedule;
pub mod state;
pub mod stream;
pub mod value;
pub mod window;
