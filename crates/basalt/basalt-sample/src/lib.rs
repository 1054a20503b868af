//! Data model of the gateway: typed channel descriptors and the
//! fixed-capacity records flowing between endpoints.
//!
//! A [`Signal`] describes one channel (name, unit, type, initial value).
//! A [`SignalList`] is the ordered set of channels a node speaks; the list
//! index is the only key into sample data. A [`Sample`] is one timestamped
//! record of values laid out against such a list.
//!
//! Signals are immutable once published and shared via `Arc`; samples are
//! pool-owned and reference-counted by the pool layer. Signal lists never
//! point back at samples, so there are no reference cycles to collect.

pub mod data;
pub mod list;
pub mod sample;
pub mod signal;

pub use data::{SignalData, SignalValue};
pub use list::SignalList;
pub use sample::{Sample, SampleFlags, Timestamps};
pub use signal::{Signal, SignalType};
