//! The path engine: binds N source nodes through a mapping to M
//! destination nodes, with one worker thread per path.
//!
//! A path pulls samples from its sources (each node is pumped by exactly
//! one master worker), composes output samples through the compiled
//! mapping, runs the path hook chain and fans the result out to bounded
//! per-destination queues. Workers suspend only in `poll(2)` over their
//! source descriptors, the optional rate timer and a cancellation
//! eventfd.

use basalt_config::ConfigError;
use basalt_node::NodeError;
use basalt_util::State;

pub mod destination;
pub mod path;
pub mod source;

pub use destination::PathDestination;
pub use path::{Mode, Path};
pub use source::{PathSource, ReadOutcome};

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error("hook failure: {0}")]
    Hook(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid lifecycle state: {0}")]
    InvalidState(State),

    #[error("{0}")]
    Setup(String),
}
