//! The endpoint contract: every driver, from files to sockets to
//! in-process queues, exposes the same read/write/poll surface to the
//! path engine.
//!
//! A [`Node`] wraps one [`NodeDriver`] with the cross-cutting state every
//! endpoint shares: name, deterministic UUID, lifecycle, per-direction
//! vectorize/signals/hook chains and a statistics table. The path engine
//! only ever talks to `Node`.

use basalt_format::FormatError;
use basalt_util::State;

pub mod drivers;
pub mod factory;
pub mod list;
pub mod node;

pub use factory::{FactoryFlags, NodeFactory, NodeRegistry};
pub use list::NodeList;
pub use node::{Direction, DriverContext, Node, NodeDriver};

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Graceful end of stream; the owning path should wind this source
    /// down and, for file sources with `eof = "stop"`, ask the supervisor
    /// to shut down.
    #[error("node is stopping")]
    Stopping,

    #[error("operation not supported")]
    Unsupported,

    #[error("invalid lifecycle state: {0}")]
    InvalidState(State),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("{0}")]
    Driver(String),
}

impl NodeError {
    pub fn driver(msg: impl Into<String>) -> NodeError {
        NodeError::Driver(msg.into())
    }

    /// Fatal errors stop the node; transient ones are counted and
    /// retried.
    pub fn is_fatal(&self) -> bool {
        match self {
            NodeError::Stopping => false,
            NodeError::Format(FormatError::Invalid(_)) => false,
            NodeError::Format(FormatError::Truncated) => false,
            _ => true,
        }
    }
}
