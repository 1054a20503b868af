//! `basalt-icc`: the real-time plumbing between components.
//!
//! Three pieces, layered:
//!
//! - [`Arena`]: one contiguous memory region per pool, from the heap, a
//!   hugepage-backed mapping or a file-backed mapping.
//! - [`MpmcRing`]: a bounded lock-free ring, used both as the pool
//!   freelist and as the body of the signalled queue.
//! - [`SamplePool`] / [`SampleBox`]: preallocated reference-counted
//!   samples, O(1) acquire/release, nothing allocates in steady state.
//! - [`SignalledQueue`]: bounded FIFO of sample references that raises an
//!   eventfd on push, so consumers can multiplex many queues (plus timers
//!   and cancellation) through a single `poll(2)`.

pub mod arena;
pub mod mpmc;
pub mod pool;
pub mod queue;

pub use arena::{Arena, ArenaKind};
pub use mpmc::MpmcRing;
pub use pool::{PoolConfig, SampleBox, SamplePool};
pub use queue::{QueueError, SignalledQueue};
