pub mod fd;
pub mod rt;
pub mod state;
pub mod time;

pub use fd::{EventFd, TimerFd, poll};
pub use state::State;
pub use time::{TimeSpec, now_ns};
