//! Task execution core of the taskbot worker agent.
//!
//! A task flows from its manifest ([`task`]) through the process supervisor
//! ([`runner`]), which reports progress over an authenticated [`session`]
//! built on the retrying HTTP client in [`net`].

pub mod api;
pub mod config;
pub mod errors;
pub mod net;
pub mod runner;
pub mod session;
pub mod task;
