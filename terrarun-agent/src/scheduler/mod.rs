//! Scheduler layer for the agent
//!
//! Keeps the agent alive on the server with heartbeats and drives claimed
//! runs from claim to completion.

pub mod backoff;
pub mod poller;

pub use backoff::Backoff;
pub use poller::RunPoller;
