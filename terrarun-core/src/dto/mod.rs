//! Data Transfer Objects for inter-service communication
//!
//! Request and response payloads exchanged between the server, agents and
//! the CLI. DTOs are lightweight representations of domain entities
//! optimized for network transfer.

pub mod agent;
pub mod pool;
pub mod run;
pub mod scope;
