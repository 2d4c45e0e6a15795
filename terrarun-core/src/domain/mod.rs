//! Core domain types
//!
//! This module contains the core domain structures used across Terrarun services.
//! They are shared between the server (for persistence and dispatch) and the
//! agent process (for claiming and executing runs).

pub mod agent;
pub mod pool;
pub mod run;
pub mod scope;
