//! Terrarun Core
//!
//! Core types and abstractions shared by the Terrarun control plane and its agents.
//!
//! This crate contains:
//! - Domain types: Agents, agent pools, pool tokens, run-queue entries and the
//!   workspace/project/environment scope entities
//! - DTOs: Request and response payloads exchanged over the HTTP API

pub mod domain;
pub mod dto;
