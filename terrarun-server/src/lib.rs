//! Terrarun server
//!
//! Agent registry, pool scoping and the run dispatch protocol behind an
//! axum HTTP API.

pub mod api;
pub mod config;
pub mod db;
pub mod repository;
pub mod service;
