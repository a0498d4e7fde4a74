//! # SIS Sync Library
//!
//! Pulls student, guardian and enrollment data from Student Information
//! Systems, normalizes it, and reconciles it into the district directory.
//! Includes the vendor connectors, the sync orchestrator, the work queue and
//! scheduler, and the operator API.

pub mod auth;
pub mod config;
pub mod connectors;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod normalization;
pub mod queue;
pub mod repositories;
pub mod scheduler;
pub mod server;
pub mod sync_executor;
pub mod sync_orchestrator;
pub mod telemetry;
pub use migration;
