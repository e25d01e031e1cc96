//! Database module for SQLite operations.
//!
//! This module provides:
//! - Database initialization and migrations
//! - SQLite pragma configuration
//! - Repository layer for deals, participations and cached token metadata

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::{is_unique_violation, ListedDeal, Repository};
