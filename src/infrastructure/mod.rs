//! Infrastructure layer module
//!
//! This module contains the adapters behind the domain ports:
//! - Database implementations (SQLite with sqlx, in-memory)
//! - Configuration management
//! - Logging infrastructure
//! - Clocks
//!
//! Infrastructure implementations satisfy the port traits defined in the domain layer.

pub mod clock;
pub mod config;
pub mod database;
pub mod logging;
