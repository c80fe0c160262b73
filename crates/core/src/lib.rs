//! Lectern core — shared foundations for the LTI 1.3 platform.
//!
//! Holds the domain models, the repository traits and their SQLite
//! implementations, the platform signing keys, and the JWKS cache that the
//! protocol crate builds on.

pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod jwks_cache;
pub mod keys;
pub mod models;
