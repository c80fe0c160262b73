//! Lectern platform — the LTI 1.3 protocol engine.
//!
//! Exposes an axum router covering the OIDC third-party-initiated login
//! dance, Deep Linking, the private_key_jwt token endpoint, and the scoped
//! AGS/NRPS service APIs.

pub mod ags;
pub mod claims;
pub mod deeplink;
pub mod error;
pub mod guard;
pub mod launch;
pub mod nrps;
pub mod oauth2;
pub mod oidc;
pub mod routes;
pub mod selections;
pub mod tools;

pub use routes::{router, AppState};
