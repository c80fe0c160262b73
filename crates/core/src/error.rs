//! Error types for the Lectern core crate.

use thiserror::Error;

/// Top-level error type for all Lectern core operations.
#[derive(Debug, Error)]
pub enum LecternError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("key error: {0}")]
    Key(String),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JWKS cache error: {0}")]
    JwksCache(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid input: {0}")]
    Invalid(String),
}

/// A convenience Result alias that defaults to [`LecternError`].
pub type Result<T> = std::result::Result<T, LecternError>;
