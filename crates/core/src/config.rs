//! Environment-driven configuration for the Lectern platform.

use serde::{Deserialize, Serialize};

/// Runtime configuration, resolved once at startup from environment
/// variables. Deployments inject these through the container environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Platform issuer URL (`iss` in every JWT the platform signs).
    pub issuer: String,
    /// Overrides the derived base for absolute URLs when set.
    pub public_base_url: Option<String>,
    pub port: u16,
    pub log_level: String,
    /// Key id for the platform signing key; generated when absent.
    pub kid: Option<String>,
    pub private_key_pem: Option<String>,
    pub private_key_b64: Option<String>,
    pub tools_db_path: String,
    pub validation_db_path: String,
    pub scores_db_path: String,
    pub roster_db_path: String,
}

impl PlatformConfig {
    /// Read configuration from the process environment, applying defaults.
    pub fn from_env() -> Self {
        Self {
            issuer: env_or("PLATFORM_ISSUER", "http://localhost:8080"),
            public_base_url: non_empty(std::env::var("PUBLIC_BASE_URL").ok()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            log_level: env_or("LOG_LEVEL", "info"),
            kid: non_empty(std::env::var("PLATFORM_KID").ok()),
            private_key_pem: non_empty(std::env::var("PLATFORM_PRIVATE_KEY_PEM").ok()),
            private_key_b64: non_empty(std::env::var("PLATFORM_PRIVATE_KEY_B64").ok()),
            tools_db_path: env_or("TOOLS_DB_PATH", "./tools.db"),
            validation_db_path: env_or("VALIDATION_DB_PATH", "./validation.db"),
            scores_db_path: env_or("SCORES_DB_PATH", "./scores.db"),
            roster_db_path: env_or("ROSTER_DB_PATH", "./roster.db"),
        }
    }

    /// The base URL used when composing absolute resource URLs in claims.
    pub fn claims_base(&self) -> &str {
        self.public_base_url.as_deref().unwrap_or(&self.issuer)
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:8080".into(),
            public_base_url: None,
            port: 8080,
            log_level: "info".into(),
            kid: None,
            private_key_pem: None,
            private_key_b64: None,
            tools_db_path: "./tools.db".into(),
            validation_db_path: "./validation.db".into(),
            scores_db_path: "./scores.db".into(),
            roster_db_path: "./roster.db".into(),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let cfg = PlatformConfig::default();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.issuer, "http://localhost:8080");
        assert_eq!(cfg.claims_base(), "http://localhost:8080");
        assert!(cfg.kid.is_none());
    }

    #[test]
    fn public_base_url_overrides_claims_base() {
        let cfg = PlatformConfig {
            public_base_url: Some("https://lms.example.edu".into()),
            ..Default::default()
        };
        assert_eq!(cfg.claims_base(), "https://lms.example.edu");
    }

    #[test]
    fn non_empty_filters_blank() {
        assert_eq!(non_empty(Some(String::new())), None);
        assert_eq!(non_empty(Some("x".into())), Some("x".to_string()));
        assert_eq!(non_empty(None), None);
    }
}
