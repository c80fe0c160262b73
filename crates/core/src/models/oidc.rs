//! Short-lived OIDC launch state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One-shot capability token bridging a launch from the initiation redirect
/// to the authorization endpoint. Consumed exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcState {
    pub state: String,
    pub client_id: String,
    pub target_link_uri: String,
    pub resource_link_id: String,
    pub context_id: String,
    pub expires_at: DateTime<Utc>,
}

/// The payload handed back by a successful state consumption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedState {
    pub client_id: String,
    pub target_link_uri: String,
    pub resource_link_id: String,
    pub context_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn oidc_state_round_trip() {
        let state = OidcState {
            state: "st-1".into(),
            client_id: "c1".into(),
            target_link_uri: "https://tool/launch".into(),
            resource_link_id: "rl-1".into(),
            context_id: "ctx-1".into(),
            expires_at: Utc::now() + Duration::minutes(15),
        };
        let json = serde_json::to_string(&state).unwrap();
        let back: OidcState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.state, "st-1");
        assert_eq!(back.context_id, "ctx-1");
    }
}
