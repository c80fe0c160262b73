//! Platform RSA signing keys and JWKS export.
//!
//! The key material comes from `PLATFORM_PRIVATE_KEY_PEM` or
//! `PLATFORM_PRIVATE_KEY_B64` (a base64-wrapped PEM); both PKCS#1 and
//! PKCS#8 encodings are accepted. When neither is set, a 2048-bit keypair
//! is generated and the export lines are printed so an operator can persist
//! it. Constructed once at startup and shared as `Arc<PlatformKeys>`.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use jsonwebtoken::{DecodingKey, EncodingKey};
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, LineEnding};
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde::Serialize;
use uuid::Uuid;

use crate::config::PlatformConfig;
use crate::error::{LecternError, Result};

/// A single public key entry in the exported JWKS.
#[derive(Debug, Clone, Serialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(rename = "use")]
    pub use_: String,
    pub alg: String,
    pub kid: String,
    pub n: String,
    pub e: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

/// The platform signing keypair plus everything derived from it that the
/// protocol handlers need: the encoding key for signing, the decoding key
/// for verifying our own access tokens, the `kid`, and the public JWKS.
pub struct PlatformKeys {
    kid: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    jwks: JwkSet,
}

impl PlatformKeys {
    /// Resolve keys from configuration, generating a dev keypair when no
    /// key material is configured.
    pub fn from_config(config: &PlatformConfig) -> Result<Self> {
        let kid = config
            .kid
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if let Some(b64) = &config.private_key_b64 {
            let der = STANDARD
                .decode(b64.trim())
                .map_err(|e| LecternError::Key(format!("invalid base64 key: {e}")))?;
            let pem = String::from_utf8(der)
                .map_err(|e| LecternError::Key(format!("key base64 did not wrap PEM: {e}")))?;
            return Self::from_pem(&pem, kid);
        }
        if let Some(pem) = &config.private_key_pem {
            return Self::from_pem(pem, kid);
        }

        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048)
            .map_err(|e| LecternError::Key(format!("RSA key generation failed: {e}")))?;
        let pem = key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| LecternError::Key(format!("PEM encoding failed: {e}")))?;
        print_export_instructions(&pem, &kid);
        Self::from_private_key(key, &pem, kid)
    }

    /// Build keys from a PEM-encoded private key (PKCS#1 or PKCS#8).
    pub fn from_pem(pem: &str, kid: String) -> Result<Self> {
        let key = RsaPrivateKey::from_pkcs1_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
            .map_err(|e| LecternError::Key(format!("invalid RSA private key PEM: {e}")))?;
        Self::from_private_key(key, pem, kid)
    }

    fn from_private_key(key: RsaPrivateKey, pem: &str, kid: String) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| LecternError::Key(format!("signing key rejected: {e}")))?;

        let public = key.to_public_key();
        let n = URL_SAFE_NO_PAD.encode(public.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(public.e().to_bytes_be());
        let decoding_key = DecodingKey::from_rsa_components(&n, &e)
            .map_err(|err| LecternError::Key(format!("public key rejected: {err}")))?;

        let jwks = JwkSet {
            keys: vec![Jwk {
                kty: "RSA".into(),
                use_: "sig".into(),
                alg: "RS256".into(),
                kid: kid.clone(),
                n,
                e,
            }],
        };

        Ok(Self {
            kid,
            encoding_key,
            decoding_key,
            jwks,
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Key for RS256 signing of id_tokens and access tokens.
    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    /// Key for verifying tokens this platform issued.
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    pub fn jwks(&self) -> &JwkSet {
        &self.jwks
    }

    pub fn jwks_json(&self) -> Result<String> {
        serde_json::to_string(&self.jwks)
            .map_err(|e| LecternError::Serialization(e.to_string()))
    }
}

/// Print the export lines for a freshly generated dev key so the operator
/// can persist it across restarts.
pub fn print_export_instructions(pem: &str, kid: &str) {
    let b64 = STANDARD.encode(pem.as_bytes());
    println!("Generated ephemeral RSA signing key (dev mode). To persist, set one of:");
    println!("export PLATFORM_PRIVATE_KEY_PEM='{pem}'");
    println!("export PLATFORM_PRIVATE_KEY_B64='{b64}'");
    println!("export PLATFORM_KID='{kid}'");
}

/// Generate a fresh 2048-bit keypair, returning its PKCS#1 PEM.
pub fn generate_key_pem() -> Result<String> {
    let key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048)
        .map_err(|e| LecternError::Key(format!("RSA key generation failed: {e}")))?;
    let pem = key
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| LecternError::Key(format!("PEM encoding failed: {e}")))?;
    Ok(pem.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::EncodePrivateKey;

    fn test_pem() -> String {
        generate_key_pem().unwrap()
    }

    #[test]
    fn loads_pkcs1_pem() {
        let keys = PlatformKeys::from_pem(&test_pem(), "kid-1".into()).unwrap();
        assert_eq!(keys.kid(), "kid-1");
        assert_eq!(keys.jwks().keys.len(), 1);
    }

    #[test]
    fn loads_pkcs8_pem() {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        let pem = key.to_pkcs8_pem(LineEnding::LF).unwrap();
        let keys = PlatformKeys::from_pem(&pem, "kid-8".into()).unwrap();
        assert_eq!(keys.kid(), "kid-8");
    }

    #[test]
    fn rejects_garbage_pem() {
        assert!(PlatformKeys::from_pem("not a key", "kid".into()).is_err());
    }

    #[test]
    fn from_config_accepts_base64_wrapped_pem() {
        let pem = test_pem();
        let config = PlatformConfig {
            kid: Some("env-kid".into()),
            private_key_b64: Some(STANDARD.encode(pem.as_bytes())),
            ..Default::default()
        };
        let keys = PlatformKeys::from_config(&config).unwrap();
        assert_eq!(keys.kid(), "env-kid");
    }

    #[test]
    fn from_config_generates_when_unset() {
        let config = PlatformConfig::default();
        let keys = PlatformKeys::from_config(&config).unwrap();
        // Generated kid is a UUID.
        assert_eq!(keys.kid().len(), 36);
    }

    #[test]
    fn jwks_shape_matches_rfc7517() {
        let keys = PlatformKeys::from_pem(&test_pem(), "kid-j".into()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&keys.jwks_json().unwrap()).unwrap();
        let key = &json["keys"][0];
        assert_eq!(key["kty"], "RSA");
        assert_eq!(key["use"], "sig");
        assert_eq!(key["alg"], "RS256");
        assert_eq!(key["kid"], "kid-j");
        assert!(URL_SAFE_NO_PAD.decode(key["n"].as_str().unwrap()).is_ok());
        assert!(URL_SAFE_NO_PAD.decode(key["e"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn signs_and_verifies_round_trip() {
        use jsonwebtoken::{decode, encode, Algorithm, Header, Validation};
        use serde::Deserialize;

        #[derive(serde::Serialize, Deserialize)]
        struct Claims {
            sub: String,
            exp: i64,
        }

        let keys = PlatformKeys::from_pem(&test_pem(), "kid-rt".into()).unwrap();
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(keys.kid().to_string());
        let token = encode(
            &header,
            &Claims {
                sub: "tool-1".into(),
                exp: chrono::Utc::now().timestamp() + 60,
            },
            keys.encoding_key(),
        )
        .unwrap();

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_aud = false;
        let data = decode::<Claims>(&token, keys.decoding_key(), &validation).unwrap();
        assert_eq!(data.claims.sub, "tool-1");
    }
}
