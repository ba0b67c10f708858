//! Client authentication
//!
//! Tokens are HS256 JWTs; `sub` is the user id and `exp` is enforced.

use chrono::Utc;
use common::UserId;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::DistributionError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// Verifies client tokens against the configured secret
pub struct JwtAuthenticator {
    key: Option<DecodingKey>,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(config: &::config::DistributionAuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = config.leeway_secs;
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }

        // An empty secret disables authentication instead of accepting
        // tokens signed with an empty key
        let key = (!config.jwt_secret.is_empty()).then(|| DecodingKey::from_secret(config.jwt_secret.as_bytes()));

        Self { key, validation }
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    pub fn authenticate(&self, token: &str) -> Result<UserId, DistributionError> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| DistributionError::AuthFailed("authentication is not configured".into()))?;
        let data = decode::<Claims>(token, key, &self.validation)
            .map_err(|e| DistributionError::AuthFailed(e.to_string()))?;
        UserId::new(data.claims.sub).map_err(|e| DistributionError::AuthFailed(e.to_string()))
    }
}

/// Sign a token for `user_id` valid for `ttl`
pub fn issue_token(
    secret: &str,
    user_id: &UserId,
    issuer: Option<&str>,
    ttl: Duration,
) -> Result<String, DistributionError> {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (Utc::now().timestamp() as u64).saturating_add(ttl.as_secs()) as usize,
        iss: issuer.map(str::to_string),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| DistributionError::AuthFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(secret: &str) -> ::config::DistributionAuthConfig {
        ::config::DistributionAuthConfig {
            jwt_secret: secret.into(),
            issuer: None,
            leeway_secs: 0,
        }
    }

    fn alice() -> UserId {
        UserId::new("alice").unwrap()
    }

    #[test]
    fn test_valid_token() {
        let auth = JwtAuthenticator::new(&config("s3cret"));
        let token = issue_token("s3cret", &alice(), None, Duration::from_secs(60)).unwrap();
        assert_eq!(auth.authenticate(&token).unwrap(), alice());
    }

    #[test]
    fn test_wrong_secret_and_garbage() {
        let auth = JwtAuthenticator::new(&config("s3cret"));
        let token = issue_token("other", &alice(), None, Duration::from_secs(60)).unwrap();
        assert!(matches!(auth.authenticate(&token), Err(DistributionError::AuthFailed(_))));
        assert!(auth.authenticate("not-a-jwt").is_err());
    }

    #[test]
    fn test_expired_token() {
        let auth = JwtAuthenticator::new(&config("s3cret"));
        let claims = Claims {
            sub: "alice".into(),
            exp: (Utc::now().timestamp() - 120) as usize,
            iss: None,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"s3cret"),
        )
        .unwrap();
        assert!(auth.authenticate(&token).is_err());
    }

    #[test]
    fn test_issuer_is_checked() {
        let mut cfg = config("s3cret");
        cfg.issuer = Some("spotx".into());
        let auth = JwtAuthenticator::new(&cfg);

        let good = issue_token("s3cret", &alice(), Some("spotx"), Duration::from_secs(60)).unwrap();
        let bad = issue_token("s3cret", &alice(), Some("elsewhere"), Duration::from_secs(60)).unwrap();
        assert!(auth.authenticate(&good).is_ok());
        assert!(auth.authenticate(&bad).is_err());
    }

    #[test]
    fn test_disabled_without_secret() {
        let auth = JwtAuthenticator::new(&config(""));
        assert!(!auth.is_enabled());
        let token = issue_token("", &alice(), None, Duration::from_secs(60)).unwrap();
        assert!(auth.authenticate(&token).is_err());
    }
}
