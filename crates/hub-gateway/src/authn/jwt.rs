//! HS256 JWT authenticator.

use super::{AuthError, Authenticator, AuthnStore, LoginGrant, Role, TokenInfo};
use crate::domain::SessionId;
use async_trait::async_trait;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const ISSUER: &str = "hub";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    /// Session id; absent in agent tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sid: Option<String>,
    iss: String,
    iat: u64,
    exp: u64,
}

/// Token authenticator over an [`AuthnStore`].
pub struct JwtAuthenticator {
    store: Arc<AuthnStore>,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    consumer_validity: Duration,
    agent_validity: Duration,
}

impl JwtAuthenticator {
    /// Create with an explicit signing secret.
    pub fn new(
        store: Arc<AuthnStore>,
        secret: &[u8],
        consumer_validity: Duration,
        agent_validity: Duration,
    ) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.leeway = 5;
        Self {
            store,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            consumer_validity,
            agent_validity,
        }
    }

    /// Create with a random per-process secret. Tokens die with the process.
    pub fn ephemeral(
        store: Arc<AuthnStore>,
        consumer_validity: Duration,
        agent_validity: Duration,
    ) -> Self {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self::new(store, &secret, consumer_validity, agent_validity)
    }

    pub fn store(&self) -> &Arc<AuthnStore> {
        &self.store
    }

    fn issue(
        &self,
        client_id: &str,
        session_id: Option<SessionId>,
        validity: Duration,
    ) -> Result<String, AuthError> {
        let now = unix_now();
        let claims = Claims {
            sub: client_id.to_string(),
            sid: session_id.map(|s| s.to_string()),
            iss: ISSUER.to_string(),
            iat: now,
            exp: now + validity.as_secs(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }

    fn decode_claims(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(e.to_string()),
            })
    }

    fn role_of(&self, client_id: &str) -> Result<Role, AuthError> {
        self.store
            .get(client_id)
            .map(|r| r.role)
            .ok_or_else(|| AuthError::UnknownClient(client_id.to_string()))
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn login(&self, client_id: &str, password: &str) -> Result<LoginGrant, AuthError> {
        let record = self.store.verify(client_id, password)?;
        let session_id = SessionId::new();
        let token = self.issue(client_id, Some(session_id), self.consumer_validity)?;
        Ok(LoginGrant {
            token,
            session_id,
            role: record.role,
        })
    }

    fn validate_token(&self, token: &str) -> Result<TokenInfo, AuthError> {
        let claims = self.decode_claims(token)?;
        let session_id = claims
            .sid
            .as_deref()
            .map(SessionId::parse)
            .transpose()
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        // Role comes from the store so removed clients lose access immediately.
        let role = self.role_of(&claims.sub)?;
        Ok(TokenInfo {
            client_id: claims.sub,
            session_id,
            role,
        })
    }

    fn refresh_token(&self, client_id: &str, old_token: &str) -> Result<String, AuthError> {
        let info = self.validate_token(old_token)?;
        if info.client_id != client_id {
            return Err(AuthError::ClientMismatch(client_id.to_string()));
        }
        match info.session_id {
            Some(sid) => self.issue(client_id, Some(sid), self.consumer_validity),
            None => self.issue(client_id, None, self.agent_validity),
        }
    }

    fn create_agent_token(&self, client_id: &str) -> Result<String, AuthError> {
        self.role_of(client_id)?;
        self.issue(client_id, None, self.agent_validity)
    }
}
