// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Session Grant Tokens
//!
//! Issues and validates the bearer grants handed out at the end of the
//! admission ceremony. Grants are HS256 JWTs signed with the process
//! secret; the claim TTL comes from the AE's session profile. Validation
//! failures are distinguished so the pipeline can audit precise reasons.

use std::collections::HashMap;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;

use crate::domain::error::GatewayError;
use crate::domain::expert::{ExpertId, RoleSet};
use crate::domain::session::{SessionClaims, SessionProfile};

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("bad token signature")]
    BadSignature,
    #[error("malformed token")]
    Malformed,
    #[error("unknown session profile '{0}'")]
    UnknownProfile(String),
    #[error("token encoding failed: {0}")]
    Encoding(String),
}

impl From<TokenError> for GatewayError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Expired => GatewayError::Unauthenticated("token expired".into()),
            TokenError::BadSignature => {
                GatewayError::Unauthenticated("bad token signature".into())
            }
            TokenError::Malformed => GatewayError::Unauthenticated("malformed token".into()),
            TokenError::UnknownProfile(p) => {
                GatewayError::Internal(format!("unknown session profile '{p}'"))
            }
            TokenError::Encoding(m) => GatewayError::Internal(m),
        }
    }
}

/// A freshly issued grant plus its advertised lifetime.
#[derive(Debug, Clone)]
pub struct IssuedGrant {
    pub token: String,
    pub expires_in_secs: u64,
}

pub struct SessionTokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    profiles: HashMap<String, SessionProfile>,
}

impl SessionTokenService {
    pub fn new(secret: &str, profiles: HashMap<String, SessionProfile>) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            profiles,
        }
    }

    pub fn profile(&self, name: &str) -> Result<&SessionProfile, TokenError> {
        self.profiles
            .get(name)
            .ok_or_else(|| TokenError::UnknownProfile(name.to_string()))
    }

    pub fn issue(
        &self,
        subject: &ExpertId,
        roles: &RoleSet,
        profile: &str,
    ) -> Result<IssuedGrant, TokenError> {
        let ttl = self.profile(profile)?.session_ttl_secs;
        let now = Utc::now().timestamp();
        let claims = SessionClaims {
            sub: subject.to_string(),
            iat: now,
            exp: now + ttl as i64,
            roles: roles.iter().cloned().collect(),
            profile: profile.to_string(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Encoding(e.to_string()))?;
        Ok(IssuedGrant {
            token,
            expires_in_secs: ttl,
        })
    }

    pub fn validate(&self, token: &str) -> Result<SessionClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        match decode::<SessionClaims>(token, &self.decoding, &validation) {
            Ok(data) => Ok(data.claims),
            Err(e) => Err(match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => TokenError::BadSignature,
                _ => TokenError::Malformed,
            }),
        }
    }
}
