use std::str::FromStr;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::{AppState, error::AppError};

/// Caller classification selecting which quota limits apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustTier {
    #[default]
    Standard,
    Elevated,
}

impl FromStr for TrustTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(TrustTier::Standard),
            "elevated" => Ok(TrustTier::Elevated),
            other => Err(format!("unknown trust tier: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(default)]
    pub tier: TrustTier,
}

/// Authenticated caller, attached to the request by [`auth_middleware`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub subject_id: String,
    pub tier: TrustTier,
}

impl From<Claims> for CallerIdentity {
    fn from(claims: Claims) -> Self {
        Self {
            subject_id: claims.sub,
            tier: claims.tier,
        }
    }
}

pub fn generate_token(
    subject_id: &str,
    tier: TrustTier,
    ttl: Duration,
    secret: &str,
) -> Result<(String, i64), jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let expiration = (now + ttl).timestamp();

    let claims = Claims {
        sub: subject_id.to_string(),
        exp: expiration,
        iat: now.timestamp(),
        tier,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok((token, expiration))
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let bearer = req
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .ok_or(AppError::Unauthorized)?;

    let claims = verify_token(bearer.token(), &state.config.jwt_secret).map_err(|e| {
        tracing::debug!(error = %e, "rejected bearer token");
        AppError::Unauthorized
    })?;

    req.extensions_mut().insert(CallerIdentity::from(claims));
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_identity_and_tier() {
        let (token, _) =
            generate_token("u1", TrustTier::Elevated, Duration::hours(1), "secret").unwrap();
        let identity = CallerIdentity::from(verify_token(&token, "secret").unwrap());
        assert_eq!(identity.subject_id, "u1");
        assert_eq!(identity.tier, TrustTier::Elevated);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let (token, _) =
            generate_token("u1", TrustTier::Standard, Duration::hours(1), "secret").unwrap();
        assert!(verify_token(&token, "other").is_err());
    }

    #[test]
    fn missing_tier_claim_defaults_to_standard() {
        let claims: Claims =
            serde_json::from_str(r#"{"sub":"u1","exp":4102444800,"iat":0}"#).unwrap();
        assert_eq!(claims.tier, TrustTier::Standard);
    }
}
