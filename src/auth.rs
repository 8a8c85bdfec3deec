use anyhow::Result;
use axum::{
    RequestPartsExt,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::web::AppState;

/// Audience Supabase puts on tokens for signed-in users
pub const DEFAULT_AUDIENCE: &str = "authenticated";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user ID
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    pub aud: String,
    pub exp: i64, // expiration timestamp
    pub iat: i64, // issued at timestamp
}

impl Claims {
    pub fn new(user_id: Uuid, email: Option<String>, audience: &str) -> Self {
        let now = Utc::now();
        let exp = now + Duration::hours(1);

        Self {
            sub: user_id.to_string(),
            email,
            role: Some(audience.to_string()),
            aud: audience.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        }
    }

    pub fn user_id(&self) -> Result<Uuid> {
        self.sub
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid user ID: {}", e))
    }
}

/// Verifies the HS256 access tokens issued by the auth provider
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    audience: String,
}

impl JwtService {
    pub fn new(secret: &str, audience: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_ref()),
            decoding_key: DecodingKey::from_secret(secret.as_ref()),
            audience: audience.to_string(),
        }
    }

    /// Build from `SUPABASE_JWT_SECRET` and optional `SUPABASE_JWT_AUDIENCE`
    pub fn from_env() -> Result<Self> {
        let secret = get_jwt_secret()?;
        let audience = std::env::var("SUPABASE_JWT_AUDIENCE")
            .unwrap_or_else(|_| DEFAULT_AUDIENCE.to_string());
        Ok(Self::new(&secret, &audience))
    }

    /// Mint a token. Only used by tooling and tests; production tokens come from the auth provider.
    pub fn generate_token(&self, user_id: Uuid, email: Option<String>) -> Result<String> {
        let claims = Claims::new(user_id, email, &self.audience);
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to generate token: {}", e))
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(&[self.audience.as_str()]);
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| anyhow::anyhow!("Failed to verify token: {}", e))
    }
}

/// The signed-in user as described by the token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub id: Uuid,
    pub email: Option<String>,
}

#[derive(Debug)]
pub struct AuthUser(pub SessionUser);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| AuthError::MissingToken)?;

        let jwt = state.jwt.as_ref().ok_or(AuthError::MissingJwtSecret)?;
        let claims = jwt
            .verify_token(bearer.token())
            .map_err(|_| AuthError::InvalidToken)?;
        let id = claims.user_id().map_err(|_| AuthError::InvalidToken)?;

        Ok(AuthUser(SessionUser {
            id,
            email: claims.email,
        }))
    }
}

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
    MissingJwtSecret,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "Missing authorization token"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid token"),
            AuthError::MissingJwtSecret => {
                (StatusCode::INTERNAL_SERVER_ERROR, "JWT configuration error")
            }
        };
        (status, error_message).into_response()
    }
}

pub fn get_jwt_secret() -> Result<String> {
    std::env::var("SUPABASE_JWT_SECRET")
        .map_err(|_| anyhow::anyhow!("SUPABASE_JWT_SECRET environment variable not set"))
}
