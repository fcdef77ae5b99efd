use actix_web::{
    Error as ActixError, FromRequest, HttpRequest, dev::Payload, error::ErrorUnauthorized,
    http::header::AUTHORIZATION, web::Data,
};
use anyhow::{Result, anyhow};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::future::{Ready, ready};
use uuid::Uuid;

use crate::config::Config;
use crate::database::models::{AuthResponse, LoginInput, User};
use crate::database::repositories::IdentityProvider;
use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid, // user id
    pub email: String,
    pub exp: usize, // expiration time
}

impl Claims {
    pub fn user_id(&self) -> Uuid {
        self.sub
    }
}

impl FromRequest for Claims {
    type Error = ActixError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(claims_from(req))
    }
}

fn claims_from(req: &HttpRequest) -> Result<Claims, ActixError> {
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| ErrorUnauthorized("Missing or invalid authorization header"))?;

    let Some(config) = req.app_data::<Data<Config>>() else {
        log::error!("Config missing from app data, cannot verify tokens");
        return Err(ErrorUnauthorized("Invalid token"));
    };

    AuthService::new(config.get_ref().clone())
        .verify_token(token)
        .map_err(|_| ErrorUnauthorized("Invalid token"))
}

/// Claims for endpoints that also serve anonymous callers. No
/// `Authorization` header means anonymous; a header that does not verify is
/// rejected rather than treated as anonymous.
#[derive(Debug, Clone)]
pub struct OptionalClaims(pub Option<Claims>);

impl FromRequest for OptionalClaims {
    type Error = ActixError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        if !req.headers().contains_key(AUTHORIZATION) {
            return ready(Ok(OptionalClaims(None)));
        }

        ready(claims_from(req).map(|claims| OptionalClaims(Some(claims))))
    }
}

/// Load the account behind a verified token.
pub async fn current_user<S: IdentityProvider>(
    store: &S,
    claims: &Claims,
) -> Result<User, AppError> {
    store
        .find_user_by_id(claims.user_id())
        .await?
        .ok_or(AppError::Unauthorized)
}

#[derive(Debug, Clone)]
pub struct AuthService {
    config: Config,
}

impl AuthService {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn login<S: IdentityProvider>(
        &self,
        store: &S,
        request: LoginInput,
    ) -> Result<AuthResponse, AppError> {
        let user = store
            .verify_password(&request.email, &request.password)
            .await?
            .ok_or(AppError::Unauthorized)?;

        self.session_for(user)
    }

    /// Issue a token for an identity that was resolved some other way.
    pub fn session_for(&self, user: User) -> Result<AuthResponse, AppError> {
        let token = self.generate_token(&user)?;

        Ok(AuthResponse {
            token,
            user: user.into(),
        })
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_ref()),
            &Validation::new(Algorithm::HS256),
        )?;

        Ok(token_data.claims)
    }

    pub fn generate_token(&self, user: &User) -> Result<String> {
        let expiration = Utc::now()
            .checked_add_signed(Duration::days(self.config.jwt_expiration_days))
            .ok_or_else(|| anyhow!("Token expiration out of range"))?
            .timestamp() as usize;

        let claims = Claims {
            sub: user.id,
            email: user.email.clone(),
            exp: expiration,
        };

        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_ref()),
        )?;

        Ok(token)
    }
}
