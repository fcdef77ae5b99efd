use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use thiserror::Error;

use crate::handlers::shared::ApiResponse;

/// Expected, caller-correctable outcomes of the invitation lifecycle.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationError {
    #[error("User with this email is already a member of the organization")]
    AlreadyMember,

    #[error("A pending invitation already exists for this email")]
    DuplicatePending,

    #[error("This email has previously declined an invitation to the organization")]
    PreviouslyDeclined,

    #[error("This email has already accepted an invitation to the organization")]
    PreviouslyAccepted,

    #[error("Invalid, expired, or already accepted invitation")]
    NotFoundOrExpiredOrConsumed,

    #[error("This invitation was not sent to your email")]
    WrongRecipient,

    #[error("You already belong to this organization")]
    AlreadyBelongsToOrganization,

    #[error("Invalid invitation or already accepted")]
    InvalidResendTarget,
}

impl InvitationError {
    /// Stable machine-readable code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            InvitationError::AlreadyMember => "already_member",
            InvitationError::DuplicatePending => "duplicate_pending",
            InvitationError::PreviouslyDeclined => "previously_declined",
            InvitationError::PreviouslyAccepted => "previously_accepted",
            InvitationError::NotFoundOrExpiredOrConsumed => "invitation_not_found_or_expired",
            InvitationError::WrongRecipient => "wrong_recipient",
            InvitationError::AlreadyBelongsToOrganization => "already_belongs_to_organization",
            InvitationError::InvalidResendTarget => "invalid_resend_target",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            InvitationError::AlreadyMember
            | InvitationError::DuplicatePending
            | InvitationError::PreviouslyDeclined
            | InvitationError::PreviouslyAccepted
            | InvitationError::AlreadyBelongsToOrganization => StatusCode::CONFLICT,
            InvitationError::NotFoundOrExpiredOrConsumed
            | InvitationError::InvalidResendTarget => StatusCode::BAD_REQUEST,
            InvitationError::WrongRecipient => StatusCode::FORBIDDEN,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Invitation(#[from] InvitationError),

    #[error("Database error: {0}")]
    DatabaseError(sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized access")]
    Unauthorized,

    #[error("Internal server error{}", .0.as_ref().map_or("".to_string(), |s| format!(": {}", s)))]
    InternalServerError(Option<String>),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Invitation(error) => error.code(),
            AppError::DatabaseError(_) => "database_error",
            AppError::NotFound(_) => "not_found",
            AppError::Forbidden(_) => "forbidden",
            AppError::BadRequest(_) => "bad_request",
            AppError::Unauthorized => "unauthorized",
            AppError::InternalServerError(_) => "internal_error",
        }
    }

    pub fn internal_server_error_message(message: impl Into<String>) -> Self {
        AppError::InternalServerError(Some(message.into()))
    }

    pub fn internal_server_error() -> Self {
        AppError::InternalServerError(None)
    }

    /// Message shown to clients; server-side failures are not echoed back.
    fn client_message(&self) -> String {
        match self {
            AppError::DatabaseError(_) | AppError::InternalServerError(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Invitation(error) => error.status_code(),
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();

        if status_code.is_server_error() {
            log::error!("Request failed with status {}: {}", status_code, self);
        } else {
            log::warn!("Request failed with status {}: {}", status_code, self);
        }

        let response_body = ApiResponse::<()>::error_with_code(self.code(), &self.client_message());

        HttpResponse::build(status_code).json(response_body)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(error: sqlx::Error) -> Self {
        log::error!("Database error: {}", error);
        AppError::DatabaseError(error)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        log::error!("Anyhow error: {}", error);

        if error.is::<sqlx::Error>() {
            match error.downcast::<sqlx::Error>() {
                Ok(sqlx_err) => return AppError::DatabaseError(sqlx_err),
                Err(original_error) => {
                    return AppError::InternalServerError(Some(original_error.to_string()));
                }
            }
        }

        AppError::InternalServerError(Some(error.to_string()))
    }
}

impl From<crate::database::StoreError> for AppError {
    fn from(error: crate::database::StoreError) -> Self {
        use crate::database::StoreError;

        match error {
            StoreError::DuplicatePending => InvitationError::DuplicatePending.into(),
            StoreError::InvitationClosed => InvitationError::NotFoundOrExpiredOrConsumed.into(),
            StoreError::AlreadyMember => InvitationError::AlreadyBelongsToOrganization.into(),
            StoreError::DuplicateToken => {
                AppError::internal_server_error_message("Could not issue a unique token")
            }
            StoreError::Other(error) => error.into(),
        }
    }
}
