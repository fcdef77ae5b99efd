use actix_web::{HttpResponse, Result, web};
use chrono::Utc;
use uuid::Uuid;

use crate::database::models::{
    CreateInvitationInput, InvitationStatus, InvitationView, ListInvitationsQuery,
    RespondInvitationInput, RespondInvitationResponse, RespondOutcome, codes,
};
use crate::database::repositories::{HrStore, IdentityProvider};
use crate::error::AppError;
use crate::handlers::shared::ApiResponse;
use crate::services::{
    auth::{AuthService, Claims, OptionalClaims, current_user},
    invitations::InvitationService,
    notifier::Notifier,
    permissions::require_permission,
};

pub async fn create_invitation<S: HrStore + 'static, N: Notifier + 'static>(
    claims: Claims,
    service: web::Data<InvitationService<S, N>>,
    input: web::Json<CreateInvitationInput>,
) -> Result<HttpResponse> {
    let inviter = current_user(service.store(), &claims).await?;
    require_permission(service.store(), inviter.id, &[codes::ADD_INVITATION]).await?;

    let invitation = service.issue(&inviter, input.into_inner()).await?;

    Ok(ApiResponse::created(InvitationView::new(invitation, Utc::now())))
}

pub async fn list_invitations<S: HrStore + 'static, N: Notifier + 'static>(
    claims: Claims,
    service: web::Data<InvitationService<S, N>>,
    query: web::Query<ListInvitationsQuery>,
) -> Result<HttpResponse> {
    let inviter = current_user(service.store(), &claims).await?;
    require_permission(service.store(), inviter.id, &[codes::VIEW_INVITATION]).await?;

    let invitations = service.list(inviter.id, query.into_inner()).await?;

    Ok(ApiResponse::success(invitations))
}

pub async fn resend_invitation<S: HrStore + 'static, N: Notifier + 'static>(
    claims: Claims,
    service: web::Data<InvitationService<S, N>>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let requester = current_user(service.store(), &claims).await?;
    require_permission(service.store(), requester.id, &[codes::ADD_INVITATION]).await?;

    let invitation = service.resend(&requester, path.into_inner()).await?;

    Ok(ApiResponse::success_with_message(
        InvitationView::new(invitation, Utc::now()),
        "Invitation resent successfully",
    ))
}

pub async fn preview_invitation<S: HrStore + 'static, N: Notifier + 'static>(
    service: web::Data<InvitationService<S, N>>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let preview = service.preview(&path.into_inner()).await?;

    Ok(ApiResponse::success(preview))
}

/// Works with or without a session, but a presented session must be valid.
/// A session token is only handed out for an account created by this
/// acceptance.
pub async fn respond_to_invitation<S: HrStore + 'static, N: Notifier + 'static>(
    OptionalClaims(claims): OptionalClaims,
    service: web::Data<InvitationService<S, N>>,
    auth_service: web::Data<AuthService>,
    input: web::Json<RespondInvitationInput>,
) -> Result<HttpResponse> {
    let current = match &claims {
        Some(claims) => Some(current_user(service.store(), claims).await?),
        None => None,
    };

    let outcome = service.respond(input.into_inner(), current.as_ref()).await?;

    let response = match outcome {
        RespondOutcome::Declined { .. } => RespondInvitationResponse {
            status: InvitationStatus::Declined,
            accepted: None,
            token: None,
        },
        RespondOutcome::Accepted(accepted) => {
            let token = if accepted.user_created {
                let user = service
                    .store()
                    .find_user_by_id(accepted.user_id)
                    .await
                    .map_err(AppError::from)?
                    .ok_or_else(AppError::internal_server_error)?;
                Some(auth_service.generate_token(&user).map_err(AppError::from)?)
            } else {
                None
            };

            RespondInvitationResponse {
                status: InvitationStatus::Accepted,
                accepted: Some(accepted),
                token,
            }
        }
    };

    Ok(ApiResponse::success(response))
}
