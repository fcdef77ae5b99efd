use actix_web::{HttpResponse, Result, web};

use crate::database::models::{LoginInput, UserInfo};
use crate::database::repositories::IdentityProvider;
use crate::handlers::shared::ApiResponse;
use crate::services::auth::{AuthService, Claims, current_user};

pub async fn login<S: IdentityProvider + 'static>(
    store: web::Data<S>,
    auth_service: web::Data<AuthService>,
    request: web::Json<LoginInput>,
) -> Result<HttpResponse> {
    let response = auth_service
        .login(store.get_ref(), request.into_inner())
        .await?;

    Ok(ApiResponse::success(response))
}

pub async fn me<S: IdentityProvider + 'static>(
    claims: Claims,
    store: web::Data<S>,
) -> Result<HttpResponse> {
    let user = current_user(store.get_ref(), &claims).await?;

    Ok(ApiResponse::success(UserInfo::from(user)))
}
