use actix_web::web;

use crate::database::repositories::HrStore;
use crate::handlers::invitations;
use crate::services::notifier::Notifier;

pub fn configure<S: HrStore + 'static, N: Notifier + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/invitations")
            .route("", web::post().to(invitations::create_invitation::<S, N>))
            .route("", web::get().to(invitations::list_invitations::<S, N>))
            .route(
                "/respond",
                web::post().to(invitations::respond_to_invitation::<S, N>),
            )
            .route(
                "/token/{token}",
                web::get().to(invitations::preview_invitation::<S, N>),
            )
            .route(
                "/{id}/resend",
                web::post().to(invitations::resend_invitation::<S, N>),
            ),
    );
}
