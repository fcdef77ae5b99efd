use actix_web::web;

use crate::database::repositories::HrStore;
use crate::services::notifier::Notifier;

pub mod auth;
pub mod invitations;

/// Mount the API. Expects `Data<S>`, `Data<InvitationService<S, N>>`,
/// `Data<AuthService>` and `Data<Config>` to be registered on the app.
pub fn configure<S: HrStore + 'static, N: Notifier + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .configure(auth::configure::<S>)
            .configure(invitations::configure::<S, N>),
    );
}
