use actix_web::web;

use crate::database::repositories::IdentityProvider;
use crate::handlers::auth;

pub fn configure<S: IdentityProvider + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/auth")
            .route("/login", web::post().to(auth::login::<S>))
            .route("/me", web::get().to(auth::me::<S>)),
    );
}
