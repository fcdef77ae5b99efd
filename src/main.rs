use std::time::Duration;

use actix_cors::Cors;
use actix_web::{App, HttpResponse, HttpServer, Responder, get, middleware::Logger, web};
use anyhow::Result;

use hrm::database::{init_database, repositories::seed_permissions};
use hrm::middleware::RequestId;
use hrm::routes;
use hrm::services::{InvitationSettings, LogMailer};
use hrm::{AuthService, Config, InvitationService, MailQueue, PgStore};

#[get("/")]
async fn hello() -> impl Responder {
    HttpResponse::Ok().body("HRM API v1.0")
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now()
    }))
}

#[actix_web::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logger
    env_logger::init();

    log::info!("Starting HRM API server...");

    let config = Config::from_env()?;
    log::info!("Configuration loaded (environment: {})", config.environment);

    let pool = init_database(&config.database_url, config.database_max_connections).await?;
    let seeded = seed_permissions(&pool).await?;
    log::info!("Database initialized ({} new permissions)", seeded);

    let store = PgStore::new(pool);
    let (mail_queue, _mail_worker) = MailQueue::start(
        LogMailer,
        config.mail_from.clone(),
        config.mail_queue_capacity,
    );

    let invitation_service = web::Data::new(InvitationService::new(
        store.clone(),
        mail_queue,
        InvitationSettings::from_config(&config),
    ));

    if config.invitation_sweep_secs > 0 {
        let sweeper = invitation_service.clone();
        let period = Duration::from_secs(config.invitation_sweep_secs);
        actix_web::rt::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if let Err(error) = sweeper.expire_stale().await {
                    log::error!("Invitation expiry sweep failed: {}", error);
                }
            }
        });
    }

    let store_data = web::Data::new(store);
    let auth_service_data = web::Data::new(AuthService::new(config.clone()));
    let config_data = web::Data::new(config.clone());

    let server_address = config.server_address();
    log::info!("Server starting on http://{}", server_address);

    HttpServer::new(move || {
        App::new()
            .app_data(config_data.clone())
            .app_data(store_data.clone())
            .app_data(auth_service_data.clone())
            .app_data(invitation_service.clone())
            .wrap(
                Cors::default()
                    .allowed_origin(&config.cors_origin)
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        "Authorization",
                        "Content-Type",
                        "Accept",
                        "X-Requested-With",
                        "X-Correlation-ID",
                    ])
                    .max_age(3600),
            )
            .wrap(RequestId)
            .wrap(Logger::new(
                r#"%a "%r" %s %b "%{Referer}i" "%{User-Agent}i" %T correlation_id=%{x-correlation-id}o"#,
            ))
            .service(hello)
            .service(health)
            .configure(routes::configure::<PgStore, MailQueue>)
    })
    .bind(&server_address)?
    .run()
    .await
    .map_err(|e| anyhow::anyhow!("Server error: {}", e))
}
