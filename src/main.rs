mod accounts;
mod auth;
mod config;
mod db;
mod error;
mod formatting;
mod integrations;
mod listing;
mod middleware;
mod models;
mod revalidate;
mod routes;
mod validation;

use std::sync::Arc;

use crate::{
    auth::SessionVerifier,
    config::Config,
    integrations::{
        identity::HttpIdentityProvider, media::HttpMediaHost, postal::HttpPostalLookup,
    },
    models::AppState,
    revalidate::ListingRevisions,
};

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::http::header;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let pool = db::connect_pg(&cfg.database_url, cfg.db_max_connections).await?;
    if cfg.run_migrations {
        db::migrate(&pool).await?;
    }

    // One client, so the collaborators share a connection pool.
    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(15))
        .build()?;

    let state = AppState {
        db: pool,
        sessions: Arc::new(SessionVerifier::from_rsa_pem(&cfg.session_jwt_key)?),
        identity: Arc::new(HttpIdentityProvider::new(
            http.clone(),
            &cfg.identity_api_url,
            &cfg.identity_secret_key,
        )),
        media: Arc::new(HttpMediaHost::new(
            http.clone(),
            &cfg.media_upload_url,
            &cfg.media_upload_preset,
        )),
        postal: Arc::new(HttpPostalLookup::new(http, &cfg.postal_lookup_url)),
        webhook_secret: Arc::from(cfg.webhook_signing_secret.as_str()),
        revisions: Arc::new(ListingRevisions::new()),
    };

    // The admin front end is served from another origin and sends the
    // session token as a bearer header, so no cookies cross origins.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ])
        .expose_headers([revalidate::REVISION_HEADER]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on http://{}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
