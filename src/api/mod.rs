//! HTTP surface: router, middleware stack, and server bootstrap.

use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{header::CONTENT_TYPE, HeaderName, HeaderValue, Method, Request},
    middleware,
    routing::get,
    Extension,
};
use secrecy::ExposeSecret;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, warn, Span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::email::{EmailSender, EmailWorkerConfig, LogEmailSender, MailSettings, MailjetSender};
use crate::api::handlers::auth::{
    password::{hash_password, password_policy_ok},
    storage::ensure_seed_admin,
    utils::normalize_email,
    AuthConfig, AuthState, FixedWindowRateLimiter, RateLimiter,
};
use crate::api::handlers::root;

pub mod csrf;
pub mod email;
pub mod error;
pub mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use openapi::openapi;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn serve(
    port: u16,
    dsn: String,
    config: AuthConfig,
    mail: Option<MailSettings>,
    email_config: EmailWorkerConfig,
) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let limiter: Arc<dyn RateLimiter> =
        Arc::new(FixedWindowRateLimiter::new(config.rate_limit_per_minute()));
    let auth_state = Arc::new(AuthState::new(config, limiter)?);

    seed_admin(&pool, &auth_state).await?;

    // Background worker drains email_outbox (DB-backed queue): delivery never
    // runs inside a request and never fails one.
    let sender: Arc<dyn EmailSender> = match mail {
        Some(settings) => Arc::new(MailjetSender::new(settings)),
        None => Arc::new(LogEmailSender),
    };
    email::spawn_outbox_worker(pool.clone(), sender, email_config);

    spawn_expiry_sweep(pool.clone());

    let cors_origin = frontend_origin(auth_state.config().frontend_origin())?;
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, HeaderName::from_static(csrf::CSRF_HEADER)])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::exact(cors_origin))
        .allow_credentials(true);

    // Build the router from OpenAPI-wired routes, then extend it with non-doc
    // routes like `/` and the Swagger UI. The spec stays in openapi.rs for the
    // `openapi` binary.
    let (router, api_doc) = router().split_for_parts();
    let app = router
        .route("/", get(root::root))
        .merge(SwaggerUi::new("/docs").url("/openapi.json", api_doc))
        .layer(middleware::from_fn_with_state(
            auth_state.clone(),
            csrf::protect,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(auth_state.clone()))
                .layer(Extension(pool.clone())),
        );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

/// Create or repair the seed admin account when one is configured.
async fn seed_admin(pool: &sqlx::PgPool, auth_state: &AuthState) -> Result<()> {
    let Some((email, password)) = auth_state.config().admin_seed() else {
        return Ok(());
    };

    if !password_policy_ok(password.expose_secret()) {
        warn!("Seed admin not created: password fails the password policy");
        return Ok(());
    }

    let email = normalize_email(email);
    let password_hash = hash_password(password.expose_secret())?;
    ensure_seed_admin(pool, &email, &password_hash).await?;
    info!(email = %email, "Seed admin ensured");
    Ok(())
}

/// Periodically drop expired sessions and spent tokens.
fn spawn_expiry_sweep(pool: sqlx::PgPool) -> tokio::task::JoinHandle<()> {
    const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(SWEEP_INTERVAL).await;
            match handlers::auth::storage::purge_expired(&pool).await {
                Ok(purged) if purged > 0 => info!(purged, "expiry sweep"),
                Ok(_) => {}
                Err(err) => warn!("expiry sweep failed: {err}"),
            }
        }
    })
}

/// Normalize the configured frontend URL into an exact CORS origin.
fn frontend_origin(frontend_url: &str) -> Result<HeaderValue> {
    let parsed =
        Url::parse(frontend_url).with_context(|| format!("Invalid frontend URL: {frontend_url}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Frontend URL must include a valid host: {frontend_url}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
