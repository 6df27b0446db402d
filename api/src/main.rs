use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod confirmation;
mod context;
mod delivery;
mod error;
mod jobs;
mod message;
mod providers;
mod resolver;
mod routes;
mod state;
#[cfg(test)]
mod testutil;

use confirmation::repo::{ConfirmationRepo, PgConfirmationRepo};
use confirmation::{ConfirmationStore, StoreTuning};
use context::ListContextCache;
use delivery::DeliveryService;
use message::MessageService;
use providers::http::{
    HttpCategoryProvider, HttpEmbeddingProvider, HttpLedgerClient, OpenAiExtractionProvider,
    TracingNotificationSink, WebhookNotificationSink,
};
use providers::{EmbeddingProvider, NotificationSink};
use resolver::{Orchestrator, ResolverTuning};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Centavo API",
        version = "0.1.0",
        description = "Resolves free-form transaction messages to the user's categories and \
                       delivers confirmed records to the external ledger."
    ),
    paths(
        routes::health::health_check,
        routes::messages::handle_message,
        routes::ops::list_pending,
        routes::ops::list_failed,
        routes::ops::resend_delivery,
    ),
    components(schemas(
        HealthResponse,
        centavo_core::error::ApiError,
        centavo_core::model::TransactionKind,
        centavo_core::model::ConfirmationStatus,
        centavo_core::model::MessageRequest,
        centavo_core::model::MessageReply,
        centavo_core::model::MessageOutcome,
        centavo_core::model::ConfirmationView,
        centavo_core::model::ResendResponse,
    )),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(
                utoipa::openapi::security::Http::new(
                    utoipa::openapi::security::HttpAuthScheme::Bearer,
                ),
            ),
        );
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "centavo_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = config::Config::from_env();

    // Database connection
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&database_url)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    sqlx::migrate!("../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    // Collaborators
    let repo: Arc<dyn ConfirmationRepo> = Arc::new(PgConfirmationRepo::new(pool.clone()));
    let notifier: Arc<dyn NotificationSink> = match &config.notify_webhook_url {
        Some(url) => Arc::new(WebhookNotificationSink::new(url.clone())),
        None => {
            tracing::warn!("CENTAVO_NOTIFY_WEBHOOK_URL not set, notifications go to the log");
            Arc::new(TracingNotificationSink)
        }
    };
    let ledger = Arc::new(HttpLedgerClient::new(
        config.ledger_api_url.clone(),
        config.ledger_api_token.clone(),
    ));
    let categories = Arc::new(HttpCategoryProvider::new(
        config.category_api_url.clone(),
        config.category_api_token.clone(),
    ));
    let ai = Arc::new(OpenAiExtractionProvider::new(
        config.ai_api_url.clone(),
        config.ai_api_key.clone(),
        config.ai_model.clone(),
        config.ai_timeout,
    ));
    let embedder: Option<Arc<dyn EmbeddingProvider>> = config.embedding_api_url.as_ref().map(
        |url| -> Arc<dyn EmbeddingProvider> {
            Arc::new(HttpEmbeddingProvider::new(
                url.clone(),
                config.ai_api_key.clone(),
                config.embedding_model.clone(),
            ))
        },
    );

    // Engine
    let delivery = Arc::new(DeliveryService::new(
        repo.clone(),
        ledger,
        notifier.clone(),
        config.delivery_max_attempts,
    ));
    let store = Arc::new(ConfirmationStore::new(
        repo.clone(),
        delivery.clone(),
        StoreTuning {
            confirmation_timeout: config.confirmation_timeout,
            auto_register_threshold: config.auto_register_threshold,
        },
    ));
    let orchestrator = Orchestrator::new(
        ai,
        embedder.clone(),
        ResolverTuning::from_config(&config),
    );
    let service = Arc::new(MessageService::new(
        categories,
        embedder,
        orchestrator,
        store.clone(),
        ListContextCache::new(config.list_context_ttl),
        notifier.clone(),
        config.timezone,
        config.corpus_cache_ttl,
        config.vector_scoring,
    ));

    if config.ops_token.is_none() {
        tracing::warn!("CENTAVO_OPS_TOKEN not set, operational endpoints are unauthenticated");
    }

    jobs::spawn_all(&config, repo, delivery.clone(), notifier);

    let app_state = state::AppState {
        db: pool,
        service,
        store,
        delivery,
        ops_token: config.ops_token.clone(),
        delivery_max_attempts: config.delivery_max_attempts,
    };

    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::messages::router())
        .merge(routes::ops::router())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Centavo API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(listener, app)
        .await
        .expect("Server terminated unexpectedly");
}
