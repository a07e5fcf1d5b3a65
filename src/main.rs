use adventure_media::{
    aws_clients::{create_s3_client, create_sdk_config},
    batch::BatchOrchestrator,
    config::Config,
    db,
    domain::{AssociationRepository, FileStorage},
    errors::AppError,
    repositories::PgAssociationRepository,
    routes::create_router,
    startup::init_resources,
    storage::{ObjectLocator, S3FileStorage},
    upload::MediaUploader,
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // --- Configuration (also loads .env) ---
    let config = Config::load()?;

    // Initialize tracing (logging)
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "adventure_media=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(bind_address = %config.bind_address, bucket = %config.media_bucket_name, "Configuration loaded");

    // --- Client Initialization ---
    let sdk_config = create_sdk_config(&config).await;
    let s3_client = create_s3_client(&sdk_config);

    tracing::info!("Connecting to Postgres...");
    let pool = db::connect_with_retry(&config.database_url)
        .await
        .map_err(|e| AppError::InitError(format!("{:#}", e)))?;

    init_resources(&pool, &s3_client, &config.media_bucket_name, &config.aws_region).await?;

    // --- Pipeline Wiring ---
    let locator = ObjectLocator::new(
        &config.media_bucket_name,
        &config.aws_region,
        config.object_store_endpoint.as_deref(),
    )
    .map_err(|e| AppError::ConfigError(format!("{:#}", e)))?;
    let storage: Arc<dyn FileStorage> = Arc::new(S3FileStorage::new(
        s3_client,
        config.media_bucket_name.clone(),
        locator,
    ));
    let repo: Arc<dyn AssociationRepository> = Arc::new(PgAssociationRepository::new(pool));

    let orchestrator = BatchOrchestrator::new(MediaUploader::new(storage), repo.clone())
        .with_strategy(config.batch_strategy)
        .with_orphan_policy(config.orphan_policy);

    let state = Arc::new(AppState { orchestrator, repo });
    let app = create_router(state, config.max_upload_bytes);

    // --- Server Startup ---
    tracing::info!("Server listening on http://{}", config.bind_address);
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
