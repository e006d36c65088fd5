use std::sync::Arc;

use csv_insight::config::Config;
use csv_insight::db::Database;
use csv_insight::state::AppState;
use csv_insight::storage::LocalFsStorage;
use csv_insight::build_router;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .parse_lossy("csv_insight=info,sqlx=warn,tower_http=info"),
        )
        .init();

    let config = Config::load();
    tracing::info!(
        upload_folder = %config.upload_folder.display(),
        max_file_size = config.max_file_size,
        "loaded configuration"
    );

    let db = Database::new(&config.database_url)
        .await
        .expect("failed to initialize the metadata store");

    let storage = LocalFsStorage::new(&config.upload_folder)
        .await
        .expect("failed to initialize the storage adapter");

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState {
        db,
        storage: Arc::new(storage),
        config: Arc::new(config),
    });

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {bind_addr}: {e}"));
    tracing::info!(addr = %bind_addr, "csv-insight listening");

    axum::serve(listener, app).await.expect("server error");
}
