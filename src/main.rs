use std::sync::Arc;

use eventease::config::ServerConfig;
use eventease::services::message::{MemoryMessageStore, MessageStore, PgMessageStore};
use eventease::{db, routes, state};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = ServerConfig::from_env().expect("invalid configuration");

    let store: Arc<dyn MessageStore> = match &config.database_url {
        Some(url) => {
            let pool = db::init_pool(url, config.db_max_connections)
                .await
                .expect("database init failed");
            Arc::new(PgMessageStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; messages are kept in memory");
            Arc::new(MemoryMessageStore::new())
        }
    };
    let state = state::AppState::new(store).with_client_queue(config.client_queue);

    let app = routes::app(state);
    let port = config.port;
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "eventease listening");
    axum::serve(listener, app).await.expect("server failed");
}
