use std::sync::Arc;

use boardsync::store::memory::MemoryStore;
use boardsync::store::postgres::PgStore;
use boardsync::{BoardSession, Stores, SyncConfig, db};
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

fn env_uuid(key: &str) -> Uuid {
    let raw = std::env::var(key).unwrap_or_else(|_| panic!("{key} required"));
    raw.parse().unwrap_or_else(|_| panic!("invalid {key}"))
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let board_id = env_uuid("BOARD_ID");
    let user_id = env_uuid("USER_ID");
    let config = SyncConfig::from_env();

    let stores = match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            let pool = db::init_pool(&database_url)
                .await
                .expect("database init failed");
            Stores::from_shared(Arc::new(PgStore::new(pool)))
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set; using in-memory store");
            let store = MemoryStore::new();
            store.create_board(board_id, user_id);
            Stores::from_shared(Arc::new(store))
        }
    };

    let session = BoardSession::open(board_id, user_id, stores, config)
        .await
        .expect("board open failed");
    let mut notices = session.subscribe();
    tracing::info!(%board_id, %user_id, role = ?session.role(), "sync agent running");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            notice = notices.recv() => match notice {
                Ok(notice) => {
                    tracing::info!(%board_id, ?notice, "sync notice");
                    if let Ok(peers) = session.active_peers().await {
                        tracing::debug!(%board_id, peers = peers.len(), "active peers");
                    }
                }
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "notice stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    let outcome = session.flush().await;
    tracing::info!(?outcome, "final flush");
    session.close().await;
}
