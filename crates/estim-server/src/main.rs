use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use estim_store::{MemoryKv, RoomStore};
use tokio::net::TcpListener;

use estim_server::http::{self, AppState};

#[derive(Parser)]
#[command(
    name = "estim-server",
    about = "Room state synchronization server for collaborative estimation"
)]
struct Args {
    /// Port to listen on.
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Seconds a participant survives without a heartbeat.
    #[arg(long, default_value_t = 60)]
    participant_ttl: u64,

    /// Minimum seconds between presence-refresh writes per connection.
    #[arg(long, default_value_t = 55)]
    keepalive_window: u64,

    /// Where plain (non-upgrade) GET requests are redirected.
    #[arg(long, default_value = "https://qcp.github.io/estim-poker")]
    frontend_url: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "estim_server=info".into()),
        )
        .init();

    let args = Args::parse();

    let store = RoomStore::new(Arc::new(MemoryKv::new()))
        .with_participant_ttl(Duration::from_secs(args.participant_ttl));
    let state = AppState {
        store,
        keepalive_window: Duration::from_secs(args.keepalive_window),
        frontend_url: args.frontend_url,
    };

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = TcpListener::bind(&addr)
        .await
        .expect("Failed to bind TCP listener");

    tracing::info!("estim-server listening on {}", addr);

    axum::serve(listener, http::router(state))
        .await
        .expect("Server error");
}
