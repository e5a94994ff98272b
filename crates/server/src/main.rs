use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Router,
};
use motion::{MotionEngine, RigConfig, ServoBus, SimBus};
use shared::protocol::ServerReply;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

mod config;
mod hub;
mod router;
mod stats;

use config::load_settings;
use hub::Hub;
use router::Commander;
use stats::StatsTracker;

const HUB_CAPACITY: usize = 256;

#[derive(Clone)]
struct AppState {
    commander: Commander,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let rig = RigConfig {
        poses_dir: settings.poses_dir.clone().into(),
        ..RigConfig::default()
    };

    let engine = MotionEngine::new(Arc::new(SimBus) as Arc<dyn ServoBus>, rig);
    match engine.connect(&settings.robot_port).await {
        Ok(0) | Err(_) => {
            warn!("robot not connected; serving commands without motion");
        }
        Ok(servos) => info!(servos, "robot connected"),
    }

    let commander = Commander::new(
        engine.clone(),
        Arc::new(StatsTracker::new()),
        Hub::new(HUB_CAPACITY),
    );
    let app = build_router(Arc::new(AppState { commander }));

    let addr: SocketAddr = settings.bind_addr.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.disconnect().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

/// One observer. Direct replies and hub broadcasts are merged by a
/// forwarder task that owns the socket sink; the receive loop handles
/// frames one at a time, in arrival order.
async fn ws_connection(state: Arc<AppState>, socket: axum::extract::ws::WebSocket) {
    use axum::extract::ws::Message;
    use futures::{SinkExt, StreamExt};

    let commander = state.commander.clone();
    let (mut sink, mut stream) = socket.split();
    let mut broadcasts = commander.hub.subscribe();
    let (direct_tx, mut direct_rx) = mpsc::channel::<ServerReply>(32);

    info!(observers = commander.hub.observer_count(), "observer connected");

    // unsolicited snapshot so a fresh observer renders immediately
    let _ = direct_tx
        .send(ServerReply::status(commander.status_snapshot()))
        .await;

    let send_task = tokio::spawn(async move {
        loop {
            let reply = tokio::select! {
                direct = direct_rx.recv() => match direct {
                    Some(reply) => reply,
                    None => break,
                },
                fanned = broadcasts.recv() => match fanned {
                    Ok(reply) => reply,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "observer lagged behind broadcasts");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };
            let text = match serde_json::to_string(&reply) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        if let Some(reply) = commander.process_message(&text).await {
            if direct_tx.send(reply).await.is_err() {
                break;
            }
        }
    }

    info!("observer disconnected");
    send_task.abort();
}
