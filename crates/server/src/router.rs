use std::sync::Arc;

use motion::MotionEngine;
use shared::domain::Action;
use shared::protocol::{ClientCommand, MotionStatus, ServerReply, StatusSnapshot};
use tracing::{debug, info};

use crate::hub::Hub;
use crate::stats::StatsTracker;

/// Decodes inbound frames, routes them to the engine and stats, and
/// decides per command whether the result goes to the sender only or to
/// every observer through the hub.
#[derive(Clone)]
pub struct Commander {
    pub engine: MotionEngine,
    pub stats: Arc<StatsTracker>,
    pub hub: Hub,
}

impl Commander {
    pub fn new(engine: MotionEngine, stats: Arc<StatsTracker>, hub: Hub) -> Self {
        Self { engine, stats, hub }
    }

    /// Handles one inbound text frame. The returned reply, if any, goes
    /// back to the sender only; smile results are broadcast through the
    /// hub instead. Never panics on bad input.
    pub async fn process_message(&self, raw: &str) -> Option<ServerReply> {
        match serde_json::from_str::<ClientCommand>(raw) {
            Ok(command) => self.dispatch(command).await,
            Err(_) => Some(protocol_error(raw)),
        }
    }

    async fn dispatch(&self, command: ClientCommand) -> Option<ServerReply> {
        match command {
            ClientCommand::SmileDetected {
                smile_score,
                action,
            } => {
                self.handle_smile(smile_score, &action).await;
                None
            }
            ClientCommand::TestAction { action } => Some(self.handle_test_action(&action).await),
            ClientCommand::GetStatus => Some(ServerReply::status(self.status_snapshot())),
        }
    }

    async fn handle_smile(&self, smile_score: f64, action: &str) {
        self.stats.record_smile();
        info!(smile_score, action, "smile detected");

        let reply = if self.engine.is_busy() {
            ServerReply::SmileResult {
                message: "Robot is already moving".to_string(),
                status: MotionStatus::Busy,
                smile_score: None,
                total_movements: None,
            }
        } else {
            match self.engine.trigger(&Action::parse(action)) {
                Ok(()) => {
                    let total_movements = self.stats.record_movement();
                    ServerReply::SmileResult {
                        message: format!("Robot performing: {action}"),
                        status: MotionStatus::Moving,
                        smile_score: Some(smile_score),
                        total_movements: Some(total_movements),
                    }
                }
                Err(error) => {
                    debug!(%error, action, "smile trigger failed");
                    ServerReply::SmileResult {
                        message: "Robot is busy or action failed".to_string(),
                        status: MotionStatus::Busy,
                        smile_score: None,
                        total_movements: None,
                    }
                }
            }
        };

        // Every observer sees smile results, not just the sender.
        self.hub.broadcast(reply);
    }

    async fn handle_test_action(&self, action: &str) -> ServerReply {
        info!(action, "test action requested");

        if action == "stop" {
            self.engine.emergency_stop().await;
            return ServerReply::ActionResult {
                message: "Emergency stop activated".to_string(),
                status: MotionStatus::Stopped,
            };
        }

        match self.engine.trigger(&Action::parse(action)) {
            Ok(()) => ServerReply::ActionResult {
                message: format!("Testing: {action}"),
                status: MotionStatus::Moving,
            },
            Err(error) => {
                debug!(%error, action, "test trigger failed");
                ServerReply::ActionResult {
                    message: format!("Failed to perform: {action}"),
                    status: MotionStatus::Error,
                }
            }
        }
    }

    pub fn status_snapshot(&self) -> StatusSnapshot {
        let engine = self.engine.snapshot();
        let stats = self.stats.snapshot();
        StatusSnapshot {
            robot_connected: engine.connected,
            is_moving: engine.busy,
            current_action: engine.current_action,
            total_smiles: stats.total_smiles,
            total_movements: stats.total_movements,
            uptime: stats.uptime_seconds,
            servos_connected: engine.servos_connected,
        }
    }
}

/// Sender-only error for frames that did not decode. Names the command
/// when the frame was at least valid JSON.
fn protocol_error(raw: &str) -> ServerReply {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => {
            let name = value
                .get("command")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("<none>");
            ServerReply::error(format!("Unknown command: {name}"))
        }
        Err(_) => ServerReply::error("Invalid JSON"),
    }
}
