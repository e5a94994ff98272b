use serde::{Deserialize, Serialize};

fn default_action() -> String {
    "wave".to_string()
}

/// Inbound commands, one JSON object per WebSocket text frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ClientCommand {
    SmileDetected {
        #[serde(default)]
        smile_score: f64,
        #[serde(default = "default_action")]
        action: String,
    },
    TestAction {
        #[serde(default = "default_action")]
        action: String,
    },
    GetStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotionStatus {
    Moving,
    Busy,
    Error,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub robot_connected: bool,
    pub is_moving: bool,
    pub current_action: Option<String>,
    pub total_smiles: u64,
    pub total_movements: u64,
    pub uptime: f64,
    pub servos_connected: usize,
}

/// Outbound payloads. Untagged: the wire shape is fixed by the browser
/// client, which keys off the fields present rather than a type tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerReply {
    Status {
        message: String,
        status: StatusSnapshot,
    },
    SmileResult {
        message: String,
        status: MotionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        smile_score: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_movements: Option<u64>,
    },
    ActionResult {
        message: String,
        status: MotionStatus,
    },
    Error {
        error: String,
    },
}

impl ServerReply {
    pub fn status(snapshot: StatusSnapshot) -> Self {
        ServerReply::Status {
            message: "Status update".to_string(),
            status: snapshot,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerReply::Error {
            error: message.into(),
        }
    }
}
