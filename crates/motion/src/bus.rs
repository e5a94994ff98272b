use async_trait::async_trait;
use parking_lot::Mutex;
use shared::domain::ServoId;
use tracing::debug;

use crate::error::BusError;

/// Seam to the physical servo bus. Hardware drivers (serial LX-16A and
/// friends) live outside this crate and implement this trait; every call
/// may fail independently per servo.
#[async_trait]
pub trait ServoBus: Send + Sync {
    async fn init(&self, port: &str) -> Result<(), BusError>;
    async fn move_servo(&self, id: ServoId, angle: f64) -> Result<(), BusError>;
    async fn enable_torque(&self, id: ServoId) -> Result<(), BusError>;
    async fn disable_torque(&self, id: ServoId) -> Result<(), BusError>;
    async fn shutdown(&self) -> Result<(), BusError>;
}

/// Always-succeeding bus that only logs. Lets the server run without
/// hardware attached.
#[derive(Debug, Default)]
pub struct SimBus;

#[async_trait]
impl ServoBus for SimBus {
    async fn init(&self, port: &str) -> Result<(), BusError> {
        debug!(%port, "sim bus init");
        Ok(())
    }

    async fn move_servo(&self, id: ServoId, angle: f64) -> Result<(), BusError> {
        debug!(%id, angle, "sim move");
        Ok(())
    }

    async fn enable_torque(&self, id: ServoId) -> Result<(), BusError> {
        debug!(%id, "sim enable torque");
        Ok(())
    }

    async fn disable_torque(&self, id: ServoId) -> Result<(), BusError> {
        debug!(%id, "sim disable torque");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), BusError> {
        debug!("sim bus shutdown");
        Ok(())
    }
}

/// Recorded bus traffic, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum BusCall {
    Init(String),
    Move(ServoId, f64),
    EnableTorque(ServoId),
    DisableTorque(ServoId),
    Shutdown,
}

/// Test double that records every call and can be told to fail
/// selectively.
#[derive(Debug, Default)]
pub struct RecordingBus {
    calls: Mutex<Vec<BusCall>>,
    fail_init: Mutex<bool>,
    failing_servos: Mutex<Vec<ServoId>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_init(&self) {
        *self.fail_init.lock() = true;
    }

    pub fn fail_servo(&self, id: ServoId) {
        self.failing_servos.lock().push(id);
    }

    pub fn calls(&self) -> Vec<BusCall> {
        self.calls.lock().clone()
    }

    pub fn moves(&self) -> Vec<(ServoId, f64)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                BusCall::Move(id, angle) => Some((*id, *angle)),
                _ => None,
            })
            .collect()
    }

    fn check(&self, id: ServoId) -> Result<(), BusError> {
        if self.failing_servos.lock().contains(&id) {
            return Err(BusError::Command {
                id,
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ServoBus for RecordingBus {
    async fn init(&self, port: &str) -> Result<(), BusError> {
        if *self.fail_init.lock() {
            return Err(BusError::Init {
                port: port.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.calls.lock().push(BusCall::Init(port.to_string()));
        Ok(())
    }

    async fn move_servo(&self, id: ServoId, angle: f64) -> Result<(), BusError> {
        self.check(id)?;
        self.calls.lock().push(BusCall::Move(id, angle));
        Ok(())
    }

    async fn enable_torque(&self, id: ServoId) -> Result<(), BusError> {
        self.check(id)?;
        self.calls.lock().push(BusCall::EnableTorque(id));
        Ok(())
    }

    async fn disable_torque(&self, id: ServoId) -> Result<(), BusError> {
        self.check(id)?;
        self.calls.lock().push(BusCall::DisableTorque(id));
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), BusError> {
        self.calls.lock().push(BusCall::Shutdown);
        Ok(())
    }
}
