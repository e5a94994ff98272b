pub mod bus;
mod builtin;
pub mod config;
pub mod engine;
pub mod error;
pub mod store;

pub use bus::{RecordingBus, ServoBus, SimBus};
pub use config::RigConfig;
pub use engine::{EngineSnapshot, MotionEngine};
pub use error::{BusError, MotionError, StoreError};
pub use store::{Frame, MotionProgram, ProgramStore};
