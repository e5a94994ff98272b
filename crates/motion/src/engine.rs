use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use shared::domain::{Action, ServoId};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::builtin;
use crate::bus::ServoBus;
use crate::config::{reverse_angle, RigConfig};
use crate::error::{BusError, MotionError, StoreError};
use crate::store::{MotionProgram, ProgramStore};

const FRAME_DELAY: Duration = Duration::from_millis(500);
const SETTLE_DELAY: Duration = Duration::from_millis(500);
const STOP_COOLDOWN: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct State {
    connected: bool,
    busy: bool,
    current_action: Option<String>,
    /// Bumped on every successful claim so a stale claim (outlived by an
    /// emergency stop and a newer trigger) can never clear the new one.
    claim_seq: u64,
}

#[derive(Debug)]
struct ServoHandle {
    last_angle: Option<f64>,
}

pub(crate) struct Inner {
    state: Mutex<State>,
    servos: Mutex<BTreeMap<ServoId, ServoHandle>>,
    bus: Arc<dyn ServoBus>,
    store: ProgramStore,
    rig: RigConfig,
}

/// Exclusive right to run one motion. Dropping it releases the busy
/// flag, so playback tasks release on every exit path.
struct BusyClaim {
    inner: Arc<Inner>,
    seq: u64,
}

impl Drop for BusyClaim {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        if state.busy && state.claim_seq == self.seq {
            state.busy = false;
            state.current_action = None;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSnapshot {
    pub connected: bool,
    pub busy: bool,
    pub current_action: Option<String>,
    pub servos_connected: usize,
}

/// Owns the servo handles and the system-wide busy state. At most one
/// motion (recorded or procedural) runs at a time; triggers while busy
/// are rejected, never queued.
#[derive(Clone)]
pub struct MotionEngine {
    inner: Arc<Inner>,
}

impl MotionEngine {
    pub fn new(bus: Arc<dyn ServoBus>, rig: RigConfig) -> Self {
        let store = ProgramStore::new(&rig);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                servos: Mutex::new(BTreeMap::new()),
                bus,
                store,
                rig,
            }),
        }
    }

    /// Brings the rig up: bus init, then each servo independently.
    /// Partial attachment is fine; the engine is connected as long as at
    /// least one servo responded. Returns the attached count.
    pub async fn connect(&self, port: &str) -> Result<usize, BusError> {
        info!(%port, "connecting to robot");
        self.inner.bus.init(port).await?;

        let mut attached = 0usize;
        for &id in &self.inner.rig.servo_ids {
            match self.inner.bus.enable_torque(id).await {
                Ok(()) => {
                    self.inner
                        .servos
                        .lock()
                        .insert(id, ServoHandle { last_angle: None });
                    attached += 1;
                    debug!(%id, "servo attached");
                }
                Err(error) => warn!(%id, %error, "servo failed to attach"),
            }
        }

        self.inner.state.lock().connected = attached > 0;
        if attached > 0 {
            info!(servos = attached, "robot ready");
            self.set_home().await;
        } else {
            warn!("no servos responded; robot stays disconnected");
        }
        Ok(attached)
    }

    /// Sweeps every attached servo to the center angle. Per-servo
    /// failures are logged and swallowed; the sweep always completes.
    pub async fn set_home(&self) {
        if !self.is_connected() {
            return;
        }
        debug!("homing all servos");
        self.inner.home_sweep().await;
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().connected
    }

    pub fn is_busy(&self) -> bool {
        self.inner.state.lock().busy
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let (connected, busy, current_action) = {
            let state = self.inner.state.lock();
            (state.connected, state.busy, state.current_action.clone())
        };
        EngineSnapshot {
            connected,
            busy,
            current_action,
            servos_connected: self.inner.servos.lock().len(),
        }
    }

    /// Starts playback of a recorded program on a background task and
    /// returns as soon as the busy claim is held. The store is queried
    /// before the claim, so a missing program is a clean synchronous
    /// failure the caller can fall back on without touching any servo.
    pub fn play_program(&self, name: &str) -> Result<(), MotionError> {
        if !self.is_connected() {
            return Err(MotionError::NotConnected);
        }
        if self.is_busy() {
            return Err(MotionError::Busy);
        }

        let program = self.inner.store.load(name).map_err(|error| match error {
            StoreError::NotFound(name) => MotionError::ProgramNotFound(name),
            other => MotionError::BadProgram {
                name: name.to_string(),
                source: other,
            },
        })?;
        let program = self.inner.apply_reversal(program);

        let claim = self.try_claim(name).ok_or(MotionError::Busy)?;
        let inner = Arc::clone(&self.inner);
        tokio::spawn(run_program(inner, program, claim));
        Ok(())
    }

    /// Routes an action: recorded program first, procedural fallback for
    /// the three built-ins when (and only when) no program is recorded.
    /// Returns once playback has been handed to a background task.
    pub fn trigger(&self, action: &Action) -> Result<(), MotionError> {
        if !self.is_connected() {
            return Err(MotionError::NotConnected);
        }
        match self.play_program(action.program_name()) {
            Err(MotionError::ProgramNotFound(_)) if action.has_procedural_fallback() => {
                self.play_builtin(action.clone())
            }
            result => result,
        }
    }

    fn play_builtin(&self, action: Action) -> Result<(), MotionError> {
        let claim = self
            .try_claim(action.program_name())
            .ok_or(MotionError::Busy)?;
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            info!(action = %action, "running procedural motion");
            builtin::run(&inner, &action).await;
            info!(action = %action, "procedural motion finished");
            drop(claim);
        });
        Ok(())
    }

    /// Clears the busy claim at once, then power-cycles torque with a
    /// cooldown in between. Known limitation: the playback task itself is
    /// not cancelled, so a frame loop already past its claim check may
    /// issue a few more moves while torque is being toggled.
    pub async fn emergency_stop(&self) {
        warn!("emergency stop");
        {
            let mut state = self.inner.state.lock();
            state.busy = false;
            state.current_action = None;
        }
        for id in self.inner.servo_ids() {
            if let Err(error) = self.inner.bus.disable_torque(id).await {
                warn!(%id, %error, "disable torque failed");
            }
        }
        sleep(STOP_COOLDOWN).await;
        for id in self.inner.servo_ids() {
            if let Err(error) = self.inner.bus.enable_torque(id).await {
                warn!(%id, %error, "enable torque failed");
            }
        }
    }

    /// Best-effort torque release and bus shutdown. Idempotent.
    pub async fn disconnect(&self) {
        info!("disconnecting robot");
        for id in self.inner.servo_ids() {
            if let Err(error) = self.inner.bus.disable_torque(id).await {
                debug!(%id, %error, "disable torque failed during disconnect");
            }
        }
        if let Err(error) = self.inner.bus.shutdown().await {
            warn!(%error, "bus shutdown failed");
        }
        self.inner.servos.lock().clear();
        self.inner.state.lock().connected = false;
    }

    /// Atomic check-then-set under one lock acquisition: the sole
    /// admission gate for motion.
    fn try_claim(&self, action: &str) -> Option<BusyClaim> {
        let mut state = self.inner.state.lock();
        if state.busy {
            return None;
        }
        state.busy = true;
        state.current_action = Some(action.to_string());
        state.claim_seq += 1;
        Some(BusyClaim {
            inner: Arc::clone(&self.inner),
            seq: state.claim_seq,
        })
    }
}

impl Inner {
    fn servo_ids(&self) -> Vec<ServoId> {
        self.servos.lock().keys().copied().collect()
    }

    fn apply_reversal(&self, mut program: MotionProgram) -> MotionProgram {
        for frame in &mut program.frames {
            for (id, angle) in frame.targets.iter_mut() {
                if self.rig.reversed.contains(id) {
                    *angle = reverse_angle(*angle);
                }
            }
        }
        program
    }

    /// Moves one servo if it is attached; servos absent from the rig are
    /// skipped without error.
    async fn move_one(&self, id: ServoId, angle: f64) -> Result<(), BusError> {
        if !self.servos.lock().contains_key(&id) {
            return Ok(());
        }
        self.bus.move_servo(id, angle).await?;
        if let Some(handle) = self.servos.lock().get_mut(&id) {
            handle.last_angle = Some(angle);
        }
        Ok(())
    }

    pub(crate) async fn try_move(&self, id: ServoId, angle: f64) {
        if let Err(error) = self.move_one(id, angle).await {
            warn!(%id, %error, "move failed");
        }
    }

    /// Commands every servo referenced by the frame; failures are
    /// collected and logged, never abort the frame.
    async fn move_frame(&self, targets: &BTreeMap<ServoId, f64>) {
        let mut failed = Vec::new();
        for (&id, &angle) in targets {
            if let Err(error) = self.move_one(id, angle).await {
                failed.push((id, error));
            }
        }
        for (id, error) in failed {
            warn!(%id, %error, "frame move failed");
        }
    }

    pub(crate) async fn home_sweep(&self) {
        let center = self.rig.center_angle;
        for id in self.servo_ids() {
            if let Err(error) = self.move_one(id, center).await {
                warn!(%id, %error, "home move failed");
            }
        }
    }
}

async fn run_program(inner: Arc<Inner>, program: MotionProgram, claim: BusyClaim) {
    info!(
        program = %program.name,
        frames = program.frames.len(),
        "playing recorded program"
    );
    let total = program.frames.len();
    for (i, frame) in program.frames.iter().enumerate() {
        inner.move_frame(&frame.targets).await;
        if i + 1 < total {
            sleep(FRAME_DELAY).await;
        }
    }
    sleep(SETTLE_DELAY).await;
    inner.home_sweep().await;
    info!(program = %program.name, "program finished");
    drop(claim);
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;
    use crate::bus::{BusCall, RecordingBus};

    fn temp_poses(files: &[(&str, &str)]) -> PathBuf {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("motion_engine_test_{suffix}"));
        fs::create_dir_all(&dir).expect("temp dir");
        for (name, body) in files {
            fs::write(dir.join(name), body).expect("pose file");
        }
        dir
    }

    fn test_engine(
        servo_ids: &[u8],
        reversed: &[u8],
        files: &[(&str, &str)],
    ) -> (MotionEngine, Arc<RecordingBus>, PathBuf) {
        let dir = temp_poses(files);
        let rig = RigConfig {
            servo_ids: servo_ids.iter().copied().map(ServoId).collect(),
            reversed: reversed.iter().copied().map(ServoId).collect(),
            poses_dir: dir.clone(),
            ..RigConfig::default()
        };
        let bus = Arc::new(RecordingBus::new());
        let engine = MotionEngine::new(bus.clone() as Arc<dyn ServoBus>, rig);
        (engine, bus, dir)
    }

    async fn wait_idle(engine: &MotionEngine) {
        tokio::time::timeout(Duration::from_secs(60), async {
            while engine.is_busy() {
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("motion should finish");
    }

    #[tokio::test]
    async fn connect_attaches_servos_and_homes() {
        let (engine, bus, dir) = test_engine(&[1, 2, 3], &[], &[]);
        let attached = engine.connect("/dev/ttyUSB0").await.expect("connect");
        assert_eq!(attached, 3);

        let snapshot = engine.snapshot();
        assert!(snapshot.connected);
        assert_eq!(snapshot.servos_connected, 3);
        assert_eq!(
            bus.moves(),
            vec![
                (ServoId(1), 120.0),
                (ServoId(2), 120.0),
                (ServoId(3), 120.0)
            ]
        );
        fs::remove_dir_all(dir).expect("cleanup");
    }

    #[tokio::test]
    async fn bus_init_failure_leaves_engine_disconnected() {
        let (engine, bus, dir) = test_engine(&[1, 2], &[], &[]);
        bus.fail_init();
        assert!(engine.connect("/dev/ttyUSB0").await.is_err());

        let snapshot = engine.snapshot();
        assert!(!snapshot.connected);
        assert_eq!(snapshot.servos_connected, 0);
        assert!(matches!(
            engine.play_program("wave"),
            Err(MotionError::NotConnected)
        ));
        fs::remove_dir_all(dir).expect("cleanup");
    }

    #[tokio::test]
    async fn partial_servo_failure_still_connects() {
        let (engine, bus, dir) = test_engine(&[1, 2, 3], &[], &[]);
        bus.fail_servo(ServoId(2));
        let attached = engine.connect("/dev/ttyUSB0").await.expect("connect");
        assert_eq!(attached, 2);

        let snapshot = engine.snapshot();
        assert!(snapshot.connected);
        assert_eq!(snapshot.servos_connected, 2);
        fs::remove_dir_all(dir).expect("cleanup");
    }

    #[tokio::test(start_paused = true)]
    async fn recorded_program_plays_frames_in_order_with_pacing() {
        let (engine, bus, dir) = test_engine(
            &[1],
            &[],
            &[("dance.csv", "frame,servo_id,angle\n0,1,100\n5,1,140\n")],
        );
        engine.connect("/dev/ttyUSB0").await.expect("connect");
        let before = bus.moves().len();

        let started = tokio::time::Instant::now();
        engine.trigger(&Action::Dance).expect("trigger");
        assert!(engine.is_busy());
        wait_idle(&engine).await;

        // 500ms between the two frames, none after the last, 500ms settle.
        // The idle poll adds at most one 20ms tick on top.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1000), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1100), "elapsed {elapsed:?}");
        assert_eq!(
            bus.moves()[before..],
            [
                (ServoId(1), 100.0),
                (ServoId(1), 140.0),
                (ServoId(1), 120.0)
            ]
        );
        fs::remove_dir_all(dir).expect("cleanup");
    }

    #[tokio::test(start_paused = true)]
    async fn reversal_is_applied_once_at_load() {
        let (engine, bus, dir) = test_engine(
            &[3],
            &[3],
            &[("nod.csv", "frame,servo_id,angle\n0,3,100\n")],
        );
        engine.connect("/dev/ttyUSB0").await.expect("connect");
        let before = bus.moves().len();

        engine.trigger(&Action::Nod).expect("trigger");
        wait_idle(&engine).await;

        let moves = bus.moves();
        assert_eq!(moves[before], (ServoId(3), 140.0));
        fs::remove_dir_all(dir).expect("cleanup");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_builtin_program_falls_back_to_procedural() {
        let (engine, bus, dir) = test_engine(&[1, 2, 3], &[], &[]);
        engine.connect("/dev/ttyUSB0").await.expect("connect");
        let before = bus.moves().len();

        engine.trigger(&Action::Wave).expect("trigger");
        let snapshot = engine.snapshot();
        assert!(snapshot.busy);
        assert_eq!(snapshot.current_action.as_deref(), Some("wave"));
        wait_idle(&engine).await;

        let moves = bus.moves()[before..].to_vec();
        // Arm raise, elbow bend, three elbow swings, then home sweep.
        assert_eq!(moves[0], (ServoId(1), 180.0));
        assert_eq!(moves[1], (ServoId(2), 90.0));
        assert!(moves.contains(&(ServoId(2), 60.0)));
        assert_eq!(moves[moves.len() - 3..], [
            (ServoId(1), 120.0),
            (ServoId(2), 120.0),
            (ServoId(3), 120.0)
        ]);
        assert_eq!(engine.snapshot().current_action, None);
        fs::remove_dir_all(dir).expect("cleanup");
    }

    #[tokio::test]
    async fn missing_named_program_has_no_fallback() {
        let (engine, _bus, dir) = test_engine(&[1], &[], &[]);
        engine.connect("/dev/ttyUSB0").await.expect("connect");

        assert!(matches!(
            engine.trigger(&Action::Named("backflip".to_string())),
            Err(MotionError::ProgramNotFound(_))
        ));
        assert!(!engine.is_busy());
        fs::remove_dir_all(dir).expect("cleanup");
    }

    #[tokio::test]
    async fn malformed_program_does_not_fall_back() {
        let (engine, bus, dir) = test_engine(
            &[1, 2, 3],
            &[],
            &[("wave.csv", "frame,servo_id,angle\n0,1,300\n")],
        );
        engine.connect("/dev/ttyUSB0").await.expect("connect");
        let before = bus.moves().len();

        assert!(matches!(
            engine.trigger(&Action::Wave),
            Err(MotionError::BadProgram { .. })
        ));
        assert!(!engine.is_busy());
        assert_eq!(bus.moves().len(), before);
        fs::remove_dir_all(dir).expect("cleanup");
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_while_busy_is_rejected_not_queued() {
        let (engine, _bus, dir) = test_engine(&[1, 2, 3], &[], &[]);
        engine.connect("/dev/ttyUSB0").await.expect("connect");

        engine.trigger(&Action::Wave).expect("first trigger");
        assert!(matches!(
            engine.trigger(&Action::Nod),
            Err(MotionError::Busy)
        ));
        // The rejected trigger must not disturb the active claim.
        assert_eq!(engine.snapshot().current_action.as_deref(), Some("wave"));

        wait_idle(&engine).await;
        let snapshot = engine.snapshot();
        assert!(!snapshot.busy);
        assert_eq!(snapshot.current_action, None);
        fs::remove_dir_all(dir).expect("cleanup");
    }

    #[tokio::test(start_paused = true)]
    async fn emergency_stop_clears_busy_and_power_cycles_torque() {
        let (engine, bus, dir) = test_engine(&[1, 2], &[], &[]);
        engine.connect("/dev/ttyUSB0").await.expect("connect");

        engine.trigger(&Action::Dance).expect("trigger");
        assert!(engine.is_busy());

        engine.emergency_stop().await;
        assert!(!engine.is_busy());
        assert_eq!(engine.snapshot().current_action, None);

        let calls = bus.calls();
        let disable_at = calls
            .iter()
            .position(|c| *c == BusCall::DisableTorque(ServoId(1)))
            .expect("disable recorded");
        let enable_at = calls
            .iter()
            .rposition(|c| *c == BusCall::EnableTorque(ServoId(1)))
            .expect("enable recorded");
        assert!(disable_at < enable_at);
        fs::remove_dir_all(dir).expect("cleanup");
    }

    #[tokio::test(start_paused = true)]
    async fn claim_after_stop_is_not_cleared_by_stale_playback() {
        let (engine, _bus, dir) = test_engine(&[1, 2, 3], &[], &[]);
        engine.connect("/dev/ttyUSB0").await.expect("connect");

        // wave runs 2.6s of virtual time; stop only flips the flag, the
        // playback task keeps running to its own end
        engine.trigger(&Action::Wave).expect("first trigger");
        engine.emergency_stop().await; // returns after the 1s cooldown
        assert!(!engine.is_busy());

        // dance claimed at t=1s runs until ~4.2s; the stale wave task
        // finishes at 2.6s and must not release dance's claim
        engine.trigger(&Action::Dance).expect("second trigger");
        sleep(Duration::from_millis(1800)).await;
        assert!(engine.is_busy());
        assert_eq!(engine.snapshot().current_action.as_deref(), Some("dance"));

        wait_idle(&engine).await;
        assert_eq!(engine.snapshot().current_action, None);
        fs::remove_dir_all(dir).expect("cleanup");
    }

    #[tokio::test]
    async fn set_home_and_disconnect_are_idempotent() {
        let (engine, bus, dir) = test_engine(&[1], &[], &[]);
        engine.connect("/dev/ttyUSB0").await.expect("connect");

        engine.set_home().await;
        engine.set_home().await;
        // connect homes once, then two explicit sweeps
        assert_eq!(bus.moves().len(), 3);

        engine.disconnect().await;
        engine.disconnect().await;
        let snapshot = engine.snapshot();
        assert!(!snapshot.connected);
        assert_eq!(snapshot.servos_connected, 0);
        let shutdowns = bus
            .calls()
            .iter()
            .filter(|c| **c == BusCall::Shutdown)
            .count();
        assert_eq!(shutdowns, 2);
        fs::remove_dir_all(dir).expect("cleanup");
    }
}
