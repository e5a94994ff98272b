//! Hard-coded procedural motions. These are the degradation path used
//! when no recorded program exists for one of the built-in actions; they
//! are not configurable at runtime.

use std::time::Duration;

use shared::domain::{Action, ServoId};
use tokio::time::sleep;

use crate::engine::Inner;

const SWING_STEP: Duration = Duration::from_millis(300);
const DANCE_STEP: Duration = Duration::from_millis(400);
const SETTLE: Duration = Duration::from_millis(500);

pub(crate) async fn run(inner: &Inner, action: &Action) {
    match action {
        Action::Wave => wave(inner).await,
        Action::Nod => nod(inner).await,
        Action::Dance => dance(inner).await,
        // Custom and named actions have no procedural shape.
        Action::Custom | Action::Named(_) => {}
    }
}

/// Servo 1 is the shoulder, servo 2 the elbow.
async fn wave(inner: &Inner) {
    inner.try_move(ServoId(1), 180.0).await;
    inner.try_move(ServoId(2), 90.0).await;
    sleep(SWING_STEP).await;

    for _ in 0..3 {
        inner.try_move(ServoId(2), 60.0).await;
        sleep(SWING_STEP).await;
        inner.try_move(ServoId(2), 120.0).await;
        sleep(SWING_STEP).await;
    }

    sleep(SETTLE).await;
    inner.home_sweep().await;
}

/// Servo 3 tilts the head.
async fn nod(inner: &Inner) {
    for _ in 0..3 {
        inner.try_move(ServoId(3), 100.0).await;
        sleep(SWING_STEP).await;
        inner.try_move(ServoId(3), 140.0).await;
        sleep(SWING_STEP).await;
    }
    inner.try_move(ServoId(3), 120.0).await;
    inner.home_sweep().await;
}

async fn dance(inner: &Inner) {
    const POSES: [[(u8, f64); 3]; 4] = [
        [(1, 100.0), (2, 100.0), (3, 100.0)],
        [(1, 140.0), (2, 140.0), (3, 140.0)],
        [(1, 100.0), (2, 140.0), (3, 100.0)],
        [(1, 140.0), (2, 100.0), (3, 140.0)],
    ];

    for _ in 0..2 {
        for pose in POSES {
            for (id, angle) in pose {
                inner.try_move(ServoId(id), angle).await;
            }
            sleep(DANCE_STEP).await;
        }
    }
    inner.home_sweep().await;
}
