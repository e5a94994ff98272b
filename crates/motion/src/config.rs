use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use shared::domain::ServoId;

/// Full mechanical swing of a servo, degrees.
pub const ANGLE_MAX: f64 = 240.0;
pub const ANGLE_MIN: f64 = 0.0;

/// Mirror transform for mechanically reversed servos. Applied exactly
/// once, when a program is loaded.
pub fn reverse_angle(angle: f64) -> f64 {
    ANGLE_MAX - angle
}

/// Static description of the rig: which servo ids exist, which are
/// mounted mirrored, and where recorded programs live. Fixed at process
/// start; runtime commands never change it.
#[derive(Debug, Clone)]
pub struct RigConfig {
    pub servo_ids: Vec<ServoId>,
    pub center_angle: f64,
    pub reversed: HashSet<ServoId>,
    /// Program name to pose-file name. Names missing here resolve to
    /// `<name>.csv`.
    pub sequences: HashMap<String, String>,
    pub poses_dir: PathBuf,
}

impl Default for RigConfig {
    fn default() -> Self {
        let sequences = ["wave", "nod", "dance", "happy", "custom"]
            .into_iter()
            .map(|name| (name.to_string(), format!("{name}.csv")))
            .collect();
        Self {
            servo_ids: (1..=10).map(ServoId).collect(),
            center_angle: 120.0,
            // front legs & hips are mounted flipped
            reversed: [1, 3, 4, 6, 7, 8].into_iter().map(ServoId).collect(),
            sequences,
            poses_dir: PathBuf::from("poses"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_angle_is_an_involution() {
        for angle in [0.0, 37.5, 120.0, 240.0] {
            assert_eq!(reverse_angle(reverse_angle(angle)), angle);
        }
    }

    #[test]
    fn default_rig_matches_hardware() {
        let rig = RigConfig::default();
        assert_eq!(rig.servo_ids.len(), 10);
        assert_eq!(rig.center_angle, 120.0);
        assert!(rig.reversed.contains(&ServoId(3)));
        assert!(!rig.reversed.contains(&ServoId(2)));
        assert_eq!(rig.sequences.get("wave").map(String::as_str), Some("wave.csv"));
    }
}
