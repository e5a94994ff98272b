use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use shared::domain::ServoId;

use crate::config::{RigConfig, ANGLE_MAX, ANGLE_MIN};
use crate::error::StoreError;

/// One keyframe: servo targets keyed by id. The index is used for
/// ordering only; gaps between indices are fine.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub index: u32,
    pub targets: BTreeMap<ServoId, f64>,
}

/// A recorded motion program, frames sorted ascending by index.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionProgram {
    pub name: String,
    pub frames: Vec<Frame>,
}

/// Loads recorded programs from pose files. Programs are re-read on
/// every request so a re-recorded pose file takes effect immediately.
#[derive(Debug, Clone)]
pub struct ProgramStore {
    poses_dir: PathBuf,
    sequences: std::collections::HashMap<String, String>,
}

impl ProgramStore {
    pub fn new(rig: &RigConfig) -> Self {
        Self {
            poses_dir: rig.poses_dir.clone(),
            sequences: rig.sequences.clone(),
        }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        let file = self
            .sequences
            .get(name)
            .cloned()
            .unwrap_or_else(|| format!("{name}.csv"));
        self.poses_dir.join(file)
    }

    pub fn load(&self, name: &str) -> Result<MotionProgram, StoreError> {
        let path = self.path_for(name);
        if !path.exists() {
            return Err(StoreError::NotFound(name.to_string()));
        }
        let raw = fs::read_to_string(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        let frames = parse_frames(&path, &raw)?;
        Ok(MotionProgram {
            name: name.to_string(),
            frames,
        })
    }
}

/// Pose files are CSV with a header naming `frame`, `servo_id` and
/// `angle` columns (any order). One row per (frame, servo) pair.
fn parse_frames(path: &Path, raw: &str) -> Result<Vec<Frame>, StoreError> {
    let parse_err = |line: usize, reason: String| StoreError::Parse {
        path: path.to_path_buf(),
        line,
        reason,
    };

    let mut lines = raw.lines().enumerate();
    let (_, header) = lines
        .next()
        .ok_or_else(|| parse_err(1, "empty pose file".to_string()))?;
    let columns: Vec<&str> = header.split(',').map(str::trim).collect();
    let column = |name: &str| {
        columns
            .iter()
            .position(|c| *c == name)
            .ok_or_else(|| parse_err(1, format!("missing '{name}' column")))
    };
    let frame_col = column("frame")?;
    let servo_col = column("servo_id")?;
    let angle_col = column("angle")?;

    let mut by_index: BTreeMap<u32, BTreeMap<ServoId, f64>> = BTreeMap::new();
    for (i, line) in lines {
        let line_no = i + 1;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() < columns.len() {
            return Err(parse_err(line_no, "too few fields".to_string()));
        }
        let index: u32 = fields[frame_col]
            .parse()
            .map_err(|_| parse_err(line_no, format!("bad frame index '{}'", fields[frame_col])))?;
        let servo: u8 = fields[servo_col]
            .parse()
            .map_err(|_| parse_err(line_no, format!("bad servo id '{}'", fields[servo_col])))?;
        let angle: f64 = fields[angle_col]
            .parse()
            .map_err(|_| parse_err(line_no, format!("bad angle '{}'", fields[angle_col])))?;
        if !(ANGLE_MIN..=ANGLE_MAX).contains(&angle) {
            return Err(parse_err(line_no, format!("angle {angle} outside [0, 240]")));
        }
        by_index.entry(index).or_default().insert(ServoId(servo), angle);
    }

    // BTreeMap iteration gives ascending frame order.
    Ok(by_index
        .into_iter()
        .map(|(index, targets)| Frame { index, targets })
        .collect())
}
