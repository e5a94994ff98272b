use std::collections::HashMap;
use std::fs;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bind_addr: String,
    pub robot_port: String,
    pub poses_dir: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8765".into(),
            robot_port: "COM6".into(),
            poses_dir: "poses".into(),
        }
    }
}

/// Defaults, overridden by `robot.toml`, overridden by environment.
pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("robot.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            apply(&mut settings, |key| file_cfg.get(key).cloned());
        }
    }

    apply(&mut settings, |key| {
        std::env::var(key.to_uppercase()).ok()
    });
    apply(&mut settings, |key| {
        std::env::var(format!("APP__{}", key.to_uppercase())).ok()
    });

    settings
}

fn apply(settings: &mut Settings, get: impl Fn(&str) -> Option<String>) {
    if let Some(v) = get("bind_addr") {
        settings.bind_addr = v;
    }
    if let Some(v) = get("robot_port") {
        settings.robot_port = v;
    }
    if let Some(v) = get("poses_dir") {
        settings.poses_dir = v;
    }
}
