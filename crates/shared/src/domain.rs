use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServoId(pub u8);

impl std::fmt::Display for ServoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Recognized robot actions. The three built-ins have a procedural
/// degradation path when no recorded program exists; everything else
/// is looked up by name only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Wave,
    Nod,
    Dance,
    Custom,
    Named(String),
}

impl Action {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "wave" => Action::Wave,
            "nod" => Action::Nod,
            "dance" => Action::Dance,
            "custom" => Action::Custom,
            other => Action::Named(other.to_string()),
        }
    }

    /// Name used to look the action up in the program store.
    pub fn program_name(&self) -> &str {
        match self {
            Action::Wave => "wave",
            Action::Nod => "nod",
            Action::Dance => "dance",
            Action::Custom => "custom",
            Action::Named(name) => name,
        }
    }

    pub fn has_procedural_fallback(&self) -> bool {
        matches!(self, Action::Wave | Action::Nod | Action::Dance)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.program_name())
    }
}
