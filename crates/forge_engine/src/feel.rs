//! Game archetypes and their baseline feel specs.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

const FEEL_DEFAULTS: &str = include_str!("feel_defaults.yaml");

/// Coarse genre label that selects a baseline feel spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Archetype {
    #[default]
    Platformer,
    Runner,
    TopdownShooter,
    Puzzle,
    Clicker,
    TowerDefense,
    /// Anything else; uses the platformer baseline.
    Custom,
}

impl Archetype {
    pub const ALL: [Archetype; 6] = [
        Self::Platformer,
        Self::Runner,
        Self::TopdownShooter,
        Self::Puzzle,
        Self::Clicker,
        Self::TowerDefense,
    ];

    /// Parse an archetype name or a template id (`runner_endless`).
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "platformer" | "platformer_basic" => Self::Platformer,
            "runner" | "runner_endless" => Self::Runner,
            "topdown_shooter" | "shooter_topdown" => Self::TopdownShooter,
            "puzzle" | "puzzle_match" => Self::Puzzle,
            "clicker" | "clicker_idle" => Self::Clicker,
            "tower_defense" | "defense_tower" => Self::TowerDefense,
            _ => Self::Custom,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Platformer => "platformer",
            Self::Runner => "runner",
            Self::TopdownShooter => "topdown_shooter",
            Self::Puzzle => "puzzle",
            Self::Clicker => "clicker",
            Self::TowerDefense => "tower_defense",
            Self::Custom => "custom",
        }
    }

    /// Archetype whose baseline applies.
    pub fn baseline_archetype(&self) -> Archetype {
        match self {
            Self::Custom => Self::Platformer,
            other => *other,
        }
    }
}

impl From<String> for Archetype {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<Archetype> for String {
    fn from(a: Archetype) -> Self {
        a.as_str().to_string()
    }
}

impl std::fmt::Display for Archetype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn defaults_table() -> &'static BTreeMap<String, Value> {
    static TABLE: OnceLock<BTreeMap<String, Value>> = OnceLock::new();
    TABLE.get_or_init(|| {
        serde_yaml::from_str(FEEL_DEFAULTS).unwrap_or_else(|e| {
            error!("Embedded feel defaults are invalid: {}", e);
            BTreeMap::new()
        })
    })
}

/// Baseline feel spec for an archetype. Unknown archetypes get the
/// platformer baseline.
pub fn baseline(archetype: Archetype) -> Value {
    let table = defaults_table();
    table
        .get(archetype.baseline_archetype().as_str())
        .or_else(|| table.get(Archetype::Platformer.as_str()))
        .cloned()
        .unwrap_or_else(|| Value::Object(Default::default()))
}
