use serde::{Deserialize, Serialize};

use super::genre::Genre;

/// The primary setting a novel takes place in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    pub name: String,
    pub era: String,
    pub description: String,
}

/// The setting model shared by every later stage. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldModel {
    pub title: String,
    pub genre: Genre,
    pub primary: Setting,
    pub secondary_locations: Vec<String>,
    pub rules: Vec<String>,
    pub central_conflict: String,
    pub atmosphere: String,
    pub themes: Vec<String>,
}

impl WorldModel {
    /// Every location a chapter may take place in, primary first.
    pub fn locations(&self) -> Vec<&str> {
        std::iter::once(self.primary.name.as_str())
            .chain(self.secondary_locations.iter().map(String::as_str))
            .collect()
    }

    /// World bible, as written to the companion artifact.
    pub fn render(&self) -> String {
        let mut lines = vec![
            format!("WORLD: {}", self.title),
            format!("GENRE: {}", self.genre),
            format!("TIME PERIOD: {}", self.primary.era),
            String::new(),
            format!("PRIMARY SETTING: {}", self.primary.name),
            format!("  {}", self.primary.description),
            String::new(),
            "KEY LOCATIONS:".to_string(),
        ];
        lines.extend(self.secondary_locations.iter().map(|l| format!("  - {l}")));
        lines.push(String::new());
        lines.push("WORLD RULES / DEFINING FEATURES:".to_string());
        lines.extend(self.rules.iter().map(|r| format!("  - {r}")));
        lines.push(String::new());
        lines.push("CENTRAL CONFLICT ELEMENT:".to_string());
        lines.push(format!("  {}", self.central_conflict));
        lines.push(String::new());
        lines.push("THEMES:".to_string());
        lines.extend(self.themes.iter().map(|t| format!("  - {t}")));
        lines.join("\n")
    }
}
