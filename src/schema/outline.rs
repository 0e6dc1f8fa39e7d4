use serde::{Deserialize, Serialize};
use std::fmt;

use super::character::CharacterId;

/// How a chapter leaves the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndingState {
    Resolved,
    Cliffhanger,
    Transitional,
}

impl EndingState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Resolved => "resolved",
            Self::Cliffhanger => "cliffhanger",
            Self::Transitional => "transitional",
        }
    }

    pub fn tag(&self) -> String {
        format!("ending:{}", self.label())
    }
}

/// Structural function of a beat within the three-act arc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeatKind {
    IncitingIncident,
    RisingAction,
    Complication,
    Midpoint,
    DarkestMoment,
    ClimaxBuildup,
    Climax,
    Resolution,
    /// Two-chapter novels: climax and resolution in one closing beat.
    Finale,
    /// Single-chapter novels: inciting incident, climax and resolution together.
    FullArc,
}

impl BeatKind {
    pub fn slug(&self) -> &'static str {
        match self {
            Self::IncitingIncident => "inciting_incident",
            Self::RisingAction => "rising_action",
            Self::Complication => "complication",
            Self::Midpoint => "midpoint",
            Self::DarkestMoment => "darkest_moment",
            Self::ClimaxBuildup => "climax_buildup",
            Self::Climax => "climax",
            Self::Resolution => "resolution",
            Self::Finale => "finale",
            Self::FullArc => "full_arc",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::IncitingIncident => "Inciting Incident",
            Self::RisingAction => "Rising Action",
            Self::Complication => "Complication",
            Self::Midpoint => "Midpoint",
            Self::DarkestMoment => "Darkest Moment",
            Self::ClimaxBuildup => "Climax Build-up",
            Self::Climax => "Climax",
            Self::Resolution => "Resolution",
            Self::Finale => "Finale",
            Self::FullArc => "Full Arc",
        }
    }

    pub fn tag(&self) -> String {
        format!("beat:{}", self.slug())
    }

    /// True for beats that carry the inciting incident.
    pub fn is_inciting(&self) -> bool {
        matches!(self, Self::IncitingIncident | Self::FullArc)
    }

    /// True for beats that close the primary plot thread.
    pub fn closes_story(&self) -> bool {
        matches!(self, Self::Resolution | Self::Finale | Self::FullArc)
    }
}

impl fmt::Display for BeatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Identifies a plot thread, e.g. "primary" or "subplot:c3".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn primary() -> Self {
        Self("primary".to_string())
    }

    pub fn subplot(owner: CharacterId) -> Self {
        Self(format!("subplot:{owner}"))
    }

    pub fn is_primary(&self) -> bool {
        self.0 == "primary"
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One chapter's worth of plot structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterBeat {
    pub number: u32,
    pub title: String,
    pub kind: BeatKind,
    /// 1, 2 or 3.
    pub act: u8,
    pub pov: CharacterId,
    pub goal: String,
    pub conflict: String,
    pub turning_point: String,
    pub ending: EndingState,
    pub tension: u8,
    pub location: String,
    pub key_character: Option<CharacterId>,
    pub summary: String,
    pub thread: ThreadId,
    pub resolves: Vec<ThreadId>,
}

impl ChapterBeat {
    pub fn has_goal_and_conflict(&self) -> bool {
        !self.goal.trim().is_empty() && !self.conflict.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotOutline {
    pub beats: Vec<ChapterBeat>,
    /// Last chapter of act one and of act two.
    pub act_boundaries: (u32, u32),
}

impl PlotOutline {
    pub fn len(&self) -> usize {
        self.beats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beats.is_empty()
    }

    pub fn beat(&self, number: u32) -> Option<&ChapterBeat> {
        self.beats.iter().find(|b| b.number == number)
    }

    /// Chapter number of the highest tension score (first one on ties).
    pub fn peak(&self) -> Option<u32> {
        self.beats
            .iter()
            .fold(None::<&ChapterBeat>, |best, b| match best {
                Some(x) if x.tension >= b.tension => Some(x),
                _ => Some(b),
            })
            .map(|b| b.number)
    }

    /// Plain-text outline, as written to the companion artifact.
    pub fn render(&self) -> String {
        let mut lines = vec![
            "PLOT OUTLINE".to_string(),
            "=".repeat(60),
            format!(
                "Act boundaries: act one ends at chapter {}, act two at chapter {}",
                self.act_boundaries.0, self.act_boundaries.1
            ),
            String::new(),
        ];
        for b in &self.beats {
            lines.push(format!("Chapter {}: {}  [{}]", b.number, b.title, b.kind));
            lines.push(format!(
                "  Act {} | tension {}/10 | ends {}",
                b.act,
                b.tension,
                b.ending.label()
            ));
            lines.push(format!("  Setting: {}", b.location));
            lines.push(format!("  Goal: {}", b.goal));
            lines.push(format!("  Conflict: {}", b.conflict));
            lines.push(format!("  Turning point: {}", b.turning_point));
            lines.push(format!("  {}", b.summary));
            lines.push(String::new());
        }
        lines.join("\n")
    }
}
