use crate::utils::image::InlineImage;
use serde::{Deserialize, Serialize};

pub type PanelId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    #[default]
    Idle,
    AnalyzingStory,
    ReviewAnalysis,
    GeneratingScript,
    GeneratingImages,
    Complete,
    Error,
}

impl Phase {
    /// Short status line for the header.
    pub fn status_label(&self) -> &'static str {
        match self {
            Phase::Idle => "",
            Phase::AnalyzingStory => "READING STORY...",
            Phase::ReviewAnalysis => "PLANNING PHASE",
            Phase::GeneratingScript => "WRITING SCRIPT...",
            Phase::GeneratingImages => "INKING PANELS...",
            Phase::Complete => "COMPLETE",
            Phase::Error => "ERROR",
        }
    }

    pub fn has_panels(&self) -> bool {
        matches!(self, Phase::GeneratingImages | Phase::Complete)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Style {
    pub id: String,
    pub display_name: String,
    /// Appended to every image prompt of the session.
    pub prompt_modifier: String,
    pub preview_tint: String,
    #[serde(default)]
    pub is_custom: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    #[serde(rename = "description")]
    pub visual_description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub characters: Vec<Character>,
    pub genre: String,
    pub tone: String,
    pub feedback: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LayoutHint {
    #[default]
    Square,
    Wide,
    Tall,
}

impl LayoutHint {
    pub const ALL: [LayoutHint; 3] = [
        LayoutHint::Square,
        LayoutHint::Wide,
        LayoutHint::Tall,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LayoutHint::Square => "square",
            LayoutHint::Wide => "wide",
            LayoutHint::Tall => "tall",
        }
    }
}

/// One panel as described by the script, before it has an id or image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelSpec {
    pub description: String,
    pub dialogue: Option<String>,
    pub caption: Option<String>,
    pub sound_effect: Option<String>,
    pub layout: LayoutHint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Panel {
    pub id: PanelId,
    pub description: String,
    pub dialogue: Option<String>,
    pub caption: Option<String>,
    pub sound_effect: Option<String>,
    pub layout: LayoutHint,
    pub image: Option<InlineImage>,
    pub is_generating: bool,
}

impl Panel {
    /// A freshly scripted panel waiting for its first image.
    pub fn pending(id: PanelId, spec: PanelSpec) -> Self {
        Self {
            id,
            description: spec.description,
            dialogue: spec.dialogue,
            caption: spec.caption,
            sound_effect: spec.sound_effect,
            layout: spec.layout,
            image: None,
            is_generating: true,
        }
    }

    /// Merges the fields present in `update`. Blank text clears optional
    /// fields; the description is only replaced by non-blank text.
    pub fn apply_update(&mut self, update: &PanelUpdate) {
        if let Some(description) = &update.description {
            if !description.trim().is_empty() {
                self.description = description.clone();
            }
        }
        if let Some(dialogue) = &update.dialogue {
            self.dialogue = non_blank(dialogue);
        }
        if let Some(caption) = &update.caption {
            self.caption = non_blank(caption);
        }
        if let Some(sound_effect) = &update.sound_effect {
            self.sound_effect = non_blank(sound_effect);
        }
        if let Some(layout) = update.layout {
            self.layout = layout;
        }
    }
}

/// Partial edit of a panel's text fields. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PanelUpdate {
    pub description: Option<String>,
    pub dialogue: Option<String>,
    pub caption: Option<String>,
    pub sound_effect: Option<String>,
    pub layout: Option<LayoutHint>,
}

pub fn non_blank(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
