use crate::core::error::ProviderError;
use crate::core::state::{Character, LayoutHint, PanelSpec};
use crate::services::llm::LlmClient;
use anyhow::{Context, Result};
use log::info;
use serde::Deserialize;
use serde_json::{json, Value};

/// Values the model uses to say "nothing here".
const ABSENT_MARKERS: &[&str] = &["n/a", "na", "none", "null", "-"];

pub fn script_prompt(story: &str, characters: &[Character]) -> String {
    let character_context = if characters.is_empty() {
        String::new()
    } else {
        let lines = characters
            .iter()
            .map(|c| format!("- {}: {}", c.name, c.visual_description))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "\nKeep these character visual definitions consistent strictly:\n{}\n",
            lines
        )
    };

    format!(
        "You are an expert comic book writer and artist.\n\
        Analyze the following story and break it down into a sequence of 4 to 6 comic book panels.\n\
        {}\n\
        For each panel, provide:\n\
        1. A detailed visual description for an image generator (include angle, lighting, character details). Ensure characters match the provided definitions if present.\n\
        2. Dialogue (if any characters are speaking) or \"N/A\" if silent. Format: \"Character: Line\".\n\
        3. A narrative caption (voiceover or context) or \"N/A\" if not needed.\n\
        4. A sound effect text (onomatopoeia) if appropriate (e.g., \"POW!\", \"SPLASH\", \"RUMBLE\"), or \"N/A\" if silent.\n\
        5. A layout suggestion: 'wide' (for establishing shots), 'tall' (for character focus), or 'square' (standard action).\n\
        \n\
        Story: \"{}\"",
        character_context,
        story.trim()
    )
}

pub fn script_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "panels": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "description": { "type": "STRING" },
                        "dialogue": { "type": "STRING" },
                        "caption": { "type": "STRING" },
                        "soundEffect": { "type": "STRING" },
                        "layout": { "type": "STRING", "enum": ["square", "wide", "tall"] }
                    },
                    "required": ["description", "dialogue", "caption", "soundEffect", "layout"]
                }
            }
        },
        "required": ["panels"]
    })
}

#[derive(Deserialize)]
struct ScriptResponse {
    panels: Vec<RawPanel>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPanel {
    description: String,
    dialogue: String,
    caption: String,
    sound_effect: String,
    layout: LayoutHint,
}

impl From<RawPanel> for PanelSpec {
    fn from(raw: RawPanel) -> Self {
        Self {
            description: raw.description.trim().to_string(),
            dialogue: absent_to_none(&raw.dialogue),
            caption: absent_to_none(&raw.caption),
            sound_effect: absent_to_none(&raw.sound_effect),
            layout: raw.layout,
        }
    }
}

/// Maps the model's "absent" markers to `None`. This is the only place
/// model output is string-matched.
pub fn absent_to_none(value: &str) -> Option<String> {
    let trimmed = value.trim();
    let lowered = trimmed.to_ascii_lowercase();
    if trimmed.is_empty() || ABSENT_MARKERS.contains(&lowered.as_str()) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// All-or-nothing: one malformed panel rejects the whole script.
pub fn parse_script(response: &str) -> Result<Vec<PanelSpec>> {
    let clean_json = strip_code_blocks(response);
    let script: ScriptResponse = serde_json::from_str(&clean_json).map_err(|e| {
        ProviderError::invalid_response(format!(
            "Failed to parse script JSON: {}. Body: {}",
            e, clean_json
        ))
    })?;
    Ok(script.panels.into_iter().map(PanelSpec::from).collect())
}

pub async fn generate_script(
    llm: &dyn LlmClient,
    story: &str,
    characters: &[Character],
) -> Result<Vec<PanelSpec>> {
    let response = llm
        .generate_json(&script_prompt(story, characters), &script_schema())
        .await
        .context("Failed to generate script")?;
    let panels = parse_script(&response)?;

    info!("Script generated with {} panels", panels.len());
    Ok(panels)
}

pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```json") {
        s.trim_start_matches("```json").trim_end_matches("```").trim().to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```").trim_end_matches("```").trim().to_string()
    } else {
        s.to_string()
    }
}
