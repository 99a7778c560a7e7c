use crate::core::error::ProviderError;
use crate::core::state::Analysis;
use crate::services::llm::LlmClient;
use crate::services::script::strip_code_blocks;
use anyhow::{bail, Context, Result};
use log::info;
use serde_json::{json, Value};

pub fn analysis_prompt(story: &str) -> String {
    format!(
        "Analyze the following story for a comic book adaptation.\n\
        1. Identify key characters and provide a concise visual description for each (hair, clothes, distinctive features).\n\
        2. Determine the Genre and Tone.\n\
        3. Provide brief creative feedback or suggestions to make the comic better (pacing, visual focus).\n\
        \n\
        Story: \"{}\"",
        story.trim()
    )
}

pub fn analysis_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "characters": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "name": { "type": "STRING" },
                        "description": { "type": "STRING" }
                    },
                    "required": ["name", "description"]
                }
            },
            "genre": { "type": "STRING" },
            "tone": { "type": "STRING" },
            "feedback": { "type": "STRING" }
        },
        "required": ["characters", "genre", "tone", "feedback"]
    })
}

/// Validates the model's answer. Every field is required; anything else is
/// rejected as a whole.
pub fn parse_analysis(response: &str) -> Result<Analysis> {
    let clean_json = strip_code_blocks(response);
    let analysis: Analysis = serde_json::from_str(&clean_json).map_err(|e| {
        ProviderError::invalid_response(format!(
            "Failed to parse analysis JSON: {}. Body: {}",
            e, clean_json
        ))
    })?;
    Ok(analysis)
}

pub async fn analyze_story(llm: &dyn LlmClient, story: &str) -> Result<Analysis> {
    if story.trim().is_empty() {
        bail!("story text is empty");
    }

    let response = llm
        .generate_json(&analysis_prompt(story), &analysis_schema())
        .await
        .context("Failed to analyze story")?;
    let analysis = parse_analysis(&response)?;

    info!(
        "Story analysis: {} characters, genre {}, tone {}",
        analysis.characters.len(),
        analysis.genre,
        analysis.tone
    );
    Ok(analysis)
}
