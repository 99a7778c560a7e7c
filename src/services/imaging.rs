use crate::services::llm::LlmClient;
use crate::utils::image::InlineImage;
use anyhow::{bail, Context, Result};
use log::{debug, warn};

pub const DEFAULT_CUSTOM_STYLE: &str = "A unique custom artistic style.";

const STYLE_ANALYSIS_PROMPT: &str = "Describe the artistic style of this image in 50 words or less. Focus on medium, line quality, color palette, and mood. Format it as a prompt modifier for an image generator (e.g. 'Art style: ...').";

pub fn compose_image_prompt(style_modifier: &str, description: &str) -> String {
    format!(
        "{}. {}. High quality, detailed masterpiece.",
        style_modifier.trim().trim_end_matches('.'),
        description.trim().trim_end_matches('.')
    )
}

/// Bulk generation never fails: any error is logged and the panel is left
/// without an image so its siblings can carry on.
pub async fn generate_panel_image(
    llm: &dyn LlmClient,
    description: &str,
    style_modifier: &str,
) -> Option<InlineImage> {
    let prompt = compose_image_prompt(style_modifier, description);
    match llm.generate_image(&prompt, None).await {
        Ok(image) => {
            debug!("Panel image generated ({} bytes)", image.data.len());
            Some(image)
        }
        Err(e) => {
            warn!("Image generation error: {:#}", e);
            None
        }
    }
}

/// Edits an existing panel image. Unlike [`generate_panel_image`], failures
/// are returned to the caller.
pub async fn refine_panel_image(
    llm: &dyn LlmClient,
    image: &InlineImage,
    instruction: &str,
) -> Result<InlineImage> {
    let instruction = instruction.trim();
    if instruction.is_empty() {
        bail!("refine instruction is empty");
    }
    llm.generate_image(instruction, Some(image))
        .await
        .context("Failed to refine panel image")
}

pub async fn analyze_image_style(llm: &dyn LlmClient, image: &InlineImage) -> String {
    match llm.generate_text(STYLE_ANALYSIS_PROMPT, Some(image)).await {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => DEFAULT_CUSTOM_STYLE.to_string(),
        Err(e) => {
            warn!("Style analysis failed: {:#}", e);
            DEFAULT_CUSTOM_STYLE.to_string()
        }
    }
}

pub async fn suggest_sound_effect(llm: &dyn LlmClient, description: &str) -> Option<String> {
    let prompt = format!(
        "Suggest a single comic book sound effect word (onomatopoeia) for this scene: \"{}\". Return ONLY the word (e.g., BANG, WHOOSH, CRACK) or \"N/A\" if none fits.",
        description.trim()
    );
    match llm.generate_text(&prompt, None).await {
        Ok(text) => clean_sound_effect(&text),
        Err(e) => {
            warn!("SFX generation failed: {:#}", e);
            None
        }
    }
}

/// Keeps letters and `!`; "N/A" anywhere means no effect.
pub fn clean_sound_effect(raw: &str) -> Option<String> {
    if raw.to_ascii_uppercase().contains("N/A") {
        return None;
    }
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphabetic() || *c == '!')
        .collect();
    if cleaned.chars().any(|c| c.is_ascii_alphabetic()) {
        Some(cleaned)
    } else {
        None
    }
}
