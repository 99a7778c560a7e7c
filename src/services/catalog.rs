use crate::core::state::Style;
use anyhow::{bail, Result};

pub const CUSTOM_TEXT_STYLE_ID: &str = "custom_text";
pub const CUSTOM_IMAGE_STYLE_ID: &str = "custom";

pub const SAMPLE_STORY: &str = "The detective walked into the rain-slicked alley. He saw a shadow move behind the dumpsters. 'Come out!' he shouted, reaching for his revolver. A small cat emerged, meowing softly. The detective sighed, holstering his weapon, but then noticed the cat's eyes were glowing a menacing red.";

// (id, name, prompt modifier, preview tint)
const BUILTIN_STYLES: &[(&str, &str, &str, &str)] = &[
    (
        "superhero",
        "American Superhero",
        "American superhero comic book style, bold lines, dynamic action, vibrant colors, dramatic shading, halftone patterns",
        "from-blue-600 to-red-600",
    ),
    (
        "noir",
        "Noir Detective",
        "Film noir comic style, high contrast black and white, moody shadows, gritty texture, mysterious atmosphere",
        "from-gray-700 to-black",
    ),
    (
        "manga",
        "Japanese Manga",
        "Japanese manga style, black and white ink, screentones, expressive characters, dynamic speed lines, detailed backgrounds",
        "from-pink-500 to-purple-600",
    ),
    (
        "ligne-claire",
        "Ligne Claire",
        "Ligne claire style, clear strong lines, flat colors, no hatching, european comic book aesthetic, tintin style",
        "from-yellow-400 to-orange-500",
    ),
    (
        "cyberpunk",
        "Cyberpunk",
        "Cyberpunk comic style, neon lights, futuristic cityscapes, technological details, synthwave color palette, dark gritty future",
        "from-cyan-400 to-fuchsia-600",
    ),
    (
        "vintage",
        "Vintage 50s Horror",
        "Vintage 1950s horror comic style, retro color palette, aged paper texture, pulp comic aesthetic, EC comics style",
        "from-green-700 to-yellow-800",
    ),
];

pub fn builtin_styles() -> Vec<Style> {
    BUILTIN_STYLES
        .iter()
        .map(|(id, name, modifier, tint)| Style {
            id: id.to_string(),
            display_name: name.to_string(),
            prompt_modifier: modifier.to_string(),
            preview_tint: tint.to_string(),
            is_custom: false,
        })
        .collect()
}

pub fn find_style(id: &str) -> Option<Style> {
    builtin_styles().into_iter().find(|s| s.id == id)
}

impl Style {
    /// A style written by the user as free text.
    pub fn custom_text(description: &str) -> Result<Self> {
        let description = description.trim();
        if description.is_empty() {
            bail!("Please describe the art style.");
        }
        Ok(Self {
            id: CUSTOM_TEXT_STYLE_ID.to_string(),
            display_name: "Custom Description".to_string(),
            prompt_modifier: description.to_string(),
            preview_tint: "from-pink-500 to-orange-400".to_string(),
            is_custom: true,
        })
    }

    /// A style derived from a reference image's description.
    pub fn from_image_description(description: &str) -> Self {
        Self {
            id: CUSTOM_IMAGE_STYLE_ID.to_string(),
            display_name: "Custom Style".to_string(),
            prompt_modifier: description.trim().to_string(),
            preview_tint: "from-gray-500 to-gray-900".to_string(),
            is_custom: true,
        }
    }
}
