use crate::core::state::{Analysis, Character, Style};
use crate::services::catalog::builtin_styles;
use crate::services::workflow::ComicWorkflow;
use crate::utils::image::load_image_file;
use anyhow::{anyhow, Result};
use inquire::{Confirm, Select, Text};
use std::path::Path;

const CUSTOM_TEXT_OPTION: &str = "Custom description...";
const CUSTOM_IMAGE_OPTION: &str = "Match a reference image...";

/// Outcome of the character review step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewDecision {
    Confirm(Vec<Character>),
    Cancel,
}

pub fn prompt_story(default: &str) -> Result<String> {
    let story = Text::new("Tell me your story:")
        .with_initial_value(default)
        .with_help_message("One paragraph is enough")
        .prompt()?;
    Ok(story)
}

fn style_options(styles: &[Style]) -> Vec<String> {
    styles
        .iter()
        .map(|s| s.display_name.clone())
        .chain([CUSTOM_TEXT_OPTION.to_string(), CUSTOM_IMAGE_OPTION.to_string()])
        .collect()
}

pub async fn select_style(workflow: &ComicWorkflow) -> Result<Style> {
    let styles = builtin_styles();
    let selection = Select::new("Select Art Style:", style_options(&styles)).prompt()?;

    match selection.as_str() {
        CUSTOM_TEXT_OPTION => {
            let description = Text::new("Describe the art style:").prompt()?;
            Style::custom_text(&description)
        }
        CUSTOM_IMAGE_OPTION => {
            let path = Text::new("Path to the reference image:").prompt()?;
            let image = load_image_file(Path::new(path.trim())).await?;
            println!("Analyzing style...");
            let style = workflow.style_from_image(&image).await;
            println!("{}", style.prompt_modifier);
            Ok(style)
        }
        name => styles
            .into_iter()
            .find(|s| s.display_name == name)
            .ok_or_else(|| anyhow!("Unknown style: {}", name)),
    }
}

fn print_analysis(analysis: &Analysis) {
    println!();
    println!("Genre: {}    Tone: {}", analysis.genre, analysis.tone);
    println!("Feedback: {}", analysis.feedback);
    println!("Characters:");
    if analysis.characters.is_empty() {
        println!("  (none detected, the script writer will invent them)");
    }
    for c in &analysis.characters {
        println!("  - {}: {}", c.name, c.visual_description);
    }
    println!();
}

/// Lets the user edit the detected characters before the script is written.
pub fn review_analysis(analysis: &Analysis) -> Result<ReviewDecision> {
    let mut characters = analysis.characters.clone();
    print_analysis(analysis);

    loop {
        let mut options: Vec<String> = characters
            .iter()
            .map(|c| format!("Edit {}", c.name))
            .collect();
        options.push("Add character".to_string());
        options.push("Confirm & generate comic".to_string());
        options.push("Back".to_string());

        let choice = Select::new("Review the plan:", options).raw_prompt()?;
        let index = choice.index;

        if index < characters.len() {
            let c = &mut characters[index];
            let description = Text::new(&format!("Visual description of {}:", c.name))
                .with_initial_value(&c.visual_description)
                .prompt()?;
            if description.trim().is_empty() {
                if Confirm::new(&format!("Remove {}?", c.name))
                    .with_default(false)
                    .prompt()?
                {
                    characters.remove(index);
                }
            } else {
                c.visual_description = description.trim().to_string();
            }
            continue;
        }

        match index - characters.len() {
            0 => {
                let name = Text::new("Name:").prompt()?;
                let description = Text::new("Visual description:").prompt()?;
                if !name.trim().is_empty() {
                    characters.push(Character {
                        name: name.trim().to_string(),
                        visual_description: description.trim().to_string(),
                    });
                }
            }
            1 => return Ok(ReviewDecision::Confirm(characters)),
            _ => return Ok(ReviewDecision::Cancel),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_style_options_end_with_custom_entries() {
        let options = style_options(&builtin_styles());
        assert_eq!(options.len(), 8);
        assert_eq!(options[0], "American Superhero");
        assert_eq!(options[6], CUSTOM_TEXT_OPTION);
        assert_eq!(options[7], CUSTOM_IMAGE_OPTION);
    }
}
