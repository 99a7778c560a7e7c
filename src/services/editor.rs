use crate::core::state::{LayoutHint, Panel, PanelUpdate};
use crate::services::panels::Direction;
use crate::services::workflow::ComicWorkflow;
use anyhow::Result;
use inquire::{Select, Text};

const FINISH_OPTION: &str = "Finish & export";

const ACTIONS: &[&str] = &[
    "Edit text",
    "Regenerate image",
    "Refine image",
    "Suggest sound effect",
    "Move left",
    "Move right",
    "Back",
];

fn panel_label(index: usize, panel: &Panel) -> String {
    let mut description: String = panel.description.chars().take(48).collect();
    if description.len() < panel.description.len() {
        description.push_str("...");
    }
    let marker = if panel.image.is_some() { "" } else { " [no image]" };
    format!(
        "#{} ({}) {}{}",
        index + 1,
        panel.layout.as_str(),
        description,
        marker
    )
}

pub fn print_panels(workflow: &ComicWorkflow) {
    let session = workflow.session();
    println!();
    println!("== {} ==", session.title());
    for (i, panel) in session.panels().iter().enumerate() {
        println!("{}", panel_label(i, panel));
        if let Some(caption) = &panel.caption {
            println!("    [{}]", caption);
        }
        if let Some(dialogue) = &panel.dialogue {
            println!("    \"{}\"", dialogue);
        }
        if let Some(sound_effect) = &panel.sound_effect {
            println!("    *{}*", sound_effect);
        }
    }
    println!();
}

/// Answers from the text editing prompts, in prompt order.
struct TextAnswers {
    description: String,
    dialogue: String,
    caption: String,
    sound_effect: String,
    layout: Option<LayoutHint>,
}

impl TextAnswers {
    fn into_update(self) -> PanelUpdate {
        PanelUpdate {
            description: Some(self.description),
            dialogue: Some(self.dialogue),
            caption: Some(self.caption),
            sound_effect: Some(self.sound_effect),
            layout: self.layout,
        }
    }
}

fn edit_text(panel: &Panel) -> Result<PanelUpdate> {
    let field = |label: &str, value: &Option<String>| -> Result<String> {
        Ok(Text::new(label)
            .with_initial_value(value.as_deref().unwrap_or_default())
            .with_help_message("Leave empty to remove")
            .prompt()?)
    };

    let description = Text::new("Scene description:")
        .with_initial_value(&panel.description)
        .with_help_message("Changes the text only, regenerate to redraw")
        .prompt()?;
    let dialogue = field("Dialogue:", &panel.dialogue)?;
    let caption = field("Caption:", &panel.caption)?;
    let sound_effect = field("Sound effect:", &panel.sound_effect)?;

    let layouts: Vec<&str> = LayoutHint::ALL.iter().map(|l| l.as_str()).collect();
    let current = LayoutHint::ALL
        .iter()
        .position(|l| *l == panel.layout)
        .unwrap_or_default();
    let choice = Select::new("Layout:", layouts)
        .with_starting_cursor(current)
        .raw_prompt()?;

    Ok(TextAnswers {
        description,
        dialogue,
        caption,
        sound_effect,
        layout: LayoutHint::ALL.get(choice.index).copied(),
    }
    .into_update())
}

/// Interactive panel editing until the user chooses to finish.
pub async fn edit_comic(workflow: &mut ComicWorkflow) -> Result<()> {
    loop {
        print_panels(workflow);

        let mut options: Vec<String> = workflow
            .session()
            .panels()
            .iter()
            .enumerate()
            .map(|(i, p)| panel_label(i, p))
            .collect();
        options.push(FINISH_OPTION.to_string());

        let choice = Select::new("Select a panel:", options).raw_prompt()?;
        let Some(panel) = workflow
            .session()
            .panels()
            .as_slice()
            .get(choice.index)
            .cloned()
        else {
            return Ok(());
        };

        let action = Select::new("Action:", ACTIONS.to_vec()).prompt()?;
        match action {
            "Edit text" => {
                let update = edit_text(&panel)?;
                workflow.update_panel(panel.id, update).await?;
            }
            "Regenerate image" => {
                let description = Text::new("Scene description:")
                    .with_initial_value(&panel.description)
                    .prompt()?;
                println!("Redrawing panel...");
                workflow.regenerate_panel(panel.id, &description).await?;
            }
            "Refine image" => {
                if panel.image.is_none() {
                    println!("This panel has no image to refine. Regenerate it first.");
                    continue;
                }
                let instruction = Text::new("What should change?").prompt()?;
                println!("Refining panel...");
                if let Err(e) = workflow.refine_panel(panel.id, &instruction).await {
                    println!("Could not refine the panel: {:#}", e);
                }
            }
            "Suggest sound effect" => match workflow.suggest_sound_effect(panel.id).await? {
                Some(sound_effect) => println!("Sound effect set to {}", sound_effect),
                None => println!("No sound effect fits this scene."),
            },
            "Move left" | "Move right" => {
                let direction = if action == "Move left" {
                    Direction::Left
                } else {
                    Direction::Right
                };
                if let Some(index) = workflow.session().panels().position(panel.id) {
                    workflow.move_panel(index, direction).await?;
                }
            }
            _ => {}
        }
    }
}
