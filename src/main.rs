use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use inkspire::core::config::{Config, DEFAULT_CONFIG_PATH};
use inkspire::core::io::NativeStorage;
use inkspire::core::state::{Phase, Style};
use inkspire::services::catalog::{builtin_styles, find_style, SAMPLE_STORY};
use inkspire::services::dictation::{Dictation, LineDictation, StoryDraft};
use inkspire::services::editor::edit_comic;
use inkspire::services::export::export_comic;
use inkspire::services::llm::create_llm;
use inkspire::services::setup::{prompt_story, review_analysis, select_style, ReviewDecision};
use inkspire::services::workflow::ComicWorkflow;
use inkspire::utils::image::load_image_file;
use inquire::Confirm;
use std::path::PathBuf;
use tokio::io::BufReader;

#[derive(Parser, Debug)]
#[command(name = "inkspire", version, about = "Turn a short story into a comic")]
struct Args {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Read the story from a text file
    #[arg(long, conflicts_with_all = ["sample", "dictate"])]
    story_file: Option<PathBuf>,

    /// Use the built-in sample story
    #[arg(long, conflicts_with = "dictate")]
    sample: bool,

    /// Read dictated story fragments from stdin, one per line, until EOF
    #[arg(long)]
    dictate: bool,

    /// Built-in style id (superhero, noir, manga, ligne-claire, cyberpunk, vintage)
    #[arg(long, conflicts_with_all = ["style_text", "style_image"])]
    style: Option<String>,

    /// Describe a custom art style
    #[arg(long, conflicts_with = "style_image")]
    style_text: Option<String>,

    /// Derive the art style from a reference image
    #[arg(long)]
    style_image: Option<PathBuf>,

    /// Output folder, overrides the configuration
    #[arg(long)]
    output: Option<String>,

    /// Accept the analysis as-is and skip the panel editor
    #[arg(long)]
    unattended: bool,
}

async fn read_story(args: &Args) -> Result<Option<String>> {
    if let Some(path) = &args.story_file {
        let story = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        return Ok(Some(story));
    }
    if args.sample {
        return Ok(Some(SAMPLE_STORY.to_string()));
    }
    if args.dictate {
        println!("Listening on stdin (Ctrl-D to finish)...");
        let draft = StoryDraft::default();
        let mut dictation = LineDictation::new(BufReader::new(tokio::io::stdin()));
        dictation.start(draft.sink()).await?;
        dictation.finished().await?;
        return Ok(Some(draft.text()));
    }
    Ok(None)
}

async fn resolve_style(args: &Args, workflow: &ComicWorkflow, unattended: bool) -> Result<Style> {
    if let Some(id) = &args.style {
        return find_style(id).ok_or_else(|| {
            let known: Vec<String> = builtin_styles().into_iter().map(|s| s.id).collect();
            anyhow!("Unknown style '{}'. Available: {}", id, known.join(", "))
        });
    }
    if let Some(description) = &args.style_text {
        return Style::custom_text(description);
    }
    if let Some(path) = &args.style_image {
        let image = load_image_file(path).await?;
        println!("Analyzing style...");
        return Ok(workflow.style_from_image(&image).await);
    }
    if unattended {
        return builtin_styles()
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("style catalog is empty"));
    }
    select_style(workflow).await
}

/// Shows the stage error. Returns true when the user wants another go.
/// Unattended runs fail with the stage message instead of asking.
async fn retry_after_error(workflow: &mut ComicWorkflow, unattended: bool) -> Result<bool> {
    if unattended {
        workflow.session().ensure_ok()?;
        return Ok(false);
    }
    let message = workflow.session().error_message().unwrap_or_default();
    eprintln!("{}", message);
    let again = Confirm::new("Try again?").with_default(true).prompt()?;
    if again {
        workflow.dismiss_error().await?;
    }
    Ok(again)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match Config::load_or_default(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {:#}", e);
            return Err(e);
        }
    };
    if let Some(output) = &args.output {
        config.output_folder = output.clone();
    }
    config.unattended |= args.unattended;
    config.ensure_directories()?;

    let unattended = config.unattended;
    let output_folder = config.output_folder.clone();
    let llm = create_llm(&config.llm)?;
    let mut workflow = ComicWorkflow::new(config, llm).with_progress(true);

    let mut story = read_story(&args).await?;
    let style = resolve_style(&args, &workflow, unattended).await?;
    println!("Style: {}", style.display_name);

    loop {
        let story_text = match story.take() {
            Some(s) => s,
            None if unattended => bail!("No story given. Use --story-file, --sample or --dictate."),
            None => prompt_story(workflow.session().story_text())?,
        };
        if story_text.trim().is_empty() {
            if unattended {
                bail!("The story is empty.");
            }
            println!("Please write a story first.");
            continue;
        }

        println!("{}", Phase::AnalyzingStory.status_label());
        if workflow.submit(&story_text, style.clone()).await? == Phase::Error {
            if retry_after_error(&mut workflow, unattended).await? {
                continue;
            }
            return Ok(());
        }

        let analysis = workflow
            .session()
            .analysis()
            .cloned()
            .ok_or_else(|| anyhow!("analysis missing after review"))?;
        let characters = if unattended {
            analysis.characters
        } else {
            match review_analysis(&analysis)? {
                ReviewDecision::Confirm(characters) => characters,
                ReviewDecision::Cancel => {
                    workflow.cancel_review().await?;
                    continue;
                }
            }
        };

        println!("{}", Phase::GeneratingScript.status_label());
        match workflow.confirm_characters(characters).await? {
            Phase::Error => {
                if retry_after_error(&mut workflow, unattended).await? {
                    continue;
                }
                return Ok(());
            }
            _ => break,
        }
    }

    let session = workflow.session();
    let missing = session.panels().iter().filter(|p| p.image.is_none()).count();
    println!(
        "{}: {} panel(s), {} without image",
        session.phase().status_label(),
        session.panels().len(),
        missing
    );

    if !unattended {
        edit_comic(&mut workflow).await?;
    }

    let written = export_comic(&NativeStorage::new(), &output_folder, workflow.session()).await?;
    for path in &written {
        println!("  {}", path);
    }
    println!("Comic saved to {}", output_folder);
    Ok(())
}
