use crate::core::config::Config;
use crate::core::error::{SessionError, ANALYSIS_FAILED_MESSAGE, GENERATION_FAILED_MESSAGE};
use crate::core::state::{Analysis, Character, PanelId, PanelSpec, PanelUpdate, Phase, Style};
use crate::services::analysis::analyze_story;
use crate::services::imaging::{
    analyze_image_style, generate_panel_image, refine_panel_image, suggest_sound_effect,
};
use crate::services::llm::LlmClient;
use crate::services::panels::{Direction, PanelCollection};
use crate::services::script::generate_script;
use crate::utils::image::InlineImage;
use anyhow::{anyhow, Result};
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

const DEFAULT_TITLE: &str = "My Comic";

/// Everything that can happen to a session, from the user or from a
/// settled request.
#[derive(Debug, Clone)]
pub enum Event {
    Submit { story: String, style: Style },
    AnalysisSucceeded(Analysis),
    AnalysisFailed(String),
    CancelReview,
    ConfirmCharacters(Vec<Character>),
    ScriptReceived(Vec<PanelSpec>),
    ScriptFailed(String),
    PanelImageSettled { id: PanelId, image: Option<InlineImage> },
    RegenerateRequested { id: PanelId, description: String },
    RefineRequested { id: PanelId, instruction: String },
    RefineSettled { id: PanelId, image: Option<InlineImage> },
    UpdatePanel { id: PanelId, update: PanelUpdate },
    MovePanel { index: usize, direction: Direction },
    DismissError,
    Reset,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Submit { .. } => "submit",
            Event::AnalysisSucceeded(_) => "analysis succeeded",
            Event::AnalysisFailed(_) => "analysis failed",
            Event::CancelReview => "cancel review",
            Event::ConfirmCharacters(_) => "confirm characters",
            Event::ScriptReceived(_) => "script received",
            Event::ScriptFailed(_) => "script failed",
            Event::PanelImageSettled { .. } => "panel image settled",
            Event::RegenerateRequested { .. } => "regenerate panel",
            Event::RefineRequested { .. } => "refine panel",
            Event::RefineSettled { .. } => "refine settled",
            Event::UpdatePanel { .. } => "update panel",
            Event::MovePanel { .. } => "move panel",
            Event::DismissError => "dismiss error",
            Event::Reset => "reset",
        }
    }
}

/// Requests the reducer asks the driver to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    AnalyzeStory {
        story: String,
    },
    GenerateScript {
        story: String,
        characters: Vec<Character>,
    },
    GeneratePanelImage {
        id: PanelId,
        description: String,
        style_modifier: String,
    },
    RefinePanelImage {
        id: PanelId,
        image: InlineImage,
        instruction: String,
    },
}

impl Effect {
    fn is_panel_job(&self) -> bool {
        matches!(
            self,
            Effect::GeneratePanelImage { .. } | Effect::RefinePanelImage { .. }
        )
    }
}

/// The single live comic-making session. Only [`Session::apply`] mutates it.
#[derive(Debug, Clone, Default)]
pub struct Session {
    phase: Phase,
    story_text: String,
    style: Option<Style>,
    analysis: Option<Analysis>,
    panels: PanelCollection,
    title: String,
    error_message: Option<String>,
    outstanding: HashSet<PanelId>,
    next_panel_id: PanelId,
}

impl Session {
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn story_text(&self) -> &str {
        &self.story_text
    }

    pub fn style(&self) -> Option<&Style> {
        self.style.as_ref()
    }

    pub fn analysis(&self) -> Option<&Analysis> {
        self.analysis.as_ref()
    }

    pub fn panels(&self) -> &PanelCollection {
        &self.panels
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Fails with the stage message while the session is in [`Phase::Error`].
    pub fn ensure_ok(&self) -> Result<()> {
        match (self.phase, &self.error_message) {
            (Phase::Error, Some(message)) => Err(anyhow!("{}", message)),
            (Phase::Error, None) => Err(anyhow!("session failed")),
            _ => Ok(()),
        }
    }

    /// Panels from the initial fan-out that have not settled yet.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    fn style_modifier(&self) -> String {
        self.style
            .as_ref()
            .map(|s| s.prompt_modifier.clone())
            .unwrap_or_default()
    }

    /// Applies one event and returns the requests it triggers. Events that
    /// make no sense in the current phase are rejected without touching the
    /// session.
    pub fn apply(&mut self, event: Event) -> Result<Vec<Effect>, SessionError> {
        match (self.phase, event) {
            (Phase::Idle, Event::Submit { story, style }) => {
                let story = story.trim().to_string();
                if story.is_empty() {
                    return Err(SessionError::EmptyStory);
                }
                self.title = derive_title(&story);
                self.story_text = story.clone();
                self.style = Some(style);
                self.analysis = None;
                self.error_message = None;
                self.phase = Phase::AnalyzingStory;
                Ok(vec![Effect::AnalyzeStory { story }])
            }
            (Phase::AnalyzingStory, Event::AnalysisSucceeded(analysis)) => {
                self.analysis = Some(analysis);
                self.phase = Phase::ReviewAnalysis;
                Ok(vec![])
            }
            (Phase::AnalyzingStory, Event::AnalysisFailed(_)) => {
                self.fail(ANALYSIS_FAILED_MESSAGE);
                Ok(vec![])
            }
            (Phase::ReviewAnalysis, Event::CancelReview) => {
                self.analysis = None;
                self.phase = Phase::Idle;
                Ok(vec![])
            }
            (Phase::ReviewAnalysis, Event::ConfirmCharacters(characters)) => {
                // edited characters feed the script, not the analysis
                self.phase = Phase::GeneratingScript;
                Ok(vec![Effect::GenerateScript {
                    story: self.story_text.clone(),
                    characters,
                }])
            }
            (Phase::GeneratingScript, Event::ScriptReceived(specs)) => {
                let ids = self.panels.seed(specs, &mut self.next_panel_id);
                if ids.is_empty() {
                    self.phase = Phase::Complete;
                    return Ok(vec![]);
                }

                self.outstanding = ids.iter().copied().collect();
                self.phase = Phase::GeneratingImages;
                let style_modifier = self.style_modifier();
                Ok(self
                    .panels
                    .iter()
                    .map(|p| Effect::GeneratePanelImage {
                        id: p.id,
                        description: p.description.clone(),
                        style_modifier: style_modifier.clone(),
                    })
                    .collect())
            }
            (Phase::GeneratingScript, Event::ScriptFailed(_)) => {
                self.fail(GENERATION_FAILED_MESSAGE);
                Ok(vec![])
            }
            (phase, Event::PanelImageSettled { id, image }) if phase.has_panels() => {
                self.panels.resolve_image(id, image);
                self.outstanding.remove(&id);
                if self.phase == Phase::GeneratingImages && self.outstanding.is_empty() {
                    info!("All panel images settled");
                    self.phase = Phase::Complete;
                }
                Ok(vec![])
            }
            (phase, Event::RegenerateRequested { id, description }) if phase.has_panels() => {
                if self.panels.get(id).map_or(true, |p| p.is_generating) {
                    debug!("Ignoring regenerate for busy or unknown panel {}", id);
                    return Ok(vec![]);
                }
                self.panels.begin_regenerate(id, &description);
                let description = self
                    .panels
                    .get(id)
                    .map(|p| p.description.clone())
                    .unwrap_or(description);
                Ok(vec![Effect::GeneratePanelImage {
                    id,
                    description,
                    style_modifier: self.style_modifier(),
                }])
            }
            (phase, Event::RefineRequested { id, instruction }) if phase.has_panels() => {
                if instruction.trim().is_empty()
                    || self.panels.get(id).map_or(true, |p| p.is_generating)
                {
                    debug!("Ignoring refine for panel {}", id);
                    return Ok(vec![]);
                }
                Ok(self
                    .panels
                    .begin_refine(id)
                    .map(|image| Effect::RefinePanelImage {
                        id,
                        image,
                        instruction: instruction.trim().to_string(),
                    })
                    .into_iter()
                    .collect())
            }
            (phase, Event::RefineSettled { id, image }) if phase.has_panels() => {
                self.panels.resolve_refine(id, image);
                Ok(vec![])
            }
            (phase, Event::UpdatePanel { id, update }) if phase.has_panels() => {
                self.panels.update_fields(id, &update);
                Ok(vec![])
            }
            (phase, Event::MovePanel { index, direction }) if phase.has_panels() => {
                self.panels.reorder(index, direction);
                Ok(vec![])
            }
            (Phase::Error, Event::DismissError) => {
                self.error_message = None;
                self.analysis = None;
                self.panels.clear();
                self.outstanding.clear();
                self.phase = Phase::Idle;
                Ok(vec![])
            }
            (Phase::Idle, Event::Reset) => Ok(vec![]),
            (_, Event::Reset) => {
                *self = Session {
                    next_panel_id: self.next_panel_id,
                    ..Default::default()
                };
                Ok(vec![])
            }
            (phase, event) => Err(SessionError::InvalidTransition {
                phase,
                event: event.name(),
            }),
        }
    }

    fn fail(&mut self, message: &str) {
        self.error_message = Some(message.to_string());
        self.phase = Phase::Error;
    }
}

/// Text before the first full stop, or a generic title.
pub fn derive_title(story: &str) -> String {
    let head = story.split('.').next().unwrap_or_default().trim();
    if head.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        head.to_string()
    }
}

struct Outcome {
    event: Event,
    failure: Option<anyhow::Error>,
}

impl Outcome {
    fn ok(event: Event) -> Self {
        Self {
            event,
            failure: None,
        }
    }
}

async fn execute(llm: &dyn LlmClient, effect: Effect) -> Outcome {
    match effect {
        Effect::AnalyzeStory { story } => match analyze_story(llm, &story).await {
            Ok(analysis) => Outcome::ok(Event::AnalysisSucceeded(analysis)),
            Err(e) => {
                error!("Story analysis failed: {:#}", e);
                Outcome {
                    event: Event::AnalysisFailed(format!("{:#}", e)),
                    failure: Some(e),
                }
            }
        },
        Effect::GenerateScript { story, characters } => {
            match generate_script(llm, &story, &characters).await {
                Ok(specs) => Outcome::ok(Event::ScriptReceived(specs)),
                Err(e) => {
                    error!("Error in generation flow: {:#}", e);
                    Outcome {
                        event: Event::ScriptFailed(format!("{:#}", e)),
                        failure: Some(e),
                    }
                }
            }
        }
        Effect::GeneratePanelImage {
            id,
            description,
            style_modifier,
        } => {
            let image = generate_panel_image(llm, &description, &style_modifier).await;
            if image.is_none() {
                warn!("Panel {} left without an image", id);
            }
            Outcome::ok(Event::PanelImageSettled { id, image })
        }
        Effect::RefinePanelImage {
            id,
            image,
            instruction,
        } => match refine_panel_image(llm, &image, &instruction).await {
            Ok(refined) => Outcome::ok(Event::RefineSettled {
                id,
                image: Some(refined),
            }),
            Err(e) => {
                warn!("Failed to refine image for panel {}: {:#}", id, e);
                Outcome {
                    event: Event::RefineSettled { id, image: None },
                    failure: Some(e),
                }
            }
        },
    }
}

/// Drives a [`Session`] against a live [`LlmClient`]: feeds user events to
/// the reducer, runs the requested effects and feeds their results back.
pub struct ComicWorkflow {
    config: Config,
    llm: Arc<dyn LlmClient>,
    session: Session,
    show_progress: bool,
}

impl ComicWorkflow {
    pub fn new(config: Config, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            config,
            llm,
            session: Session::default(),
            show_progress: false,
        }
    }

    /// Draw a progress bar while panel images are being generated.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Runs story analysis. Ends in `ReviewAnalysis`, or `Error` when the
    /// analysis request fails.
    pub async fn submit(&mut self, story: &str, style: Style) -> Result<Phase> {
        self.dispatch(Event::Submit {
            story: story.to_string(),
            style,
        })
        .await?;
        Ok(self.session.phase())
    }

    pub async fn cancel_review(&mut self) -> Result<()> {
        self.dispatch(Event::CancelReview).await?;
        Ok(())
    }

    /// Generates the script and every panel image. Ends in `Complete`, or
    /// `Error` when the script request fails.
    pub async fn confirm_characters(&mut self, characters: Vec<Character>) -> Result<Phase> {
        self.dispatch(Event::ConfirmCharacters(characters)).await?;
        Ok(self.session.phase())
    }

    pub async fn regenerate_panel(&mut self, id: PanelId, description: &str) -> Result<()> {
        self.dispatch(Event::RegenerateRequested {
            id,
            description: description.to_string(),
        })
        .await?;
        Ok(())
    }

    /// Refines a panel's image. On failure the panel keeps its previous
    /// image and the error is returned.
    pub async fn refine_panel(&mut self, id: PanelId, instruction: &str) -> Result<()> {
        let failures = self
            .dispatch(Event::RefineRequested {
                id,
                instruction: instruction.to_string(),
            })
            .await?;
        match failures.into_iter().next() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn update_panel(&mut self, id: PanelId, update: PanelUpdate) -> Result<()> {
        self.dispatch(Event::UpdatePanel { id, update }).await?;
        Ok(())
    }

    pub async fn move_panel(&mut self, index: usize, direction: Direction) -> Result<()> {
        self.dispatch(Event::MovePanel { index, direction }).await?;
        Ok(())
    }

    pub async fn dismiss_error(&mut self) -> Result<()> {
        self.dispatch(Event::DismissError).await?;
        Ok(())
    }

    pub async fn reset(&mut self) -> Result<()> {
        self.dispatch(Event::Reset).await?;
        Ok(())
    }

    /// Builds a custom style from a reference image. Never fails; an
    /// unreadable answer yields a generic style description.
    pub async fn style_from_image(&self, image: &InlineImage) -> Style {
        let description = analyze_image_style(self.llm.as_ref(), image).await;
        Style::from_image_description(&description)
    }

    /// Asks for a sound effect matching the panel and stores it when one
    /// comes back.
    pub async fn suggest_sound_effect(&mut self, id: PanelId) -> Result<Option<String>> {
        let description = self
            .session
            .panels()
            .get(id)
            .map(|p| p.description.clone())
            .ok_or_else(|| anyhow!("no panel with id {}", id))?;

        let suggestion = suggest_sound_effect(self.llm.as_ref(), &description).await;
        if let Some(sound_effect) = &suggestion {
            self.update_panel(
                id,
                PanelUpdate {
                    sound_effect: Some(sound_effect.clone()),
                    ..Default::default()
                },
            )
            .await?;
        }
        Ok(suggestion)
    }

    /// Applies `event` and runs effects until the session is quiet. Returns
    /// the failures of requests that were absorbed into the session.
    async fn dispatch(&mut self, event: Event) -> Result<Vec<anyhow::Error>> {
        let mut pending: VecDeque<Effect> = self.session.apply(event)?.into();
        let mut failures = Vec::new();

        while !pending.is_empty() {
            let (panel_jobs, stage_jobs): (Vec<Effect>, Vec<Effect>) =
                pending.drain(..).partition(Effect::is_panel_job);

            for effect in stage_jobs {
                let outcome = execute(self.llm.as_ref(), effect).await;
                failures.extend(outcome.failure);
                pending.extend(self.session.apply(outcome.event)?);
            }

            if !panel_jobs.is_empty() {
                let follow_up = self.run_panel_jobs(panel_jobs, &mut failures).await?;
                pending.extend(follow_up);
            }
        }

        Ok(failures)
    }

    /// Issues every panel request concurrently and applies each result as
    /// soon as it arrives, keyed by panel id.
    async fn run_panel_jobs(
        &mut self,
        jobs: Vec<Effect>,
        failures: &mut Vec<anyhow::Error>,
    ) -> Result<Vec<Effect>> {
        let total = jobs.len();
        let limit = self.config.image_concurrency(total);
        info!("Generating {} panel image(s), up to {} at a time", total, limit);

        let pb = if self.show_progress && total > 1 {
            let pb = ProgressBar::new(total as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template(
                        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                    )?
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        let llm = self.llm.clone();
        let mut outcomes = futures_util::stream::iter(jobs)
            .map(|effect| {
                let llm = llm.clone();
                async move { execute(llm.as_ref(), effect).await }
            })
            .buffer_unordered(limit);

        let mut follow_up = Vec::new();
        while let Some(outcome) = outcomes.next().await {
            if let Some(pb) = &pb {
                pb.inc(1);
            }
            failures.extend(outcome.failure);
            follow_up.extend(self.session.apply(outcome.event)?);
            debug!("{} panel(s) outstanding", self.session.outstanding());
        }

        if let Some(pb) = pb {
            pb.finish_with_message("Panels complete");
        }
        Ok(follow_up)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::SessionError;
    use crate::core::state::LayoutHint;
    use crate::services::catalog::find_style;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex;

    const ANALYSIS_JSON: &str = r#"{
        "characters": [{"name": "Hero", "description": "Red cape, square jaw"}],
        "genre": "Action",
        "tone": "Heroic",
        "feedback": "Start wide."
    }"#;

    fn script_json(descriptions: &[&str]) -> String {
        let panels: Vec<Value> = descriptions
            .iter()
            .map(|d| {
                serde_json::json!({
                    "description": d,
                    "dialogue": "N/A",
                    "caption": "Night falls.",
                    "soundEffect": "N/A",
                    "layout": "square"
                })
            })
            .collect();
        serde_json::json!({ "panels": panels }).to_string()
    }

    // Mock LLM Client
    #[derive(Debug, Default)]
    struct MockLlm {
        analysis: Option<String>,
        script: Option<String>,
        failing_descriptions: Vec<String>,
        fail_refine: bool,
        json_prompts: Arc<Mutex<Vec<String>>>,
        image_prompts: Arc<Mutex<Vec<String>>>,
    }

    impl MockLlm {
        fn happy(descriptions: &[&str]) -> Self {
            Self {
                analysis: Some(ANALYSIS_JSON.to_string()),
                script: Some(script_json(descriptions)),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl LlmClient for MockLlm {
        async fn generate_json(&self, prompt: &str, _schema: &Value) -> Result<String> {
            self.json_prompts.lock().unwrap().push(prompt.to_string());
            let answer = if prompt.contains("for a comic book adaptation") {
                &self.analysis
            } else {
                &self.script
            };
            answer.clone().ok_or_else(|| anyhow!("Mock LLM error"))
        }

        async fn generate_text(&self, _prompt: &str, _image: Option<&InlineImage>) -> Result<String> {
            Ok("BOOM!".to_string())
        }

        async fn generate_image(
            &self,
            prompt: &str,
            source: Option<&InlineImage>,
        ) -> Result<InlineImage> {
            self.image_prompts.lock().unwrap().push(prompt.to_string());
            if source.is_some() {
                return if self.fail_refine {
                    Err(anyhow!("Mock refine error"))
                } else {
                    Ok(InlineImage::new("image/png", b"refined".to_vec()))
                };
            }
            if self.failing_descriptions.iter().any(|d| prompt.contains(d.as_str())) {
                return Err(anyhow!("Mock image error"));
            }
            Ok(InlineImage::new("image/png", prompt.as_bytes().to_vec()))
        }
    }

    fn superhero() -> Style {
        find_style("superhero").unwrap()
    }

    fn workflow(llm: MockLlm) -> ComicWorkflow {
        ComicWorkflow::new(Config::default(), Arc::new(llm))
    }

    fn specs(n: usize) -> Vec<PanelSpec> {
        (0..n)
            .map(|i| PanelSpec {
                description: format!("scene {}", i),
                dialogue: None,
                caption: None,
                sound_effect: None,
                layout: LayoutHint::Square,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_analysis_moves_to_review() -> Result<()> {
        let mut wf = workflow(MockLlm::happy(&["a"]));
        let phase = wf.submit("A hero flies over a city at night.", superhero()).await?;

        assert_eq!(phase, Phase::ReviewAnalysis);
        let analysis = wf.session().analysis().unwrap();
        assert_eq!(analysis.characters.len(), 1);
        assert_eq!(analysis.characters[0].name, "Hero");
        assert_eq!(analysis.genre, "Action");
        assert_eq!(wf.session().title(), "A hero flies over a city at night");
        Ok(())
    }

    #[tokio::test]
    async fn test_analysis_failure_sets_error_and_dismiss_keeps_story() -> Result<()> {
        let mut wf = workflow(MockLlm::default());
        let phase = wf.submit("A cat in the rain.", superhero()).await?;

        assert_eq!(phase, Phase::Error);
        assert_eq!(wf.session().error_message(), Some(ANALYSIS_FAILED_MESSAGE));
        let err = wf.session().ensure_ok().unwrap_err();
        assert_eq!(err.to_string(), ANALYSIS_FAILED_MESSAGE);

        wf.dismiss_error().await?;
        assert!(wf.session().ensure_ok().is_ok());
        assert_eq!(wf.session().phase(), Phase::Idle);
        assert_eq!(wf.session().error_message(), None);
        assert_eq!(wf.session().story_text(), "A cat in the rain.");
        assert_eq!(wf.session().style().unwrap().id, "superhero");
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_story_is_rejected() {
        let mut wf = workflow(MockLlm::happy(&["a"]));
        let err = wf.submit("   ", superhero()).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<SessionError>(),
            Some(&SessionError::EmptyStory)
        );
        assert_eq!(wf.session().phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_full_pipeline_completes_despite_panel_failures() -> Result<()> {
        let mut llm = MockLlm::happy(&["one", "two", "three", "four", "five"]);
        llm.failing_descriptions = vec!["two".to_string(), "four".to_string()];
        let mut wf = workflow(llm);

        wf.submit("A hero flies.", superhero()).await?;
        let characters = wf.session().analysis().unwrap().characters.clone();
        let phase = wf.confirm_characters(characters).await?;

        assert_eq!(phase, Phase::Complete);
        let panels = wf.session().panels();
        assert_eq!(panels.len(), 5);
        let ids: HashSet<PanelId> = panels.iter().map(|p| p.id).collect();
        assert_eq!(ids.len(), 5);
        assert!(panels.iter().all(|p| !p.is_generating));
        assert_eq!(panels.iter().filter(|p| p.image.is_none()).count(), 2);
        assert_eq!(panels.as_slice()[0].caption.as_deref(), Some("Night falls."));
        assert_eq!(panels.as_slice()[0].dialogue, None);

        // each image belongs to the panel that asked for it
        for panel in panels.iter().filter(|p| p.image.is_some()) {
            let bytes = &panel.image.as_ref().unwrap().data;
            let prompt = String::from_utf8_lossy(bytes);
            assert!(prompt.contains(&panel.description));
            assert!(prompt.starts_with("American superhero comic book style"));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_edited_character_reaches_script_prompt() -> Result<()> {
        let llm = MockLlm::happy(&["a"]);
        let prompts = llm.json_prompts.clone();
        let mut wf = workflow(llm);

        wf.submit("A hero flies over a city at night.", superhero()).await?;
        let mut characters = wf.session().analysis().unwrap().characters.clone();
        characters[0].visual_description = "Silver armor, green visor".to_string();
        wf.confirm_characters(characters).await?;

        let prompts = prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("- Hero: Silver armor, green visor"));
        assert!(!prompts[1].contains("Red cape"));
        Ok(())
    }

    #[tokio::test]
    async fn test_script_failure_sets_error() -> Result<()> {
        let mut llm = MockLlm::happy(&[]);
        llm.script = Some(r#"{"panels": [{"description": "x"}]}"#.to_string());
        let mut wf = workflow(llm);

        wf.submit("A hero flies.", superhero()).await?;
        let phase = wf.confirm_characters(vec![]).await?;

        assert_eq!(phase, Phase::Error);
        assert_eq!(wf.session().error_message(), Some(GENERATION_FAILED_MESSAGE));
        assert_eq!(
            wf.session().ensure_ok().unwrap_err().to_string(),
            GENERATION_FAILED_MESSAGE
        );
        assert!(wf.session().panels().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_script_completes_immediately() -> Result<()> {
        let mut wf = workflow(MockLlm::happy(&[]));
        wf.submit("A hero flies.", superhero()).await?;
        assert_eq!(wf.confirm_characters(vec![]).await?, Phase::Complete);
        assert!(wf.session().panels().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_regenerate_touches_only_its_panel() -> Result<()> {
        let mut llm = MockLlm::happy(&["one", "two", "three"]);
        llm.failing_descriptions = vec!["broken".to_string()];
        let mut wf = workflow(llm);
        wf.submit("A hero flies.", superhero()).await?;
        wf.confirm_characters(vec![]).await?;

        let before = wf.session().panels().clone();
        let target = before.as_slice()[1].id;

        wf.regenerate_panel(target, "two, from above").await?;
        let after = wf.session().panels();
        let panel = after.get(target).unwrap();
        assert_eq!(panel.description, "two, from above");
        assert!(String::from_utf8_lossy(&panel.image.as_ref().unwrap().data)
            .contains("two, from above"));
        for (old, new) in before.iter().zip(after.iter()).filter(|(p, _)| p.id != target) {
            assert_eq!(old, new);
        }

        wf.regenerate_panel(target, "broken panel").await?;
        let panel = wf.session().panels().get(target).unwrap();
        assert!(panel.image.is_none());
        assert!(!panel.is_generating);
        assert_eq!(wf.session().phase(), Phase::Complete);
        Ok(())
    }

    #[tokio::test]
    async fn test_refine_failure_keeps_image_and_surfaces_error() -> Result<()> {
        let mut llm = MockLlm::happy(&["one", "two"]);
        llm.fail_refine = true;
        let mut wf = workflow(llm);
        wf.submit("A hero flies.", superhero()).await?;
        wf.confirm_characters(vec![]).await?;

        let id = wf.session().panels().as_slice()[0].id;
        let original = wf.session().panels().get(id).unwrap().image.clone();

        assert!(wf.refine_panel(id, "make it rain").await.is_err());
        let panel = wf.session().panels().get(id).unwrap();
        assert_eq!(panel.image, original);
        assert!(!panel.is_generating);
        Ok(())
    }

    #[tokio::test]
    async fn test_refine_replaces_image() -> Result<()> {
        let llm = MockLlm::happy(&["one"]);
        let prompts = llm.image_prompts.clone();
        let mut wf = workflow(llm);
        wf.submit("A hero flies.", superhero()).await?;
        wf.confirm_characters(vec![]).await?;

        let id = wf.session().panels().as_slice()[0].id;
        wf.refine_panel(id, "add rain").await?;

        let panel = wf.session().panels().get(id).unwrap();
        assert_eq!(panel.image.as_ref().unwrap().data, b"refined");
        assert_eq!(prompts.lock().unwrap().last().unwrap(), "add rain");
        Ok(())
    }

    #[tokio::test]
    async fn test_suggest_sound_effect_updates_panel() -> Result<()> {
        let mut wf = workflow(MockLlm::happy(&["one"]));
        wf.submit("A hero flies.", superhero()).await?;
        wf.confirm_characters(vec![]).await?;

        let id = wf.session().panels().as_slice()[0].id;
        assert_eq!(wf.suggest_sound_effect(id).await?, Some("BOOM!".to_string()));
        assert_eq!(
            wf.session().panels().get(id).unwrap().sound_effect.as_deref(),
            Some("BOOM!")
        );
        assert!(wf.suggest_sound_effect(999).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_limited_concurrency_still_settles_everything() -> Result<()> {
        let mut config = Config::default();
        config.pipeline.image_concurrency = Some(1);
        let mut wf = ComicWorkflow::new(config, Arc::new(MockLlm::happy(&["a", "b", "c", "d"])));

        wf.submit("A hero flies.", superhero()).await?;
        assert_eq!(wf.confirm_characters(vec![]).await?, Phase::Complete);
        assert!(wf.session().panels().iter().all(|p| p.image.is_some()));
        Ok(())
    }

    #[tokio::test]
    async fn test_reset_reinitialises_but_keeps_ids_unique() -> Result<()> {
        let mut wf = workflow(MockLlm::happy(&["one", "two"]));
        wf.submit("A hero flies.", superhero()).await?;
        wf.confirm_characters(vec![]).await?;
        let first_ids: Vec<PanelId> = wf.session().panels().iter().map(|p| p.id).collect();

        wf.reset().await?;
        assert_eq!(wf.session().phase(), Phase::Idle);
        assert!(wf.session().panels().is_empty());
        assert!(wf.session().style().is_none());
        assert!(wf.session().analysis().is_none());
        assert_eq!(wf.session().story_text(), "");

        wf.submit("Another night.", superhero()).await?;
        wf.confirm_characters(vec![]).await?;
        assert!(wf
            .session()
            .panels()
            .iter()
            .all(|p| !first_ids.contains(&p.id)));
        Ok(())
    }

    #[test]
    fn test_results_apply_by_id_after_reorder() {
        let mut session = Session::default();
        session
            .apply(Event::Submit {
                story: "A story.".to_string(),
                style: superhero(),
            })
            .unwrap();
        session
            .apply(Event::AnalysisSucceeded(Analysis {
                characters: vec![],
                genre: "Action".to_string(),
                tone: "Dark".to_string(),
                feedback: String::new(),
            }))
            .unwrap();
        session.apply(Event::ConfirmCharacters(vec![])).unwrap();
        let effects = session.apply(Event::ScriptReceived(specs(3))).unwrap();
        assert_eq!(effects.len(), 3);
        assert_eq!(session.phase(), Phase::GeneratingImages);
        assert!(session.panels().iter().all(|p| p.is_generating && p.image.is_none()));

        let ids: Vec<PanelId> = session.panels().iter().map(|p| p.id).collect();
        session
            .apply(Event::MovePanel {
                index: 0,
                direction: Direction::Right,
            })
            .unwrap();

        for (n, id) in ids.iter().rev().enumerate() {
            session
                .apply(Event::PanelImageSettled {
                    id: *id,
                    image: Some(InlineImage::new("image/png", vec![*id as u8])),
                })
                .unwrap();
            assert_eq!(session.outstanding(), 2 - n);
            let expected = if n == 2 {
                Phase::Complete
            } else {
                Phase::GeneratingImages
            };
            assert_eq!(session.phase(), expected);
        }

        let order: Vec<PanelId> = session.panels().iter().map(|p| p.id).collect();
        assert_eq!(order, vec![ids[1], ids[0], ids[2]]);
        for panel in session.panels().iter() {
            assert_eq!(panel.image.as_ref().unwrap().data, vec![panel.id as u8]);
        }
    }

    #[test]
    fn test_update_panel_round_trip() {
        let mut session = Session::default();
        session
            .apply(Event::Submit {
                story: "A story.".to_string(),
                style: superhero(),
            })
            .unwrap();
        session
            .apply(Event::AnalysisSucceeded(Analysis {
                characters: vec![],
                genre: String::new(),
                tone: String::new(),
                feedback: String::new(),
            }))
            .unwrap();
        session.apply(Event::ConfirmCharacters(vec![])).unwrap();
        session.apply(Event::ScriptReceived(specs(2))).unwrap();

        let id = session.panels().as_slice()[1].id;
        let before = session.panels().get(id).unwrap().clone();
        session
            .apply(Event::UpdatePanel {
                id,
                update: PanelUpdate {
                    dialogue: Some("Hi".to_string()),
                    ..Default::default()
                },
            })
            .unwrap();

        let after = session.panels().get(id).unwrap();
        assert_eq!(after.dialogue.as_deref(), Some("Hi"));
        assert_eq!(after.description, before.description);
        assert_eq!(after.caption, before.caption);
        assert_eq!(after.sound_effect, before.sound_effect);
    }

    #[test]
    fn test_invalid_transitions_are_rejected() {
        let mut session = Session::default();
        let err = session.apply(Event::ConfirmCharacters(vec![])).unwrap_err();
        assert_eq!(
            err,
            SessionError::InvalidTransition {
                phase: Phase::Idle,
                event: "confirm characters",
            }
        );
        assert!(session.apply(Event::DismissError).is_err());
        assert!(session
            .apply(Event::MovePanel {
                index: 0,
                direction: Direction::Left
            })
            .is_err());
        assert!(session.apply(Event::Reset).unwrap().is_empty());
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[test]
    fn test_confirm_keeps_analysis_characters() {
        let mut session = Session::default();
        session
            .apply(Event::Submit {
                story: "A hero flies.".to_string(),
                style: superhero(),
            })
            .unwrap();
        session
            .apply(Event::AnalysisSucceeded(Analysis {
                characters: vec![Character {
                    name: "Hero".to_string(),
                    visual_description: "Red cape".to_string(),
                }],
                genre: "Action".to_string(),
                tone: "Heroic".to_string(),
                feedback: String::new(),
            }))
            .unwrap();

        let edited = vec![Character {
            name: "Hero".to_string(),
            visual_description: "Silver armor".to_string(),
        }];
        let effects = session
            .apply(Event::ConfirmCharacters(edited.clone()))
            .unwrap();

        assert_eq!(
            effects,
            vec![Effect::GenerateScript {
                story: "A hero flies.".to_string(),
                characters: edited,
            }]
        );
        assert_eq!(
            session.analysis().unwrap().characters[0].visual_description,
            "Red cape"
        );
    }

    #[test]
    fn test_cancel_review_returns_to_idle() {
        let mut session = Session::default();
        session
            .apply(Event::Submit {
                story: "A story.".to_string(),
                style: superhero(),
            })
            .unwrap();
        session
            .apply(Event::AnalysisSucceeded(Analysis {
                characters: vec![],
                genre: String::new(),
                tone: String::new(),
                feedback: String::new(),
            }))
            .unwrap();
        session.apply(Event::CancelReview).unwrap();

        assert_eq!(session.phase(), Phase::Idle);
        assert!(session.analysis().is_none());
        assert_eq!(session.story_text(), "A story.");
    }

    #[test]
    fn test_derive_title() {
        assert_eq!(derive_title("The detective walked in. Rain fell."), "The detective walked in");
        assert_eq!(derive_title("No full stop"), "No full stop");
        assert_eq!(derive_title(". starts with a dot"), "My Comic");
    }
}
