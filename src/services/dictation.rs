use anyhow::{bail, Result};
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinHandle;

/// Receives each final transcript fragment as it is recognised.
pub type TranscriptCallback = Box<dyn FnMut(&str) + Send>;

/// An optional source of spoken story text. Nothing in the pipeline needs
/// one; the front end may offer it next to the text prompt.
#[async_trait]
pub trait Dictation: Send {
    async fn start(&mut self, on_text: TranscriptCallback) -> Result<()>;
    async fn stop(&mut self) -> Result<()>;
    fn is_listening(&self) -> bool;
}

/// Story text accumulated from dictation. Fragments are joined with a
/// single space.
#[derive(Debug, Clone, Default)]
pub struct StoryDraft {
    text: Arc<Mutex<String>>,
}

impl StoryDraft {
    pub fn new(initial: &str) -> Self {
        Self {
            text: Arc::new(Mutex::new(initial.trim().to_string())),
        }
    }

    pub fn append(&self, fragment: &str) {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return;
        }
        let mut text = self.text.lock().unwrap_or_else(|e| e.into_inner());
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(fragment);
    }

    pub fn text(&self) -> String {
        self.text.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// A callback that appends every fragment to this draft.
    pub fn sink(&self) -> TranscriptCallback {
        let draft = self.clone();
        Box::new(move |fragment| draft.append(fragment))
    }
}

/// Treats every line of a reader as one final transcript fragment. Used to
/// pipe an external speech-to-text tool into the story prompt.
pub struct LineDictation<R> {
    reader: Option<R>,
    task: Option<JoinHandle<()>>,
}

impl<R> LineDictation<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
            task: None,
        }
    }

    /// Waits until the reader is exhausted.
    pub async fn finished(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<R> Dictation for LineDictation<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    async fn start(&mut self, mut on_text: TranscriptCallback) -> Result<()> {
        let Some(reader) = self.reader.take() else {
            bail!("dictation source already consumed");
        };
        self.task = Some(tokio::spawn(async move {
            let mut lines = reader.lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => on_text(&line),
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Dictation error: {}", e);
                        break;
                    }
                }
            }
            debug!("Dictation source closed");
        }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
            // wait for the reader task to be gone so no late fragment lands
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    fn is_listening(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}
