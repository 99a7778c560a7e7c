use crate::core::io::Storage;
use crate::core::state::LayoutHint;
use crate::services::workflow::Session;
use anyhow::{Context, Result};
use log::{debug, info};
use serde::Serialize;
use std::path::Path;

pub const SCRIPT_FILE: &str = "script.json";
const PANEL_FILE_PREFIX: &str = "panel_";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportedScript<'a> {
    title: &'a str,
    style: Option<&'a str>,
    panels: Vec<ExportedPanel<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportedPanel<'a> {
    id: u64,
    description: &'a str,
    dialogue: Option<&'a str>,
    caption: Option<&'a str>,
    sound_effect: Option<&'a str>,
    layout: LayoutHint,
    image: Option<String>,
}

fn join(folder: &str, file: &str) -> String {
    Path::new(folder).join(file).to_string_lossy().to_string()
}

/// Writes the comic in reading order: one `panel_NN.<ext>` per panel that
/// has an image, plus `script.json`. Panel files left by an earlier export
/// are removed first. Returns the written paths.
pub async fn export_comic(
    storage: &dyn Storage,
    folder: &str,
    session: &Session,
) -> Result<Vec<String>> {
    for entry in storage.list(folder).await? {
        let is_stale = Path::new(&entry)
            .file_name()
            .map(|n| n.to_string_lossy().starts_with(PANEL_FILE_PREFIX))
            .unwrap_or(false);
        if is_stale {
            debug!("Removing stale {}", entry);
            storage.delete(&entry).await?;
        }
    }

    let mut written = Vec::new();
    let mut panels = Vec::new();
    for (index, panel) in session.panels().iter().enumerate() {
        let image_file = match &panel.image {
            Some(image) => {
                let file = format!(
                    "{}{:02}.{}",
                    PANEL_FILE_PREFIX,
                    index + 1,
                    image.extension()
                );
                let path = join(folder, &file);
                storage
                    .write(&path, &image.data)
                    .await
                    .with_context(|| format!("Failed to write {}", path))?;
                written.push(path);
                Some(file)
            }
            None => None,
        };

        panels.push(ExportedPanel {
            id: panel.id,
            description: &panel.description,
            dialogue: panel.dialogue.as_deref(),
            caption: panel.caption.as_deref(),
            sound_effect: panel.sound_effect.as_deref(),
            layout: panel.layout,
            image: image_file,
        });
    }

    let script = ExportedScript {
        title: session.title(),
        style: session.style().map(|s| s.id.as_str()),
        panels,
    };
    let script_path = join(folder, SCRIPT_FILE);
    storage
        .write(
            &script_path,
            serde_json::to_string_pretty(&script)?.as_bytes(),
        )
        .await?;
    written.push(script_path);

    info!("Exported {} file(s) to {}", written.len(), folder);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::core::state::{Analysis, PanelSpec};
    use crate::services::catalog::find_style;
    use crate::services::workflow::Event;
    use crate::utils::image::InlineImage;
    use serde_json::Value;

    fn finished_session() -> Session {
        let mut session = Session::default();
        session
            .apply(Event::Submit {
                story: "The detective walked in. Rain fell.".to_string(),
                style: find_style("noir").unwrap(),
            })
            .unwrap();
        session
            .apply(Event::AnalysisSucceeded(Analysis {
                characters: vec![],
                genre: "Noir".to_string(),
                tone: "Moody".to_string(),
                feedback: String::new(),
            }))
            .unwrap();
        session.apply(Event::ConfirmCharacters(vec![])).unwrap();
        let specs = ["alley", "cat", "eyes"]
            .iter()
            .map(|d| PanelSpec {
                description: d.to_string(),
                dialogue: None,
                caption: Some("Midnight.".to_string()),
                sound_effect: None,
                layout: LayoutHint::Wide,
            })
            .collect();
        session.apply(Event::ScriptReceived(specs)).unwrap();

        let ids: Vec<u64> = session.panels().iter().map(|p| p.id).collect();
        session
            .apply(Event::PanelImageSettled {
                id: ids[0],
                image: Some(InlineImage::new("image/png", vec![1, 2, 3])),
            })
            .unwrap();
        session
            .apply(Event::PanelImageSettled {
                id: ids[1],
                image: None,
            })
            .unwrap();
        session
            .apply(Event::PanelImageSettled {
                id: ids[2],
                image: Some(InlineImage::new("image/jpeg", vec![4])),
            })
            .unwrap();
        session
    }

    #[tokio::test]
    async fn test_export_writes_images_and_script() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let folder = temp_dir.path().join("out");
        let folder = folder.to_str().unwrap();
        let storage = NativeStorage::new();

        let written = export_comic(&storage, folder, &finished_session()).await?;
        assert_eq!(written.len(), 3);
        assert_eq!(std::fs::read(Path::new(folder).join("panel_01.png"))?, vec![1, 2, 3]);
        assert_eq!(std::fs::read(Path::new(folder).join("panel_03.jpg"))?, vec![4]);
        assert!(!Path::new(folder).join("panel_02.png").exists());

        let script: Value =
            serde_json::from_str(&std::fs::read_to_string(Path::new(folder).join(SCRIPT_FILE))?)?;
        assert_eq!(script["title"], "The detective walked in");
        assert_eq!(script["style"], "noir");
        assert_eq!(script["panels"].as_array().unwrap().len(), 3);
        assert_eq!(script["panels"][0]["layout"], "wide");
        assert_eq!(script["panels"][0]["caption"], "Midnight.");
        assert!(script["panels"][0]["dialogue"].is_null());
        assert!(script["panels"][0]["soundEffect"].is_null());
        assert!(script["panels"][1]["image"].is_null());
        assert_eq!(script["panels"][2]["image"], "panel_03.jpg");
        Ok(())
    }

    #[tokio::test]
    async fn test_export_removes_stale_panels() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let folder = temp_dir.path().to_str().unwrap().to_string();
        std::fs::write(temp_dir.path().join("panel_09.png"), b"old")?;
        std::fs::write(temp_dir.path().join("notes.txt"), b"keep")?;

        export_comic(&NativeStorage::new(), &folder, &finished_session()).await?;

        assert!(!temp_dir.path().join("panel_09.png").exists());
        assert!(temp_dir.path().join("notes.txt").exists());
        Ok(())
    }
}
