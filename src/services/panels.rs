use crate::core::state::{Panel, PanelId, PanelSpec, PanelUpdate};
use crate::utils::image::InlineImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
}

/// Ordered panels of the current comic. Order is the reading order; ids
/// never change once assigned, so results can be matched after a reorder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PanelCollection {
    panels: Vec<Panel>,
}

impl PanelCollection {
    /// Replaces the collection with freshly scripted, pending panels.
    /// `next_id` is advanced past every id handed out.
    pub fn seed(&mut self, specs: Vec<PanelSpec>, next_id: &mut PanelId) -> Vec<PanelId> {
        self.panels = specs
            .into_iter()
            .map(|spec| {
                let id = *next_id;
                *next_id += 1;
                Panel::pending(id, spec)
            })
            .collect();
        self.panels.iter().map(|p| p.id).collect()
    }

    pub fn len(&self) -> usize {
        self.panels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Panel> {
        self.panels.iter()
    }

    pub fn as_slice(&self) -> &[Panel] {
        &self.panels
    }

    pub fn get(&self, id: PanelId) -> Option<&Panel> {
        self.panels.iter().find(|p| p.id == id)
    }

    fn get_mut(&mut self, id: PanelId) -> Option<&mut Panel> {
        self.panels.iter_mut().find(|p| p.id == id)
    }

    pub fn position(&self, id: PanelId) -> Option<usize> {
        self.panels.iter().position(|p| p.id == id)
    }

    pub fn clear(&mut self) {
        self.panels.clear();
    }

    /// Swaps the panel at `index` with its neighbour. Returns false and
    /// leaves the order alone at either end or for an out-of-range index.
    pub fn reorder(&mut self, index: usize, direction: Direction) -> bool {
        if index >= self.panels.len() {
            return false;
        }
        let target = match direction {
            Direction::Left if index > 0 => index - 1,
            Direction::Right if index + 1 < self.panels.len() => index + 1,
            _ => return false,
        };
        self.panels.swap(index, target);
        true
    }

    pub fn update_fields(&mut self, id: PanelId, update: &PanelUpdate) -> bool {
        match self.get_mut(id) {
            Some(panel) => {
                panel.apply_update(update);
                true
            }
            None => false,
        }
    }

    /// Marks a panel as regenerating with a (possibly new) description.
    pub fn begin_regenerate(&mut self, id: PanelId, description: &str) -> bool {
        match self.get_mut(id) {
            Some(panel) => {
                if !description.trim().is_empty() {
                    panel.description = description.trim().to_string();
                }
                panel.is_generating = true;
                true
            }
            None => false,
        }
    }

    /// Marks a panel as refining and hands back its current image. Panels
    /// without an image cannot be refined.
    pub fn begin_refine(&mut self, id: PanelId) -> Option<InlineImage> {
        let panel = self.get_mut(id)?;
        let image = panel.image.clone()?;
        panel.is_generating = true;
        Some(image)
    }

    /// Settles a generate or regenerate request. `None` leaves the panel
    /// without an image.
    pub fn resolve_image(&mut self, id: PanelId, image: Option<InlineImage>) -> bool {
        match self.get_mut(id) {
            Some(panel) => {
                panel.image = image;
                panel.is_generating = false;
                true
            }
            None => false,
        }
    }

    /// Settles a refine request. `None` keeps the previous image.
    pub fn resolve_refine(&mut self, id: PanelId, image: Option<InlineImage>) -> bool {
        match self.get_mut(id) {
            Some(panel) => {
                if let Some(image) = image {
                    panel.image = Some(image);
                }
                panel.is_generating = false;
                true
            }
            None => false,
        }
    }
}
