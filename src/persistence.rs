use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::viewport::LayoutAnchor;

/// Last viewed position of one document
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SavedViewport {
    pub scroll_y: f32,
    pub zoom: f32,
    pub pan_x: f32,
    /// Screen width the position was recorded at
    pub reference_width: f32,
    /// Page and in-page fraction at the top of the screen. Survives width
    /// changes exactly, since page gaps do not scale with the fit factor.
    #[serde(default)]
    pub anchor: Option<LayoutAnchor>,
    pub saved_at: chrono::DateTime<chrono::Utc>,
}

impl SavedViewport {
    /// Scroll offset for a screen `current_width` wide, by linear rescale.
    /// Only used for positions saved without an anchor.
    #[must_use]
    pub fn scroll_for_width(&self, current_width: f32) -> f32 {
        if self.reference_width > 0.0 && current_width > 0.0 {
            self.scroll_y * current_width / self.reference_width
        } else {
            self.scroll_y
        }
    }
}

/// Key-value store for viewport positions, keyed by document id
pub trait ViewportPersistence {
    fn load(&self, document_id: &str) -> Option<SavedViewport>;
    fn save(&mut self, document_id: &str, viewport: SavedViewport) -> anyhow::Result<()>;
}

/// JSON file of saved positions; ephemeral when created without a path
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonViewportStore {
    documents: HashMap<String, SavedViewport>,
    #[serde(skip)]
    file_path: Option<PathBuf>,
}

impl JsonViewportStore {
    pub fn ephemeral() -> Self {
        Self {
            documents: HashMap::new(),
            file_path: None,
        }
    }

    pub fn with_file(file_path: &Path) -> Self {
        Self {
            documents: HashMap::new(),
            file_path: Some(file_path.to_path_buf()),
        }
    }

    pub fn load_or_ephemeral(file_path: Option<&Path>) -> Self {
        match file_path {
            Some(path) => Self::load_from_file(path).unwrap_or_else(|e| {
                log::error!("Failed to load viewport positions from {}: {}", path.display(), e);
                Self::with_file(path)
            }),
            None => Self::ephemeral(),
        }
    }

    pub fn load_from_file(file_path: &Path) -> anyhow::Result<Self> {
        if file_path.exists() {
            let content = fs::read_to_string(file_path)?;
            let mut store: Self = serde_json::from_str(&content)?;
            store.file_path = Some(file_path.to_path_buf());
            Ok(store)
        } else {
            Ok(Self::with_file(file_path))
        }
    }

    pub fn flush(&self) -> anyhow::Result<()> {
        match &self.file_path {
            Some(path) => {
                let content = serde_json::to_string_pretty(self)?;
                fs::write(path, content)?;
                Ok(())
            }
            // Ephemeral stores never touch disk
            None => Ok(()),
        }
    }

    pub fn get_most_recent(&self) -> Option<(&str, &SavedViewport)> {
        self.documents
            .iter()
            .max_by_key(|(_, saved)| saved.saved_at)
            .map(|(id, saved)| (id.as_str(), saved))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl ViewportPersistence for JsonViewportStore {
    fn load(&self, document_id: &str) -> Option<SavedViewport> {
        self.documents.get(document_id).copied()
    }

    fn save(&mut self, document_id: &str, viewport: SavedViewport) -> anyhow::Result<()> {
        self.documents.insert(document_id.to_string(), viewport);
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn saved(scroll_y: f32, reference_width: f32) -> SavedViewport {
        SavedViewport {
            scroll_y,
            zoom: 1.5,
            pan_x: -20.0,
            reference_width,
            anchor: None,
            saved_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn ephemeral_store_keeps_positions_in_memory() {
        let mut store = JsonViewportStore::ephemeral();
        store.save("a.pdf", saved(100.0, 400.0)).expect("save");
        assert_eq!(store.load("a.pdf").map(|s| s.scroll_y), Some(100.0));
        assert_eq!(store.load("b.pdf"), None);
    }

    #[test]
    fn file_store_survives_reload() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("viewports.json");

        let mut store = JsonViewportStore::load_or_ephemeral(Some(&path));
        assert!(store.is_empty());
        store.save("a.pdf", saved(250.0, 400.0)).expect("save");

        let reloaded = JsonViewportStore::load_from_file(&path).expect("reload");
        assert_eq!(reloaded.len(), 1);
        let position = reloaded.load("a.pdf").expect("saved position");
        assert_eq!(position.scroll_y, 250.0);
        assert_eq!(position.zoom, 1.5);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("viewports.json");
        fs::write(&path, "{ not json").expect("write");

        let store = JsonViewportStore::load_or_ephemeral(Some(&path));
        assert!(store.is_empty());
    }

    #[test]
    fn scroll_rescales_with_width() {
        let position = saved(1000.0, 400.0);
        assert_eq!(position.scroll_for_width(800.0), 2000.0);
        assert_eq!(position.scroll_for_width(400.0), 1000.0);
        assert_eq!(saved(1000.0, 0.0).scroll_for_width(800.0), 1000.0);
    }

    #[test]
    fn anchor_round_trips_and_is_optional() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("viewports.json");

        let mut position = saved(1000.0, 400.0);
        position.anchor = Some(LayoutAnchor {
            page: 412,
            fraction: 0.25,
        });
        let mut store = JsonViewportStore::with_file(&path);
        store.save("a.pdf", position).expect("save");

        let reloaded = JsonViewportStore::load_from_file(&path).expect("reload");
        assert_eq!(reloaded.load("a.pdf").and_then(|s| s.anchor), position.anchor);

        // Files written before anchors existed still load
        let legacy = r#"{"documents":{"b.pdf":{"scroll_y":5.0,"zoom":1.0,"pan_x":0.0,
            "reference_width":400.0,"saved_at":"2024-01-01T00:00:00Z"}}}"#;
        fs::write(&path, legacy).expect("write");
        let reloaded = JsonViewportStore::load_from_file(&path).expect("reload legacy");
        assert_eq!(reloaded.load("b.pdf").map(|s| s.anchor), Some(None));
    }

    #[test]
    fn most_recent_wins() {
        let mut store = JsonViewportStore::ephemeral();
        let mut older = saved(1.0, 400.0);
        older.saved_at -= chrono::Duration::hours(1);
        store.save("old.pdf", older).expect("save");
        store.save("new.pdf", saved(2.0, 400.0)).expect("save");

        assert_eq!(store.get_most_recent().map(|(id, _)| id), Some("new.pdf"));
    }
}
