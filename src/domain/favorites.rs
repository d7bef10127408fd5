//! Favorite colors
//!
//! A short, ordered list of unique colors that is written back to storage
//! after every change.

use crate::domain::color::RgbColor;
use crate::error::{LedError, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

pub const MAX_FAVORITES: usize = 5;

/// Where the favorites list lives between runs
pub trait FavoritesStorage: Send {
    /// Raw persisted text, `None` when nothing has been saved yet
    fn load(&self) -> Result<Option<String>>;
    fn save(&self, encoded: &str) -> Result<()>;
}

/// Favorites kept in a JSON file next to the settings
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FavoritesStorage for JsonFileStorage {
    fn load(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, encoded: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, encoded)?;
        Ok(())
    }
}

/// Volatile storage, shared so callers can inspect what was written
#[derive(Clone, Default)]
pub struct MemoryStorage {
    contents: Arc<Mutex<Option<String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(contents: impl Into<String>) -> Self {
        Self {
            contents: Arc::new(Mutex::new(Some(contents.into()))),
        }
    }

    pub fn contents(&self) -> Option<String> {
        self.contents.lock().ok().and_then(|c| c.clone())
    }
}

impl FavoritesStorage for MemoryStorage {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.contents())
    }

    fn save(&self, encoded: &str) -> Result<()> {
        let mut guard = self
            .contents
            .lock()
            .map_err(|_| LedError::PersistenceCorruption("favorites lock poisoned".into()))?;
        *guard = Some(encoded.to_string());
        Ok(())
    }
}

pub struct FavoritesStore {
    favorites: Vec<RgbColor>,
    storage: Box<dyn FavoritesStorage>,
}

impl FavoritesStore {
    /// Restore the list from storage. Unreadable storage yields an empty list.
    pub fn load(storage: Box<dyn FavoritesStorage>) -> Self {
        let favorites = match storage.load() {
            Ok(Some(contents)) => decode_favorites(&contents),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Could not read saved favorites: {}", e);
                Vec::new()
            }
        };
        info!("Loaded {} favorite color(s)", favorites.len());

        Self { favorites, storage }
    }

    pub fn add(&mut self, color: RgbColor) -> bool {
        if !self.can_add_more() || self.favorites.contains(&color) {
            return false;
        }
        self.favorites.push(color);
        self.persist();
        true
    }

    pub fn remove(&mut self, color: RgbColor) -> bool {
        let Some(index) = self.favorites.iter().position(|c| *c == color) else {
            return false;
        };
        self.favorites.remove(index);
        self.persist();
        true
    }

    pub fn list(&self) -> Vec<RgbColor> {
        self.favorites.clone()
    }

    pub fn can_add_more(&self) -> bool {
        self.favorites.len() < MAX_FAVORITES
    }

    pub fn is_favorite(&self, color: RgbColor) -> bool {
        self.favorites.contains(&color)
    }

    pub fn clear(&mut self) {
        self.favorites.clear();
        self.persist();
    }

    fn persist(&self) {
        let encoded = encode_favorites(&self.favorites);
        match self.storage.save(&encoded) {
            Ok(()) => debug!("Saved {} favorite color(s)", self.favorites.len()),
            Err(e) => warn!("Failed to save favorites: {}", e),
        }
    }
}

/// JSON array of `[r, g, b]` triples
pub fn encode_favorites(favorites: &[RgbColor]) -> String {
    let triples: Vec<[u8; 3]> = favorites.iter().map(|c| (*c).into()).collect();
    serde_json::to_string(&triples).unwrap_or_else(|_| "[]".to_string())
}

/// Decode a saved list, skipping entries that are not valid triples.
///
/// Duplicates are dropped and the result never exceeds [`MAX_FAVORITES`].
pub fn decode_favorites(contents: &str) -> Vec<RgbColor> {
    let entries: Vec<serde_json::Value> = match serde_json::from_str(contents) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Saved favorites are not a JSON list, ignoring them: {}", e);
            return Vec::new();
        }
    };

    let mut favorites = Vec::new();
    for entry in entries {
        let color = match serde_json::from_value::<RgbColor>(entry.clone()) {
            Ok(color) => color,
            Err(e) => {
                warn!("Skipping malformed favorite {}: {}", entry, e);
                continue;
            }
        };
        if favorites.contains(&color) {
            continue;
        }
        if favorites.len() == MAX_FAVORITES {
            warn!("Saved favorites exceed {} entries, truncating", MAX_FAVORITES);
            break;
        }
        favorites.push(color);
    }
    favorites
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color(n: u8) -> RgbColor {
        RgbColor::from_rgb(n, 255 - n, n / 2)
    }

    fn empty_store() -> (FavoritesStore, MemoryStorage) {
        let storage = MemoryStorage::new();
        let store = FavoritesStore::load(Box::new(storage.clone()));
        (store, storage)
    }

    #[test]
    fn test_add_same_color_twice() {
        let (mut store, _) = empty_store();
        assert!(store.add(color(1)));
        assert!(!store.add(color(1)));
        assert_eq!(store.list(), vec![color(1)]);
    }

    #[test]
    fn test_capacity_is_five() {
        let (mut store, _) = empty_store();
        for n in 0..5 {
            assert!(store.add(color(n)));
        }
        assert!(!store.can_add_more());
        assert!(!store.add(color(9)));
        assert_eq!(store.list().len(), 5);
        assert!(!store.is_favorite(color(9)));
    }

    #[test]
    fn test_remove() {
        let (mut store, _) = empty_store();
        store.add(color(1));
        store.add(color(2));
        store.add(color(3));
        assert!(!store.remove(color(7)));
        assert!(store.remove(color(2)));
        assert_eq!(store.list(), vec![color(1), color(3)]);
        assert!(store.can_add_more());
    }

    #[test]
    fn test_every_mutation_is_persisted() {
        let (mut store, storage) = empty_store();
        store.add(RgbColor::from_rgb(255, 0, 0));
        assert_eq!(storage.contents().as_deref(), Some("[[255,0,0]]"));

        store.add(RgbColor::from_rgb(0, 0, 255));
        store.remove(RgbColor::from_rgb(255, 0, 0));
        assert_eq!(storage.contents().as_deref(), Some("[[0,0,255]]"));

        store.clear();
        assert_eq!(storage.contents().as_deref(), Some("[]"));
    }

    #[test]
    fn test_restore_skips_malformed_entries() {
        let storage =
            MemoryStorage::with_contents(r#"[[1,2,3], [1,2], "red", [4,5,600], [7,8,9], [1,2,3]]"#);
        let store = FavoritesStore::load(Box::new(storage));
        assert_eq!(
            store.list(),
            vec![RgbColor::from_rgb(1, 2, 3), RgbColor::from_rgb(7, 8, 9)]
        );
    }

    #[test]
    fn test_restore_from_garbage() {
        assert!(decode_favorites("not json").is_empty());
        assert!(decode_favorites("{}").is_empty());
    }

    #[test]
    fn test_restore_caps_at_capacity() {
        let saved = "[[1,1,1],[2,2,2],[3,3,3],[4,4,4],[5,5,5],[6,6,6]]";
        assert_eq!(decode_favorites(saved).len(), MAX_FAVORITES);
    }

    #[test]
    fn test_json_file_round_trip() {
        let dir = std::env::temp_dir().join(format!(
            "led_strip_controller_favorites_{}",
            std::process::id()
        ));
        let path = dir.join("favorites.json");
        let _ = fs::remove_file(&path);

        let mut store = FavoritesStore::load(Box::new(JsonFileStorage::new(&path)));
        assert!(store.list().is_empty());
        store.add(RgbColor::from_rgb(10, 20, 30));
        store.add(RgbColor::from_rgb(40, 50, 60));

        let restored = FavoritesStore::load(Box::new(JsonFileStorage::new(&path)));
        assert_eq!(restored.list(), store.list());

        let _ = fs::remove_dir_all(&dir);
    }
}
