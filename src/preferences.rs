//! Per-document reading state persisted as JSON, one file per key

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, error};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::paths::document_key;

/// Most-recent-first entries kept in `history`
pub const HISTORY_LIMIT: usize = 20;

const HISTORY_KEY: &str = "history";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bookmark {
    pub id: String,
    pub page: usize,
    pub label: String,
    pub timestamp: DateTime<Utc>,
    /// Fraction of the page height, 0.0 at the top
    pub scroll_position: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub page: usize,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub y_position: f32,
    #[serde(flatten)]
    pub rect: Option<NoteRect>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingProgress {
    pub scroll_position: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub title: String,
    pub path: String,
    pub size: u64,
}

fn clamp_position(position: f32) -> f32 {
    if position.is_nan() {
        0.0
    } else {
        position.clamp(0.0, 1.0)
    }
}

pub struct PreferencesStore {
    dir: PathBuf,
    counter: AtomicU64,
}

impl PreferencesStore {
    pub fn new(dir: &Path) -> Result<Self> {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create preferences directory: {dir:?}"))?;
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            counter: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{n}", Utc::now().timestamp_millis())
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Missing or unreadable records come back as `T::default()`
    fn read<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        let path = self.key_path(key);
        if !path.exists() {
            return T::default();
        }
        let parsed = fs::read_to_string(&path)
            .context("Failed to read preferences file")
            .and_then(|content| {
                serde_json::from_str(&content).context("Failed to parse preferences JSON")
            });
        match parsed {
            Ok(value) => value,
            Err(e) => {
                error!("Ignoring {path:?}: {e:#}");
                T::default()
            }
        }
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let path = self.key_path(key);
        let json = serde_json::to_string_pretty(value).context("Failed to serialize preferences")?;
        let partial = path.with_extension("json.partial");
        fs::write(&partial, json)
            .with_context(|| format!("Failed to write preferences file: {partial:?}"))?;
        fs::rename(&partial, &path)
            .with_context(|| format!("Failed to replace preferences file: {path:?}"))?;
        debug!("Saved {key}");
        Ok(())
    }

    // Bookmarks

    pub fn bookmarks(&self, document: &Path) -> Vec<Bookmark> {
        self.read(&format!("bookmarks_{}", document_key(document)))
    }

    pub fn add_bookmark(
        &self,
        document: &Path,
        page: usize,
        label: &str,
        scroll_position: f32,
    ) -> Result<Bookmark> {
        let key = format!("bookmarks_{}", document_key(document));
        let mut bookmarks: Vec<Bookmark> = self.read(&key);
        let bookmark = Bookmark {
            id: self.next_id(),
            page,
            label: label.to_string(),
            timestamp: Utc::now(),
            scroll_position: clamp_position(scroll_position),
        };
        bookmarks.push(bookmark.clone());
        bookmarks.sort_by(|a, b| {
            a.page
                .cmp(&b.page)
                .then(a.scroll_position.total_cmp(&b.scroll_position))
        });
        self.write(&key, &bookmarks)?;
        Ok(bookmark)
    }

    pub fn remove_bookmark(&self, document: &Path, id: &str) -> Result<bool> {
        let key = format!("bookmarks_{}", document_key(document));
        let mut bookmarks: Vec<Bookmark> = self.read(&key);
        let before = bookmarks.len();
        bookmarks.retain(|b| b.id != id);
        if bookmarks.len() == before {
            return Ok(false);
        }
        self.write(&key, &bookmarks)?;
        Ok(true)
    }

    // Notes

    pub fn notes(&self, document: &Path) -> Vec<Note> {
        self.read(&format!("notes_{}", document_key(document)))
    }

    pub fn add_note(
        &self,
        document: &Path,
        page: usize,
        text: &str,
        y_position: f32,
        rect: Option<NoteRect>,
    ) -> Result<Note> {
        let key = format!("notes_{}", document_key(document));
        let mut notes: Vec<Note> = self.read(&key);
        let note = Note {
            id: self.next_id(),
            page,
            text: text.to_string(),
            timestamp: Utc::now(),
            y_position: clamp_position(y_position),
            rect,
        };
        notes.push(note.clone());
        self.write(&key, &notes)?;
        Ok(note)
    }

    /// Replaces a note's text and bumps its timestamp
    pub fn update_note(&self, document: &Path, id: &str, text: &str) -> Result<bool> {
        let key = format!("notes_{}", document_key(document));
        let mut notes: Vec<Note> = self.read(&key);
        let Some(note) = notes.iter_mut().find(|n| n.id == id) else {
            return Ok(false);
        };
        note.text = text.to_string();
        note.timestamp = Utc::now();
        self.write(&key, &notes)?;
        Ok(true)
    }

    pub fn remove_note(&self, document: &Path, id: &str) -> Result<bool> {
        let key = format!("notes_{}", document_key(document));
        let mut notes: Vec<Note> = self.read(&key);
        let before = notes.len();
        notes.retain(|n| n.id != id);
        if notes.len() == before {
            return Ok(false);
        }
        self.write(&key, &notes)?;
        Ok(true)
    }

    // Progress

    pub fn progress(&self, document: &Path) -> Option<ReadingProgress> {
        self.read(&format!("progress_{}", document_key(document)))
    }

    pub fn set_progress(&self, document: &Path, scroll_position: i64) -> Result<()> {
        let key = format!("progress_{}", document_key(document));
        self.write(&key, &ReadingProgress { scroll_position })
    }

    // History

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.read(HISTORY_KEY)
    }

    /// Moves `entry` to the front, dropping older entries for the same path
    pub fn push_history(&self, entry: HistoryEntry) -> Result<()> {
        let mut history = self.history();
        history.retain(|h| h.path != entry.path);
        history.insert(0, entry);
        history.truncate(HISTORY_LIMIT);
        self.write(HISTORY_KEY, &history)
    }

    pub fn clear_history(&self) -> Result<()> {
        let path = self.key_path(HISTORY_KEY);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove history file: {path:?}")),
        }
    }
}
