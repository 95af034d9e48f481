// src/lexicon.rs
use async_trait::async_trait;
use log::{debug, error, info};
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::LexiconError;
use crate::settings::Keys;
use crate::storage::SettingsStore;

const UNTITLED: &str = "未命名";
const PREVIEW_CHARS: usize = 150;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LexiconEntry {
    #[serde(default)]
    pub title: Option<String>,
    /// Trigger keys. Present but empty still counts as a label and yields `""`.
    #[serde(default)]
    pub key: Option<Vec<String>>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub disable: bool,
}

impl LexiconEntry {
    pub fn label(&self) -> String {
        match (self.title.as_deref(), &self.key) {
            (Some(title), _) if !title.is_empty() => title.to_string(),
            (_, Some(key)) => key.join(","),
            _ => UNTITLED.to_string(),
        }
    }

    pub fn preview(&self) -> String {
        let mut chars = self.content.chars();
        let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
        if chars.next().is_some() {
            format!("{head}...")
        } else {
            head
        }
    }
}

/// Canonical array-index uids (`"0"`, `"12"`, not `"012"`) sort numerically
/// ahead of every other uid, matching host object key order.
fn array_index(uid: &str) -> Option<u32> {
    let index: u32 = uid.parse().ok()?;
    (index != u32::MAX && index.to_string() == uid).then_some(index)
}

/// One loaded world-info source: entries keyed by uid.
///
/// Entries iterate integer uids in numeric order, then the remaining uids in
/// insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lexicon {
    entries: Vec<(String, LexiconEntry)>,
}

impl Lexicon {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `uid`.
    pub fn insert(&mut self, uid: impl Into<String>, entry: LexiconEntry) {
        let uid = uid.into();
        if let Some((_, existing)) = self.entries.iter_mut().find(|(id, _)| *id == uid) {
            *existing = entry;
            return;
        }
        let at = match array_index(&uid) {
            Some(index) => self
                .entries
                .iter()
                .position(|(id, _)| array_index(id).is_none_or(|other| other > index))
                .unwrap_or(self.entries.len()),
            None => self.entries.len(),
        };
        self.entries.insert(at, (uid, entry));
    }

    pub fn get(&self, uid: &str) -> Option<&LexiconEntry> {
        self.entries
            .iter()
            .find(|(id, _)| id == uid)
            .map(|(_, entry)| entry)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &LexiconEntry)> {
        self.entries.iter().map(|(uid, entry)| (uid, entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries a user may select: everything not marked disabled.
    pub fn selectable(&self) -> impl Iterator<Item = (&String, &LexiconEntry)> {
        self.entries().filter(|(_, entry)| !entry.disable)
    }
}

struct EntryMap<'a>(&'a [(String, LexiconEntry)]);

impl Serialize for EntryMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (uid, entry) in self.0 {
            map.serialize_entry(uid, entry)?;
        }
        map.end()
    }
}

impl Serialize for Lexicon {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Lexicon", 1)?;
        state.serialize_field("entries", &EntryMap(&self.entries))?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for Lexicon {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct RawLexicon {
            #[serde(default)]
            entries: Map<String, Value>,
        }

        let raw = RawLexicon::deserialize(deserializer)?;
        let mut lexicon = Lexicon::new();
        for (uid, value) in raw.entries {
            let entry = serde_json::from_value(value).map_err(de::Error::custom)?;
            lexicon.insert(uid, entry);
        }
        Ok(lexicon)
    }
}

/// The host's world-info registry.
#[async_trait]
pub trait LexiconSource: Send + Sync {
    /// Ids of the sources currently selected in the host.
    fn selected_sources(&self) -> Vec<String>;

    async fn load_source(&self, id: &str) -> Result<Lexicon, LexiconError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    Static,
    Dynamic,
}

impl SelectionMode {
    pub fn key(self, keys: &Keys) -> String {
        match self {
            SelectionMode::Static => keys.static_config(),
            SelectionMode::Dynamic => keys.dynamic_config(),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SelectionMode::Static => "static",
            SelectionMode::Dynamic => "dynamic",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSelection {
    #[serde(default)]
    pub file_id: String,
    #[serde(default)]
    pub enabled_uids: Vec<String>,
}

/// Enabled entry ids per book, in the order books were first configured.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReferenceSelection {
    books: Vec<(String, BookSelection)>,
}

impl ReferenceSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(store: &SettingsStore, keys: &Keys, mode: SelectionMode) -> Self {
        store.get_or_default(&mode.key(keys))
    }

    pub fn save(&self, store: &SettingsStore, keys: &Keys, mode: SelectionMode) {
        store.set(&mode.key(keys), self);
    }

    pub fn books(&self) -> impl Iterator<Item = (&str, &BookSelection)> {
        self.books.iter().map(|(name, sel)| (name.as_str(), sel))
    }

    pub fn get(&self, book: &str) -> Option<&BookSelection> {
        self.books
            .iter()
            .find(|(name, _)| name == book)
            .map(|(_, sel)| sel)
    }

    /// Replace a book's selection, keeping its original position.
    pub fn upsert(&mut self, book: &str, selection: BookSelection) {
        match self.books.iter_mut().find(|(name, _)| name == book) {
            Some((_, existing)) => *existing = selection,
            None => self.books.push((book.to_string(), selection)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}

impl Serialize for ReferenceSelection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.books.len()))?;
        for (name, selection) in &self.books {
            map.serialize_entry(name, selection)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ReferenceSelection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Map::<String, Value>::deserialize(deserializer)?;
        let books = raw
            .into_iter()
            .map(|(name, value)| {
                serde_json::from_value(value)
                    .map(|selection| (name, selection))
                    .map_err(de::Error::custom)
            })
            .collect::<Result<Vec<_>, D::Error>>()?;
        Ok(Self { books })
    }
}

/// Resolve a book name to a registered source id: first case-insensitive substring match.
pub fn find_source(source: &dyn LexiconSource, book: &str) -> Option<String> {
    let needle = book.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    source
        .selected_sources()
        .into_iter()
        .find(|id| id.to_lowercase().contains(&needle))
}

/// Record which entries of `book` are enabled, dropping ids that are unknown
/// or disabled in the loaded source. Ids are stored in lexicon order, not in
/// the order they were picked.
pub fn select_entries(
    selection: &mut ReferenceSelection,
    book: &str,
    file_id: &str,
    lexicon: &Lexicon,
    uids: &[String],
) -> usize {
    let enabled_uids: Vec<String> = lexicon
        .selectable()
        .filter(|(uid, _)| uids.contains(*uid))
        .map(|(uid, _)| uid.clone())
        .collect();
    let count = enabled_uids.len();
    selection.upsert(
        book,
        BookSelection {
            file_id: file_id.to_string(),
            enabled_uids,
        },
    );
    count
}

pub fn select_all(
    selection: &mut ReferenceSelection,
    book: &str,
    file_id: &str,
    lexicon: &Lexicon,
) -> usize {
    let uids: Vec<String> = lexicon.selectable().map(|(uid, _)| uid.clone()).collect();
    select_entries(selection, book, file_id, lexicon, &uids)
}

pub fn select_none(selection: &mut ReferenceSelection, book: &str, file_id: &str) {
    selection.upsert(
        book,
        BookSelection {
            file_id: file_id.to_string(),
            enabled_uids: Vec::new(),
        },
    );
}

pub fn format_block(book: &str, entry: &LexiconEntry) -> String {
    format!("【{} - {}】\n{}", book, entry.label(), entry.content)
}

/// Labelled reference blocks for every enabled entry, book by book.
///
/// A book whose source fails to load is logged and skipped; the rest of the
/// aggregation continues.
pub async fn collect(
    source: &dyn LexiconSource,
    selections: &[&ReferenceSelection],
) -> Vec<String> {
    let mut blocks = Vec::new();
    for selection in selections {
        for (book, config) in selection.books() {
            if config.enabled_uids.is_empty() {
                continue;
            }
            let lexicon = match source.load_source(&config.file_id).await {
                Ok(lexicon) => lexicon,
                Err(e) => {
                    error!(
                        "Failed to load world-info {} for {}: {}",
                        config.file_id, book, e
                    );
                    continue;
                }
            };
            for uid in &config.enabled_uids {
                match lexicon.get(uid) {
                    Some(entry) if !entry.disable && !entry.content.is_empty() => {
                        blocks.push(format_block(book, entry));
                    }
                    _ => debug!("Skipping world-info entry {uid} of {book}"),
                }
            }
        }
    }
    info!("Collected {} world-info blocks", blocks.len());
    blocks
}

/// Static selections first, then dynamic, as persisted for `keys`.
pub async fn collect_configured(
    source: &dyn LexiconSource,
    store: &SettingsStore,
    keys: &Keys,
) -> Vec<String> {
    let static_selection = ReferenceSelection::load(store, keys, SelectionMode::Static);
    let dynamic_selection = ReferenceSelection::load(store, keys, SelectionMode::Dynamic);
    collect(source, &[&static_selection, &dynamic_selection]).await
}
