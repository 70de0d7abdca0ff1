//! Best-effort local persistence: the filter descriptor and the task
//! fields the server does not store.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::category::Category;
use crate::entity::is_temp_id;
use crate::filter::FilterDescriptor;
use crate::task::Task;

pub const FILTERS_KEY: &str = "todoFilters";
pub const LOCAL_FIELDS_KEY: &str = "taskLocalFields";
pub const CATEGORY_COLORS_KEY: &str = "categoryColors";

/// String-keyed, string-valued local storage.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&mut self, key: &str, value: String) -> anyhow::Result<()>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: String) -> anyhow::Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// One JSON object in a single file, rewritten atomically on every set.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub const FILE_NAME: &'static str = "prefs.json";

    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;
        let path = data_dir.join(Self::FILE_NAME);
        debug!(file = %path.display(), "opened prefs store");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> anyhow::Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&text)
            .with_context(|| format!("failed parsing {}", self.path.display()))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.read_all()?.remove(key))
    }

    #[tracing::instrument(skip(self, value))]
    fn set(&mut self, key: &str, value: String) -> anyhow::Result<()> {
        let mut entries = self.read_all().unwrap_or_else(|err| {
            warn!(error = %err, "discarding unreadable prefs file");
            BTreeMap::new()
        });
        entries.insert(key.to_string(), value);

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut temp, &entries)?;
        writeln!(temp)?;
        temp.flush()?;
        temp.persist(&self.path)
            .map_err(|err| anyhow!("failed to persist {}: {}", self.path.display(), err))?;
        Ok(())
    }
}

/// Missing, unreadable or malformed entries fall back to the default
/// descriptor.
pub fn load_filters(store: &dyn KeyValueStore) -> FilterDescriptor {
    let raw = match store.get(FILTERS_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return FilterDescriptor::default(),
        Err(err) => {
            warn!(error = %err, "failed to read saved filters; using defaults");
            return FilterDescriptor::default();
        }
    };

    serde_json::from_str(&raw).unwrap_or_else(|err| {
        warn!(error = %err, "saved filters are malformed; using defaults");
        FilterDescriptor::default()
    })
}

pub fn save_filters(
    store: &mut dyn KeyValueStore,
    filters: &FilterDescriptor,
) -> anyhow::Result<()> {
    let raw = serde_json::to_string(filters).context("failed to encode filters")?;
    store.set(FILTERS_KEY, raw)
}

/// Task fields the server does not keep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFields {
    #[serde(default)]
    pub tags: Vec<String>,
    pub order: i64,
}

/// Client-only task fields keyed by server id.
pub type TaskOverlay = BTreeMap<String, LocalFields>;

/// Missing, unreadable or malformed entries read as empty.
fn load_entry<T: DeserializeOwned + Default>(store: &dyn KeyValueStore, key: &str) -> T {
    match store.get(key) {
        Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|err| {
            warn!(key, error = %err, "saved entry is malformed; ignoring");
            T::default()
        }),
        Ok(None) => T::default(),
        Err(err) => {
            warn!(key, error = %err, "failed to read saved entry; ignoring");
            T::default()
        }
    }
}

fn save_entry<T: Serialize>(
    store: &mut dyn KeyValueStore,
    key: &str,
    value: &T,
) -> anyhow::Result<()> {
    let raw = serde_json::to_string(value).with_context(|| format!("failed to encode {key}"))?;
    store.set(key, raw)
}

pub fn load_overlay(store: &dyn KeyValueStore) -> TaskOverlay {
    load_entry(store, LOCAL_FIELDS_KEY)
}

pub fn save_overlay(store: &mut dyn KeyValueStore, overlay: &TaskOverlay) -> anyhow::Result<()> {
    save_entry(store, LOCAL_FIELDS_KEY, overlay)
}

/// Tasks still carrying a temporary id are left out.
pub fn capture_overlay(tasks: &[Task]) -> TaskOverlay {
    tasks
        .iter()
        .filter(|task| !is_temp_id(&task.id))
        .map(|task| {
            (
                task.id.clone(),
                LocalFields {
                    tags: task.tags.clone(),
                    order: task.order,
                },
            )
        })
        .collect()
}

/// Restores saved tags and order by id, then renumbers densely. Tasks
/// missing from the overlay go after every saved one, keeping their
/// relative order. Returns `None` when no task changes.
pub fn apply_overlay(tasks: &[Task], overlay: &TaskOverlay) -> Option<Vec<Task>> {
    let mut merged: Vec<Task> = tasks
        .iter()
        .map(|task| {
            let mut task = task.clone();
            if let Some(local) = overlay.get(&task.id) {
                task.tags = local.tags.clone();
                task.order = local.order;
            }
            task
        })
        .collect();

    let mut ranked: Vec<usize> = (0..merged.len()).collect();
    ranked.sort_by_key(|&idx| {
        let task = &merged[idx];
        (!overlay.contains_key(&task.id), task.order, idx)
    });
    for (rank, idx) in ranked.into_iter().enumerate() {
        merged[idx].order = i64::try_from(rank).unwrap_or(i64::MAX);
    }

    (merged.as_slice() != tasks).then_some(merged)
}

/// Category colors keyed by server id; the server has no color column.
pub type CategoryColors = BTreeMap<String, String>;

pub fn load_category_colors(store: &dyn KeyValueStore) -> CategoryColors {
    load_entry(store, CATEGORY_COLORS_KEY)
}

pub fn save_category_colors(
    store: &mut dyn KeyValueStore,
    colors: &CategoryColors,
) -> anyhow::Result<()> {
    save_entry(store, CATEGORY_COLORS_KEY, colors)
}

pub fn capture_category_colors(categories: &[Category]) -> CategoryColors {
    categories
        .iter()
        .filter(|category| !is_temp_id(&category.id))
        .map(|category| (category.id.clone(), category.color.clone()))
        .collect()
}

/// Returns `None` when no category changes.
pub fn apply_category_colors(
    categories: &[Category],
    colors: &CategoryColors,
) -> Option<Vec<Category>> {
    let mut changed = false;
    let merged = categories
        .iter()
        .map(|category| {
            let mut category = category.clone();
            if let Some(color) = colors.get(&category.id)
                && category.color != *color
            {
                category.color = color.clone();
                changed = true;
            }
            category
        })
        .collect();
    changed.then_some(merged)
}
