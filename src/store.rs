//! Document-store boundary.
//!
//! The pipeline only needs to read a whole collection and to insert prediction
//! rows. Real deployments plug a driver in behind [`DocumentStore`]; the crate
//! ships a directory-backed store for `file://` URIs and an in-memory store.

use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::{Map, Value};
use tracing::debug;

use crate::settings::StoreSettings;
use crate::table::Table;

pub type Document = Map<String, Value>;

/// Identity column assigned by the store.
pub const ID_FIELD: &str = "_id";

pub trait DocumentStore: Send + Sync {
    fn find_all(&self, database: &str, collection: &str) -> Result<Vec<Document>>;
    fn insert_many(&self, database: &str, collection: &str, documents: Vec<Document>)
    -> Result<usize>;
}

/// Open the store named by `settings.uri`.
pub fn connect(settings: &StoreSettings) -> Result<Box<dyn DocumentStore>> {
    let uri = settings.uri.trim();
    if uri.is_empty() {
        bail!("Document store URI is empty");
    }
    if let Some(path) = uri.strip_prefix("file://") {
        return Ok(Box::new(JsonDirectoryStore::open(path)?));
    }
    if uri == "memory://" {
        return Ok(Box::new(MemoryStore::default()));
    }
    let scheme = uri.split("://").next().unwrap_or(uri);
    Err(anyhow!(
        "Unsupported document store scheme '{scheme}'; expected file:// or memory://"
    ))
}

/// Load a CSV and insert one document per row. Missing cells become `null`.
pub fn push_csv(
    store: &dyn DocumentStore,
    database: &str,
    collection: &str,
    path: &Path,
) -> Result<usize> {
    let table = Table::read_csv(path)?;
    if table.is_empty() {
        bail!("{} has no rows to push", path.display());
    }
    let inserted = store
        .insert_many(database, collection, table.to_records())
        .with_context(|| format!("Failed to insert rows into {database}.{collection}"))?;
    debug!(
        source = %path.display(),
        collection,
        inserted,
        "CSV pushed to document store"
    );
    Ok(inserted)
}

/// Collections stored as JSON arrays at `<root>/<database>/<collection>.json`.
#[derive(Debug, Clone)]
pub struct JsonDirectoryStore {
    root: PathBuf,
}

impl JsonDirectoryStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            bail!("Document store directory not found: {}", root.display());
        }
        Ok(Self { root })
    }

    pub fn collection_path(&self, database: &str, collection: &str) -> PathBuf {
        self.root.join(database).join(format!("{collection}.json"))
    }

    fn read_collection(path: &Path) -> Result<Vec<Document>> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read collection: {}", path.display()))?;
        let documents: Vec<Document> = serde_json::from_str(&content)
            .with_context(|| format!("Collection is not a JSON array of objects: {}", path.display()))?;
        Ok(documents)
    }

    /// Stage the new contents next to `path`, then rename over it; a failed
    /// write leaves the previous collection in place.
    fn replace_collection(path: &Path, documents: &[Document]) -> Result<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let staged = tempfile::Builder::new()
            .prefix(".collection-")
            .suffix(".tmp")
            .tempfile_in(parent)
            .with_context(|| format!("Failed to stage collection in {}", parent.display()))?;
        {
            let mut writer = BufWriter::new(staged.as_file());
            serde_json::to_writer(&mut writer, documents)
                .with_context(|| format!("Failed to serialize collection: {}", path.display()))?;
            writer.flush()?;
        }
        staged
            .persist(path)
            .map_err(|err| err.error)
            .with_context(|| format!("Failed to write collection: {}", path.display()))?;
        Ok(())
    }
}

impl DocumentStore for JsonDirectoryStore {
    fn find_all(&self, database: &str, collection: &str) -> Result<Vec<Document>> {
        let path = self.collection_path(database, collection);
        if !path.is_file() {
            bail!("Collection '{database}.{collection}' does not exist");
        }
        let documents = Self::read_collection(&path)?;
        debug!(
            collection = %path.display(),
            documents = documents.len(),
            "Collection loaded"
        );
        Ok(documents)
    }

    fn insert_many(
        &self,
        database: &str,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<usize> {
        let path = self.collection_path(database, collection);
        let mut existing = if path.is_file() {
            Self::read_collection(&path)?
        } else {
            Vec::new()
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let inserted = documents.len();
        existing.extend(documents);
        Self::replace_collection(&path, &existing)?;
        Ok(inserted)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<(String, String), Vec<Document>>>,
}

impl MemoryStore {
    pub fn with_collection(database: &str, collection: &str, documents: Vec<Document>) -> Self {
        let store = Self::default();
        if let Ok(mut guard) = store.collections.lock() {
            guard.insert((database.to_string(), collection.to_string()), documents);
        }
        store
    }

    pub fn collection_len(&self, database: &str, collection: &str) -> usize {
        self.collections
            .lock()
            .ok()
            .and_then(|guard| {
                guard
                    .get(&(database.to_string(), collection.to_string()))
                    .map(Vec::len)
            })
            .unwrap_or(0)
    }

    pub fn collection_names(&self, database: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .collections
            .lock()
            .map(|guard| {
                guard
                    .keys()
                    .filter(|(db, _)| db == database)
                    .map(|(_, name)| name.clone())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl DocumentStore for MemoryStore {
    fn find_all(&self, database: &str, collection: &str) -> Result<Vec<Document>> {
        let guard = self
            .collections
            .lock()
            .map_err(|_| anyhow!("Memory store lock poisoned"))?;
        guard
            .get(&(database.to_string(), collection.to_string()))
            .cloned()
            .ok_or_else(|| anyhow!("Collection '{database}.{collection}' does not exist"))
    }

    fn insert_many(
        &self,
        database: &str,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<usize> {
        let mut guard = self
            .collections
            .lock()
            .map_err(|_| anyhow!("Memory store lock poisoned"))?;
        let inserted = documents.len();
        guard
            .entry((database.to_string(), collection.to_string()))
            .or_default()
            .extend(documents);
        Ok(inserted)
    }
}
