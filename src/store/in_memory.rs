//! InMemoryDocumentStore - Vec-backed document store for testing and development.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use serde_json::Value;

use super::{CountOptions, Cursor, DocumentStore, FindOptions, IndexSpec, UpdateResult};
use crate::error::{StoreError, WriteError, WriteErrorKind};
use crate::query::eval::{self, Matcher};
use crate::query::{Document, Filter, Pipeline, Projection, ID_FIELD};

/// Documents of one collection plus its index declarations.
#[derive(Clone, Default)]
struct CollectionData {
    documents: Vec<Value>,
    indexes: Vec<IndexSpec>,
}

/// Committed collection state. `version` grows on every committed write.
#[derive(Default)]
struct StoredCollection {
    data: CollectionData,
    version: u64,
}

/// Copy-on-write view of a collection inside a transaction.
struct StagedCollection {
    base_version: u64,
    data: CollectionData,
}

#[derive(Default)]
struct Transaction {
    staged: HashMap<String, StagedCollection>,
}

/// Session handle of an [`InMemoryDocumentStore`].
#[derive(Default)]
pub struct InMemorySession {
    transaction: Mutex<Option<Transaction>>,
}

impl InMemorySession {
    pub fn in_transaction(&self) -> bool {
        self.transaction
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Transaction>>, StoreError> {
        self.transaction.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

/// In-memory document store backed by a HashMap of collections.
///
/// Clone-friendly via Arc. Documents keep insertion order, which is the
/// natural order of unsorted reads.
#[derive(Clone)]
pub struct InMemoryDocumentStore {
    storage: Arc<RwLock<HashMap<String, StoredCollection>>>,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDocumentStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            storage: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Index declarations of a collection.
    pub fn indexes(&self, collection: &str) -> Result<Vec<IndexSpec>, StoreError> {
        let storage = self.storage.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(storage
            .get(collection)
            .map(|c| c.data.indexes.clone())
            .unwrap_or_default())
    }

    /// Run `op` against the collection as seen by `session`.
    fn read<R>(
        &self,
        session: Option<&InMemorySession>,
        collection: &str,
        op: impl FnOnce(&CollectionData) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        if let Some(session) = session {
            let guard = session.lock()?;
            if let Some(staged) = guard.as_ref().and_then(|tx| tx.staged.get(collection)) {
                return op(&staged.data);
            }
        }
        let storage = self.storage.read().map_err(|_| StoreError::LockPoisoned)?;
        match storage.get(collection) {
            Some(stored) => op(&stored.data),
            None => op(&CollectionData::default()),
        }
    }

    /// Clone of every document matching `filter`.
    fn matching(
        &self,
        session: Option<&InMemorySession>,
        collection: &str,
        filter: &Filter,
    ) -> Result<Vec<Value>, StoreError> {
        let matcher = Matcher::new(filter)?;
        self.read(session, collection, |data| {
            Ok(data
                .documents
                .iter()
                .filter(|d| matcher.matches(d))
                .cloned()
                .collect())
        })
    }

    /// Run `op` inside the session transaction when one is open, directly otherwise.
    fn write<R>(
        &self,
        session: Option<&InMemorySession>,
        collection: &str,
        op: impl FnOnce(&str, &mut CollectionData) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        if let Some(session) = session {
            let mut guard = session.lock()?;
            if let Some(tx) = guard.as_mut() {
                if !tx.staged.contains_key(collection) {
                    let storage = self.storage.read().map_err(|_| StoreError::LockPoisoned)?;
                    let (data, base_version) = storage
                        .get(collection)
                        .map(|c| (c.data.clone(), c.version))
                        .unwrap_or_default();
                    tx.staged.insert(
                        collection.to_string(),
                        StagedCollection { base_version, data },
                    );
                }
                if let Some(staged) = tx.staged.get_mut(collection) {
                    return op(collection, &mut staged.data);
                }
            }
        }

        let mut storage = self.storage.write().map_err(|_| StoreError::LockPoisoned)?;
        let stored = storage.entry(collection.to_string()).or_default();
        // A failed op may have written part of its documents.
        let result = op(collection, &mut stored.data);
        stored.version += 1;
        result
    }
}

fn check_time(started: Instant, max_time: Option<Duration>) -> Result<(), StoreError> {
    match max_time {
        Some(limit) if started.elapsed() > limit => Err(StoreError::Timeout(limit)),
        _ => Ok(()),
    }
}

fn to_usize(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

fn into_cursor(documents: Vec<Value>) -> Cursor {
    Box::new(documents.into_iter().map(|doc| match doc {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Serde(format!("stored value is not a document: {other}"))),
    }))
}

fn index_key(doc: &Value, index: &IndexSpec) -> Vec<Value> {
    index
        .fields()
        .map(|field| eval::field_value(doc, field).unwrap_or(Value::Null))
        .collect()
}

impl CollectionData {
    /// First unique index `doc` would violate, ignoring the document at `skip`.
    fn unique_violation(&self, doc: &Value, skip: Option<usize>) -> Option<(String, String)> {
        for index in self.indexes.iter().filter(|i| i.unique) {
            let key = index_key(doc, index);
            let clash = self.documents.iter().enumerate().any(|(position, other)| {
                Some(position) != skip
                    && index_key(other, index)
                        .iter()
                        .zip(key.iter())
                        .all(|(l, r)| eval::values_equal(l, r))
            });
            if clash {
                return Some((index.name.clone(), Value::Array(key).to_string()));
            }
        }
        None
    }

    fn insert(&mut self, collection: &str, mut document: Document) -> Result<String, StoreError> {
        let id = match document.get(ID_FIELD) {
            Some(Value::String(id)) => id.clone(),
            Some(other) => other.to_string(),
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                document.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                id
            }
        };
        let doc = Value::Object(document);
        if let Some((index, key)) = self.unique_violation(&doc, None) {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                index,
                key,
            });
        }
        self.documents.push(doc);
        Ok(id)
    }

    fn replace_at(
        &mut self,
        collection: &str,
        position: usize,
        mut replacement: Document,
    ) -> Result<Value, StoreError> {
        if let Some(id) = self.documents[position].get(ID_FIELD) {
            replacement.insert(ID_FIELD.to_string(), id.clone());
        }
        let doc = Value::Object(replacement);
        if let Some((index, key)) = self.unique_violation(&doc, Some(position)) {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                index,
                key,
            });
        }
        Ok(std::mem::replace(&mut self.documents[position], doc))
    }

    fn position(&self, matcher: &Matcher) -> Option<usize> {
        self.documents.iter().position(|d| matcher.matches(d))
    }
}

impl DocumentStore for InMemoryDocumentStore {
    type Session = InMemorySession;

    fn start_session(&self) -> Result<InMemorySession, StoreError> {
        Ok(InMemorySession::default())
    }

    fn start_transaction(&self, session: &InMemorySession) -> Result<(), StoreError> {
        let mut guard = session.lock()?;
        if guard.is_some() {
            return Err(StoreError::Transaction("transaction already in progress".into()));
        }
        *guard = Some(Transaction::default());
        Ok(())
    }

    fn commit_transaction(&self, session: &InMemorySession) -> Result<(), StoreError> {
        let tx = session
            .lock()?
            .take()
            .ok_or_else(|| StoreError::Transaction("no transaction in progress".into()))?;

        let mut storage = self.storage.write().map_err(|_| StoreError::LockPoisoned)?;
        for (name, staged) in &tx.staged {
            let current = storage.get(name).map(|c| c.version).unwrap_or(0);
            if current != staged.base_version {
                return Err(StoreError::WriteConflict {
                    collection: name.clone(),
                });
            }
        }
        for (name, staged) in tx.staged {
            let stored = storage.entry(name).or_default();
            stored.data = staged.data;
            stored.version += 1;
        }
        Ok(())
    }

    fn abort_transaction(&self, session: &InMemorySession) -> Result<(), StoreError> {
        session
            .lock()?
            .take()
            .map(|_| ())
            .ok_or_else(|| StoreError::Transaction("no transaction in progress".into()))
    }

    fn create_index(&self, collection: &str, index: &IndexSpec) -> Result<(), StoreError> {
        self.write(None, collection, |name, data| {
            if data.indexes.iter().any(|i| i.name == index.name) {
                return Ok(());
            }
            if index.unique {
                let mut probe = CollectionData {
                    documents: Vec::new(),
                    indexes: vec![index.clone()],
                };
                for doc in &data.documents {
                    if let Some((index, key)) = probe.unique_violation(doc, None) {
                        return Err(StoreError::DuplicateKey {
                            collection: name.to_string(),
                            index,
                            key,
                        });
                    }
                    probe.documents.push(doc.clone());
                }
            }
            data.indexes.push(index.clone());
            Ok(())
        })
    }

    fn find(
        &self,
        session: Option<&InMemorySession>,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Cursor, StoreError> {
        let started = Instant::now();
        let mut documents = self.matching(session, collection, filter)?;
        eval::sort_documents(&mut documents, &options.sort);

        let limit = options.limit.map(to_usize).unwrap_or(usize::MAX);
        let documents: Vec<Value> = documents
            .into_iter()
            .skip(to_usize(options.skip))
            .take(limit)
            .map(|doc| match &options.projection {
                Some(projection) => eval::project(&doc, projection),
                None => doc,
            })
            .collect();

        check_time(started, options.max_time)?;
        Ok(into_cursor(documents))
    }

    fn count_documents(
        &self,
        session: Option<&InMemorySession>,
        collection: &str,
        filter: &Filter,
        options: &CountOptions,
    ) -> Result<u64, StoreError> {
        let started = Instant::now();
        let matcher = Matcher::new(filter)?;
        let matched = self.read(session, collection, |data| {
            Ok(data.documents.iter().filter(|d| matcher.matches(d)).count() as u64)
        })?;
        check_time(started, options.max_time)?;

        let remaining = matched.saturating_sub(options.skip);
        Ok(match options.limit {
            Some(limit) if limit > 0 => remaining.min(limit),
            _ => remaining,
        })
    }

    fn estimated_document_count(
        &self,
        collection: &str,
        _max_time: Option<Duration>,
    ) -> Result<u64, StoreError> {
        self.read(None, collection, |data| Ok(data.documents.len() as u64))
    }

    fn insert_one(
        &self,
        session: Option<&InMemorySession>,
        collection: &str,
        document: Document,
    ) -> Result<String, StoreError> {
        self.write(session, collection, |name, data| data.insert(name, document))
    }

    fn insert_many(
        &self,
        session: Option<&InMemorySession>,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<Vec<String>, StoreError> {
        self.write(session, collection, |name, data| {
            let mut ids = Vec::with_capacity(documents.len());
            for (index, document) in documents.into_iter().enumerate() {
                match data.insert(name, document) {
                    Ok(id) => ids.push(id),
                    Err(err) => {
                        let kind = if err.is_duplicate_key() {
                            WriteErrorKind::DuplicateKey
                        } else {
                            WriteErrorKind::Other
                        };
                        return Err(StoreError::BulkWrite {
                            collection: name.to_string(),
                            inserted: ids.len(),
                            errors: vec![WriteError {
                                index,
                                kind,
                                message: err.to_string(),
                            }],
                        });
                    }
                }
            }
            Ok(ids)
        })
    }

    fn find_one_and_replace(
        &self,
        session: Option<&InMemorySession>,
        collection: &str,
        filter: &Filter,
        replacement: Document,
        projection: Option<&Projection>,
    ) -> Result<Option<Document>, StoreError> {
        let matcher = Matcher::new(filter)?;
        self.write(session, collection, |name, data| {
            let Some(position) = data.position(&matcher) else {
                return Ok(None);
            };
            let previous = data.replace_at(name, position, replacement)?;
            let previous = match projection {
                Some(projection) => eval::project(&previous, projection),
                None => previous,
            };
            match previous {
                Value::Object(map) => Ok(Some(map)),
                _ => Ok(None),
            }
        })
    }

    fn replace_one(
        &self,
        session: Option<&InMemorySession>,
        collection: &str,
        filter: &Filter,
        replacement: Document,
        upsert: bool,
    ) -> Result<UpdateResult, StoreError> {
        let matcher = Matcher::new(filter)?;
        self.write(session, collection, |name, data| match data.position(&matcher) {
            Some(position) => {
                let previous = data.replace_at(name, position, replacement)?;
                let modified = u64::from(previous != data.documents[position]);
                Ok(UpdateResult {
                    matched: 1,
                    modified,
                    upserted_id: None,
                })
            }
            None if upsert => {
                let id = data.insert(name, replacement)?;
                Ok(UpdateResult {
                    matched: 0,
                    modified: 0,
                    upserted_id: Some(id),
                })
            }
            None => Ok(UpdateResult::default()),
        })
    }

    fn delete_one(
        &self,
        session: Option<&InMemorySession>,
        collection: &str,
        filter: &Filter,
    ) -> Result<u64, StoreError> {
        let matcher = Matcher::new(filter)?;
        self.write(session, collection, |_, data| match data.position(&matcher) {
            Some(position) => {
                data.documents.remove(position);
                Ok(1)
            }
            None => Ok(0),
        })
    }

    fn delete_many(
        &self,
        session: Option<&InMemorySession>,
        collection: &str,
        filter: &Filter,
    ) -> Result<u64, StoreError> {
        let matcher = Matcher::new(filter)?;
        self.write(session, collection, |_, data| {
            let before = data.documents.len();
            data.documents.retain(|d| !matcher.matches(d));
            Ok((before - data.documents.len()) as u64)
        })
    }

    fn distinct(
        &self,
        session: Option<&InMemorySession>,
        collection: &str,
        field: &str,
        filter: &Filter,
        max_time: Option<Duration>,
    ) -> Result<Vec<Value>, StoreError> {
        let started = Instant::now();
        let documents = self.matching(session, collection, filter)?;
        let values = eval::distinct_values(&documents, field);
        check_time(started, max_time)?;
        Ok(values)
    }

    fn aggregate(
        &self,
        session: Option<&InMemorySession>,
        collection: &str,
        pipeline: &Pipeline,
        max_time: Option<Duration>,
    ) -> Result<Cursor, StoreError> {
        let started = Instant::now();
        let documents = self.read(session, collection, |data| Ok(data.documents.clone()))?;
        let foreign = |from: &str| self.read(session, from, |data| Ok(data.documents.clone()));
        let documents = eval::run_pipeline(documents, pipeline, &foreign)?;
        check_time(started, max_time)?;
        Ok(into_cursor(documents))
    }
}
