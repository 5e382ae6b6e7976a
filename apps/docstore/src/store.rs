//! In-memory collections of JSON documents.
//!
//! Readers load an immutable snapshot of a collection without locking;
//! writers serialize on the collection's write lock, build the next
//! snapshot, flush it when persistence is enabled and then publish it.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::persistence::SnapshotStore;

/// One named collection, documents in insertion order.
#[derive(Debug)]
pub struct Collection {
    pub name: String,
    documents: ArcSwap<Vec<Value>>,
    write_lock: Mutex<()>,
}

impl Collection {
    fn new(name: String, documents: Vec<Value>) -> Self {
        Self {
            name,
            documents: ArcSwap::from_pointee(documents),
            write_lock: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> Arc<Vec<Value>> {
        self.documents.load_full()
    }
}

/// All collections of the store.
#[derive(Debug, Default)]
pub struct DocumentStore {
    collections: RwLock<HashMap<String, Arc<Collection>>>,
    snapshots: Option<SnapshotStore>,
}

impl DocumentStore {
    /// A store that keeps nothing across restarts.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// A store backed by snapshot files, loading whatever they hold.
    pub fn open(snapshots: SnapshotStore) -> Result<Self, StoreError> {
        let mut collections = HashMap::new();
        for (name, documents) in snapshots.load_all()? {
            tracing::info!(collection = %name, documents = documents.len(), "Loaded collection");
            collections.insert(name.clone(), Arc::new(Collection::new(name, documents)));
        }
        Ok(Self {
            collections: RwLock::new(collections),
            snapshots: Some(snapshots),
        })
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Documents of `collection`; empty when it was never written.
    pub fn scan(&self, collection: &str) -> Arc<Vec<Value>> {
        match self.collections.read().get(collection) {
            Some(collection) => collection.snapshot(),
            None => Arc::new(Vec::new()),
        }
    }

    /// Inserts `document`, replacing any document with the same id in place.
    ///
    /// A document without an id gets a generated one. Returns the stored document.
    pub fn upsert(&self, collection: &str, document: Value) -> Result<Value, StoreError> {
        let Value::Object(mut fields) = document else {
            return Err(StoreError::InvalidDocument("document must be a JSON object".to_string()));
        };
        let id = document_id(&mut fields)?;
        let document = Value::Object(fields);

        let collection = self.collection(collection);
        let _writer = collection.write_lock.lock();
        let mut next = Vec::clone(&collection.snapshot());
        // ids compare as JSON values, so 1 and "1" are different documents
        match next.iter().position(|d| d.get("id") == Some(&id)) {
            Some(at) => next[at] = document.clone(),
            None => next.push(document.clone()),
        }
        self.publish(&collection, next)?;

        tracing::debug!(collection = %collection.name, id = %id, "Document stored");
        Ok(document)
    }

    /// Removes every document of `collection`, returning how many were removed.
    pub fn delete_all(&self, collection: &str) -> Result<usize, StoreError> {
        let Some(collection) = self.collections.read().get(collection).cloned() else {
            return Ok(0);
        };
        let _writer = collection.write_lock.lock();
        let removed = collection.snapshot().len();
        self.publish(&collection, Vec::new())?;

        tracing::debug!(collection = %collection.name, removed, "Collection cleared");
        Ok(removed)
    }

    fn collection(&self, name: &str) -> Arc<Collection> {
        if let Some(existing) = self.collections.read().get(name) {
            return Arc::clone(existing);
        }
        let mut collections = self.collections.write();
        Arc::clone(
            collections
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Collection::new(name.to_string(), Vec::new()))),
        )
    }

    // caller holds the collection's write lock
    fn publish(&self, collection: &Collection, documents: Vec<Value>) -> Result<(), StoreError> {
        if let Some(snapshots) = &self.snapshots {
            snapshots.flush(&collection.name, &documents)?;
        }
        collection.documents.store(Arc::new(documents));
        Ok(())
    }
}

/// Reads the document's id, generating one when absent.
fn document_id(fields: &mut Map<String, Value>) -> Result<Value, StoreError> {
    match fields.get("id") {
        None | Some(Value::Null) => {
            let id = Value::String(uuid::Uuid::new_v4().to_string());
            fields.insert("id".to_string(), id.clone());
            Ok(id)
        }
        Some(id @ (Value::String(_) | Value::Number(_))) => Ok(id.clone()),
        Some(value) => Err(StoreError::InvalidDocument(format!(
            "id must be a string or a number, got {}",
            value
        ))),
    }
}
