//! In-memory search index

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use super::{IndexDocument, SearchIndex};
use crate::errors::{IndexError, IndexResult};

#[derive(Debug, Default)]
struct IndexState {
    documents: Vec<IndexDocument>,
    next_id: u64,
    unavailable_for: u32,
}

/// Search index kept in process; document ids are sequential
#[derive(Debug, Default)]
pub struct MemorySearchIndex {
    state: Mutex<IndexState>,
}

impl MemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls fail as unavailable
    pub fn fail_next(&self, count: u32) {
        self.lock().unavailable_for = count;
    }

    pub fn documents_for(&self, key: &str) -> Vec<IndexDocument> {
        self.lock()
            .documents
            .iter()
            .filter(|doc| doc.key == key)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, IndexState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(state: &mut IndexState) -> IndexResult<()> {
        if state.unavailable_for > 0 {
            state.unavailable_for -= 1;
            return Err(IndexError::Unavailable {
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn find_by_key(&self, key: &str) -> IndexResult<Vec<IndexDocument>> {
        let mut state = self.lock();
        Self::check(&mut state)?;
        Ok(state
            .documents
            .iter()
            .filter(|doc| doc.key == key)
            .cloned()
            .collect())
    }

    async fn insert(&self, key: &str, body: Value) -> IndexResult<String> {
        let mut state = self.lock();
        Self::check(&mut state)?;
        state.next_id += 1;
        let id = format!("doc-{}", state.next_id);
        state.documents.push(IndexDocument {
            id: id.clone(),
            key: key.to_string(),
            body,
        });
        Ok(id)
    }

    async fn replace(&self, doc_id: &str, body: Value) -> IndexResult<()> {
        let mut state = self.lock();
        Self::check(&mut state)?;
        let doc = state
            .documents
            .iter_mut()
            .find(|doc| doc.id == doc_id)
            .ok_or_else(|| IndexError::DocumentNotFound {
                doc_id: doc_id.to_string(),
            })?;
        doc.body = body;
        Ok(())
    }

    async fn delete(&self, doc_id: &str) -> IndexResult<()> {
        let mut state = self.lock();
        Self::check(&mut state)?;
        let before = state.documents.len();
        state.documents.retain(|doc| doc.id != doc_id);
        if state.documents.len() == before {
            return Err(IndexError::DocumentNotFound {
                doc_id: doc_id.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_replace_and_delete_unknown_document() {
        let index = MemorySearchIndex::new();
        let err = index.replace("doc-9", json!({})).await.unwrap_err();
        assert!(matches!(err, IndexError::DocumentNotFound { .. }));
        assert!(index.delete("doc-9").await.is_err());
    }

    #[tokio::test]
    async fn test_injected_unavailability() {
        let index = MemorySearchIndex::new();
        index.fail_next(1);
        assert!(index.find_by_key("k").await.is_err());
        assert!(index.find_by_key("k").await.unwrap().is_empty());
    }
}
