//! Object store client.
//!
//! The persistent store is external; this crate only speaks its key/value
//! surface: one record per tracked object, get-by-id and scan-all. The HTTP
//! client targets the deployed store gateway; the in-memory implementation
//! backs tests and store-less bench setups.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};
use types::{ObjectSummary, RecordedObject};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("object {0} not found")]
    NotFound(Uuid),
    #[error("store returned status {0}")]
    Status(u16),
}

/// Key/value surface of the object table.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Commit one recorded object.
    async fn put(&self, object: &RecordedObject) -> Result<(), StoreError>;

    /// Fetch a full record by ID.
    async fn get(&self, id: Uuid) -> Result<RecordedObject, StoreError>;

    /// List all records as summaries.
    async fn scan(&self) -> Result<Vec<ObjectSummary>, StoreError>;

    /// Delete a record by ID.
    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;
}

fn summarize(object: &RecordedObject) -> ObjectSummary {
    ObjectSummary {
        object_id: object.object_id,
        classification: object.classification.clone(),
        timestamp: object.positions.first().map(|p| p.ts.clone()),
    }
}

/// HTTP JSON client for the store gateway.
///
/// Records live at `{base}/objects` (collection) and
/// `{base}/objects/{id}` (item).
pub struct HttpStore {
    base_url: String,
    client: reqwest::Client,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn collection_url(&self) -> String {
        format!("{}/objects", self.base_url)
    }

    fn item_url(&self, id: Uuid) -> String {
        format!("{}/objects/{}", self.base_url, id)
    }
}

#[async_trait]
impl ObjectStore for HttpStore {
    async fn put(&self, object: &RecordedObject) -> Result<(), StoreError> {
        let response = self
            .client
            .post(self.collection_url())
            .json(object)
            .send()
            .await?;
        if !response.status().is_success() {
            warn!(status = %response.status(), "store put failed");
            return Err(StoreError::Status(response.status().as_u16()));
        }
        info!(id = %object.object_id, points = object.positions.len(), "object committed");
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<RecordedObject, StoreError> {
        let response = self.client.get(self.item_url(id)).send().await?;
        if response.status().as_u16() == 404 {
            return Err(StoreError::NotFound(id));
        }
        if !response.status().is_success() {
            return Err(StoreError::Status(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }

    async fn scan(&self) -> Result<Vec<ObjectSummary>, StoreError> {
        let response = self.client.get(self.collection_url()).send().await?;
        if !response.status().is_success() {
            return Err(StoreError::Status(response.status().as_u16()));
        }
        let objects: Vec<RecordedObject> = response.json().await?;
        Ok(objects.iter().map(summarize).collect())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let response = self.client.delete(self.item_url(id)).send().await?;
        if response.status().as_u16() == 404 {
            return Err(StoreError::NotFound(id));
        }
        if !response.status().is_success() {
            return Err(StoreError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

/// In-memory store for tests and offline operation.
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<Uuid, RecordedObject>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, object: &RecordedObject) -> Result<(), StoreError> {
        self.objects
            .write()
            .await
            .insert(object.object_id, object.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<RecordedObject, StoreError> {
        self.objects
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn scan(&self) -> Result<Vec<ObjectSummary>, StoreError> {
        Ok(self.objects.read().await.values().map(summarize).collect())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.objects
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::TrailPoint;

    fn object(class: &str, points: usize) -> RecordedObject {
        RecordedObject {
            object_id: Uuid::new_v4(),
            classification: class.to_string(),
            positions: (0..points)
                .map(|i| TrailPoint {
                    ts: format!("2026-03-01T12:00:{i:02}Z"),
                    lat: 51.0,
                    lon: -114.0,
                    alt: 100.0,
                    speed: 5.0,
                    heading: 90.0,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_memory_put_get_roundtrip() {
        let store = MemoryStore::new();
        let obj = object("car", 3);
        store.put(&obj).await.unwrap();

        let fetched = store.get(obj.object_id).await.unwrap();
        assert_eq!(fetched.classification, "car");
        assert_eq!(fetched.positions.len(), 3);
    }

    #[tokio::test]
    async fn test_memory_get_missing_is_not_found() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        assert!(matches!(
            store.get(id).await,
            Err(StoreError::NotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn test_memory_scan_summaries() {
        let store = MemoryStore::new();
        store.put(&object("car", 2)).await.unwrap();
        store.put(&object("person", 0)).await.unwrap();

        let mut summaries = store.scan().await.unwrap();
        summaries.sort_by(|a, b| a.classification.cmp(&b.classification));
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].classification, "car");
        assert_eq!(
            summaries[0].timestamp.as_deref(),
            Some("2026-03-01T12:00:00Z")
        );
        // No positions means no timestamp.
        assert!(summaries[1].timestamp.is_none());
    }

    #[tokio::test]
    async fn test_memory_delete() {
        let store = MemoryStore::new();
        let obj = object("car", 1);
        store.put(&obj).await.unwrap();
        store.delete(obj.object_id).await.unwrap();
        assert!(store.get(obj.object_id).await.is_err());
        assert!(store.delete(obj.object_id).await.is_err());
    }
}
