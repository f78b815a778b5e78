//! In-memory storage backend.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Result, Storage, StorageCursor, StorageError, StorageRecord, TagFilter};

/// Storage that keeps records in process memory, keyed by id.
#[derive(Default)]
pub struct BasicStorage {
    records: RwLock<HashMap<String, StorageRecord>>,
}

impl BasicStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(record: &StorageRecord) -> StorageError {
    StorageError::NotFound(format!("Record not found: {}", record.id))
}

#[async_trait]
impl Storage for BasicStorage {
    async fn add_record(&self, record: &StorageRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(StorageError::Duplicate(format!(
                "Duplicate record id: {}",
                record.id
            )));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_record(&self, record_type: &str, record_id: &str) -> Result<StorageRecord> {
        self.records
            .read()
            .await
            .get(record_id)
            .filter(|record| record.record_type == record_type)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("Record not found: {record_id}")))
    }

    async fn update_record_value(&self, record: &StorageRecord, value: &str) -> Result<()> {
        let mut records = self.records.write().await;
        let stored = records.get_mut(&record.id).ok_or_else(|| not_found(record))?;
        stored.value = value.to_string();
        Ok(())
    }

    async fn update_record_tags(
        &self,
        record: &StorageRecord,
        tags: &HashMap<String, String>,
    ) -> Result<()> {
        let mut records = self.records.write().await;
        let stored = records.get_mut(&record.id).ok_or_else(|| not_found(record))?;
        stored.tags = tags.clone();
        Ok(())
    }

    async fn delete_record(&self, record: &StorageRecord) -> Result<()> {
        self.records
            .write()
            .await
            .remove(&record.id)
            .map(|_| ())
            .ok_or_else(|| not_found(record))
    }

    async fn open_search(
        &self,
        record_type: &str,
        tag_filter: &TagFilter,
    ) -> Result<Box<dyn StorageCursor>> {
        let matches = self
            .records
            .read()
            .await
            .values()
            .filter(|record| record.matches(record_type, tag_filter))
            .cloned()
            .collect();
        Ok(Box::new(BasicCursor {
            records: matches,
            open: true,
        }))
    }
}

/// A cursor over a snapshot taken when the search was opened.
struct BasicCursor {
    records: VecDeque<StorageRecord>,
    open: bool,
}

#[async_trait]
impl StorageCursor for BasicCursor {
    async fn next_page(&mut self, max_count: usize) -> Result<Vec<StorageRecord>> {
        if !self.open {
            return Err(StorageError::Backend("Search is closed".to_string()));
        }
        let count = max_count.min(self.records.len());
        Ok(self.records.drain(..count).collect())
    }

    async fn close(&mut self) -> Result<()> {
        self.open = false;
        self.records.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(record_type: &str, value: &str, state: &str) -> StorageRecord {
        StorageRecord::new(
            record_type,
            value,
            HashMap::from([("state".to_string(), state.to_string())]),
        )
    }

    #[tokio::test]
    async fn test_crud() {
        let storage = BasicStorage::new();
        let rec = record("connection", "{}", "invitation");
        storage.add_record(&rec).await.unwrap();
        assert!(matches!(
            storage.add_record(&rec).await,
            Err(StorageError::Duplicate(_))
        ));

        assert_eq!(storage.get_record("connection", &rec.id).await.unwrap(), rec);
        assert!(matches!(
            storage.get_record("did_doc", &rec.id).await,
            Err(StorageError::NotFound(_))
        ));

        storage.update_record_value(&rec, "{\"a\":1}").await.unwrap();
        let tags = HashMap::from([("state".to_string(), "request".to_string())]);
        storage.update_record_tags(&rec, &tags).await.unwrap();
        let fetched = storage.get_record("connection", &rec.id).await.unwrap();
        assert_eq!(fetched.value, "{\"a\":1}");
        assert_eq!(fetched.tags, tags);

        storage.delete_record(&rec).await.unwrap();
        assert!(matches!(
            storage.delete_record(&rec).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_search_paging() {
        let storage = BasicStorage::new();
        for i in 0..5 {
            storage
                .add_record(&record("connection", &i.to_string(), "active"))
                .await
                .unwrap();
        }
        storage
            .add_record(&record("connection", "other", "request"))
            .await
            .unwrap();

        let filter = TagFilter::from([("state".to_string(), "active".to_string())]);
        let mut cursor = storage.open_search("connection", &filter).await.unwrap();
        assert_eq!(cursor.next_page(3).await.unwrap().len(), 3);
        assert_eq!(cursor.next_page(3).await.unwrap().len(), 2);
        assert!(cursor.next_page(3).await.unwrap().is_empty());
        cursor.close().await.unwrap();
        assert!(matches!(
            cursor.next_page(1).await,
            Err(StorageError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_helpers() {
        let storage: Box<dyn Storage> = Box::new(BasicStorage::new());
        let only = record("connection", "only", "request");
        storage.add_record(&only).await.unwrap();
        storage
            .add_record(&record("connection", "a", "active"))
            .await
            .unwrap();
        storage
            .add_record(&record("connection", "b", "active"))
            .await
            .unwrap();

        let request = TagFilter::from([("state".to_string(), "request".to_string())]);
        let active = TagFilter::from([("state".to_string(), "active".to_string())]);
        let error = TagFilter::from([("state".to_string(), "error".to_string())]);

        assert_eq!(
            storage
                .search_records("connection", request)
                .fetch_single()
                .await
                .unwrap(),
            only
        );
        assert!(matches!(
            storage
                .search_records("connection", active.clone())
                .fetch_single()
                .await,
            Err(StorageError::Duplicate(_))
        ));
        assert!(matches!(
            storage.search_records("connection", error).fetch_single().await,
            Err(StorageError::NotFound(_))
        ));
        assert_eq!(
            storage
                .search_records("connection", active)
                .page_size(1)
                .fetch_all()
                .await
                .unwrap()
                .len(),
            2
        );
        assert_eq!(
            storage
                .search_records("connection", TagFilter::new())
                .fetch_all()
                .await
                .unwrap()
                .len(),
            3
        );
    }
}
