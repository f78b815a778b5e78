//! Record storage contract.
//!
//! Records are typed, tagged JSON strings. Searches hand out a
//! [`StorageCursor`] that yields pages of results; [`StorageSearch`] wraps a
//! cursor so it is closed on every exit path.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

mod basic;

pub use self::basic::BasicStorage;

/// Exact-match tag filter; every entry must match.
pub type TagFilter = HashMap<String, String>;

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No record matched
    #[error("Record not found: {0}")]
    NotFound(String),
    /// More than one record matched, or the id is already in use
    #[error("Duplicate record: {0}")]
    Duplicate(String),
    /// The backend failed
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// A stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRecord {
    /// The record type, used to scope searches
    pub record_type: String,
    /// The record value
    pub value: String,
    /// Searchable tags
    pub tags: HashMap<String, String>,
    /// The record id
    pub id: String,
}

impl StorageRecord {
    /// Creates a record with a fresh id.
    pub fn new(
        record_type: impl Into<String>,
        value: impl Into<String>,
        tags: HashMap<String, String>,
    ) -> Self {
        Self {
            record_type: record_type.into(),
            value: value.into(),
            tags,
            id: Uuid::new_v4().to_string(),
        }
    }

    /// Replaces the record id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    fn matches(&self, record_type: &str, tag_filter: &TagFilter) -> bool {
        self.record_type == record_type
            && tag_filter
                .iter()
                .all(|(name, value)| self.tags.get(name) == Some(value))
    }
}

/// Trait for storage backends.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Adds a new record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Duplicate`] if the id is already in use.
    async fn add_record(&self, record: &StorageRecord) -> Result<()>;

    /// Fetches a record by type and id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if no such record exists.
    async fn get_record(&self, record_type: &str, record_id: &str) -> Result<StorageRecord>;

    /// Replaces the value of an existing record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the record does not exist.
    async fn update_record_value(&self, record: &StorageRecord, value: &str) -> Result<()>;

    /// Replaces the tags of an existing record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the record does not exist.
    async fn update_record_tags(
        &self,
        record: &StorageRecord,
        tags: &HashMap<String, String>,
    ) -> Result<()>;

    /// Deletes a record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the record does not exist.
    async fn delete_record(&self, record: &StorageRecord) -> Result<()>;

    /// Opens a search over records of one type.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Backend`] if the search cannot be opened.
    async fn open_search(
        &self,
        record_type: &str,
        tag_filter: &TagFilter,
    ) -> Result<Box<dyn StorageCursor>>;
}

impl dyn Storage {
    /// Prepares a scoped search over records of one type.
    pub fn search_records(
        &self,
        record_type: impl Into<String>,
        tag_filter: TagFilter,
    ) -> StorageSearch<'_> {
        StorageSearch::new(self, record_type, tag_filter)
    }
}

/// An open search.
#[async_trait]
pub trait StorageCursor: Send {
    /// Fetches up to `max_count` further records; an empty page means done.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Backend`] if the cursor is closed.
    async fn next_page(&mut self, max_count: usize) -> Result<Vec<StorageRecord>>;

    /// Releases the cursor.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Backend`] if the backend fails to release it.
    async fn close(&mut self) -> Result<()>;
}

/// Default number of records fetched per page.
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// A search that opens and closes its own cursor.
pub struct StorageSearch<'a> {
    storage: &'a dyn Storage,
    record_type: String,
    tag_filter: TagFilter,
    page_size: usize,
}

impl<'a> StorageSearch<'a> {
    /// Creates a search over `storage`.
    pub fn new(
        storage: &'a dyn Storage,
        record_type: impl Into<String>,
        tag_filter: TagFilter,
    ) -> Self {
        Self {
            storage,
            record_type: record_type.into(),
            tag_filter,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Sets the page size used while draining the cursor.
    #[must_use]
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Fetches every matching record.
    ///
    /// # Errors
    ///
    /// Propagates backend errors; the cursor is closed either way.
    pub async fn fetch_all(self) -> Result<Vec<StorageRecord>> {
        let mut cursor = self
            .storage
            .open_search(&self.record_type, &self.tag_filter)
            .await?;
        let fetched = drain(cursor.as_mut(), self.page_size, None).await;
        let closed = cursor.close().await;
        let records = fetched?;
        closed?;
        Ok(records)
    }

    /// Fetches the single matching record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] when nothing matches and
    /// [`StorageError::Duplicate`] when more than one record matches.
    pub async fn fetch_single(self) -> Result<StorageRecord> {
        let mut cursor = self
            .storage
            .open_search(&self.record_type, &self.tag_filter)
            .await?;
        let fetched = drain(cursor.as_mut(), 2, Some(2)).await;
        let closed = cursor.close().await;
        let mut records = fetched?;
        closed?;

        match records.len() {
            0 => Err(StorageError::NotFound(format!(
                "{} record not found",
                self.record_type
            ))),
            1 => Ok(records.remove(0)),
            _ => Err(StorageError::Duplicate(format!(
                "Duplicate {} records found",
                self.record_type
            ))),
        }
    }
}

async fn drain(
    cursor: &mut dyn StorageCursor,
    page_size: usize,
    limit: Option<usize>,
) -> Result<Vec<StorageRecord>> {
    let mut records = Vec::new();
    loop {
        let page = cursor.next_page(page_size).await?;
        if page.is_empty() {
            return Ok(records);
        }
        records.extend(page);
        if limit.is_some_and(|limit| records.len() >= limit) {
            return Ok(records);
        }
    }
}
