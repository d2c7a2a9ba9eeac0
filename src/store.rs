//! Image record persistence, the boundary the snapshot path writes through

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

pub type RecordId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: RecordId,
    pub location: String,
    pub created_at: DateTime<Utc>,
}

/// Where captured images are recorded.
pub trait ImageStore: Send + Sync {
    fn save_image_record(&self, location: &str) -> Result<RecordId>;

    /// Every record, newest first.
    fn list_image_records(&self) -> Result<Vec<ImageRecord>>;

    /// Remove a record, returning it if it existed.
    fn delete_image_record(&self, id: RecordId) -> Result<Option<ImageRecord>>;
}

/// Process-local store, records are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryImageStore {
    records: Mutex<Vec<ImageRecord>>,
    next_id: AtomicU64,
}

impl MemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ImageStore for MemoryImageStore {
    fn save_image_record(&self, location: &str) -> Result<RecordId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let record = ImageRecord {
            id,
            location: location.to_string(),
            created_at: Utc::now(),
        };
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        Ok(id)
    }

    fn list_image_records(&self) -> Result<Vec<ImageRecord>> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.iter().rev().cloned().collect())
    }

    fn delete_image_record(&self, id: RecordId) -> Result<Option<ImageRecord>> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .iter()
            .position(|r| r.id == id)
            .map(|index| records.remove(index)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_list_newest_first() {
        let store = MemoryImageStore::new();
        let a = store.save_image_record("a.jpg").unwrap();
        let b = store.save_image_record("b.jpg").unwrap();
        assert!(b > a);

        let listed: Vec<_> = store
            .list_image_records()
            .unwrap()
            .into_iter()
            .map(|r| r.location)
            .collect();
        assert_eq!(listed, ["b.jpg", "a.jpg"]);
    }

    #[test]
    fn delete_removes_only_the_named_record() {
        let store = MemoryImageStore::new();
        let a = store.save_image_record("a.jpg").unwrap();
        let b = store.save_image_record("b.jpg").unwrap();

        assert_eq!(store.delete_image_record(a).unwrap().unwrap().location, "a.jpg");
        assert!(store.delete_image_record(a).unwrap().is_none());
        assert_eq!(store.list_image_records().unwrap()[0].id, b);
    }
}
