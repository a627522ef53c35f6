//! In-memory record store.

use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use super::{now_secs, InsertOutcome, Keyspace, Record, RecordStore, StoreError, SwapOutcome};

#[derive(Default)]
struct Space {
    records: HashMap<Uuid, Record>,
    keys: HashMap<Vec<u8>, Uuid>,
}

/// Process-local store. One mutex covers all keyspaces; every operation is
/// a handful of map accesses.
#[derive(Default)]
pub struct MemoryStore {
    spaces: Mutex<HashMap<Keyspace, Space>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn get(&self, space: Keyspace, id: Uuid) -> Result<Option<Record>, StoreError> {
        let spaces = self.spaces.lock()?;
        Ok(spaces.get(&space).and_then(|s| s.records.get(&id)).cloned())
    }

    fn lookup(&self, space: Keyspace, key: &[u8]) -> Result<Option<Uuid>, StoreError> {
        let spaces = self.spaces.lock()?;
        Ok(spaces.get(&space).and_then(|s| s.keys.get(key)).copied())
    }

    fn insert_if_absent(
        &self,
        space: Keyspace,
        record: Record,
    ) -> Result<InsertOutcome, StoreError> {
        let mut spaces = self.spaces.lock()?;
        let s = spaces.entry(space).or_default();
        if let Some(existing) = s.keys.get(&record.key) {
            return Ok(InsertOutcome::Existing(*existing));
        }
        s.keys.insert(record.key.clone(), record.id);
        s.records.insert(record.id, record.clone());
        Ok(InsertOutcome::Inserted(record))
    }

    fn compare_and_swap(
        &self,
        space: Keyspace,
        id: Uuid,
        expected_revision: u64,
        body: Vec<u8>,
    ) -> Result<SwapOutcome, StoreError> {
        let mut spaces = self.spaces.lock()?;
        let Some(current) = spaces.get_mut(&space).and_then(|s| s.records.get_mut(&id)) else {
            return Ok(SwapOutcome::Missing);
        };
        if current.revision != expected_revision {
            return Ok(SwapOutcome::Stale {
                current_revision: current.revision,
            });
        }
        current.revision += 1;
        current.body = body;
        current.updated_at = now_secs();
        Ok(SwapOutcome::Swapped(current.clone()))
    }

    fn list_ids(&self, space: Keyspace) -> Result<Vec<Uuid>, StoreError> {
        let spaces = self.spaces.lock()?;
        Ok(spaces
            .get(&space)
            .map(|s| s.records.keys().copied().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_if_absent_first_writer_wins() {
        let store = MemoryStore::new();
        let first = Record::new(Uuid::new_v4(), b"k".to_vec(), vec![1]);
        let second = Record::new(Uuid::new_v4(), b"k".to_vec(), vec![2]);

        assert!(matches!(
            store.insert_if_absent(Keyspace::Canvas, first.clone()).unwrap(),
            InsertOutcome::Inserted(_)
        ));
        assert_eq!(
            store.insert_if_absent(Keyspace::Canvas, second).unwrap(),
            InsertOutcome::Existing(first.id)
        );
        assert_eq!(store.get_by_key(Keyspace::Canvas, b"k").unwrap().unwrap().body, vec![1]);
    }

    #[test]
    fn test_keyspaces_isolated() {
        let store = MemoryStore::new();
        let rec = Record::new(Uuid::new_v4(), b"k".to_vec(), vec![]);
        store.insert_if_absent(Keyspace::Canvas, rec.clone()).unwrap();

        assert!(store.lookup(Keyspace::Workflow, b"k").unwrap().is_none());
        assert!(store.get(Keyspace::Workflow, rec.id).unwrap().is_none());
        assert_eq!(store.list_ids(Keyspace::Canvas).unwrap(), vec![rec.id]);
        assert!(store.list_ids(Keyspace::Project).unwrap().is_empty());
    }

    #[test]
    fn test_compare_and_swap_revisions() {
        let store = MemoryStore::new();
        let rec = Record::new(Uuid::new_v4(), b"k".to_vec(), vec![0]);
        store.insert_if_absent(Keyspace::Workflow, rec.clone()).unwrap();

        match store.compare_and_swap(Keyspace::Workflow, rec.id, 1, vec![1]).unwrap() {
            SwapOutcome::Swapped(r) => assert_eq!(r.revision, 2),
            other => panic!("expected swap, got {other:?}"),
        }
        assert_eq!(
            store.compare_and_swap(Keyspace::Workflow, rec.id, 1, vec![2]).unwrap(),
            SwapOutcome::Stale { current_revision: 2 }
        );
        assert_eq!(
            store.compare_and_swap(Keyspace::Workflow, Uuid::new_v4(), 1, vec![]).unwrap(),
            SwapOutcome::Missing
        );
        assert_eq!(store.get(Keyspace::Workflow, rec.id).unwrap().unwrap().body, vec![1]);
    }
}
