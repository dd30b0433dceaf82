//! Change queue: the append-only log of local mutations awaiting push.
//!
//! Entries are never edited. A push acknowledges the entries it carried and
//! acknowledged entries are dropped only when the log is compacted, so a
//! failed push leaves the log exactly as it was.

use crate::{error::Result, store::Entity, Timestamp};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Entity tables known to the replicas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Table {
    Categories,
    Products,
    Inventory,
    Orders,
    OrderItems,
}

impl Table {
    pub fn as_str(self) -> &'static str {
        match self {
            Table::Categories => "categories",
            Table::Products => "products",
            Table::Inventory => "inventory",
            Table::Orders => "orders",
            Table::OrderItems => "orderItems",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of local mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

/// One logged mutation with a snapshot of the record at that moment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeQueueEntry {
    /// Position in the log, strictly increasing
    pub seq: u64,
    pub table: Table,
    pub action: ChangeAction,
    /// Display form of the record key
    pub key: String,
    pub record: serde_json::Value,
    pub updated_at: Timestamp,
    pub acknowledged: bool,
}

/// The latest pending state of one record, with every entry it folds.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChange<T> {
    pub action: ChangeAction,
    pub record: T,
    pub seqs: Vec<u64>,
}

/// Append-only log of pending mutations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeQueue {
    entries: Vec<ChangeQueueEntry>,
    next_seq: u64,
}

impl ChangeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log a mutation of `record`. Returns the entry's sequence number.
    pub fn append<T: Entity>(
        &mut self,
        action: ChangeAction,
        record: &T,
        updated_at: Timestamp,
    ) -> Result<u64> {
        let seq = self.next_seq;
        self.entries.push(ChangeQueueEntry {
            seq,
            table: T::TABLE,
            action,
            key: record.key().to_string(),
            record: serde_json::to_value(record)?,
            updated_at,
            acknowledged: false,
        });
        self.next_seq += 1;
        Ok(seq)
    }

    /// Unacknowledged entries for a table, in log order.
    pub fn pending(&self, table: Table) -> impl Iterator<Item = &ChangeQueueEntry> {
        self.entries
            .iter()
            .filter(move |e| e.table == table && !e.acknowledged)
    }

    /// Count of unacknowledged entries for a table.
    pub fn pending_count(&self, table: Table) -> usize {
        self.pending(table).count()
    }

    /// Fold pending entries per record key, keeping the latest snapshot.
    pub fn latest_pending<T: Entity + DeserializeOwned>(&self) -> Result<Vec<PendingChange<T>>> {
        let mut folded: BTreeMap<&str, PendingChange<T>> = BTreeMap::new();
        for entry in self.pending(T::TABLE) {
            let record: T = serde_json::from_value(entry.record.clone())?;
            match folded.get_mut(entry.key.as_str()) {
                Some(change) => {
                    // A create followed by updates is still a create on the wire
                    if change.action != ChangeAction::Create || entry.action == ChangeAction::Delete
                    {
                        change.action = entry.action;
                    }
                    change.record = record;
                    change.seqs.push(entry.seq);
                }
                None => {
                    folded.insert(
                        entry.key.as_str(),
                        PendingChange {
                            action: entry.action,
                            record,
                            seqs: vec![entry.seq],
                        },
                    );
                }
            }
        }
        Ok(folded.into_values().collect())
    }

    /// Mark entries as pushed.
    pub fn acknowledge(&mut self, seqs: &[u64]) {
        for entry in &mut self.entries {
            if seqs.contains(&entry.seq) {
                entry.acknowledged = true;
            }
        }
    }

    /// Mark every pending entry of one record as pushed.
    pub fn acknowledge_key(&mut self, table: Table, key: &str) {
        for entry in &mut self.entries {
            if entry.table == table && entry.key == key {
                entry.acknowledged = true;
            }
        }
    }

    /// Mark every entry of a table as pushed.
    pub fn acknowledge_table(&mut self, table: Table) {
        for entry in &mut self.entries {
            if entry.table == table {
                entry.acknowledged = true;
            }
        }
    }

    /// Drop acknowledged entries. Returns how many were removed.
    pub fn compact(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !e.acknowledged);
        before - self.entries.len()
    }

    pub fn entries(&self) -> &[ChangeQueueEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Category;

    fn category(title: &str, at: i64) -> Category {
        Category::remote(1, title, false, Timestamp::from_millis(at))
    }

    #[test]
    fn append_assigns_increasing_seqs() {
        let mut queue = ChangeQueue::new();
        let a = queue.append(ChangeAction::Create, &category("a", 1), Timestamp::from_millis(1)).unwrap();
        let b = queue.append(ChangeAction::Update, &category("b", 2), Timestamp::from_millis(2)).unwrap();
        assert!(b > a);
        assert_eq!(queue.pending_count(Table::Categories), 2);
        assert_eq!(queue.pending_count(Table::Orders), 0);
    }

    #[test]
    fn latest_pending_folds_by_key() {
        let mut queue = ChangeQueue::new();
        queue.append(ChangeAction::Update, &category("first", 1), Timestamp::from_millis(1)).unwrap();
        queue.append(ChangeAction::Update, &category("second", 2), Timestamp::from_millis(2)).unwrap();

        let pending: Vec<PendingChange<Category>> = queue.latest_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].record.title, "second");
        assert_eq!(pending[0].seqs, vec![0, 1]);
        assert_eq!(pending[0].action, ChangeAction::Update);
    }

    #[test]
    fn create_then_update_stays_create() {
        let mut queue = ChangeQueue::new();
        let local = Category::new_local("Snacks", false, Timestamp::from_millis(1));
        queue.append(ChangeAction::Create, &local, Timestamp::from_millis(1)).unwrap();
        let mut edited = local.clone();
        edited.completed = true;
        queue.append(ChangeAction::Update, &edited, Timestamp::from_millis(2)).unwrap();

        let pending: Vec<PendingChange<Category>> = queue.latest_pending().unwrap();
        assert_eq!(pending[0].action, ChangeAction::Create);
        assert!(pending[0].record.completed);

        queue.append(ChangeAction::Delete, &edited, Timestamp::from_millis(3)).unwrap();
        let pending: Vec<PendingChange<Category>> = queue.latest_pending().unwrap();
        assert_eq!(pending[0].action, ChangeAction::Delete);
    }

    #[test]
    fn acknowledged_entries_survive_until_compaction() {
        let mut queue = ChangeQueue::new();
        let seq = queue.append(ChangeAction::Create, &category("a", 1), Timestamp::from_millis(1)).unwrap();
        queue.append(ChangeAction::Update, &category("b", 2), Timestamp::from_millis(2)).unwrap();

        queue.acknowledge(&[seq]);
        assert_eq!(queue.pending_count(Table::Categories), 1);
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.compact(), 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.entries()[0].seq, 1);
    }

    #[test]
    fn acknowledge_key_only_touches_that_record() {
        let mut queue = ChangeQueue::new();
        queue.append(ChangeAction::Update, &category("a", 1), Timestamp::from_millis(1)).unwrap();
        let other = Category::remote(2, "b", false, Timestamp::from_millis(1));
        queue.append(ChangeAction::Update, &other, Timestamp::from_millis(1)).unwrap();

        queue.acknowledge_key(Table::Categories, "1");
        let pending: Vec<_> = queue.pending(Table::Categories).collect();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key, "2");
    }
}
