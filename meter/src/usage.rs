use crate::identity::ClientIdentity;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;

/// Cumulative bytes transferred by one client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageRecord {
    pub read: u64,
    pub written: u64,
}

impl UsageRecord {
    pub fn total(&self) -> u64 {
        self.read.saturating_add(self.written)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientUsage {
    pub client: ClientIdentity,
    pub read: u64,
    pub written: u64,
}

/// Point-in-time copy of the usage table, clients sorted by identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    pub clients: Vec<ClientUsage>,
    pub total: u64,
}

#[derive(Default)]
struct UsageState {
    clients: HashMap<ClientIdentity, UsageRecord>,
    /// Always equal to the sum of every record's total.
    total: u64,
}

/// Per-client and global byte counters behind a single lock.
///
/// A client's record and the global total are updated under the same write
/// guard, so no reader observes one without the other. Records are created on
/// the first transferred byte and never evicted.
#[derive(Default)]
pub struct UsageTable {
    inner: RwLock<UsageState>,
}

impl UsageTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_read(&self, client: &ClientIdentity, bytes: u64) {
        self.record(client, bytes, 0);
    }

    pub fn record_write(&self, client: &ClientIdentity, bytes: u64) {
        self.record(client, 0, bytes);
    }

    fn record(&self, client: &ClientIdentity, read: u64, written: u64) {
        if read == 0 && written == 0 {
            return;
        }
        let mut guard = self.inner.write();
        let state = &mut *guard;
        match state.clients.get_mut(client) {
            Some(record) => {
                record.read = record.read.saturating_add(read);
                record.written = record.written.saturating_add(written);
            }
            None => {
                state
                    .clients
                    .insert(client.clone(), UsageRecord { read, written });
            }
        }
        // Counters stick at u64::MAX instead of wrapping.
        state.total = state.total.saturating_add(read).saturating_add(written);
    }

    /// Returns `None` for a client that has not transferred a byte yet.
    pub fn usage(&self, client: &str) -> Option<UsageRecord> {
        self.inner.read().clients.get(client).copied()
    }

    pub fn global_total(&self) -> u64 {
        self.inner.read().total
    }

    /// Reads a client's record and the global total from the same state.
    pub fn view(&self, client: &str) -> (Option<UsageRecord>, u64) {
        let state = self.inner.read();
        (state.clients.get(client).copied(), state.total)
    }

    /// Visits every record under a shared guard. The visitor must not call
    /// back into the table's mutating methods.
    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&ClientIdentity, &UsageRecord),
    {
        let state = self.inner.read();
        for (client, record) in &state.clients {
            visitor(client, record);
        }
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        let state = self.inner.read();
        let mut clients: Vec<ClientUsage> = state
            .clients
            .iter()
            .map(|(client, record)| ClientUsage {
                client: client.clone(),
                read: record.read,
                written: record.written,
            })
            .collect();
        let total = state.total;
        drop(state);

        clients.sort_by(|a, b| a.client.cmp(&b.client));
        UsageSnapshot { clients, total }
    }

    pub fn client_count(&self) -> usize {
        self.inner.read().clients.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn client(addr: &str) -> ClientIdentity {
        ClientIdentity::parse(addr)
    }

    fn sum_of_records(table: &UsageTable) -> u64 {
        let mut sum = 0;
        table.for_each(|_, record| sum += record.total());
        sum
    }

    #[test]
    fn unseen_client_has_no_record() {
        let table = UsageTable::new();
        assert_eq!(table.usage("10.0.0.1"), None);
        assert_eq!(table.global_total(), 0);
    }

    #[test]
    fn zero_byte_transfers_do_not_create_records() {
        let table = UsageTable::new();
        table.record_read(&client("10.0.0.1"), 0);
        table.record_write(&client("10.0.0.1"), 0);
        assert_eq!(table.usage("10.0.0.1"), None);
        assert_eq!(table.client_count(), 0);
    }

    #[test]
    fn first_transfer_is_counted() {
        let table = UsageTable::new();
        table.record_read(&client("10.0.0.1"), 42);
        assert_eq!(
            table.usage("10.0.0.1"),
            Some(UsageRecord {
                read: 42,
                written: 0
            })
        );
        assert_eq!(table.global_total(), 42);
    }

    #[test]
    fn global_total_matches_sum_after_every_operation() {
        let table = UsageTable::new();
        let ops: [(&str, u64, bool); 6] = [
            ("10.0.0.1", 100, true),
            ("10.0.0.2", 250, false),
            ("10.0.0.1", 7, false),
            ("10.0.0.3", 1, true),
            ("10.0.0.2", 4096, true),
            ("10.0.0.1", 3, true),
        ];

        let mut previous = 0;
        for (addr, bytes, is_read) in ops {
            if is_read {
                table.record_read(&client(addr), bytes);
            } else {
                table.record_write(&client(addr), bytes);
            }
            let total = table.global_total();
            assert_eq!(total, sum_of_records(&table));
            assert!(total >= previous);
            previous = total;
        }

        assert_eq!(
            table.usage("10.0.0.1"),
            Some(UsageRecord {
                read: 103,
                written: 7
            })
        );
    }

    #[test]
    fn two_clients_each_transfer_a_thousand_bytes() {
        let table = UsageTable::new();
        table.record_read(&client("10.0.0.1"), 1000);
        table.record_write(&client("10.0.0.2"), 1000);

        assert_eq!(table.global_total(), 2000);
        assert_eq!(table.usage("10.0.0.1").unwrap().total(), 1000);
        assert_eq!(table.usage("10.0.0.2").unwrap().total(), 1000);
    }

    #[test]
    fn snapshot_is_sorted_and_consistent() {
        let table = UsageTable::new();
        table.record_read(&client("10.0.0.9"), 5);
        table.record_write(&client("10.0.0.1"), 9);

        let snapshot = table.snapshot();
        assert_eq!(snapshot.total, 14);
        let names: Vec<&str> = snapshot.clients.iter().map(|c| c.client.as_str()).collect();
        assert_eq!(names, ["10.0.0.1", "10.0.0.9"]);
    }

    #[test]
    fn snapshot_serializes_identity_as_string() {
        let table = UsageTable::new();
        table.record_read(&client("[::1]:9000"), 3);

        let json = serde_json::to_value(table.snapshot()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "clients": [{ "client": "::1", "read": 3, "written": 0 }],
                "total": 3
            })
        );
    }

    #[test]
    fn counters_saturate_instead_of_overflowing() {
        let table = UsageTable::new();
        table.record_read(&client("10.0.0.1"), u64::MAX - 1);
        table.record_read(&client("10.0.0.1"), 10);
        table.record_write(&client("10.0.0.1"), 10);

        let record = table.usage("10.0.0.1").unwrap();
        assert_eq!(record.read, u64::MAX);
        assert_eq!(record.written, 10);
        assert_eq!(record.total(), u64::MAX);
        assert_eq!(table.global_total(), u64::MAX);
    }

    #[test]
    fn concurrent_updates_keep_invariant() {
        let table = Arc::new(UsageTable::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let table = table.clone();
                std::thread::spawn(move || {
                    let id = client(&format!("10.0.0.{}", i % 3));
                    for _ in 0..1000 {
                        table.record_read(&id, 3);
                        table.record_write(&id, 2);
                        let (record, total) = table.view(id.as_str());
                        assert!(record.unwrap().total() <= total);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(table.global_total(), 8 * 1000 * 5);
        assert_eq!(table.global_total(), sum_of_records(&table));
        assert_eq!(table.client_count(), 3);
    }
}
