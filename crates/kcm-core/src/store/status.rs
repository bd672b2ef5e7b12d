//! Process status rows for brokers and the coordination service.

use rusqlite::{OptionalExtension, params};
use tracing::debug;

use super::{STORE_TARGET, Store, StoreError};
use crate::model::{EntityKey, ProcessStatus};

impl Store {
    /// Reads the status row for `key`.
    pub fn status(&self, key: EntityKey) -> Result<Option<ProcessStatus>, StoreError> {
        let pid = match key {
            EntityKey::Coordination => self
                .conn
                .query_row(
                    "SELECT process_id FROM coordination_status LIMIT 1",
                    [],
                    |row| row.get::<_, i64>(0),
                )
                .optional(),
            EntityKey::Broker {
                cluster_id,
                broker_id,
            } => self
                .conn
                .query_row(
                    "SELECT process_id FROM broker_status WHERE cluster_id = ?1 AND broker_id = ?2",
                    params![cluster_id, broker_id],
                    |row| row.get::<_, i64>(0),
                )
                .optional(),
        }
        .map_err(StoreError::query("select status"))?;
        Ok(pid.map(|pid| ProcessStatus { key, pid }))
    }

    /// Replaces the row for `status.key`.
    ///
    /// Rows are never updated in place: the old row is deleted and the new one
    /// inserted inside one transaction.
    pub fn put_status(&mut self, status: &ProcessStatus) -> Result<(), StoreError> {
        let tx = self
            .conn
            .transaction()
            .map_err(StoreError::query("begin transaction"))?;
        match status.key {
            EntityKey::Coordination => {
                tx.execute("DELETE FROM coordination_status", [])
                    .map_err(StoreError::query("clear coordination status"))?;
                tx.execute(
                    "INSERT INTO coordination_status (process_id) VALUES (?1)",
                    params![status.pid],
                )
                .map_err(StoreError::query("insert coordination status"))?;
            }
            EntityKey::Broker {
                cluster_id,
                broker_id,
            } => {
                tx.execute(
                    "DELETE FROM broker_status WHERE cluster_id = ?1 AND broker_id = ?2",
                    params![cluster_id, broker_id],
                )
                .map_err(StoreError::query("clear broker status"))?;
                tx.execute(
                    "INSERT INTO broker_status (process_id, cluster_id, broker_id) VALUES (?1, ?2, ?3)",
                    params![status.pid, cluster_id, broker_id],
                )
                .map_err(StoreError::query("insert broker status"))?;
            }
        }
        tx.commit().map_err(StoreError::query("commit status"))?;
        debug!(
            target: STORE_TARGET,
            entity = %status.key,
            pid = status.pid,
            "status recorded"
        );
        Ok(())
    }

    /// Removes the row for `key`, if any.
    pub fn delete_status(&mut self, key: EntityKey) -> Result<(), StoreError> {
        let removed = match key {
            EntityKey::Coordination => self.conn.execute("DELETE FROM coordination_status", []),
            EntityKey::Broker {
                cluster_id,
                broker_id,
            } => self.conn.execute(
                "DELETE FROM broker_status WHERE cluster_id = ?1 AND broker_id = ?2",
                params![cluster_id, broker_id],
            ),
        }
        .map_err(StoreError::query("delete status"))?;
        debug!(target: STORE_TARGET, entity = %key, removed, "status removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewCluster;
    use crate::store::CreateOutcome;
    use rstest::{fixture, rstest};

    #[fixture]
    fn seeded() -> (Store, i64) {
        let mut store = Store::open_in_memory().expect("in-memory store");
        let cluster = NewCluster::with_default_brokers("dev", "2.8.0", 2).expect("valid");
        let CreateOutcome::Created(cluster) = store.create_cluster(&cluster).expect("create")
        else {
            panic!("expected a fresh cluster");
        };
        (store, cluster.id)
    }

    #[rstest]
    fn coordination_row_is_a_singleton(seeded: (Store, i64)) {
        let (mut store, _) = seeded;
        store
            .put_status(&ProcessStatus::new(EntityKey::Coordination, 100))
            .expect("first put");
        store
            .put_status(&ProcessStatus::new(EntityKey::Coordination, 200))
            .expect("second put");
        let row = store.status(EntityKey::Coordination).expect("query");
        assert_eq!(row.map(|s| s.pid), Some(200));
        let count: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM coordination_status", [], |r| r.get(0))
            .expect("count");
        assert_eq!(count, 1);
    }

    #[rstest]
    fn broker_rows_are_keyed_per_broker(seeded: (Store, i64)) {
        let (mut store, cluster_id) = seeded;
        let first = EntityKey::Broker {
            cluster_id,
            broker_id: 1,
        };
        let second = EntityKey::Broker {
            cluster_id,
            broker_id: 2,
        };
        store.put_status(&ProcessStatus::new(first, 11)).expect("put");
        store.put_status(&ProcessStatus::new(second, 22)).expect("put");
        store.put_status(&ProcessStatus::new(first, 33)).expect("replace");

        assert_eq!(store.status(first).expect("query").map(|s| s.pid), Some(33));
        assert_eq!(store.status(second).expect("query").map(|s| s.pid), Some(22));

        store.delete_status(first).expect("delete");
        assert!(store.status(first).expect("query").is_none());
        store.delete_status(first).expect("deleting twice is fine");
    }

    #[rstest]
    fn status_for_unknown_broker_is_rejected(seeded: (Store, i64)) {
        let (mut store, cluster_id) = seeded;
        let ghost = EntityKey::Broker {
            cluster_id,
            broker_id: 9,
        };
        assert!(store.put_status(&ProcessStatus::new(ghost, 1)).is_err());
    }
}
