//! Cluster registry queries.

use rusqlite::{OptionalExtension, params};
use tracing::{debug, info};

use super::{STORE_TARGET, Store, StoreError};
use crate::model::{Broker, Cluster, NewCluster};

/// Result of inserting a cluster definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The cluster was inserted.
    Created(Cluster),
    /// A cluster with the same name already exists; nothing changed.
    AlreadyExists {
        /// Name that was already taken.
        name: String,
    },
}

impl Store {
    /// Inserts a cluster and its brokers in one transaction.
    ///
    /// A name collision is detected from the unique constraint and reported as
    /// [`CreateOutcome::AlreadyExists`] rather than an error.
    pub fn create_cluster(&mut self, cluster: &NewCluster) -> Result<CreateOutcome, StoreError> {
        let tx = self
            .conn
            .transaction()
            .map_err(StoreError::query("begin transaction"))?;
        let inserted = tx.execute(
            "INSERT INTO cluster (name, version) VALUES (?1, ?2)",
            params![cluster.name(), cluster.version()],
        );
        match inserted {
            Ok(_) => {}
            Err(error) if is_unique_violation(&error) => {
                info!(
                    target: STORE_TARGET,
                    cluster = cluster.name(),
                    "cluster already exists"
                );
                return Ok(CreateOutcome::AlreadyExists {
                    name: cluster.name().to_owned(),
                });
            }
            Err(source) => {
                return Err(StoreError::Query {
                    operation: "insert cluster",
                    source,
                });
            }
        }
        let id = tx.last_insert_rowid();
        {
            let mut insert = tx
                .prepare("INSERT INTO broker (id, cluster_id, addr) VALUES (?1, ?2, ?3)")
                .map_err(StoreError::query("prepare broker insert"))?;
            for broker in cluster.brokers() {
                insert
                    .execute(params![broker.id, id, broker.addr])
                    .map_err(StoreError::query("insert broker"))?;
            }
        }
        tx.commit().map_err(StoreError::query("commit cluster"))?;
        info!(
            target: STORE_TARGET,
            cluster = cluster.name(),
            id,
            brokers = cluster.brokers().len(),
            "cluster created"
        );
        Ok(CreateOutcome::Created(Cluster {
            id,
            name: cluster.name().to_owned(),
            version: cluster.version().to_owned(),
            brokers: cluster.brokers().to_vec(),
        }))
    }

    /// Fetches a cluster by name.
    pub fn cluster(&self, name: &str) -> Result<Option<Cluster>, StoreError> {
        let header = self
            .conn
            .query_row(
                "SELECT id, name, version FROM cluster WHERE name = ?1",
                params![name],
                |row| Ok((row.get::<_, i64>(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(StoreError::query("select cluster"))?;
        header
            .map(|(id, name, version)| self.with_brokers(id, name, version))
            .transpose()
    }

    /// Lists every cluster ordered by name.
    pub fn clusters(&self) -> Result<Vec<Cluster>, StoreError> {
        self.select_clusters("SELECT id, name, version FROM cluster ORDER BY name", &[])
    }

    /// Lists clusters whose name contains `pattern`.
    pub fn search_clusters(&self, pattern: &str) -> Result<Vec<Cluster>, StoreError> {
        let like = format!("%{}%", escape_like(pattern));
        self.select_clusters(
            "SELECT id, name, version FROM cluster WHERE name LIKE ?1 ESCAPE '\\' ORDER BY name",
            &[&like],
        )
    }

    /// Deletes a cluster by name, cascading to its brokers and status rows.
    ///
    /// Returns whether a cluster was removed.
    pub fn delete_cluster(&mut self, name: &str) -> Result<bool, StoreError> {
        let removed = self
            .conn
            .execute("DELETE FROM cluster WHERE name = ?1", params![name])
            .map_err(StoreError::query("delete cluster"))?;
        debug!(target: STORE_TARGET, cluster = name, removed, "cluster delete");
        Ok(removed > 0)
    }

    fn select_clusters(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Cluster>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(StoreError::query("prepare cluster listing"))?;
        let headers = stmt
            .query_map(args, |row| {
                Ok((row.get::<_, i64>(0)?, row.get(1)?, row.get(2)?))
            })
            .map_err(StoreError::query("list clusters"))?
            .collect::<Result<Vec<(i64, String, String)>, _>>()
            .map_err(StoreError::query("read cluster row"))?;
        headers
            .into_iter()
            .map(|(id, name, version)| self.with_brokers(id, name, version))
            .collect()
    }

    fn with_brokers(&self, id: i64, name: String, version: String) -> Result<Cluster, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, addr FROM broker WHERE cluster_id = ?1 ORDER BY id")
            .map_err(StoreError::query("prepare broker listing"))?;
        let brokers = stmt
            .query_map(params![id], |row| {
                Ok(Broker {
                    id: row.get(0)?,
                    addr: row.get(1)?,
                })
            })
            .map_err(StoreError::query("list brokers"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::query("read broker row"))?;
        Ok(Cluster {
            id,
            name,
            version,
            brokers,
        })
    }
}

fn is_unique_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn escape_like(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
