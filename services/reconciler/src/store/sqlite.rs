//! SQLite-backed association store.
//!
//! Provides durable storage for associations and target state, so that the
//! reconciler can recover its view of previously requested registrations
//! after a restart. Calls are short single-statement transactions; the
//! connection is guarded by one lock, which also gives each call a coherent
//! snapshot.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use ballast_events::{Association, AssociationState, TargetId, TargetState};
use ballast_id::{IpAddress, JobId, LoadBalancerId, TaskId};
use rusqlite::{params, Connection};
use tracing::debug;

use super::{AssociationStore, StoreError, TargetRecord};

fn association_state_str(state: AssociationState) -> &'static str {
    match state {
        AssociationState::Associated => "associated",
        AssociationState::Dissociated => "dissociated",
    }
}

fn association_state_from_str(s: &str) -> AssociationState {
    match s {
        "dissociated" => AssociationState::Dissociated,
        _ => AssociationState::Associated,
    }
}

fn target_state_str(state: TargetState) -> &'static str {
    match state {
        TargetState::Registered => "registered",
        TargetState::Deregistered => "deregistered",
    }
}

fn target_state_from_str(s: &str) -> TargetState {
    match s {
        "deregistered" => TargetState::Deregistered,
        _ => TargetState::Registered,
    }
}

/// SQLite implementation of [`AssociationStore`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;

        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS associations (
                job_id TEXT NOT NULL,
                load_balancer_id TEXT NOT NULL,
                state TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (job_id, load_balancer_id)
            );

            CREATE TABLE IF NOT EXISTS targets (
                load_balancer_id TEXT NOT NULL,
                task_id TEXT NOT NULL,
                ip_address TEXT NOT NULL,
                state TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (load_balancer_id, task_id, ip_address)
            );

            CREATE INDEX IF NOT EXISTS idx_associations_job ON associations(job_id);
            "#,
        )?;

        debug!("Association store schema initialized");
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }
}

#[async_trait]
impl AssociationStore for SqliteStore {
    async fn put_association(
        &self,
        job_id: &JobId,
        load_balancer_id: &LoadBalancerId,
        state: AssociationState,
    ) -> Result<(), StoreError> {
        let now = chrono::Utc::now().timestamp();
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO associations (job_id, load_balancer_id, state, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(job_id, load_balancer_id) DO UPDATE SET
                state = excluded.state,
                updated_at = excluded.updated_at
            "#,
            params![
                job_id.as_str(),
                load_balancer_id.as_str(),
                association_state_str(state),
                now,
            ],
        )?;
        Ok(())
    }

    async fn get_associations(&self) -> Result<Vec<Association>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT job_id, load_balancer_id, state FROM associations
             ORDER BY job_id, load_balancer_id",
        )?;

        let rows = stmt
            .query_map([], |row| {
                let job_id: String = row.get(0)?;
                let load_balancer_id: String = row.get(1)?;
                let state: String = row.get(2)?;
                Ok((job_id, load_balancer_id, state))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut associations = Vec::with_capacity(rows.len());
        for (job_id, load_balancer_id, state) in rows {
            let job_id = JobId::parse(&job_id)
                .map_err(|e| StoreError::Unavailable(format!("corrupt job id: {e}")))?;
            let load_balancer_id = LoadBalancerId::parse(&load_balancer_id)
                .map_err(|e| StoreError::Unavailable(format!("corrupt load balancer id: {e}")))?;
            associations.push(Association {
                job_id,
                load_balancer_id,
                state: association_state_from_str(&state),
            });
        }

        Ok(associations)
    }

    async fn get_associated_load_balancers(
        &self,
        job_id: &JobId,
    ) -> Result<BTreeSet<LoadBalancerId>, StoreError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT load_balancer_id FROM associations WHERE job_id = ?1")?;

        let rows = stmt
            .query_map(params![job_id.as_str()], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut lbs = BTreeSet::new();
        for raw in rows {
            let lb = LoadBalancerId::parse(&raw)
                .map_err(|e| StoreError::Unavailable(format!("corrupt load balancer id: {e}")))?;
            lbs.insert(lb);
        }
        Ok(lbs)
    }

    async fn remove_association(
        &self,
        job_id: &JobId,
        load_balancer_id: &LoadBalancerId,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM associations WHERE job_id = ?1 AND load_balancer_id = ?2",
            params![job_id.as_str(), load_balancer_id.as_str()],
        )?;
        Ok(())
    }

    async fn put_targets(&self, records: &[TargetRecord]) -> Result<(), StoreError> {
        let now = chrono::Utc::now().timestamp();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for record in records {
            tx.execute(
                r#"
                INSERT INTO targets (load_balancer_id, task_id, ip_address, state, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(load_balancer_id, task_id, ip_address) DO UPDATE SET
                    state = excluded.state,
                    updated_at = excluded.updated_at
                "#,
                params![
                    record.target.load_balancer_id.as_str(),
                    record.target.task_id.as_str(),
                    record.target.ip_address.to_string(),
                    target_state_str(record.state),
                    now,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn get_targets(
        &self,
        load_balancer_id: &LoadBalancerId,
    ) -> Result<Vec<TargetRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT load_balancer_id, task_id, ip_address, state FROM targets
             WHERE load_balancer_id = ?1
             ORDER BY load_balancer_id, task_id, ip_address",
        )?;

        let rows = stmt
            .query_map(params![load_balancer_id.as_str()], |row| {
                let lb: String = row.get(0)?;
                let task: String = row.get(1)?;
                let ip: String = row.get(2)?;
                let state: String = row.get(3)?;
                Ok((lb, task, ip, state))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for (lb, task, ip, state) in rows {
            let target = TargetId::new(
                LoadBalancerId::parse(&lb)
                    .map_err(|e| StoreError::Unavailable(format!("corrupt load balancer id: {e}")))?,
                TaskId::parse(&task)
                    .map_err(|e| StoreError::Unavailable(format!("corrupt task id: {e}")))?,
                IpAddress::parse(&ip)
                    .map_err(|e| StoreError::Unavailable(format!("corrupt ip address: {e}")))?,
            );
            records.push(TargetRecord::new(target, target_state_from_str(&state)));
        }

        Ok(records)
    }

    async fn remove_targets(&self, targets: &[TargetId]) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for target in targets {
            tx.execute(
                "DELETE FROM targets
                 WHERE load_balancer_id = ?1 AND task_id = ?2 AND ip_address = ?3",
                params![
                    target.load_balancer_id.as_str(),
                    target.task_id.as_str(),
                    target.ip_address.to_string(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}
