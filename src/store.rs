//! Append-only persistence of contracts and settlement records
//! (spec.md §4.4), backed by SQLite via `rusqlite`, following the
//! `OracleRoundStorage` conventions: WAL mode, an explicit schema
//! constant, `UNIQUE` constraints enforced at the SQL layer.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};

use crate::models::{Contract, ContractId, ContractSpec, Metric, Outcome, SettlementRecord};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS contracts (
    id TEXT PRIMARY KEY,
    cell TEXT NOT NULL,
    metric_json TEXT NOT NULL,
    threshold REAL NOT NULL,
    unit TEXT NOT NULL,
    window_hours INTEGER NOT NULL,
    expiry TEXT NOT NULL,
    description TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_contracts_expiry ON contracts(expiry);

CREATE TABLE IF NOT EXISTS settlement_records (
    id TEXT PRIMARY KEY,
    contract_id TEXT NOT NULL UNIQUE,
    outcome_json TEXT NOT NULL,
    observed_value REAL,
    threshold REAL NOT NULL,
    unit TEXT NOT NULL,
    station_count INTEGER NOT NULL,
    per_station_readings_json TEXT NOT NULL,
    evidence_json TEXT NOT NULL,
    previous_hash TEXT,
    record_hash TEXT NOT NULL UNIQUE,
    settled_at TEXT NOT NULL,
    FOREIGN KEY(contract_id) REFERENCES contracts(id)
);
"#;

/// Outcome of `append_settlement`: either the record was the genuine
/// insert, or a concurrent writer won the race and this is the persisted
/// winner (spec.md §4.6's idempotent re-entry).
pub enum AppendOutcome {
    Inserted(SettlementRecord),
    AlreadyExists(SettlementRecord),
}

/// A `record_hash` collided with a settlement for a *different* contract
/// (spec.md §7's integrity-violation case) rather than the benign same-
/// contract re-settlement race. Under SHA-256 this should be statistically
/// impossible; in practice it means the hash chain was built wrong
/// upstream of persistence.
#[derive(Debug)]
pub struct HashCollision(pub String);

impl std::fmt::Display for HashCollision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "record_hash {} collided with a settlement for a different contract", self.0)
    }
}

impl std::error::Error for HashCollision {}

/// Every operation in spec.md §4.4, as `async fn`s that suspend via
/// `spawn_blocking` — an improvement on the original fully-synchronous
/// storage layer, satisfying spec.md §5's "every database query is a
/// suspension point".
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create_contract(&self, spec: ContractSpec) -> Result<Contract>;
    async fn get_contract(&self, id: ContractId) -> Result<Option<Contract>>;
    async fn list_expired_contracts(&self, now: DateTime<Utc>) -> Result<Vec<Contract>>;
    async fn get_settlement_by_contract(&self, contract_id: ContractId) -> Result<Option<SettlementRecord>>;
    async fn latest_settlement_hash(&self) -> Result<Option<String>>;
    async fn append_settlement(&self, record: SettlementRecord) -> Result<AppendOutcome>;
}

pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    pub fn open(db_path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("failed to open database: {db_path}"))?;
        conn.execute_batch(SCHEMA_SQL)?;
        tracing::info!(path = db_path, "settlement record store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn row_to_contract(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contract> {
    let id: String = row.get("id")?;
    let metric_json: String = row.get("metric_json")?;
    let expiry: String = row.get("expiry")?;
    let created_at: String = row.get("created_at")?;

    Ok(Contract {
        id: id.parse().map_err(|_| rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Text))?,
        cell: row.get("cell")?,
        metric: serde_json::from_str::<Metric>(&metric_json)
            .map_err(|_| rusqlite::Error::InvalidColumnType(0, "metric_json".into(), rusqlite::types::Type::Text))?,
        threshold: row.get("threshold")?,
        unit: row.get("unit")?,
        window_hours: row.get("window_hours")?,
        expiry: expiry
            .parse()
            .map_err(|_| rusqlite::Error::InvalidColumnType(0, "expiry".into(), rusqlite::types::Type::Text))?,
        description: row.get("description")?,
        created_at: created_at
            .parse()
            .map_err(|_| rusqlite::Error::InvalidColumnType(0, "created_at".into(), rusqlite::types::Type::Text))?,
    })
}

fn row_to_settlement(row: &rusqlite::Row<'_>) -> rusqlite::Result<SettlementRecord> {
    let id: String = row.get("id")?;
    let contract_id: String = row.get("contract_id")?;
    let outcome_json: String = row.get("outcome_json")?;
    let readings_json: String = row.get("per_station_readings_json")?;
    let evidence_json: String = row.get("evidence_json")?;
    let settled_at: String = row.get("settled_at")?;

    let bad = |col: &str| rusqlite::Error::InvalidColumnType(0, col.to_string(), rusqlite::types::Type::Text);

    Ok(SettlementRecord {
        id: id.parse().map_err(|_| bad("id"))?,
        contract_id: contract_id.parse().map_err(|_| bad("contract_id"))?,
        outcome: serde_json::from_str::<Outcome>(&outcome_json).map_err(|_| bad("outcome_json"))?,
        observed_value: row.get("observed_value")?,
        threshold: row.get("threshold")?,
        unit: row.get("unit")?,
        station_count: row.get::<_, i64>("station_count")? as usize,
        per_station_readings: serde_json::from_str::<BTreeMap<String, Option<f64>>>(&readings_json)
            .map_err(|_| bad("per_station_readings_json"))?,
        evidence: serde_json::from_str(&evidence_json).map_err(|_| bad("evidence_json"))?,
        previous_hash: row.get("previous_hash")?,
        record_hash: row.get("record_hash")?,
        settled_at: settled_at.parse().map_err(|_| bad("settled_at"))?,
    })
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn create_contract(&self, spec: ContractSpec) -> Result<Contract> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let id = uuid::Uuid::new_v4();
            let created_at = Utc::now();
            let contract = Contract::from_spec(id, spec, created_at);
            let metric_json = serde_json::to_string(&contract.metric)?;

            let guard = conn.lock();
            guard.execute(
                "INSERT INTO contracts (id, cell, metric_json, threshold, unit, window_hours, expiry, description, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    contract.id.to_string(),
                    contract.cell,
                    metric_json,
                    contract.threshold,
                    contract.unit,
                    contract.window_hours,
                    contract.expiry.to_rfc3339(),
                    contract.description,
                    contract.created_at.to_rfc3339(),
                ],
            )?;
            Ok::<_, anyhow::Error>(contract)
        })
        .await?
    }

    async fn get_contract(&self, id: ContractId) -> Result<Option<Contract>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            let mut stmt = guard.prepare("SELECT * FROM contracts WHERE id = ?1")?;
            let mut rows = stmt.query(params![id.to_string()])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_contract(row)?)),
                None => Ok(None),
            }
        })
        .await?
    }

    async fn list_expired_contracts(&self, now: DateTime<Utc>) -> Result<Vec<Contract>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            let mut stmt = guard.prepare(
                "SELECT c.* FROM contracts c
                 LEFT JOIN settlement_records s ON s.contract_id = c.id
                 WHERE c.expiry <= ?1 AND s.id IS NULL
                 ORDER BY c.expiry ASC",
            )?;
            let rows = stmt.query_map(params![now.to_rfc3339()], |row| row_to_contract(row))?;
            let mut contracts = Vec::new();
            for row in rows {
                contracts.push(row?);
            }
            Ok(contracts)
        })
        .await?
    }

    async fn get_settlement_by_contract(&self, contract_id: ContractId) -> Result<Option<SettlementRecord>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            let mut stmt = guard.prepare("SELECT * FROM settlement_records WHERE contract_id = ?1")?;
            let mut rows = stmt.query(params![contract_id.to_string()])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_settlement(row)?)),
                None => Ok(None),
            }
        })
        .await?
    }

    async fn latest_settlement_hash(&self) -> Result<Option<String>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            let hash: Option<String> = guard
                .query_row(
                    "SELECT record_hash FROM settlement_records ORDER BY settled_at DESC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .ok();
            Ok(hash)
        })
        .await?
    }

    async fn append_settlement(&self, record: SettlementRecord) -> Result<AppendOutcome> {
        let conn = self.conn.clone();
        let contract_id = record.contract_id;
        tokio::task::spawn_blocking(move || {
            let outcome_json = serde_json::to_string(&record.outcome)?;
            let readings_json = serde_json::to_string(&record.per_station_readings)?;
            let evidence_json = serde_json::to_string(&record.evidence)?;

            let guard = conn.lock();
            let result = guard.execute(
                "INSERT INTO settlement_records (
                    id, contract_id, outcome_json, observed_value, threshold, unit,
                    station_count, per_station_readings_json, evidence_json,
                    previous_hash, record_hash, settled_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    record.id.to_string(),
                    contract_id.to_string(),
                    outcome_json,
                    record.observed_value,
                    record.threshold,
                    record.unit,
                    record.station_count as i64,
                    readings_json,
                    evidence_json,
                    record.previous_hash,
                    record.record_hash,
                    record.settled_at.to_rfc3339(),
                ],
            );

            match result {
                Ok(_) => Ok(AppendOutcome::Inserted(record)),
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    // Could be the contract_id UNIQUE constraint (the benign
                    // per-contract race) or the record_hash UNIQUE constraint
                    // colliding against a different contract's row. A row for
                    // this contract_id existing is what tells those apart.
                    let mut stmt = guard.prepare("SELECT * FROM settlement_records WHERE contract_id = ?1")?;
                    let mut rows = stmt.query(params![contract_id.to_string()])?;
                    match rows.next()?.map(row_to_settlement).transpose()? {
                        Some(existing) => Ok(AppendOutcome::AlreadyExists(existing)),
                        None => Err(anyhow::Error::new(HashCollision(record.record_hash.clone()))),
                    }
                }
                Err(err) => Err(err.into()),
            }
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metric;
    use chrono::Duration;

    fn spec() -> ContractSpec {
        ContractSpec {
            cell: "cell-a".to_string(),
            metric: Metric::Precipitation,
            threshold: 25.0,
            unit: "mm".to_string(),
            window_hours: 24,
            expiry: Utc::now() + Duration::hours(1),
            description: None,
        }
    }

    #[tokio::test]
    async fn create_and_get_contract_round_trips() {
        let store = SqliteRecordStore::open_memory().unwrap();
        let created = store.create_contract(spec()).await.unwrap();
        let fetched = store.get_contract(created.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.threshold, 25.0);
    }

    #[tokio::test]
    async fn get_contract_missing_returns_none() {
        let store = SqliteRecordStore::open_memory().unwrap();
        assert!(store.get_contract(uuid::Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_expired_contracts_excludes_settled_and_future() {
        let store = SqliteRecordStore::open_memory().unwrap();

        let mut past_spec = spec();
        past_spec.expiry = Utc::now() - Duration::hours(1);
        let expired = store.create_contract(past_spec).await.unwrap();

        let future = store.create_contract(spec()).await.unwrap();
        let _ = future;

        let expired_list = store.list_expired_contracts(Utc::now()).await.unwrap();
        assert_eq!(expired_list.len(), 1);
        assert_eq!(expired_list[0].id, expired.id);
    }

    #[tokio::test]
    async fn append_settlement_enforces_one_record_per_contract() {
        use crate::models::{ContractSnapshot, Determination, EvidencePayload, Outcome, RawObservation, WindowSpec};

        let store = SqliteRecordStore::open_memory().unwrap();
        let contract = store.create_contract(spec()).await.unwrap();

        let make_record = || SettlementRecord {
            id: uuid::Uuid::new_v4(),
            contract_id: contract.id,
            outcome: Outcome::Yes,
            observed_value: Some(30.0),
            threshold: 25.0,
            unit: "mm".to_string(),
            station_count: 1,
            per_station_readings: BTreeMap::new(),
            evidence: EvidencePayload {
                contract: ContractSnapshot {
                    contract_id: contract.id,
                    cell: "cell-a".to_string(),
                    metric: Metric::Precipitation,
                    threshold: 25.0,
                    unit: "mm".to_string(),
                },
                window: WindowSpec {
                    start: Utc::now() - Duration::hours(24),
                    end: Utc::now(),
                },
                raw_observations: Vec::<RawObservation>::new(),
                determination: Determination {
                    outcome: Outcome::Yes,
                    observed_value: Some(30.0),
                    per_station_readings: BTreeMap::new(),
                },
            },
            previous_hash: None,
            record_hash: "a".repeat(64),
            settled_at: Utc::now(),
        };

        let first = store.append_settlement(make_record()).await.unwrap();
        assert!(matches!(first, AppendOutcome::Inserted(_)));

        let mut second_record = make_record();
        second_record.record_hash = "b".repeat(64);
        let second = store.append_settlement(second_record).await.unwrap();
        match second {
            AppendOutcome::AlreadyExists(existing) => assert_eq!(existing.record_hash, "a".repeat(64)),
            AppendOutcome::Inserted(_) => panic!("expected the second append to lose the race"),
        }
    }

    #[tokio::test]
    async fn append_settlement_detects_hash_collision_across_contracts() {
        use crate::models::{ContractSnapshot, Determination, EvidencePayload, Outcome, RawObservation, WindowSpec};

        let store = SqliteRecordStore::open_memory().unwrap();
        let contract_a = store.create_contract(spec()).await.unwrap();
        let contract_b = store.create_contract(spec()).await.unwrap();

        let make_record = |contract_id, record_hash: String| SettlementRecord {
            id: uuid::Uuid::new_v4(),
            contract_id,
            outcome: Outcome::Yes,
            observed_value: Some(30.0),
            threshold: 25.0,
            unit: "mm".to_string(),
            station_count: 1,
            per_station_readings: BTreeMap::new(),
            evidence: EvidencePayload {
                contract: ContractSnapshot {
                    contract_id,
                    cell: "cell-a".to_string(),
                    metric: Metric::Precipitation,
                    threshold: 25.0,
                    unit: "mm".to_string(),
                },
                window: WindowSpec {
                    start: Utc::now() - Duration::hours(24),
                    end: Utc::now(),
                },
                raw_observations: Vec::<RawObservation>::new(),
                determination: Determination {
                    outcome: Outcome::Yes,
                    observed_value: Some(30.0),
                    per_station_readings: BTreeMap::new(),
                },
            },
            previous_hash: None,
            record_hash,
            settled_at: Utc::now(),
        };

        let shared_hash = "c".repeat(64);
        store
            .append_settlement(make_record(contract_a.id, shared_hash.clone()))
            .await
            .unwrap();

        let err = store
            .append_settlement(make_record(contract_b.id, shared_hash))
            .await
            .unwrap_err();
        let collision = err
            .downcast_ref::<HashCollision>()
            .expect("expected a HashCollision error, not the benign same-contract race");
        assert_eq!(collision.0, "c".repeat(64));
    }
}
