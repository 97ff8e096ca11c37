use alloy::primitives::{Address, B256};
use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// One persisted contract observation. Addresses are stored as lowercase
/// 0x-prefixed hex; `contract_info` carries the JSON metadata bag.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractRow {
    pub contract_address: Address,
    pub network: String,
    pub deployer_address: Address,
    pub entity_name: Option<String>,
    pub entity_id: Option<String>,
    pub block_number: u64,
    pub transaction_hash: B256,
    pub contract_type: String,
    pub contract_info: String,
    pub factory_address: Option<Address>,
    pub deployment_type: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub total_contracts: u64,
    pub entity_contracts: u64,
    pub latest_block: Option<u64>,
}

/// Sqlite store for contracts and per-chain cursors. Holds only the path;
/// a connection is opened per operation so the handle stays cheap to clone
/// across the writer thread boundary.
#[derive(Debug, Clone)]
pub struct ContractsDb {
    path: PathBuf,
}

impl ContractsDb {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let db = Self {
            path: path.as_ref().to_path_buf(),
        };
        db.ensure_schema()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_connection<T, F>(&self, context: &str, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = Connection::open(&self.path)
            .with_context(|| format!("{context}: open {}", self.path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .with_context(|| format!("{context}: busy_timeout"))?;
        f(&conn).with_context(|| context.to_string())
    }

    fn ensure_schema(&self) -> anyhow::Result<()> {
        self.with_connection("ensure_schema", |conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS contracts (
                    contract_address TEXT NOT NULL,
                    network TEXT NOT NULL,
                    deployer_address TEXT NOT NULL,
                    entity_name TEXT,
                    entity_id TEXT,
                    block_number INTEGER NOT NULL,
                    transaction_hash TEXT NOT NULL,
                    contract_type TEXT,
                    contract_info TEXT,
                    factory_address TEXT,
                    deployment_type TEXT,
                    timestamp TEXT NOT NULL,
                    PRIMARY KEY (network, contract_address)
                );
                CREATE INDEX IF NOT EXISTS idx_contracts_deployer ON contracts(deployer_address);
                CREATE INDEX IF NOT EXISTS idx_contracts_entity ON contracts(entity_name);
                CREATE INDEX IF NOT EXISTS idx_contracts_network ON contracts(network);
                CREATE INDEX IF NOT EXISTS idx_contracts_type ON contracts(contract_type);

                CREATE TABLE IF NOT EXISTS monitoring_state (
                    network TEXT PRIMARY KEY NOT NULL,
                    last_processed_block INTEGER NOT NULL,
                    updated_at TEXT NOT NULL
                );
                "#,
            )?;
            // WAL lets worker-side reads proceed while the writer commits.
            let _ = conn.execute_batch(
                r#"
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                "#,
            );
            Ok(())
        })
    }

    /// Apply one batch atomically: row upserts first, cursor updates last.
    /// Re-inserting an existing (network, contract_address) is a no-op.
    /// Returns the number of rows actually inserted.
    pub fn apply_batch(
        &self,
        rows: &[ContractRow],
        cursors: &BTreeMap<String, u64>,
    ) -> anyhow::Result<usize> {
        self.with_connection("apply_batch", |conn| {
            let tx = conn.unchecked_transaction()?;
            let mut inserted = 0usize;
            {
                let mut stmt = tx.prepare_cached(
                    r#"
                    INSERT INTO contracts (
                        contract_address, network, deployer_address, entity_name, entity_id,
                        block_number, transaction_hash, contract_type, contract_info,
                        factory_address, deployment_type, timestamp
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                    ON CONFLICT(network, contract_address) DO NOTHING
                    "#,
                )?;
                for row in rows {
                    let changed = stmt.execute(params![
                        format!("{:#x}", row.contract_address),
                        row.network,
                        format!("{:#x}", row.deployer_address),
                        row.entity_name,
                        row.entity_id,
                        to_i64(row.block_number),
                        format!("{:#x}", row.transaction_hash),
                        row.contract_type,
                        row.contract_info,
                        row.factory_address.map(|a| format!("{a:#x}")),
                        row.deployment_type,
                        row.timestamp,
                    ])?;
                    inserted += changed;
                }

                let mut cursor_stmt = tx.prepare_cached(
                    r#"
                    INSERT INTO monitoring_state (network, last_processed_block, updated_at)
                    VALUES (?1, ?2, ?3)
                    ON CONFLICT(network) DO UPDATE SET
                        last_processed_block = excluded.last_processed_block,
                        updated_at = excluded.updated_at
                    "#,
                )?;
                let now = utc_timestamp();
                for (network, height) in cursors {
                    cursor_stmt.execute(params![network, to_i64(*height), now])?;
                }
            }
            tx.commit()?;
            Ok(inserted)
        })
    }

    pub fn last_processed_block(&self, network: &str) -> anyhow::Result<Option<u64>> {
        let raw = self.with_connection("last_processed_block", |conn| {
            conn.query_row(
                "SELECT last_processed_block FROM monitoring_state WHERE network = ?1",
                params![network],
                |row| row.get::<_, i64>(0),
            )
            .optional()
        })?;
        Ok(raw.map(|v| v.max(0) as u64))
    }

    pub fn get_contract(
        &self,
        network: &str,
        address: Address,
    ) -> anyhow::Result<Option<ContractRow>> {
        let address_hex = format!("{address:#x}");
        self.with_connection("get_contract", |conn| {
            conn.query_row(
                r#"
                SELECT contract_address, network, deployer_address, entity_name, entity_id,
                       block_number, transaction_hash, contract_type, contract_info,
                       factory_address, deployment_type, timestamp
                FROM contracts WHERE network = ?1 AND contract_address = ?2
                "#,
                params![network, address_hex],
                row_to_contract,
            )
            .optional()
        })
    }

    pub fn get_contracts_by_entity(
        &self,
        entity_name: &str,
        network: Option<&str>,
    ) -> anyhow::Result<Vec<ContractRow>> {
        self.with_connection("get_contracts_by_entity", |conn| {
            let mut out = Vec::new();
            match network {
                Some(net) => {
                    let mut stmt = conn.prepare_cached(
                        r#"
                        SELECT contract_address, network, deployer_address, entity_name, entity_id,
                               block_number, transaction_hash, contract_type, contract_info,
                               factory_address, deployment_type, timestamp
                        FROM contracts
                        WHERE entity_name = ?1 AND network = ?2
                        ORDER BY block_number DESC
                        "#,
                    )?;
                    let rows = stmt.query_map(params![entity_name, net], row_to_contract)?;
                    for row in rows {
                        out.push(row?);
                    }
                }
                None => {
                    let mut stmt = conn.prepare_cached(
                        r#"
                        SELECT contract_address, network, deployer_address, entity_name, entity_id,
                               block_number, transaction_hash, contract_type, contract_info,
                               factory_address, deployment_type, timestamp
                        FROM contracts
                        WHERE entity_name = ?1
                        ORDER BY block_number DESC
                        "#,
                    )?;
                    let rows = stmt.query_map(params![entity_name], row_to_contract)?;
                    for row in rows {
                        out.push(row?);
                    }
                }
            }
            Ok(out)
        })
    }

    pub fn stats_by_network(&self) -> anyhow::Result<BTreeMap<String, NetworkStats>> {
        self.with_connection("stats_by_network", |conn| {
            let mut stmt = conn.prepare_cached(
                r#"
                SELECT network,
                       COUNT(*),
                       COUNT(CASE WHEN entity_name IS NOT NULL THEN 1 END),
                       MAX(block_number)
                FROM contracts
                GROUP BY network
                "#,
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                ))
            })?;
            let mut out = BTreeMap::new();
            for row in rows {
                let (network, total, entity, latest) = row?;
                out.insert(
                    network,
                    NetworkStats {
                        total_contracts: total.max(0) as u64,
                        entity_contracts: entity.max(0) as u64,
                        latest_block: latest.map(|v| v.max(0) as u64),
                    },
                );
            }
            Ok(out)
        })
    }
}

fn row_to_contract(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContractRow> {
    let parse_addr = |idx: usize, raw: String| {
        Address::from_str(raw.trim()).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("invalid address '{raw}': {e}"),
                )),
            )
        })
    };
    let contract_address = parse_addr(0, row.get::<_, String>(0)?)?;
    let deployer_address = parse_addr(2, row.get::<_, String>(2)?)?;
    let tx_raw: String = row.get(6)?;
    let transaction_hash = B256::from_str(tx_raw.trim()).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid tx hash '{tx_raw}': {e}"),
            )),
        )
    })?;
    let factory_address = row
        .get::<_, Option<String>>(9)?
        .and_then(|raw| Address::from_str(raw.trim()).ok());

    Ok(ContractRow {
        contract_address,
        network: row.get(1)?,
        deployer_address,
        entity_name: row.get(3)?,
        entity_id: row.get(4)?,
        block_number: row.get::<_, i64>(5)?.max(0) as u64,
        transaction_hash,
        contract_type: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
        contract_info: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
        factory_address,
        deployment_type: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
        timestamp: row.get(11)?,
    })
}

#[cfg(test)]
pub(crate) fn sample_row(network: &str, address: Address, block: u64) -> ContractRow {
    ContractRow {
        contract_address: address,
        network: network.to_string(),
        deployer_address: Address::repeat_byte(0x11),
        entity_name: None,
        entity_id: None,
        block_number: block,
        transaction_hash: B256::repeat_byte(0x22),
        contract_type: "Unknown".to_string(),
        contract_info: "{}".to_string(),
        factory_address: None,
        deployment_type: "direct".to_string(),
        timestamp: utc_timestamp(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db_path(prefix: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{}_{}.db", prefix, nanos))
    }

    #[test]
    fn test_row_round_trips_through_sqlite() {
        let path = temp_db_path("chain_sentry_roundtrip");
        let db = ContractsDb::open(&path).expect("db open");

        let mut row = sample_row("ethereum", Address::repeat_byte(0xaa), 100);
        row.entity_name = Some("Acme".to_string());
        row.entity_id = Some("ent-1".to_string());
        row.factory_address = Some(Address::repeat_byte(0xff));
        row.contract_type = "ERC20".to_string();

        let inserted = db.apply_batch(&[row.clone()], &BTreeMap::new()).unwrap();
        assert_eq!(inserted, 1);

        let read = db
            .get_contract("ethereum", Address::repeat_byte(0xaa))
            .unwrap()
            .expect("row exists");
        assert_eq!(read, row);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_reinsert_same_key_is_a_noop() {
        let path = temp_db_path("chain_sentry_idempotent");
        let db = ContractsDb::open(&path).expect("db open");

        let row = sample_row("base", Address::repeat_byte(0xbb), 7);
        assert_eq!(db.apply_batch(&[row.clone()], &BTreeMap::new()).unwrap(), 1);

        // Second insert with different ancillary fields must not overwrite.
        let mut again = row.clone();
        again.contract_type = "ERC721".to_string();
        assert_eq!(db.apply_batch(&[again], &BTreeMap::new()).unwrap(), 0);

        let read = db
            .get_contract("base", Address::repeat_byte(0xbb))
            .unwrap()
            .unwrap();
        assert_eq!(read.contract_type, "Unknown");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_same_address_on_two_networks_is_two_rows() {
        let path = temp_db_path("chain_sentry_composite_key");
        let db = ContractsDb::open(&path).expect("db open");

        let addr = Address::repeat_byte(0xcc);
        db.apply_batch(&[sample_row("ethereum", addr, 1)], &BTreeMap::new())
            .unwrap();
        db.apply_batch(&[sample_row("base", addr, 2)], &BTreeMap::new())
            .unwrap();

        assert!(db.get_contract("ethereum", addr).unwrap().is_some());
        assert!(db.get_contract("base", addr).unwrap().is_some());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_cursor_upsert_is_last_write_wins() {
        let path = temp_db_path("chain_sentry_cursor");
        let db = ContractsDb::open(&path).expect("db open");

        assert_eq!(db.last_processed_block("ethereum").unwrap(), None);

        let mut cursors = BTreeMap::new();
        cursors.insert("ethereum".to_string(), 100u64);
        db.apply_batch(&[], &cursors).unwrap();
        assert_eq!(db.last_processed_block("ethereum").unwrap(), Some(100));

        cursors.insert("ethereum".to_string(), 110u64);
        db.apply_batch(&[], &cursors).unwrap();
        assert_eq!(db.last_processed_block("ethereum").unwrap(), Some(110));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_entity_queries_and_stats() {
        let path = temp_db_path("chain_sentry_stats");
        let db = ContractsDb::open(&path).expect("db open");

        let mut with_entity = sample_row("ethereum", Address::repeat_byte(0x01), 50);
        with_entity.entity_name = Some("Acme".to_string());
        let without = sample_row("ethereum", Address::repeat_byte(0x02), 60);
        db.apply_batch(&[with_entity, without], &BTreeMap::new())
            .unwrap();

        let acme = db.get_contracts_by_entity("Acme", Some("ethereum")).unwrap();
        assert_eq!(acme.len(), 1);
        assert_eq!(acme[0].contract_address, Address::repeat_byte(0x01));

        let stats = db.stats_by_network().unwrap();
        let eth = stats.get("ethereum").unwrap();
        assert_eq!(eth.total_contracts, 2);
        assert_eq!(eth.entity_contracts, 1);
        assert_eq!(eth.latest_block, Some(60));
        let _ = std::fs::remove_file(&path);
    }
}
