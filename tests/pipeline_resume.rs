use alloy::primitives::{Address, B256};
use chain_sentry::storage::batch_writer::spawn_batch_writer;
use chain_sentry::storage::contracts_db::{utc_timestamp, ContractRow, ContractsDb};
use std::path::PathBuf;
use tokio::sync::mpsc;

fn temp_db_path(prefix: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    std::env::temp_dir().join(format!("{}_{}.db", prefix, nanos))
}

fn row(network: &str, address: Address, block: u64) -> ContractRow {
    ContractRow {
        contract_address: address,
        network: network.to_string(),
        deployer_address: Address::repeat_byte(0x55),
        entity_name: Some("Acme".to_string()),
        entity_id: Some("ent-1".to_string()),
        block_number: block,
        transaction_hash: B256::repeat_byte(0x66),
        contract_type: "ERC20".to_string(),
        contract_info: r#"{"type":"ERC20"}"#.to_string(),
        factory_address: None,
        deployment_type: "direct".to_string(),
        timestamp: utc_timestamp(),
    }
}

#[tokio::test]
async fn restart_resumes_from_persisted_cursor_without_duplicates() {
    let path = temp_db_path("chain_sentry_restart");

    // First run: persist a row at block 498 and advance the cursor to 500.
    {
        let db = ContractsDb::open(&path).expect("db open");
        let (fatal_tx, _fatal_rx) = mpsc::unbounded_channel();
        let (handle, guard) = spawn_batch_writer(db, fatal_tx);

        handle
            .enqueue(row("ethereum", Address::repeat_byte(0x98), 498))
            .await
            .unwrap();
        handle.advance_cursor("ethereum", 500).await.unwrap();
        drop(handle);
        guard.close().await.unwrap();
    }

    // Restart: the cursor is authoritative, and re-scanning an already
    // persisted block re-inserts nothing.
    {
        let db = ContractsDb::open(&path).expect("db reopen");
        assert_eq!(db.last_processed_block("ethereum").unwrap(), Some(500));

        let (fatal_tx, _fatal_rx) = mpsc::unbounded_channel();
        let (handle, guard) = spawn_batch_writer(db.clone(), fatal_tx);
        handle
            .enqueue(row("ethereum", Address::repeat_byte(0x98), 498))
            .await
            .unwrap();
        let flushed = handle.flush().await.unwrap();
        assert_eq!(flushed, 0, "re-observed row must be a no-op");

        drop(handle);
        guard.close().await.unwrap();

        let stats = db.stats_by_network().unwrap();
        assert_eq!(stats.get("ethereum").unwrap().total_contracts, 1);
    }

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn flush_makes_rows_and_cursor_durable_together() {
    let path = temp_db_path("chain_sentry_durable");
    let db = ContractsDb::open(&path).expect("db open");
    let (fatal_tx, _fatal_rx) = mpsc::unbounded_channel();
    let (handle, guard) = spawn_batch_writer(db.clone(), fatal_tx);

    for i in 0..5u8 {
        handle
            .enqueue(row("base", Address::repeat_byte(0x10 + i), 200 + i as u64))
            .await
            .unwrap();
    }
    handle.advance_cursor("base", 204).await.unwrap();
    let flushed = handle.flush().await.unwrap();
    assert_eq!(flushed, 5);

    // After flush returns, everything enqueued before it is readable.
    let stats = db.stats_by_network().unwrap();
    assert_eq!(stats.get("base").unwrap().total_contracts, 5);
    assert_eq!(db.last_processed_block("base").unwrap(), Some(204));

    drop(handle);
    guard.close().await.unwrap();
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn per_chain_cursors_are_independent() {
    let path = temp_db_path("chain_sentry_multichain");
    let db = ContractsDb::open(&path).expect("db open");
    let (fatal_tx, _fatal_rx) = mpsc::unbounded_channel();
    let (handle, guard) = spawn_batch_writer(db.clone(), fatal_tx);

    handle.advance_cursor("ethereum", 1_000).await.unwrap();
    handle.advance_cursor("base", 9_000_000).await.unwrap();
    handle.advance_cursor("polygon", 42).await.unwrap();
    handle.flush().await.unwrap();

    assert_eq!(db.last_processed_block("ethereum").unwrap(), Some(1_000));
    assert_eq!(db.last_processed_block("base").unwrap(), Some(9_000_000));
    assert_eq!(db.last_processed_block("polygon").unwrap(), Some(42));
    assert_eq!(db.last_processed_block("blast").unwrap(), None);

    drop(handle);
    guard.close().await.unwrap();
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn entity_attribution_survives_the_round_trip() {
    let path = temp_db_path("chain_sentry_entity");
    let db = ContractsDb::open(&path).expect("db open");
    let (fatal_tx, _fatal_rx) = mpsc::unbounded_channel();
    let (handle, guard) = spawn_batch_writer(db.clone(), fatal_tx);

    let mut factory_row = row("ethereum", Address::repeat_byte(0xb0), 200);
    factory_row.deployment_type = "factory".to_string();
    factory_row.factory_address = Some(Address::repeat_byte(0xf0));
    factory_row.contract_type = "Pool".to_string();
    handle.enqueue(factory_row).await.unwrap();
    handle.flush().await.unwrap();

    let by_entity = db.get_contracts_by_entity("Acme", Some("ethereum")).unwrap();
    assert_eq!(by_entity.len(), 1);
    let read = &by_entity[0];
    assert_eq!(read.deployment_type, "factory");
    assert_eq!(read.factory_address, Some(Address::repeat_byte(0xf0)));
    assert_eq!(read.contract_type, "Pool");
    assert_eq!(read.entity_id.as_deref(), Some("ent-1"));

    drop(handle);
    guard.close().await.unwrap();
    let _ = std::fs::remove_file(&path);
}
