use crate::storage::contracts_db::{ContractRow, ContractsDb};
use crate::utils::error::compact_error;
use std::collections::BTreeMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout_at, Duration, Instant};

const DEFAULT_BATCH_MAX_ROWS: usize = 100;
const DEFAULT_BATCH_FLUSH_MS: u64 = 500;
const HIGH_WATER_MULTIPLIER: usize = 10;
const RETRY_BASE: Duration = Duration::from_secs(1);
const RETRY_CAP: Duration = Duration::from_secs(30);
const RETRY_MAX_ATTEMPTS: u32 = 5;

fn load_batch_max_rows() -> usize {
    std::env::var("DB_BATCH_MAX_ROWS")
        .ok()
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .filter(|v| (1..=10_000).contains(v))
        .unwrap_or(DEFAULT_BATCH_MAX_ROWS)
}

fn load_batch_flush_ms() -> u64 {
    std::env::var("DB_BATCH_FLUSH_MS")
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|v| (10..=60_000).contains(v))
        .unwrap_or(DEFAULT_BATCH_FLUSH_MS)
}

enum WriteOp {
    Row(Box<ContractRow>),
    Cursor { network: String, height: u64 },
    Flush(oneshot::Sender<usize>),
    Close(oneshot::Sender<usize>),
}

/// Producer side of the persistence queue. Cloned into every chain worker;
/// the channel bound is the high-water mark, so `enqueue` blocks when the
/// writer falls behind.
#[derive(Clone)]
pub struct PersistHandle {
    tx: mpsc::Sender<WriteOp>,
}

impl PersistHandle {
    pub async fn enqueue(&self, row: ContractRow) -> anyhow::Result<()> {
        self.tx
            .send(WriteOp::Row(Box::new(row)))
            .await
            .map_err(|_| anyhow::anyhow!("persistence writer is gone"))
    }

    pub async fn advance_cursor(&self, network: &str, height: u64) -> anyhow::Result<()> {
        self.tx
            .send(WriteOp::Cursor {
                network: network.to_string(),
                height,
            })
            .await
            .map_err(|_| anyhow::anyhow!("persistence writer is gone"))
    }

    /// Drain everything enqueued before this call. Returns the number of
    /// rows persisted since the previous flush acknowledgement.
    pub async fn flush(&self) -> anyhow::Result<usize> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(WriteOp::Flush(ack_tx))
            .await
            .map_err(|_| anyhow::anyhow!("persistence writer is gone"))?;
        ack_rx
            .await
            .map_err(|_| anyhow::anyhow!("persistence writer dropped flush ack"))
    }
}

/// Held by the supervisor only: closing drains the queue and joins the
/// writer task so no accepted row is lost.
pub struct WriterGuard {
    tx: mpsc::Sender<WriteOp>,
    task: JoinHandle<()>,
}

impl WriterGuard {
    pub async fn close(self) -> anyhow::Result<usize> {
        let (ack_tx, ack_rx) = oneshot::channel();
        // If the writer already exited (fatal persistence error) the sends
        // fail; close still joins the task.
        let flushed = match self.tx.send(WriteOp::Close(ack_tx)).await {
            Ok(()) => ack_rx.await.unwrap_or(0),
            Err(_) => 0,
        };
        let _ = self.task.await;
        Ok(flushed)
    }
}

/// Spawn the single-consumer batch writer. Rows and cursor updates
/// accumulate until the batch is full or the flush interval elapses, then
/// commit in one transaction with rows before cursors. A batch that keeps
/// failing after backoff is surfaced on `fatal_tx` and the writer exits.
pub fn spawn_batch_writer(
    db: ContractsDb,
    fatal_tx: mpsc::UnboundedSender<String>,
) -> (PersistHandle, WriterGuard) {
    let batch_max = load_batch_max_rows();
    let flush_interval = Duration::from_millis(load_batch_flush_ms());
    let (tx, rx) = mpsc::channel::<WriteOp>(batch_max.saturating_mul(HIGH_WATER_MULTIPLIER));

    let task = tokio::spawn(writer_loop(db, rx, batch_max, flush_interval, fatal_tx));
    (
        PersistHandle { tx: tx.clone() },
        WriterGuard { tx, task },
    )
}

async fn writer_loop(
    db: ContractsDb,
    mut rx: mpsc::Receiver<WriteOp>,
    batch_max: usize,
    flush_interval: Duration,
    fatal_tx: mpsc::UnboundedSender<String>,
) {
    let mut rows: Vec<ContractRow> = Vec::new();
    let mut cursors: BTreeMap<String, u64> = BTreeMap::new();
    let mut rows_since_ack = 0usize;

    'outer: loop {
        let Some(first) = rx.recv().await else {
            break;
        };
        let deadline = Instant::now() + flush_interval;
        let mut acks: Vec<oneshot::Sender<usize>> = Vec::new();
        let mut closing = false;

        let mut absorb = |op: WriteOp,
                          rows: &mut Vec<ContractRow>,
                          cursors: &mut BTreeMap<String, u64>,
                          acks: &mut Vec<oneshot::Sender<usize>>|
         -> bool {
            match op {
                WriteOp::Row(row) => {
                    rows.push(*row);
                    false
                }
                WriteOp::Cursor { network, height } => {
                    // Last write wins per chain within a batch.
                    cursors.insert(network, height);
                    false
                }
                WriteOp::Flush(ack) => {
                    acks.push(ack);
                    true
                }
                WriteOp::Close(ack) => {
                    acks.push(ack);
                    true
                }
            }
        };

        let mut commit_now = match first {
            WriteOp::Close(ack) => {
                closing = true;
                acks.push(ack);
                true
            }
            op => absorb(op, &mut rows, &mut cursors, &mut acks),
        };

        while !commit_now && rows.len() < batch_max {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(WriteOp::Close(ack))) => {
                    closing = true;
                    acks.push(ack);
                    break;
                }
                Ok(Some(op)) => {
                    commit_now = absorb(op, &mut rows, &mut cursors, &mut acks);
                }
                Ok(None) => {
                    closing = true;
                    break;
                }
                Err(_) => break,
            }
        }

        if !rows.is_empty() || !cursors.is_empty() {
            match commit_with_retry(&db, &rows, &cursors).await {
                Ok(inserted) => {
                    rows_since_ack += inserted;
                    tracing::info!(
                        "Batch write completed: {} row(s), {} cursor update(s)",
                        rows.len(),
                        cursors.len()
                    );
                    rows.clear();
                    cursors.clear();
                }
                Err(err) => {
                    let message = format!("batch write failed permanently: {}", compact_error(err));
                    tracing::error!("{message}");
                    let _ = fatal_tx.send(message);
                    for ack in acks {
                        let _ = ack.send(rows_since_ack);
                    }
                    break 'outer;
                }
            }
        }

        for ack in acks {
            let _ = ack.send(rows_since_ack);
            rows_since_ack = 0;
        }

        if closing {
            break;
        }
    }
}

async fn commit_with_retry(
    db: &ContractsDb,
    rows: &[ContractRow],
    cursors: &BTreeMap<String, u64>,
) -> anyhow::Result<usize> {
    let mut backoff = RETRY_BASE;
    let mut last_err = None;
    for attempt in 1..=RETRY_MAX_ATTEMPTS {
        // Sqlite work stays off the async executor threads.
        let db = db.clone();
        let rows = rows.to_vec();
        let cursors = cursors.clone();
        let result = tokio::task::spawn_blocking(move || db.apply_batch(&rows, &cursors))
            .await
            .unwrap_or_else(|join_err| Err(anyhow::anyhow!("writer task panicked: {join_err}")));
        match result {
            Ok(inserted) => return Ok(inserted),
            Err(err) => {
                tracing::warn!(
                    "Batch write attempt {}/{} failed: {}",
                    attempt,
                    RETRY_MAX_ATTEMPTS,
                    compact_error(&err)
                );
                last_err = Some(err);
                if attempt < RETRY_MAX_ATTEMPTS {
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(RETRY_CAP);
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("batch write failed")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::contracts_db::sample_row;
    use alloy::primitives::Address;
    use std::path::PathBuf;

    fn temp_db_path(prefix: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{}_{}.db", prefix, nanos))
    }

    fn writer_for(path: &PathBuf) -> (PersistHandle, WriterGuard, ContractsDb) {
        let db = ContractsDb::open(path).expect("db open");
        let (fatal_tx, _fatal_rx) = mpsc::unbounded_channel();
        let (handle, guard) = spawn_batch_writer(db.clone(), fatal_tx);
        (handle, guard, db)
    }

    #[tokio::test]
    async fn test_enqueue_flush_read_back() {
        let path = temp_db_path("chain_sentry_writer_flush");
        let (handle, guard, db) = writer_for(&path);

        let row = sample_row("ethereum", Address::repeat_byte(0xaa), 100);
        handle.enqueue(row.clone()).await.unwrap();
        let flushed = handle.flush().await.unwrap();
        assert_eq!(flushed, 1);

        let read = db
            .get_contract("ethereum", Address::repeat_byte(0xaa))
            .unwrap();
        assert_eq!(read, Some(row));

        guard.close().await.unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_enqueue_twice_yields_one_row() {
        let path = temp_db_path("chain_sentry_writer_dupe");
        let (handle, guard, db) = writer_for(&path);

        let row = sample_row("base", Address::repeat_byte(0xbb), 5);
        handle.enqueue(row.clone()).await.unwrap();
        handle.enqueue(row).await.unwrap();
        let flushed = handle.flush().await.unwrap();
        assert_eq!(flushed, 1);

        let stats = db.stats_by_network().unwrap();
        assert_eq!(stats.get("base").unwrap().total_contracts, 1);

        guard.close().await.unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_cursor_updates_in_one_batch_are_last_write_wins() {
        let path = temp_db_path("chain_sentry_writer_cursor");
        let (handle, guard, db) = writer_for(&path);

        handle.advance_cursor("ethereum", 100).await.unwrap();
        handle.advance_cursor("ethereum", 110).await.unwrap();
        handle.advance_cursor("base", 7).await.unwrap();
        handle.flush().await.unwrap();

        assert_eq!(db.last_processed_block("ethereum").unwrap(), Some(110));
        assert_eq!(db.last_processed_block("base").unwrap(), Some(7));

        guard.close().await.unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_close_drains_pending_rows() {
        let path = temp_db_path("chain_sentry_writer_close");
        let (handle, guard, db) = writer_for(&path);

        for i in 0..20u8 {
            handle
                .enqueue(sample_row("ethereum", Address::repeat_byte(i + 1), 100 + i as u64))
                .await
                .unwrap();
        }
        handle.advance_cursor("ethereum", 119).await.unwrap();
        drop(handle);
        guard.close().await.unwrap();

        let stats = db.stats_by_network().unwrap();
        assert_eq!(stats.get("ethereum").unwrap().total_contracts, 20);
        assert_eq!(db.last_processed_block("ethereum").unwrap(), Some(119));
        let _ = std::fs::remove_file(&path);
    }
}
