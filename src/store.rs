//! Durable FIFO queue store.
//!
//! One queue exists per logical producer (one per node name, one for cluster
//! topology, one for finished snapshots). Every operation is atomic with
//! respect to every other operation on the same store; there are no
//! transactions spanning several operations.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap as HashMap;
use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Queue holding cluster topology records.
pub const CLUSTER_QUEUE: &str = "ClusterData";
/// Queue holding finished snapshots.
pub const SNAPSHOT_QUEUE: &str = "Snapshots";

/// Delay between attempts to open a queue that is not available yet.
pub const QUEUE_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum StoreError {
    /// The queue handle cannot be obtained yet. Retried by callers.
    #[error("queue '{queue}' is not available: {reason}")]
    QueueUnavailable { queue: String, reason: String },
    #[error("queue '{queue}' I/O failure: {source}")]
    Io {
        queue: String,
        #[source]
        source: std::io::Error,
    },
    #[error("queue '{queue}' journal is corrupt at byte {offset}")]
    Corrupt { queue: String, offset: usize },
    #[error("operation cancelled")]
    Cancelled,
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::QueueUnavailable { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// FIFO queues of opaque payloads addressed by name.
///
/// Operations on a queue that was never written behave as on an empty queue.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Creates the queue if needed and makes it ready for use.
    async fn open_queue(&self, queue: &str) -> StoreResult<()>;

    async fn enqueue(&self, queue: &str, payload: Vec<u8>) -> StoreResult<()>;

    /// Returns the oldest payload without removing it.
    async fn peek(&self, queue: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Removes and returns the oldest payload.
    async fn dequeue(&self, queue: &str) -> StoreResult<Option<Vec<u8>>>;

    async fn len(&self, queue: &str) -> StoreResult<usize>;

    /// Non-destructive scan of every payload, oldest first.
    async fn list(&self, queue: &str) -> StoreResult<Vec<Vec<u8>>>;

    async fn clear(&self, queue: &str) -> StoreResult<()>;

    /// Names of queues currently known to the store.
    async fn queue_names(&self) -> StoreResult<Vec<String>>;
}

/// Opens `queue`, retrying indefinitely while the store reports it as unavailable.
pub async fn open_queue_with_retry(
    store: &dyn QueueStore,
    queue: &str,
    delay: Duration,
    cancel: &CancellationToken,
) -> StoreResult<()> {
    let mut attempts = 0u64;
    loop {
        match store.open_queue(queue).await {
            Ok(()) => {
                if attempts > 0 {
                    debug!(queue, attempts, "queue became available");
                }
                return Ok(());
            }
            Err(e) if e.is_transient() => {
                attempts += 1;
                warn!(queue, attempts, "queue not available yet: {}", e);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(StoreError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// File-backed store under `data_dir`, or a memory store when unset.
pub fn open_store(data_dir: Option<&Path>) -> Arc<dyn QueueStore> {
    match data_dir {
        Some(dir) => Arc::new(FileQueueStore::new(dir)),
        None => Arc::new(MemoryQueueStore::new()),
    }
}

/// Volatile store, used for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryQueueStore {
    queues: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn open_queue(&self, queue: &str) -> StoreResult<()> {
        self.queues.lock().await.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn enqueue(&self, queue: &str, payload: Vec<u8>) -> StoreResult<()> {
        self.queues
            .lock()
            .await
            .entry(queue.to_string())
            .or_default()
            .push_back(payload);
        Ok(())
    }

    async fn peek(&self, queue: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self
            .queues
            .lock()
            .await
            .get(queue)
            .and_then(|q| q.front().cloned()))
    }

    async fn dequeue(&self, queue: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self
            .queues
            .lock()
            .await
            .get_mut(queue)
            .and_then(|q| q.pop_front()))
    }

    async fn len(&self, queue: &str) -> StoreResult<usize> {
        Ok(self.queues.lock().await.get(queue).map_or(0, |q| q.len()))
    }

    async fn list(&self, queue: &str) -> StoreResult<Vec<Vec<u8>>> {
        Ok(self
            .queues
            .lock()
            .await
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn clear(&self, queue: &str) -> StoreResult<()> {
        if let Some(q) = self.queues.lock().await.get_mut(queue) {
            q.clear();
        }
        Ok(())
    }

    async fn queue_names(&self) -> StoreResult<Vec<String>> {
        let mut names: Vec<String> = self.queues.lock().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// Journal file header: magic followed by the journal generation.
const JOURNAL_MAGIC: &[u8; 4] = b"HCSQ";
const JOURNAL_HEADER_LEN: usize = 12;

/// Consumed records a journal may carry before it is compacted. Compaction
/// also waits until consumed records outnumber live ones.
pub const COMPACT_MIN_CONSUMED: u64 = 1024;

/// Resident state of one journaled queue.
#[derive(Default)]
struct Journal {
    items: VecDeque<Vec<u8>>,
    /// Bumped by every rewrite of the journal file.
    generation: u64,
    /// Records at the front of the journal file that were already dequeued.
    consumed: u64,
    /// Whether the journal file exists on disk.
    on_disk: bool,
}

impl Journal {
    fn needs_compaction(&self) -> bool {
        self.consumed >= COMPACT_MIN_CONSUMED && self.consumed >= self.items.len() as u64
    }
}

/// Store that journals every queue to its own file under a data directory.
///
/// A journal starts with a 12 byte header (`HCSQ` magic, `u64` generation)
/// followed by `u32` little-endian length prefixes, each followed by that
/// many payload bytes. Enqueue appends one record. Dequeue only rewrites a
/// small head file holding `(generation, consumed)`. Once enough records
/// are consumed the live ones are rewritten into a journal of the next
/// generation through a temporary file and a rename; a head file from an
/// older generation then counts as zero consumed, so a crash at any point
/// leaves a consistent queue.
pub struct FileQueueStore {
    dir: PathBuf,
    queues: Mutex<HashMap<String, Journal>>,
}

impl FileQueueStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            queues: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Journal path for `queue`. Names are hex-encoded so any node name is a
    /// valid, collision-free file name.
    fn journal_path(&self, queue: &str) -> PathBuf {
        let encoded: String = queue.bytes().map(|b| format!("{:02x}", b)).collect();
        self.dir.join(format!("{encoded}.queue"))
    }

    fn head_path(&self, queue: &str) -> PathBuf {
        self.journal_path(queue).with_extension("head")
    }

    fn queue_name_from_path(path: &Path) -> Option<String> {
        let stem = path.file_stem()?.to_str()?;
        if path.extension()?.to_str()? != "queue" || stem.len() % 2 != 0 {
            return None;
        }
        let bytes: Option<Vec<u8>> = (0..stem.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&stem[i..i + 2], 16).ok())
            .collect();
        String::from_utf8(bytes?).ok()
    }

    /// Loads `queue` into memory if it is not resident yet.
    async fn ensure_loaded<'a>(
        &self,
        queues: &'a mut HashMap<String, Journal>,
        queue: &str,
    ) -> StoreResult<&'a mut Journal> {
        if !queues.contains_key(queue) {
            let journal = self.load(queue).await?;
            debug!(
                queue,
                items = journal.items.len(),
                consumed = journal.consumed,
                "queue journal loaded"
            );
            queues.insert(queue.to_string(), journal);
        }
        queues
            .get_mut(queue)
            .ok_or_else(|| StoreError::QueueUnavailable {
                queue: queue.to_string(),
                reason: "queue vanished while loading".into(),
            })
    }

    async fn load(&self, queue: &str) -> StoreResult<Journal> {
        let unavailable = |e: std::io::Error| StoreError::QueueUnavailable {
            queue: queue.to_string(),
            reason: e.to_string(),
        };
        let path = self.journal_path(queue);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Journal::default()),
            Err(e) => return Err(unavailable(e)),
        };

        let generation = parse_header(queue, &bytes)?;
        let (mut records, valid_len) = parse_records(&bytes[JOURNAL_HEADER_LEN..]);
        let valid_len = JOURNAL_HEADER_LEN + valid_len;
        if valid_len < bytes.len() {
            warn!(
                queue,
                offset = valid_len,
                dropped = bytes.len() - valid_len,
                "truncating torn journal tail"
            );
            let file = tokio::fs::OpenOptions::new()
                .write(true)
                .open(&path)
                .await
                .map_err(unavailable)?;
            file.set_len(valid_len as u64).await.map_err(unavailable)?;
        }

        let consumed = match tokio::fs::read(self.head_path(queue)).await {
            Ok(head) => match parse_head(&head) {
                Some((head_generation, consumed)) if head_generation == generation => consumed,
                Some(_) => 0,
                None => {
                    return Err(StoreError::Corrupt {
                        queue: queue.to_string(),
                        offset: 0,
                    })
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(unavailable(e)),
        };
        if consumed > records.len() as u64 {
            return Err(StoreError::Corrupt {
                queue: queue.to_string(),
                offset: valid_len,
            });
        }
        records.drain(..consumed as usize);

        Ok(Journal {
            items: records,
            generation,
            consumed,
            on_disk: true,
        })
    }

    /// Appends one record to the journal file.
    async fn append(&self, queue: &str, payload: &[u8]) -> StoreResult<()> {
        let io_err = |source| StoreError::Io {
            queue: queue.to_string(),
            source,
        };
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(self.journal_path(queue))
            .await
            .map_err(io_err)?;
        let mut record = Vec::with_capacity(payload.len() + 4);
        record.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        record.extend_from_slice(payload);
        file.write_all(&record).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;
        Ok(())
    }

    /// Writes the live items into a journal of the next generation.
    async fn rewrite(&self, queue: &str, journal: &mut Journal) -> StoreResult<()> {
        let io_err = |source| StoreError::Io {
            queue: queue.to_string(),
            source,
        };
        let generation = journal.generation + 1;
        let path = self.journal_path(queue);
        let tmp = path.with_extension("queue.tmp");
        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;
        tokio::fs::write(&tmp, render_journal(generation, &journal.items))
            .await
            .map_err(io_err)?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err)?;

        if journal.consumed > 0 {
            debug!(queue, consumed = journal.consumed, generation, "journal compacted");
        }
        journal.generation = generation;
        journal.consumed = 0;
        journal.on_disk = true;
        self.write_head(queue, journal).await
    }

    async fn write_head(&self, queue: &str, journal: &Journal) -> StoreResult<()> {
        let io_err = |source| StoreError::Io {
            queue: queue.to_string(),
            source,
        };
        let path = self.head_path(queue);
        let tmp = path.with_extension("head.tmp");
        let mut head = Vec::with_capacity(16);
        head.extend_from_slice(&journal.generation.to_le_bytes());
        head.extend_from_slice(&journal.consumed.to_le_bytes());
        tokio::fs::write(&tmp, head).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err)?;
        Ok(())
    }
}

fn render_journal(generation: u64, items: &VecDeque<Vec<u8>>) -> Vec<u8> {
    let size = JOURNAL_HEADER_LEN + items.iter().map(|i| i.len() + 4).sum::<usize>();
    let mut out = Vec::with_capacity(size);
    out.extend_from_slice(JOURNAL_MAGIC);
    out.extend_from_slice(&generation.to_le_bytes());
    for item in items {
        out.extend_from_slice(&(item.len() as u32).to_le_bytes());
        out.extend_from_slice(item);
    }
    out
}

fn parse_header(queue: &str, bytes: &[u8]) -> StoreResult<u64> {
    let corrupt = || StoreError::Corrupt {
        queue: queue.to_string(),
        offset: 0,
    };
    if bytes.get(..4) != Some(JOURNAL_MAGIC.as_slice()) {
        return Err(corrupt());
    }
    let generation: [u8; 8] = bytes
        .get(4..JOURNAL_HEADER_LEN)
        .and_then(|g| g.try_into().ok())
        .ok_or_else(corrupt)?;
    Ok(u64::from_le_bytes(generation))
}

/// Complete records in `bytes` and the length they span. A record cut short
/// by a crash during append ends the scan.
fn parse_records(bytes: &[u8]) -> (VecDeque<Vec<u8>>, usize) {
    let mut items = VecDeque::new();
    let mut offset = 0usize;
    while let Some(header) = bytes.get(offset..offset + 4) {
        let mut len = [0u8; 4];
        len.copy_from_slice(header);
        let len = u32::from_le_bytes(len) as usize;
        let Some(body) = bytes.get(offset + 4..offset + 4 + len) else {
            break;
        };
        items.push_back(body.to_vec());
        offset += 4 + len;
    }
    (items, offset)
}

fn parse_head(bytes: &[u8]) -> Option<(u64, u64)> {
    let generation: [u8; 8] = bytes.get(..8)?.try_into().ok()?;
    let consumed: [u8; 8] = bytes.get(8..16)?.try_into().ok()?;
    Some((u64::from_le_bytes(generation), u64::from_le_bytes(consumed)))
}

#[async_trait]
impl QueueStore for FileQueueStore {
    async fn open_queue(&self, queue: &str) -> StoreResult<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::QueueUnavailable {
                queue: queue.to_string(),
                reason: format!("cannot create {}: {}", self.dir.display(), e),
            })?;
        let mut queues = self.queues.lock().await;
        self.ensure_loaded(&mut queues, queue).await?;
        Ok(())
    }

    async fn enqueue(&self, queue: &str, payload: Vec<u8>) -> StoreResult<()> {
        let mut queues = self.queues.lock().await;
        let journal = self.ensure_loaded(&mut queues, queue).await?;
        if !journal.on_disk {
            journal.items.push_back(payload);
            if let Err(e) = self.rewrite(queue, journal).await {
                journal.items.pop_back();
                return Err(e);
            }
            return Ok(());
        }
        if let Err(e) = self.append(queue, &payload).await {
            // the next enqueue rewrites the journal over any partial record
            journal.on_disk = false;
            return Err(e);
        }
        journal.items.push_back(payload);
        Ok(())
    }

    async fn peek(&self, queue: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut queues = self.queues.lock().await;
        let journal = self.ensure_loaded(&mut queues, queue).await?;
        Ok(journal.items.front().cloned())
    }

    async fn dequeue(&self, queue: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut queues = self.queues.lock().await;
        let journal = self.ensure_loaded(&mut queues, queue).await?;
        let Some(head) = journal.items.pop_front() else {
            return Ok(None);
        };
        journal.consumed += 1;
        let persisted = if journal.needs_compaction() {
            self.rewrite(queue, journal).await
        } else {
            self.write_head(queue, journal).await
        };
        if let Err(e) = persisted {
            // a completed compaction already dropped the head from disk
            if journal.consumed > 0 {
                journal.items.push_front(head);
                journal.consumed -= 1;
            }
            return Err(e);
        }
        Ok(Some(head))
    }

    async fn len(&self, queue: &str) -> StoreResult<usize> {
        let mut queues = self.queues.lock().await;
        Ok(self.ensure_loaded(&mut queues, queue).await?.items.len())
    }

    async fn list(&self, queue: &str) -> StoreResult<Vec<Vec<u8>>> {
        let mut queues = self.queues.lock().await;
        let journal = self.ensure_loaded(&mut queues, queue).await?;
        Ok(journal.items.iter().cloned().collect())
    }

    async fn clear(&self, queue: &str) -> StoreResult<()> {
        let mut queues = self.queues.lock().await;
        let journal = self.ensure_loaded(&mut queues, queue).await?;
        journal.items.clear();
        self.rewrite(queue, journal).await
    }

    async fn queue_names(&self) -> StoreResult<Vec<String>> {
        let mut names: Vec<String> = self.queues.lock().await.keys().cloned().collect();
        if let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                if let Some(name) = Self::queue_name_from_path(&entry.path()) {
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }
}
