//! Segment-file queue implementation
//!
//! One IO task owns every file handle and both queue positions. Producers
//! and the consumer talk to it exclusively through channels, so there is no
//! shared mutable file state anywhere.
//!
//! The read side keeps two positions: a staging cursor that walks ahead to
//! feed the read channel, and the committed position that is persisted.
//! A record is committed only once the consumer has provably taken it off
//! the channel (the next capacity grant), so an unconsumed record is
//! replayed after a restart instead of being lost.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::{Result, SpoolError};

/// Segment file extension
const SEGMENT_FILE_EXTENSION: &str = "dat";

/// Metadata file name
const META_FILE: &str = "meta.json";

/// Record framing: u32 big-endian length prefix
const LENGTH_PREFIX_SIZE: u64 = 4;

/// Queue tuning parameters
#[derive(Debug, Clone)]
pub struct SpoolConfig {
    /// Roll to a new segment once the current one reaches this size
    pub max_segment_bytes: u64,

    /// Sync positions after this many appended records
    pub sync_every_records: u64,

    /// Sync positions at least this often while dirty
    pub sync_interval: Duration,

    /// Capacity of the producer-side channel
    pub put_queue_size: usize,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            max_segment_bytes: 200 * 1024 * 1024,
            sync_every_records: 1000,
            sync_interval: Duration::from_secs(2),
            put_queue_size: 64,
        }
    }
}

/// Persisted queue positions
///
/// `read_*` is the committed consumer position; everything at or past it is
/// still owed to the consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Positions {
    depth: u64,
    read_segment: u64,
    read_pos: u64,
    write_segment: u64,
    write_pos: u64,
}

/// Durable single-producer/single-consumer byte-record FIFO
///
/// See the crate docs for the on-disk layout and consumption model.
#[derive(Debug)]
pub struct Spool {
    name: String,
    put_tx: mpsc::Sender<Bytes>,
    read_rx: mpsc::Receiver<Bytes>,
    depth: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl Spool {
    /// Open (or recover) the queue named `name` under `spool_dir`
    ///
    /// Creates `<spool_dir>/spool_<name>/` if needed, recovers positions
    /// from the metadata file and the segment files actually present, and
    /// spawns the IO task.
    pub async fn open(name: &str, spool_dir: impl AsRef<Path>, config: SpoolConfig) -> Result<Self> {
        let dir = spool_dir.as_ref().join(format!("spool_{name}"));
        fs::create_dir_all(&dir).await.map_err(|e| SpoolError::OpenDir {
            path: dir.clone(),
            source: e,
        })?;

        let segments = list_segments(&dir).await?;
        let positions = recover_positions(&dir, &segments).await?;

        let write_path = segment_path(&dir, positions.write_segment);
        let mut write_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&write_path)
            .await?;
        // Drop any truncated tail left by a crash so the length-prefix chain
        // stays parseable after we start appending again.
        write_file.set_len(positions.write_pos).await?;
        write_file.seek(SeekFrom::Start(positions.write_pos)).await?;

        let depth = Arc::new(AtomicU64::new(positions.depth));

        tracing::debug!(
            spool = %name,
            dir = %dir.display(),
            depth = positions.depth,
            read_segment = positions.read_segment,
            write_segment = positions.write_segment,
            "spool opened"
        );

        let (put_tx, put_rx) = mpsc::channel(config.put_queue_size);
        let (read_tx, read_rx) = mpsc::channel(1);

        let task = IoTask {
            name: name.to_string(),
            dir,
            config,
            cursor_segment: positions.read_segment,
            cursor_pos: positions.read_pos,
            positions,
            write_file,
            read_file: None,
            staged: None,
            inflight: None,
            records_since_sync: 0,
            dirty: true,
            depth_gauge: Arc::clone(&depth),
        };
        let task = tokio::spawn(task.run(put_rx, read_tx));

        Ok(Self {
            name: name.to_string(),
            put_tx,
            read_rx,
            depth,
            task,
        })
    }

    /// Queue name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a record; awaits channel capacity if the IO task is behind
    pub async fn put(&self, record: Bytes) -> Result<()> {
        self.put_tx.send(record).await.map_err(|_| SpoolError::Closed)
    }

    /// Receive the next record in FIFO order
    ///
    /// The IO task stages at most one record ahead of this channel; not
    /// polling `recv` suspends the drain. Returns `None` once the queue is
    /// closed.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.read_rx.recv().await
    }

    /// Records not yet taken by the consumer (staged record included)
    pub fn depth(&self) -> u64 {
        self.depth.load(Ordering::Relaxed)
    }

    /// Flush positions and stop the IO task
    pub async fn close(self) {
        let Self {
            put_tx,
            read_rx,
            task,
            name,
            ..
        } = self;
        // Closing the put side stops the IO task. The read side stays alive
        // until the task is gone so its final consumed-or-not check on the
        // read channel sees the truth.
        drop(put_tx);
        if task.await.is_err() {
            tracing::error!(spool = %name, "spool IO task panicked");
        }
        drop(read_rx);
    }
}

/// A record read from disk, not yet handed to the consumer
struct Staged {
    record: Bytes,
    /// Committed position once this record is consumed
    end_segment: u64,
    end_pos: u64,
}

/// A record sent into the read channel, not yet known consumed
struct Inflight {
    end_segment: u64,
    end_pos: u64,
}

/// Open read-side cursor into one segment file
struct OpenSegment {
    id: u64,
    file: File,
}

/// The single owner of all queue file state
struct IoTask {
    name: String,
    dir: PathBuf,
    config: SpoolConfig,
    /// Committed (persisted) positions
    positions: Positions,
    /// Staging cursor; runs ahead of the committed read position
    cursor_segment: u64,
    cursor_pos: u64,
    write_file: File,
    read_file: Option<OpenSegment>,
    staged: Option<Staged>,
    inflight: Option<Inflight>,
    records_since_sync: u64,
    dirty: bool,
    depth_gauge: Arc<AtomicU64>,
}

impl IoTask {
    async fn run(mut self, mut put_rx: mpsc::Receiver<Bytes>, read_tx: mpsc::Sender<Bytes>) {
        let mut ticker = interval(self.config.sync_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            if self.staged.is_none() && self.records_behind_cursor() > 0 {
                self.stage_next().await;
            }
            // A capacity grant on the read channel proves the previous send
            // was consumed, so the arm also runs to commit a lone inflight.
            let read_arm = self.staged.is_some() || self.inflight.is_some();

            tokio::select! {
                maybe = put_rx.recv() => match maybe {
                    Some(record) => {
                        if let Err(e) = self.append(&record).await {
                            tracing::error!(spool = %self.name, error = %e, "spool append failed, record lost");
                        }
                    }
                    // Producer handle dropped: the queue is closing.
                    None => break,
                },
                permit = read_tx.reserve(), if read_arm => match permit {
                    Ok(permit) => self.deliver(permit).await,
                    Err(_) => break,
                },
                _ = ticker.tick() => {
                    if self.dirty {
                        self.sync().await;
                    }
                }
            }
        }

        // Graceful close: if the channel is empty the consumer took the
        // inflight record, so it can be committed. Otherwise it stays
        // uncommitted and is replayed on the next open.
        if self.inflight.is_some() && read_tx.try_reserve().is_ok() {
            self.commit_inflight().await;
        }
        self.sync().await;
        tracing::debug!(spool = %self.name, depth = self.positions.depth, "spool closed");
    }

    /// Records on disk the staging cursor has not read yet
    fn records_behind_cursor(&self) -> u64 {
        let ahead = self.staged.is_some() as u64 + self.inflight.is_some() as u64;
        self.positions.depth.saturating_sub(ahead)
    }

    /// Append one record to the write segment, rolling at the size limit
    async fn append(&mut self, record: &Bytes) -> Result<()> {
        if self.positions.write_pos >= self.config.max_segment_bytes {
            self.roll_segment().await?;
        }

        let len = (record.len() as u32).to_be_bytes();
        self.write_file.write_all(&len).await?;
        self.write_file.write_all(record).await?;

        self.positions.write_pos += LENGTH_PREFIX_SIZE + record.len() as u64;
        self.positions.depth += 1;
        self.depth_gauge.store(self.positions.depth, Ordering::Relaxed);
        self.records_since_sync += 1;
        self.dirty = true;

        if self.records_since_sync >= self.config.sync_every_records {
            self.sync().await;
        }
        Ok(())
    }

    /// Close the current write segment and start the next one
    async fn roll_segment(&mut self) -> Result<()> {
        if let Err(e) = self.write_file.sync_data().await {
            tracing::warn!(spool = %self.name, error = %e, "segment sync failed while rolling");
        }

        self.positions.write_segment += 1;
        self.positions.write_pos = 0;

        let path = segment_path(&self.dir, self.positions.write_segment);
        self.write_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .await?;
        self.dirty = true;

        tracing::debug!(
            spool = %self.name,
            segment = self.positions.write_segment,
            "rolled to new spool segment"
        );
        Ok(())
    }

    /// Load the next record at the staging cursor into `staged`
    ///
    /// Walks across exhausted segments. A truncated tail (crash artifact) in
    /// a non-final segment is skipped; in the final segment it means nothing
    /// more is readable.
    async fn stage_next(&mut self) {
        while self.staged.is_none() && self.records_behind_cursor() > 0 {
            if self.cursor_segment == self.positions.write_segment
                && self.cursor_pos >= self.positions.write_pos
            {
                // Depth said there was more, but the cursor caught the
                // writer; resync the count.
                tracing::warn!(
                    spool = %self.name,
                    depth = self.positions.depth,
                    "spool depth out of sync with positions, resetting"
                );
                self.clamp_depth();
                return;
            }

            if self
                .read_file
                .as_ref()
                .map(|s| s.id != self.cursor_segment)
                .unwrap_or(true)
            {
                let path = segment_path(&self.dir, self.cursor_segment);
                let mut file = match File::open(&path).await {
                    Ok(f) => f,
                    Err(e) => {
                        tracing::error!(
                            spool = %self.name,
                            segment = self.cursor_segment,
                            error = %e,
                            "spool read segment missing"
                        );
                        if !self.advance_cursor_segment() {
                            return;
                        }
                        continue;
                    }
                };
                if let Err(e) = file.seek(SeekFrom::Start(self.cursor_pos)).await {
                    tracing::error!(spool = %self.name, error = %e, "spool seek failed");
                    return;
                }
                self.read_file = Some(OpenSegment {
                    id: self.cursor_segment,
                    file,
                });
            }

            let seg = self.read_file.as_mut().expect("read segment opened above");

            let mut header = [0u8; 4];
            match seg.file.read_exact(&mut header).await {
                Ok(_) => {
                    let record_len = u32::from_be_bytes(header) as usize;
                    let mut buf = vec![0u8; record_len];
                    match seg.file.read_exact(&mut buf).await {
                        Ok(_) => {
                            self.cursor_pos += LENGTH_PREFIX_SIZE + record_len as u64;
                            self.staged = Some(Staged {
                                record: Bytes::from(buf),
                                end_segment: self.cursor_segment,
                                end_pos: self.cursor_pos,
                            });
                            return;
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                            if !self.advance_cursor_segment() {
                                return;
                            }
                        }
                        Err(e) => {
                            tracing::error!(spool = %self.name, error = %e, "spool read failed");
                            self.read_file = None;
                            return;
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    // Clean end of this segment (or a truncated header).
                    if !self.advance_cursor_segment() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::error!(spool = %self.name, error = %e, "spool read failed");
                    self.read_file = None;
                    return;
                }
            }
        }
    }

    /// Move the staging cursor to the next segment
    ///
    /// Returns false when there is nothing past the write segment; the
    /// caller stops staging. Exhausted segment files are only deleted once
    /// their records are committed, so nothing is removed here.
    fn advance_cursor_segment(&mut self) -> bool {
        self.read_file = None;

        if self.cursor_segment >= self.positions.write_segment {
            // Nothing beyond the write segment; whatever depth claimed is gone.
            self.clamp_depth();
            return false;
        }

        self.cursor_segment += 1;
        self.cursor_pos = 0;
        true
    }

    /// Hand the staged record to the consumer
    ///
    /// The capacity grant proves the previously sent record (if any) left
    /// the channel, so it is committed first.
    async fn deliver(&mut self, permit: mpsc::Permit<'_, Bytes>) {
        self.commit_inflight().await;

        if let Some(Staged {
            record,
            end_segment,
            end_pos,
        }) = self.staged.take()
        {
            permit.send(record);
            self.inflight = Some(Inflight {
                end_segment,
                end_pos,
            });
        }
    }

    /// Commit the consumed record: advance the persisted read position and
    /// delete segments it has fully passed
    async fn commit_inflight(&mut self) {
        let Some(inflight) = self.inflight.take() else {
            return;
        };

        while self.positions.read_segment < inflight.end_segment {
            let path = segment_path(&self.dir, self.positions.read_segment);
            if let Err(e) = fs::remove_file(&path).await {
                tracing::warn!(
                    spool = %self.name,
                    path = %path.display(),
                    error = %e,
                    "failed to remove consumed segment"
                );
            }
            self.positions.read_segment += 1;
        }

        self.positions.read_segment = inflight.end_segment;
        self.positions.read_pos = inflight.end_pos;
        self.positions.depth = self.positions.depth.saturating_sub(1);
        self.depth_gauge.store(self.positions.depth, Ordering::Relaxed);
        self.dirty = true;
    }

    /// Clamp a desynced depth down to what is actually outstanding
    fn clamp_depth(&mut self) {
        let ahead = self.staged.is_some() as u64 + self.inflight.is_some() as u64;
        self.positions.depth = ahead;
        self.depth_gauge.store(ahead, Ordering::Relaxed);
        self.dirty = true;
    }

    /// Sync segment data and persist positions
    async fn sync(&mut self) {
        if let Err(e) = self.write_file.sync_data().await {
            tracing::warn!(spool = %self.name, error = %e, "spool data sync failed");
        }
        if let Err(e) = persist_positions(&self.dir, &self.positions).await {
            tracing::warn!(spool = %self.name, error = %e, "spool metadata sync failed");
        }
        self.records_since_sync = 0;
        self.dirty = false;
    }
}

/// Path of segment `id` inside `dir`
fn segment_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{id:06}.{SEGMENT_FILE_EXTENSION}"))
}

/// Sorted ids of the segment files present in `dir`
async fn list_segments(dir: &Path) -> Result<Vec<u64>> {
    let mut ids = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(SEGMENT_FILE_EXTENSION) {
            continue;
        }
        if let Some(id) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok())
        {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Recover queue positions from the metadata file and the segments on disk
///
/// The synced read position is trusted (clamped to the files present); depth
/// and the write position are recomputed by scanning forward from it, so
/// records appended after the last metadata sync are found again.
async fn recover_positions(dir: &Path, segments: &[u64]) -> Result<Positions> {
    let meta_path = dir.join(META_FILE);
    let mut positions = match fs::read(&meta_path).await {
        Ok(bytes) => serde_json::from_slice::<Positions>(&bytes).map_err(|e| SpoolError::Meta {
            path: meta_path.clone(),
            message: e.to_string(),
        })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Positions::default(),
        Err(e) => {
            return Err(SpoolError::Meta {
                path: meta_path,
                message: e.to_string(),
            })
        }
    };

    let (Some(&first), Some(&last)) = (segments.first(), segments.last()) else {
        // No segments on disk; whatever the metadata said is history.
        let segment = positions.write_segment;
        return Ok(Positions {
            depth: 0,
            read_segment: segment,
            read_pos: 0,
            write_segment: segment,
            write_pos: 0,
        });
    };

    if positions.read_segment < first {
        positions.read_segment = first;
        positions.read_pos = 0;
    }
    if positions.read_segment > last {
        positions.read_segment = last;
        positions.read_pos = 0;
    }

    // Rescan from the read position to rebuild depth and the write position
    // from the data actually on disk.
    let mut depth = 0;
    let mut write_segment = positions.read_segment;
    let mut write_pos = positions.read_pos;

    for &id in segments.iter().filter(|&&id| id >= positions.read_segment) {
        let start = if id == positions.read_segment {
            positions.read_pos
        } else {
            0
        };
        let (records, end) = scan_segment(&segment_path(dir, id), start).await?;
        depth += records;
        write_segment = id;
        write_pos = end;

        if id == positions.read_segment && positions.read_pos > end {
            // Synced read position points past the valid data (truncated file).
            positions.read_pos = end;
        }
    }

    positions.depth = depth;
    positions.write_segment = write_segment;
    positions.write_pos = write_pos;
    Ok(positions)
}

/// Count whole records in a segment from `start`, returning where valid
/// data ends (a truncated trailing record is excluded)
async fn scan_segment(path: &Path, start: u64) -> Result<(u64, u64)> {
    let mut file = File::open(path).await?;
    let len = file.metadata().await?.len();
    let mut pos = start.min(len);
    file.seek(SeekFrom::Start(pos)).await?;

    let mut records = 0;
    let mut header = [0u8; 4];
    loop {
        if len - pos < LENGTH_PREFIX_SIZE {
            break;
        }
        file.read_exact(&mut header).await?;
        let record_len = u64::from(u32::from_be_bytes(header));
        if len - pos - LENGTH_PREFIX_SIZE < record_len {
            break;
        }
        file.seek(SeekFrom::Current(record_len as i64)).await?;
        pos += LENGTH_PREFIX_SIZE + record_len;
        records += 1;
    }
    Ok((records, pos))
}

/// Atomically persist positions to the metadata file
async fn persist_positions(dir: &Path, positions: &Positions) -> Result<()> {
    let tmp = dir.join(format!("{META_FILE}.tmp"));
    let bytes = serde_json::to_vec(positions).map_err(|e| SpoolError::Meta {
        path: tmp.clone(),
        message: e.to_string(),
    })?;
    fs::write(&tmp, &bytes).await?;
    fs::rename(&tmp, dir.join(META_FILE)).await?;
    Ok(())
}

#[cfg(test)]
#[path = "queue_test.rs"]
mod queue_test;
