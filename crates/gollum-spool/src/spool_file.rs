//! Per-stream segment store: one directory of numbered `.spl` files,
//! written in rotated order and read back only after rotation.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use gollum_core::{Message, MessageBatch};

use crate::wire::{decode_message, encode_message};

struct WriterState {
    file: File,
    segment_num: u64,
    size_bytes: u64,
    opened_at: Instant,
}

/// Owns one stream's spool directory, its current writable segment, and
/// the `MessageBatch` used to amortize writes.
pub struct SpoolFile {
    stream_name: String,
    dir: PathBuf,
    max_file_size_bytes: u64,
    max_file_age: Duration,
    writer: Mutex<Option<WriterState>>,
    next_segment: Mutex<u64>,
    batch: MessageBatch,
    written: AtomicU64,
    read: AtomicU64,
}

impl SpoolFile {
    pub fn new(
        base: &Path,
        stream_name: &str,
        max_file_size_mb: u64,
        max_file_age_min: u64,
        batch_capacity: usize,
    ) -> Self {
        Self {
            stream_name: stream_name.to_string(),
            dir: base.join(stream_name),
            max_file_size_bytes: max_file_size_mb.max(1) * 1024 * 1024,
            max_file_age: Duration::from_secs(max_file_age_min.max(1) * 60),
            writer: Mutex::new(None),
            next_segment: Mutex::new(0),
            batch: MessageBatch::new(batch_capacity.max(1)),
            written: AtomicU64::new(0),
            read: AtomicU64::new(0),
        }
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Running total of messages actually persisted to a segment.
    pub fn written_count(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Running total of messages materialized back out by the replay
    /// reader.
    pub fn read_count(&self) -> u64 {
        self.read.load(Ordering::Relaxed)
    }

    pub fn record_read(&self, n: u64) {
        self.read.fetch_add(n, Ordering::Relaxed);
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn pending_count(&self) -> usize {
        self.batch.active_count()
    }

    pub fn reached_half_batch(&self, batch_max_count: usize) -> bool {
        self.batch.reached_size_threshold(batch_max_count / 2)
    }

    pub fn reached_batch_timeout(&self, timeout: Duration) -> bool {
        self.batch.reached_time_threshold(timeout)
    }

    /// Ensures a writable current segment exists, rotating if needed.
    /// Called eagerly before each write so a rotation failure can route
    /// the message back to its origin instead of silently queuing it.
    pub fn ensure_open(&self) -> io::Result<()> {
        self.open_or_rotate()
    }

    fn ensure_dir(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(0o700))?;
        }
        Ok(())
    }

    fn segment_path(&self, n: u64) -> PathBuf {
        self.dir.join(format!("{n:06}.spl"))
    }

    /// Ensures a writable current segment exists, sealing and rotating
    /// past the one currently open once it exceeds the size or age
    /// bound. A sealed segment becomes eligible for replay immediately.
    fn open_or_rotate(&self) -> io::Result<()> {
        self.ensure_dir()?;
        let mut writer = self.writer.lock();
        let needs_rotation = match writer.as_ref() {
            None => true,
            Some(w) => {
                w.size_bytes >= self.max_file_size_bytes || w.opened_at.elapsed() >= self.max_file_age
            }
        };
        if !needs_rotation {
            return Ok(());
        }
        let mut next = self.next_segment.lock();
        let segment_num = *next;
        *next += 1;
        let path = self.segment_path(segment_num);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        *writer = Some(WriterState {
            file,
            segment_num,
            size_bytes: 0,
            opened_at: Instant::now(),
        });
        Ok(())
    }

    fn append_bytes(&self, bytes: &[u8]) -> io::Result<()> {
        use std::io::Write;
        let mut writer = self.writer.lock();
        let state = writer
            .as_mut()
            .expect("open_or_rotate must succeed before append_bytes is called");
        state.file.write_all(bytes)?;
        state.file.flush()?;
        state.size_bytes += bytes.len() as u64;
        Ok(())
    }

    /// Encodes and appends `messages` to the current segment. A
    /// rotation or write failure drops the whole flushed batch rather
    /// than partially persisting it — only bytes that actually reached
    /// a segment count as writes (settling Open Question i).
    async fn flush_to_disk(&self, messages: Vec<Message>) {
        if let Err(e) = self.open_or_rotate() {
            tracing::warn!(stream = %self.stream_name, error = %e, "spool rotation failed, dropping flushed batch");
            return;
        }
        let mut buf = Vec::new();
        for msg in &messages {
            if let Err(e) = encode_message(msg, &mut buf) {
                tracing::warn!(stream = %self.stream_name, error = %e, "failed to encode message for spooling");
                return;
            }
        }
        if let Err(e) = self.append_bytes(&buf) {
            tracing::warn!(stream = %self.stream_name, error = %e, "spool write failed, dropping flushed batch");
            return;
        }
        self.written.fetch_add(messages.len() as u64, Ordering::Relaxed);
    }

    pub async fn write_message(
        &self,
        msg: Message,
        can_append: impl FnOnce() -> bool,
        drop_fn: impl FnOnce(Message),
    ) {
        self.batch
            .append_or_flush(msg, can_append, drop_fn, |messages| self.flush_to_disk(messages))
            .await;
    }

    pub async fn flush(&self) {
        self.batch.flush(|messages| self.flush_to_disk(messages)).await;
    }

    pub async fn close(&self, timeout: Duration, drop_fn: impl Fn(Message)) {
        self.batch
            .close(|messages| self.flush_to_disk(messages), timeout, drop_fn)
            .await;
        *self.writer.lock() = None;
    }

    /// Segment numbers with no writer currently holding them open, in
    /// ascending (and therefore message-order-preserving) order.
    pub fn sealed_segments(&self) -> io::Result<Vec<u64>> {
        let active = self.writer.lock().as_ref().map(|w| w.segment_num);
        let mut nums = Vec::new();
        if self.dir.exists() {
            for entry in std::fs::read_dir(&self.dir)? {
                let entry = entry?;
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if let Some(stem) = name.strip_suffix(".spl") {
                    if let Ok(n) = stem.parse::<u64>() {
                        if Some(n) != active {
                            nums.push(n);
                        }
                    }
                }
            }
        }
        nums.sort_unstable();
        Ok(nums)
    }

    pub fn read_segment(&self, n: u64) -> io::Result<Vec<Message>> {
        let mut file = File::open(self.segment_path(n))?;
        let mut messages = Vec::new();
        while let Some(msg) = decode_message(&mut file)? {
            messages.push(msg);
        }
        Ok(messages)
    }

    pub fn delete_segment(&self, n: u64) -> io::Result<()> {
        std::fs::remove_file(self.segment_path(n))
    }
}
