use std::collections::HashMap;
use std::fs;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use image::{DynamicImage, ImageFormat, RgbaImage};
use lru::LruCache;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache_key::CacheKeyStore;
use crate::config::Config;
use crate::metadata;
use crate::queue::{DecodeJob, Priority, ThumbRequestQueue};

/// A decoded, scaled thumbnail shared between the cache and the grid.
pub type Thumbnail = Arc<RgbaImage>;

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("image decoding failed: {0}")]
    Decode(#[from] image::ImageError),
}

/// Outcome of a visible thumbnail request.
#[derive(Debug, Clone)]
pub enum Lookup {
    Ready(Thumbnail),
    Pending,
}

/// A decode that finished since the last [`ThumbnailPipeline::poll`].
#[derive(Debug, Clone)]
pub struct ThumbnailReady {
    pub path: PathBuf,
    pub thumbnail: Thumbnail,
}

#[derive(Debug)]
enum WorkerEvent {
    Decoded { path: PathBuf, image: RgbaImage },
    Failed { path: PathBuf, error: ThumbnailError },
    Skipped { path: PathBuf, generation: u64 },
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    priority: Priority,
    generation: u64,
}

/// Two-tier thumbnail cache backed by a pool of decode workers.
///
/// All methods run on the coordinating thread; workers only decode and
/// report back over a channel.
#[derive(Debug)]
pub struct ThumbnailPipeline {
    keys: CacheKeyStore,
    memory: LruCache<PathBuf, Thumbnail>,
    in_flight: HashMap<PathBuf, InFlight>,
    queue: ThumbRequestQueue,
    generation: Arc<AtomicU64>,
    result_rx: Receiver<WorkerEvent>,
}

impl ThumbnailPipeline {
    pub fn new(config: &Config) -> Result<Self> {
        let (result_tx, result_rx) = unbounded::<WorkerEvent>();
        let queue = ThumbRequestQueue::new();
        let generation = Arc::new(AtomicU64::new(0));
        let worker_count = config.workers.max(2);
        for worker_idx in 0..worker_count {
            let queue = queue.clone();
            let generation = Arc::clone(&generation);
            let tx = result_tx.clone();
            let thumb_size = config.thumb_size;
            thread::Builder::new()
                .name(format!("thumb-worker-{worker_idx}"))
                .spawn(move || run_worker(queue, generation, thumb_size, tx))
                .context("failed to spawn thumbnail worker thread")?;
        }
        let capacity = NonZeroUsize::new(config.memory_capacity).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            keys: CacheKeyStore::new(config.cache_dir.clone()),
            memory: LruCache::new(capacity),
            in_flight: HashMap::new(),
            queue,
            generation,
            result_rx,
        })
    }

    pub fn keys(&self) -> &CacheKeyStore {
        &self.keys
    }

    /// Resolves a thumbnail for display: memory, then a fresh disk
    /// artifact, otherwise a decode is scheduled ahead of prefetch work.
    pub fn get_or_schedule(&mut self, path: &Path) -> Lookup {
        if let Some(thumb) = self.memory.get(path) {
            return Lookup::Ready(Arc::clone(thumb));
        }
        if let Some(thumb) = self.load_from_disk(path) {
            self.memory.put(path.to_path_buf(), Arc::clone(&thumb));
            return Lookup::Ready(thumb);
        }
        self.schedule(path, Priority::Visible);
        Lookup::Pending
    }

    /// Makes sure a thumbnail will exist in the cache without loading it.
    pub fn warm(&mut self, path: &Path) {
        if self.memory.contains(path) {
            return;
        }
        if self.keys.is_valid(path, &self.keys.artifact_path(path)) {
            return;
        }
        self.schedule(path, Priority::Prefetch);
    }

    /// Memory-tier lookup that neither touches disk nor schedules work.
    pub fn cached(&self, path: &Path) -> Option<Thumbnail> {
        self.memory.peek(path).cloned()
    }

    /// Drops the memory entry for a path whose file just changed.
    pub fn invalidate(&mut self, path: &Path) {
        self.memory.pop(path);
    }

    /// Runs `edit`, which rewrites `path` without touching its pixels, and
    /// keeps the cached thumbnail valid under the file's new mtime. A disk
    /// artifact that was already stale is left stale and the memory entry
    /// dropped, so the next request decodes again.
    pub fn preserve_across_edit<T, E>(
        &mut self,
        path: &Path,
        edit: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        let artifact = self.keys.artifact_path(path);
        let was_fresh = self.keys.is_valid(path, &artifact);
        let output = edit()?;
        if !was_fresh {
            self.invalidate(path);
        } else if let Err(err) = self.keys.stamp(path, &artifact) {
            warn!(path = %path.display(), "failed to restamp thumbnail: {err}");
            self.invalidate(path);
        }
        Ok(output)
    }

    /// Starts a new request generation. Queued work from older generations
    /// is skipped unless it is requested again.
    pub fn advance_generation(&mut self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    fn schedule(&mut self, path: &Path, priority: Priority) {
        let generation = self.generation.load(Ordering::SeqCst);
        match self.in_flight.get_mut(path) {
            Some(pending) => {
                pending.generation = generation;
                if priority == Priority::Visible {
                    pending.priority = Priority::Visible;
                }
                self.queue.refresh(path, pending.priority, generation);
            }
            None => {
                self.in_flight.insert(
                    path.to_path_buf(),
                    InFlight {
                        priority,
                        generation,
                    },
                );
                self.queue.enqueue(path.to_path_buf(), priority, generation);
            }
        }
    }

    fn load_from_disk(&self, path: &Path) -> Option<Thumbnail> {
        let artifact = self.keys.artifact_path(path);
        if !self.keys.is_valid(path, &artifact) {
            return None;
        }
        match image::open(&artifact) {
            Ok(img) => Some(Arc::new(img.to_rgba8())),
            Err(err) => {
                debug!(artifact = %artifact.display(), "unreadable cached thumbnail: {err}");
                None
            }
        }
    }

    fn persist(&self, path: &Path, thumb: &RgbaImage) -> Result<(), ThumbnailError> {
        let artifact = self.keys.artifact_path(path);
        if let Some(parent) = artifact.parent() {
            fs::create_dir_all(parent)?;
        }
        thumb.save_with_format(&artifact, ImageFormat::Png)?;
        self.keys.stamp(path, &artifact)?;
        Ok(())
    }

    /// Applies finished decodes to both cache tiers and returns them.
    pub fn poll(&mut self) -> Vec<ThumbnailReady> {
        let mut ready = Vec::new();
        loop {
            match self.result_rx.try_recv() {
                Ok(event) => self.apply(event, &mut ready),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        ready
    }

    /// Like [`poll`](Self::poll) but waits up to `timeout` for the first
    /// result when nothing is ready yet.
    pub fn poll_timeout(&mut self, timeout: Duration) -> Vec<ThumbnailReady> {
        let mut ready = Vec::new();
        if self.in_flight.is_empty() {
            return ready;
        }
        match self.result_rx.recv_timeout(timeout) {
            Ok(event) => self.apply(event, &mut ready),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return ready,
        }
        ready.extend(self.poll());
        ready
    }

    fn apply(&mut self, event: WorkerEvent, ready: &mut Vec<ThumbnailReady>) {
        match event {
            WorkerEvent::Decoded { path, image } => {
                self.in_flight.remove(&path);
                if let Err(err) = self.persist(&path, &image) {
                    warn!(path = %path.display(), "failed to persist thumbnail: {err}");
                }
                let thumbnail = Arc::new(image);
                self.memory.put(path.clone(), Arc::clone(&thumbnail));
                ready.push(ThumbnailReady { path, thumbnail });
            }
            WorkerEvent::Failed { path, error } => {
                debug!(path = %path.display(), "thumbnail decode failed: {error}");
                self.in_flight.remove(&path);
            }
            WorkerEvent::Skipped { path, generation } => match self.in_flight.get(&path) {
                // re-requested after the worker had already picked up the stale job
                Some(pending) if pending.generation > generation => {
                    self.queue.enqueue(path, pending.priority, pending.generation);
                }
                _ => {
                    self.in_flight.remove(&path);
                }
            },
        }
    }
}

impl Drop for ThumbnailPipeline {
    fn drop(&mut self) {
        self.queue.close();
    }
}

fn run_worker(
    queue: ThumbRequestQueue,
    generation: Arc<AtomicU64>,
    thumb_size: u32,
    tx: Sender<WorkerEvent>,
) {
    while let Some(DecodeJob {
        path,
        generation: job_generation,
    }) = queue.pop()
    {
        let event = if job_generation < generation.load(Ordering::SeqCst) {
            WorkerEvent::Skipped {
                path,
                generation: job_generation,
            }
        } else {
            match decode_thumbnail(&path, thumb_size) {
                Ok(image) => WorkerEvent::Decoded { path, image },
                Err(error) => WorkerEvent::Failed { path, error },
            }
        };
        if tx.send(event).is_err() {
            break;
        }
    }
}

/// Decodes `path`, applies its EXIF orientation and scales it to fit a
/// `size` x `size` square.
pub fn decode_thumbnail(path: &Path, size: u32) -> Result<RgbaImage, ThumbnailError> {
    let data = fs::read(path)?;
    let img = image::load_from_memory(&data)?;
    let img = match metadata::orientation(&data) {
        Some(code) => adjust_orientation(img, code),
        None => img,
    };
    Ok(img.thumbnail(size, size).to_rgba8())
}

fn adjust_orientation(img: DynamicImage, code: u16) -> DynamicImage {
    match code {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}
