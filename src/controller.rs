//! Filtered, incrementally realized view over an ordered list of images.
//!
//! The controller owns no threads. It turns [`GridEvent`]s into
//! [`GridCommand`]s for a renderer and asks a [`ThumbnailSource`] for
//! bitmaps as items become visible.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, info};

use crate::grid::ThumbnailGrid;
use crate::metadata;
use crate::pipeline::{Lookup, Thumbnail, ThumbnailPipeline, ThumbnailReady};

/// What the controller needs from the thumbnail cache.
pub trait ThumbnailSource {
    /// Visible request: a bitmap if one is at hand, otherwise schedules it.
    fn request(&mut self, path: &Path) -> Option<Thumbnail>;
    /// Read-ahead request that only fills the cache.
    fn warm(&mut self, path: &Path);
    /// Bitmap already in memory, without side effects.
    fn cached(&self, path: &Path) -> Option<Thumbnail>;
    /// Marks previously queued work as no longer wanted.
    fn new_generation(&mut self);
}

impl ThumbnailSource for ThumbnailPipeline {
    fn request(&mut self, path: &Path) -> Option<Thumbnail> {
        match self.get_or_schedule(path) {
            Lookup::Ready(thumb) => Some(thumb),
            Lookup::Pending => None,
        }
    }

    fn warm(&mut self, path: &Path) {
        ThumbnailPipeline::warm(self, path)
    }

    fn cached(&self, path: &Path) -> Option<Thumbnail> {
        ThumbnailPipeline::cached(self, path)
    }

    fn new_generation(&mut self) {
        self.advance_generation();
    }
}

#[derive(Debug, Clone)]
pub enum GridEvent {
    PredicateChanged { text: String, show_notes: bool },
    ScrolledNearEnd,
    Resized { width: f32, height: f32 },
    Idle,
    ThumbnailReady(ThumbnailReady),
    CommentCommitted { path: PathBuf, text: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum GridCommand {
    /// Drop every cell; the new view has `total` items.
    ViewReset { total: usize },
    /// Cells `start..end` of the view now exist.
    AppendItems { start: usize, end: usize },
    ShowThumbnail {
        index: usize,
        path: PathBuf,
        thumbnail: Thumbnail,
    },
    RefreshNote {
        index: usize,
        path: PathBuf,
        note: Option<String>,
    },
    Relayout { columns: usize },
    /// A read-ahead batch will run on the next idle turn.
    PrefetchScheduled,
}

/// One realized cell. `thumbnail` is `None` while the bitmap is pending.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibleItem {
    pub path: PathBuf,
    pub thumbnail: Option<Thumbnail>,
    pub note: Option<String>,
}

pub type CommentReader = fn(&Path) -> String;

#[derive(Debug)]
pub struct GridController<R = CommentReader> {
    images: Vec<PathBuf>,
    comments: HashMap<PathBuf, String>,
    view: Vec<PathBuf>,
    positions: HashMap<PathBuf, usize>,
    show_notes: bool,
    grid: ThumbnailGrid,
    window_size: usize,
    realized: usize,
    prefetched: usize,
    prefetch_pending: bool,
    read_comment: R,
}

impl GridController {
    /// Controller reading comments from image metadata. The view stays
    /// empty until the first [`set_predicate`](Self::set_predicate).
    pub fn new(images: Vec<PathBuf>, grid: ThumbnailGrid) -> Self {
        Self::with_reader(images, grid, metadata::read_comment as CommentReader)
    }
}

impl<R> GridController<R>
where
    R: Fn(&Path) -> String + Sync,
{
    pub fn with_reader(images: Vec<PathBuf>, grid: ThumbnailGrid, read_comment: R) -> Self {
        Self {
            images,
            comments: HashMap::new(),
            view: Vec::new(),
            positions: HashMap::new(),
            show_notes: false,
            window_size: grid.window_size(),
            grid,
            realized: 0,
            prefetched: 0,
            prefetch_pending: false,
            read_comment,
        }
    }

    pub fn total(&self) -> usize {
        self.view.len()
    }

    pub fn view(&self) -> &[PathBuf] {
        &self.view
    }

    pub fn realized_count(&self) -> usize {
        self.realized
    }

    pub fn prefetched_count(&self) -> usize {
        self.prefetched
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn columns(&self) -> usize {
        self.grid.cols()
    }

    /// Comment recorded for `path` by the last filter pass or commit.
    pub fn comment(&self, path: &Path) -> Option<&str> {
        self.comments.get(path).map(String::as_str)
    }

    fn index_of_realized(&self, path: &Path) -> Option<usize> {
        self.positions
            .get(path)
            .copied()
            .filter(|&index| index < self.realized)
    }

    fn note_for(&self, path: &Path) -> Option<String> {
        if !self.show_notes {
            return None;
        }
        Some(self.comments.get(path).cloned().unwrap_or_default())
    }

    /// Rebuilds the view from every image whose comment contains `text`,
    /// ignoring case. Blank text matches everything. Realizes the first
    /// batch of the new view.
    pub fn set_predicate<S: ThumbnailSource>(
        &mut self,
        text: &str,
        show_notes: bool,
        source: &mut S,
    ) -> Vec<GridCommand> {
        self.show_notes = show_notes;
        let read_comment = &self.read_comment;
        let comments: Vec<(PathBuf, String)> = self
            .images
            .par_iter()
            .map(|path| (path.clone(), read_comment(path)))
            .collect();

        let match_all = text.trim().is_empty();
        let needle = text.to_lowercase();
        self.view = comments
            .iter()
            .filter(|(_, comment)| match_all || comment.to_lowercase().contains(&needle))
            .map(|(path, _)| path.clone())
            .collect();
        self.positions = self
            .view
            .iter()
            .enumerate()
            .map(|(index, path)| (path.clone(), index))
            .collect();
        self.comments = comments.into_iter().collect();
        self.realized = 0;
        self.prefetched = 0;
        self.prefetch_pending = false;
        source.new_generation();
        info!(
            matched = self.view.len(),
            images = self.images.len(),
            "filter applied"
        );

        let mut commands = vec![GridCommand::ViewReset {
            total: self.view.len(),
        }];
        commands.extend(self.realize_next_batch(source));
        commands
    }

    /// Realizes up to `window_size` more items, asking for their bitmaps
    /// at visible priority, and schedules a read-ahead when items remain.
    pub fn realize_next_batch<S: ThumbnailSource>(&mut self, source: &mut S) -> Vec<GridCommand> {
        let start = self.realized;
        let end = (start + self.window_size).min(self.view.len());
        if start >= end {
            return Vec::new();
        }
        self.realized = end;
        self.prefetched = self.prefetched.max(end);

        let mut commands = vec![GridCommand::AppendItems { start, end }];
        for (index, path) in self.view[start..end].iter().enumerate() {
            if let Some(thumbnail) = source.request(path) {
                commands.push(GridCommand::ShowThumbnail {
                    index: start + index,
                    path: path.clone(),
                    thumbnail,
                });
            }
        }
        if end < self.view.len() {
            self.prefetch_pending = true;
            commands.push(GridCommand::PrefetchScheduled);
        }
        debug!(start, end, total = self.view.len(), "realized batch");
        commands
    }

    /// Warms the cache for the next `window_size` items past everything
    /// already realized or prefetched.
    pub fn prefetch_next_batch<S: ThumbnailSource>(&mut self, source: &mut S) {
        let start = self.prefetched.max(self.realized);
        let end = (start + self.window_size).min(self.view.len());
        for path in &self.view[start..end] {
            source.warm(path);
        }
        self.prefetched = self.prefetched.max(end);
    }

    /// Runs the read-ahead scheduled by the last realized batch, if any.
    pub fn on_idle<S: ThumbnailSource>(&mut self, source: &mut S) {
        if std::mem::take(&mut self.prefetch_pending) {
            self.prefetch_next_batch(source);
        }
    }

    pub fn on_scroll_near_end<S: ThumbnailSource>(&mut self, source: &mut S) -> Vec<GridCommand> {
        if self.realized >= self.view.len() {
            return Vec::new();
        }
        self.realize_next_batch(source)
    }

    /// Recomputes the batch size for a new viewport. Nothing is refetched.
    pub fn on_resize(&mut self, width: f32, height: f32) -> Option<GridCommand> {
        let old_columns = self.grid.cols();
        self.grid = self.grid.resized(width, height);
        self.window_size = self.grid.window_size();
        let columns = self.grid.cols();
        (columns != old_columns).then_some(GridCommand::Relayout { columns })
    }

    /// Routes a finished thumbnail to its cell. Paths that are not
    /// realized in the current view are dropped.
    pub fn on_thumbnail_ready(&self, path: &Path, thumbnail: Thumbnail) -> Option<GridCommand> {
        let index = self.index_of_realized(path)?;
        Some(GridCommand::ShowThumbnail {
            index,
            path: path.to_path_buf(),
            thumbnail,
        })
    }

    /// Records an edited comment. View membership is left as is until the
    /// next [`set_predicate`](Self::set_predicate).
    pub fn on_comment_committed(&mut self, path: &Path, text: &str) -> Option<GridCommand> {
        self.comments.insert(path.to_path_buf(), text.to_string());
        let index = self.index_of_realized(path)?;
        Some(GridCommand::RefreshNote {
            index,
            path: path.to_path_buf(),
            note: self.note_for(path),
        })
    }

    pub fn list_visible_items<S: ThumbnailSource>(&self, source: &S) -> Vec<VisibleItem> {
        self.view[..self.realized]
            .iter()
            .map(|path| VisibleItem {
                path: path.clone(),
                thumbnail: source.cached(path),
                note: self.note_for(path),
            })
            .collect()
    }

    pub fn handle<S: ThumbnailSource>(&mut self, event: GridEvent, source: &mut S) -> Vec<GridCommand> {
        match event {
            GridEvent::PredicateChanged { text, show_notes } => {
                self.set_predicate(&text, show_notes, source)
            }
            GridEvent::ScrolledNearEnd => self.on_scroll_near_end(source),
            GridEvent::Resized { width, height } => {
                self.on_resize(width, height).into_iter().collect()
            }
            GridEvent::Idle => {
                self.on_idle(source);
                Vec::new()
            }
            GridEvent::ThumbnailReady(ready) => self
                .on_thumbnail_ready(&ready.path, ready.thumbnail)
                .into_iter()
                .collect(),
            GridEvent::CommentCommitted { path, text } => {
                self.on_comment_committed(&path, &text).into_iter().collect()
            }
        }
    }
}
