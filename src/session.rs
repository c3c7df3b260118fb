use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::config::Config;
use crate::controller::{GridCommand, GridController, GridEvent, VisibleItem};
use crate::grid::ThumbnailGrid;
use crate::metadata::{self, MetadataError};
use crate::pipeline::ThumbnailPipeline;
use crate::scan::scan_images;

/// Initial viewport used until the renderer reports its real size.
const DEFAULT_VIEWPORT: (f32, f32) = (1280.0, 800.0);

/// A browsing session over one folder: the controller plus the thumbnail
/// pipeline feeding it. Everything here runs on the coordinating thread.
pub struct Session {
    pipeline: ThumbnailPipeline,
    controller: GridController,
}

impl Session {
    pub fn open(config: &Config, folder: &Path) -> Result<Self> {
        let images = scan_images(folder)?;
        Self::with_images(config, images)
    }

    /// Starts with every image visible and the first batch realized.
    pub fn with_images(config: &Config, images: Vec<PathBuf>) -> Result<Self> {
        let (width, height) = DEFAULT_VIEWPORT;
        let grid = ThumbnailGrid::new(config.thumb_size, config.gap, width, height);
        let mut session = Self {
            pipeline: ThumbnailPipeline::new(config)?,
            controller: GridController::new(images, grid),
        };
        session.handle(GridEvent::PredicateChanged {
            text: String::new(),
            show_notes: false,
        });
        Ok(session)
    }

    pub fn controller(&self) -> &GridController {
        &self.controller
    }

    pub fn pipeline(&self) -> &ThumbnailPipeline {
        &self.pipeline
    }

    pub fn handle(&mut self, event: GridEvent) -> Vec<GridCommand> {
        self.controller.handle(event, &mut self.pipeline)
    }

    /// Routes every thumbnail finished since the last call to its cell.
    pub fn pump(&mut self) -> Vec<GridCommand> {
        self.pipeline
            .poll()
            .into_iter()
            .flat_map(|ready| self.handle(GridEvent::ThumbnailReady(ready)))
            .collect()
    }

    /// Writes the comment to the file, then updates the grid. The pixels
    /// are unchanged, so the cell keeps its thumbnail.
    pub fn commit_comment(
        &mut self,
        path: &Path,
        text: &str,
    ) -> Result<Vec<GridCommand>, MetadataError> {
        self.pipeline
            .preserve_across_edit(path, || metadata::write_comment(path, text))?;
        Ok(self.handle(GridEvent::CommentCommitted {
            path: path.to_path_buf(),
            text: text.to_string(),
        }))
    }

    /// Pumps results until no decode is in flight or `timeout` expires.
    /// Returns the commands produced along the way.
    pub fn wait_idle(&mut self, timeout: Duration) -> Vec<GridCommand> {
        let deadline = Instant::now() + timeout;
        let mut commands = Vec::new();
        while self.pipeline.in_flight() > 0 {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let ready = self.pipeline.poll_timeout(deadline - now);
            for ready in ready {
                commands.extend(self.handle(GridEvent::ThumbnailReady(ready)));
            }
        }
        commands
    }

    pub fn visible_items(&self) -> Vec<VisibleItem> {
        self.controller.list_visible_items(&self.pipeline)
    }
}
