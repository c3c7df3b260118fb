/// Extra rows realized beyond the visible ones in each batch.
pub(crate) const SLACK_ROWS: usize = 2;

/// Cell geometry of the thumbnail grid for a given viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThumbnailGrid {
    width: f32,
    height: f32,
    cell: f32,
    gap: f32,
}

impl ThumbnailGrid {
    pub fn new(thumb_size: u32, gap: f32, width: f32, height: f32) -> Self {
        Self {
            width: width.max(0.0),
            height: height.max(0.0),
            cell: (thumb_size as f32 + gap).max(1.0),
            gap,
        }
    }

    /// Same cell geometry in a new viewport.
    pub fn resized(&self, width: f32, height: f32) -> Self {
        Self {
            width: width.max(0.0),
            height: height.max(0.0),
            ..*self
        }
    }

    /// Columns that fit the viewport width, never fewer than one.
    pub fn cols(&self) -> usize {
        let cols = ((self.width + self.gap) / self.cell).floor() as isize;
        cols.max(1) as usize
    }

    /// Rows at least partly visible, never fewer than one.
    pub fn visible_rows(&self) -> usize {
        let rows = (self.height / self.cell).ceil() as isize;
        rows.max(1) as usize
    }

    /// Items per realization batch: the visible rows plus slack.
    pub fn window_size(&self) -> usize {
        self.cols() * (self.visible_rows() + SLACK_ROWS)
    }
}
