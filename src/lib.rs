//! Browse a folder of photos by the comment stored in each image's
//! metadata, with an incrementally filled two-tier thumbnail cache.

pub mod cache_key;
pub mod config;
pub mod controller;
pub mod grid;
pub mod metadata;
pub mod pipeline;
pub mod queue;
pub mod scan;
pub mod session;

#[cfg(test)]
mod fixtures;

pub use config::Config;
pub use controller::{GridCommand, GridController, GridEvent, ThumbnailSource, VisibleItem};
pub use metadata::{read_comment, write_comment, ImageFamily, MetadataError};
pub use pipeline::{Lookup, Thumbnail, ThumbnailPipeline, ThumbnailReady};
pub use session::Session;
