use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use toml::Value as TomlValue;
use tracing::warn;

/// Edge length of generated thumbnails, in pixels.
pub const DEFAULT_THUMB_SIZE: u32 = 128;
/// Spacing between grid cells, in pixels.
pub const DEFAULT_GAP: f32 = 8.0;
/// Number of thumbnails kept decoded in memory.
pub const DEFAULT_MEMORY_CAPACITY: usize = 2048;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub thumb_size: u32,
    pub gap: f32,
    pub cache_dir: PathBuf,
    pub workers: usize,
    pub memory_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            thumb_size: DEFAULT_THUMB_SIZE,
            gap: DEFAULT_GAP,
            cache_dir: default_cache_dir(),
            workers: rayon::current_num_threads().max(2),
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
        }
    }
}

/// `$XDG_CACHE_HOME/photonote/thumbs` or the platform equivalent.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("photonote")
        .join("thumbs")
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("photonote").join("config.toml"))
}

fn positive_int(key: &str, value: &TomlValue) -> Result<usize> {
    match value {
        TomlValue::Integer(n) if *n > 0 => Ok(*n as usize),
        _ => bail!("`{key}` must be a positive integer"),
    }
}

impl Config {
    /// Loads `path`, or the default config file when `path` is `None`. A
    /// missing default file yields the defaults; a missing explicit file is
    /// an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match default_config_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };
        match fs::read_to_string(&path) {
            Ok(text) => {
                Self::from_toml(&text).with_context(|| format!("invalid config {}", path.display()))
            }
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("failed to read config {}", path.display())),
        }
    }

    pub fn from_toml(s: &str) -> Result<Self> {
        let mut config = Self::default();
        let TomlValue::Table(table) = toml::from_str::<TomlValue>(s)? else {
            bail!("config must be a table");
        };
        for (key, value) in table {
            match key.as_str() {
                "thumb_size" => {
                    let size = positive_int(&key, &value)?;
                    config.thumb_size = u32::try_from(size).context("`thumb_size` is too large")?;
                }
                "gap" => {
                    config.gap = match value {
                        TomlValue::Float(f) if f >= 0.0 => f as f32,
                        TomlValue::Integer(n) if n >= 0 => n as f32,
                        _ => bail!("`gap` must be a non-negative number"),
                    };
                }
                "cache_dir" => match value {
                    TomlValue::String(dir) => config.cache_dir = PathBuf::from(dir),
                    _ => bail!("`cache_dir` must be a string"),
                },
                "workers" => config.workers = positive_int(&key, &value)?.max(2),
                "memory_capacity" => config.memory_capacity = positive_int(&key, &value)?,
                _ => warn!("ignoring unknown config key `{key}`"),
            }
        }
        Ok(config)
    }
}
