use std::{fmt, str::FromStr};

use envconfig::Envconfig;
use lazy_static::lazy_static;

#[derive(Debug, Envconfig)]
pub struct Config {
    #[envconfig(from = "NRT_LOG_LEVEL", default = "info")]
    pub log_level: String,
    /// How persisted buffers are brought into memory when a dataset is opened.
    #[envconfig(from = "NRT_READ_MODE", default = "lazy")]
    pub read_mode: ReadMode,
    /// Hash every buffer on open and compare against the manifest.
    #[envconfig(from = "NRT_VERIFY_CHECKSUMS", default = "false")]
    pub verify_checksums: bool,
    #[envconfig(from = "NRT_BATCH_SIZE", default = "32")]
    pub batch_size: usize,
    #[envconfig(from = "NRT_NUM_WORKERS", default = "4")]
    pub num_workers: usize,
    #[envconfig(from = "NRT_QUEUE_CAPACITY", default = "8")]
    pub queue_capacity: usize,
}

impl Config {
    pub fn init() -> Config {
        Config::init_from_env().expect("Failed to load config")
    }
}

lazy_static! {
    pub static ref CONFIG: Config = Config::init();
}

/// Strategy used to load persisted buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReadMode {
    /// Decode every buffer into owned memory at open time.
    Eager,
    /// Memory-map every buffer; pages are faulted in on first touch.
    #[default]
    Lazy,
}

impl FromStr for ReadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eager" => Ok(ReadMode::Eager),
            "lazy" | "mmap" => Ok(ReadMode::Lazy),
            other => Err(format!(
                "unknown read mode '{other}', expected 'eager' or 'lazy'"
            )),
        }
    }
}

impl fmt::Display for ReadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadMode::Eager => f.write_str("eager"),
            ReadMode::Lazy => f.write_str("lazy"),
        }
    }
}
