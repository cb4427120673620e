// src/pool/config.rs
//
// Pool configuration: defaults, builder-style setters, validation and
// environment overrides.

use crate::error::{CompressError, Result};
use crate::format::{RecompressSettings, MAX_PNG_PRESET};
use crate::pool::reconcile::StorageLayout;
use crate::pool::sizing::{default_pool_size, MAX_POOL_SIZE};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_POOL_SIZE: &str = "GALLERY_POOL_SIZE";
pub const ENV_JOB_TIMEOUT_MS: &str = "GALLERY_JOB_TIMEOUT_MS";
pub const ENV_MAX_QUEUE_DEPTH: &str = "GALLERY_MAX_QUEUE_DEPTH";
pub const ENV_JPEG_QUALITY: &str = "GALLERY_JPEG_QUALITY";
pub const ENV_WEBP_QUALITY: &str = "GALLERY_WEBP_QUALITY";
pub const ENV_PNG_PRESET: &str = "GALLERY_PNG_PRESET";
pub const ENV_KEEP_METADATA: &str = "GALLERY_KEEP_METADATA";
pub const ENV_STORAGE_ROOT: &str = "GALLERY_STORAGE_ROOT";
pub const ENV_URL_PREFIX: &str = "GALLERY_URL_PREFIX";

/// Everything a [`crate::pool::CompressionPool`] needs to start.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Number of worker slots, fixed for the pool's lifetime.
    pub pool_size: usize,
    /// Per-job deadline measured from dispatch. `None` disables it.
    pub job_timeout: Option<Duration>,
    /// Maximum number of jobs waiting for a worker. 0 means unbounded.
    pub max_queue_depth: usize,
    /// Codec settings for the default compression unit.
    pub settings: RecompressSettings,
    /// Maps absolute file paths to the keys used by the metadata store.
    pub storage: StorageLayout,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            job_timeout: None,
            max_queue_depth: 0,
            settings: RecompressSettings::default(),
            storage: StorageLayout::default(),
        }
    }
}

impl PoolConfig {
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    pub fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = depth;
        self
    }

    pub fn with_settings(mut self, settings: RecompressSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_storage(mut self, storage: StorageLayout) -> Self {
        self.storage = storage;
        self
    }

    /// Defaults overridden by `GALLERY_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable name.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(size) = parse_var::<usize, _>(&lookup, ENV_POOL_SIZE)? {
            config.pool_size = size;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_JOB_TIMEOUT_MS)? {
            // 0 disables the deadline
            config.job_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(depth) = parse_var::<usize, _>(&lookup, ENV_MAX_QUEUE_DEPTH)? {
            config.max_queue_depth = depth;
        }
        if let Some(q) = parse_var::<u8, _>(&lookup, ENV_JPEG_QUALITY)? {
            config.settings.jpeg_quality = q;
        }
        if let Some(q) = parse_var::<u8, _>(&lookup, ENV_WEBP_QUALITY)? {
            config.settings.webp_quality = q;
        }
        if let Some(preset) = parse_var::<u8, _>(&lookup, ENV_PNG_PRESET)? {
            config.settings.png_preset = preset;
        }
        if let Some(raw) = lookup(ENV_KEEP_METADATA) {
            config.settings.keep_metadata = parse_flag(ENV_KEEP_METADATA, &raw)?;
        }

        let root = lookup(ENV_STORAGE_ROOT).map(PathBuf::from);
        let prefix = lookup(ENV_URL_PREFIX);
        if root.is_some() || prefix.is_some() {
            let defaults = StorageLayout::default();
            config.storage = StorageLayout::new(
                root.unwrap_or_else(|| defaults.root().to_path_buf()),
                prefix.unwrap_or_else(|| defaults.url_prefix().to_string()),
            );
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the pool cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(CompressError::invalid_config(
                "pool_size",
                "0",
                "a pool needs at least one worker",
            ));
        }
        if self.pool_size > MAX_POOL_SIZE {
            return Err(CompressError::invalid_config(
                "pool_size",
                self.pool_size.to_string(),
                format!("at most {MAX_POOL_SIZE} workers; each one is an OS thread"),
            ));
        }
        if self.job_timeout == Some(Duration::ZERO) {
            return Err(CompressError::invalid_config(
                "job_timeout",
                "0ms",
                "use None to disable the deadline",
            ));
        }
        check_quality("jpeg_quality", self.settings.jpeg_quality)?;
        check_quality("webp_quality", self.settings.webp_quality)?;
        if self.settings.png_preset > MAX_PNG_PRESET {
            return Err(CompressError::invalid_config(
                "png_preset",
                self.settings.png_preset.to_string(),
                format!("oxipng presets range from 0 to {MAX_PNG_PRESET}"),
            ));
        }
        Ok(())
    }
}

fn check_quality(name: &'static str, quality: u8) -> Result<()> {
    if !(1..=100).contains(&quality) {
        return Err(CompressError::invalid_config(
            name,
            quality.to_string(),
            "quality must be between 1 and 100",
        ));
    }
    Ok(())
}

fn parse_var<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|e| CompressError::invalid_config(name, raw.clone(), e.to_string()))
}

fn parse_flag(name: &'static str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(CompressError::invalid_config(
            name,
            raw.to_string(),
            "expected true/false",
        )),
    }
}
