//! Configuration module
//!
//! Env-driven configuration for the ingest core. All operational parameters
//! (rate limits, retry budget, worker concurrency, probe timeout) live here
//! with the documented defaults; nothing operational is hard-coded at call
//! sites.

use std::env;

use crate::constants;

#[derive(Clone, Debug)]
pub struct Config {
    pub server_port: u16,
    pub environment: String,

    // Collaborator endpoints
    pub database_url: String,
    /// Chunk-index endpoint. `None` disables the accelerator entirely; the
    /// session manager then always takes the serialized database path.
    pub redis_url: Option<String>,

    // Blob store
    pub storage_path: String,

    // Upload limits
    pub max_file_size_bytes: u64,
    pub max_chunk_part_bytes: u64,
    pub session_ttl_hours: i64,

    // Chunk intake throttling
    pub chunk_rate_limit_per_minute: u32,
    pub rate_limit_window_secs: u64,

    // Work bus / workers
    pub max_job_retries: u32,
    pub chunk_prefetch: usize,
    pub assembly_prefetch: usize,
    pub process_prefetch: usize,
    pub bus_poll_interval_ms: u64,

    // Post-processing
    pub ffprobe_path: String,
    pub ffmpeg_path: String,
    pub probe_timeout_secs: u64,

    // Expired-session sweeper
    pub gc_interval_secs: u64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        Ok(Config {
            server_port: env_or("SERVER_PORT", 3000),
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            database_url,
            redis_url: env::var("REDIS_URL").ok(),
            storage_path: env::var("STORAGE_PATH").unwrap_or_else(|_| "./data".to_string()),
            max_file_size_bytes: env_or("MAX_FILE_SIZE_BYTES", constants::MAX_FILE_SIZE_BYTES),
            max_chunk_part_bytes: env_or("MAX_CHUNK_PART_BYTES", constants::MAX_CHUNK_PART_BYTES),
            session_ttl_hours: env_or("SESSION_TTL_HOURS", constants::SESSION_TTL_HOURS),
            chunk_rate_limit_per_minute: env_or("CHUNK_RATE_LIMIT_PER_MINUTE", 200),
            rate_limit_window_secs: env_or("RATE_LIMIT_WINDOW_SECS", 60),
            max_job_retries: env_or("MAX_JOB_RETRIES", constants::MAX_JOB_RETRIES),
            chunk_prefetch: env_or("CHUNK_PREFETCH", 5),
            assembly_prefetch: env_or("ASSEMBLY_PREFETCH", 1),
            process_prefetch: env_or("PROCESS_PREFETCH", 2),
            bus_poll_interval_ms: env_or("BUS_POLL_INTERVAL_MS", 500),
            ffprobe_path: env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string()),
            ffmpeg_path: env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            probe_timeout_secs: env_or("PROBE_TIMEOUT_SECS", 60),
            gc_interval_secs: env_or("GC_INTERVAL_SECS", 3600),
        })
    }

    pub fn is_production(&self) -> bool {
        matches!(self.environment.to_lowercase().as_str(), "production" | "prod")
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.max_file_size_bytes == 0 {
            anyhow::bail!("MAX_FILE_SIZE_BYTES must be greater than zero");
        }
        if self.max_file_size_bytes > constants::MAX_FILE_SIZE_BYTES {
            anyhow::bail!(
                "MAX_FILE_SIZE_BYTES must not exceed {} bytes",
                constants::MAX_FILE_SIZE_BYTES
            );
        }
        if self.max_chunk_part_bytes == 0 {
            anyhow::bail!("MAX_CHUNK_PART_BYTES must be greater than zero");
        }
        if self.session_ttl_hours <= 0 {
            anyhow::bail!("SESSION_TTL_HOURS must be positive");
        }
        if self.chunk_prefetch == 0 || self.assembly_prefetch == 0 || self.process_prefetch == 0 {
            anyhow::bail!("worker prefetch values must be at least 1");
        }
        Ok(())
    }

    /// Config with stock defaults and throwaway endpoints, for tests.
    pub fn for_tests() -> Self {
        Config {
            server_port: 0,
            environment: "test".to_string(),
            database_url: "postgres://localhost/clipflow_test".to_string(),
            redis_url: None,
            storage_path: "./data".to_string(),
            max_file_size_bytes: constants::MAX_FILE_SIZE_BYTES,
            max_chunk_part_bytes: constants::MAX_CHUNK_PART_BYTES,
            session_ttl_hours: constants::SESSION_TTL_HOURS,
            chunk_rate_limit_per_minute: 200,
            rate_limit_window_secs: 60,
            max_job_retries: constants::MAX_JOB_RETRIES,
            chunk_prefetch: 5,
            assembly_prefetch: 1,
            process_prefetch: 2,
            bus_poll_interval_ms: 20,
            ffprobe_path: "ffprobe".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            probe_timeout_secs: 60,
            gc_interval_secs: 3600,
        }
    }
}
