use std::time::Duration;

/// Process-wide configuration, loaded once from the environment at
/// startup and passed down by reference. Nothing outside this module
/// reads `std::env` directly.
#[derive(Debug, Clone)]
pub struct Config {
    pub upload_concurrency: usize,
    pub upload_chunk_size: usize,
    pub upload_read_timeout: Duration,
    pub upload_write_timeout: Duration,
    pub upload_max_size_bytes: u64,
    pub upload_ttl_seconds: u64,

    pub rate_limit_upload_per_minute: u32,
    pub rate_limit_summary_per_minute: u32,

    pub job_worker_count: usize,
    pub transcode_concurrency: usize,
    pub transcribe_concurrency: usize,
    pub pipeline_stage_wait: Duration,

    pub cache_max_bytes: u64,
    pub cache_ttl_days: i64,
    pub failed_ttl_hours: i64,
    pub gc_interval: Duration,

    pub subtitle_max_size_mb: u64,
    pub video_max_size_mb: u64,

    pub llm_model: String,
    pub llm_max_input_chars: usize,

    pub profile_version: String,

    pub cache_root: std::path::PathBuf,
    pub tmp_root: std::path::PathBuf,
    pub upload_root: std::path::PathBuf,
    pub db_path: std::path::PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let work_root = std::path::PathBuf::from(
            std::env::var("WORK_PATH").unwrap_or_else(|_| "./work".to_string()),
        );
        Self {
            upload_concurrency: env_usize("UPLOAD_CONCURRENCY", 2),
            upload_chunk_size: env_usize("UPLOAD_CHUNK_SIZE", 8 * 1024 * 1024),
            upload_read_timeout: Duration::from_secs(env_u64("UPLOAD_READ_TIMEOUT_SECONDS", 30)),
            upload_write_timeout: Duration::from_secs(env_u64(
                "UPLOAD_WRITE_TIMEOUT_SECONDS",
                30,
            )),
            upload_max_size_bytes: env_u64("UPLOAD_MAX_SIZE_MB", 2048) * 1024 * 1024,
            upload_ttl_seconds: env_u64("UPLOAD_TTL_SECONDS", 3600 * 24),

            rate_limit_upload_per_minute: env_u32("RATE_LIMIT_UPLOAD_PER_MINUTE", 10),
            rate_limit_summary_per_minute: env_u32("RATE_LIMIT_SUMMARY_PER_MINUTE", 30),

            job_worker_count: env_usize("JOB_WORKER_COUNT", 1),
            transcode_concurrency: env_usize("TRANSCODE_CONCURRENCY", 2),
            transcribe_concurrency: env_usize("TRANSCRIBE_CONCURRENCY", 2),
            pipeline_stage_wait: Duration::from_secs(env_u64("PIPELINE_STAGE_WAIT_SECONDS", 300)),

            cache_max_bytes: env_u64("CACHE_MAX_BYTES", 50 * 1024 * 1024 * 1024),
            cache_ttl_days: env_u64("CACHE_TTL_DAYS", 30) as i64,
            failed_ttl_hours: env_u64("FAILED_TTL_HOURS", 24) as i64,
            gc_interval: Duration::from_secs(env_u64("GC_INTERVAL_SECONDS", 3600)),

            subtitle_max_size_mb: env_u64("SUBTITLE_MAX_SIZE_MB", 50),
            video_max_size_mb: env_u64("VIDEO_MAX_SIZE_MB", 4096),

            llm_model: std::env::var("LLM_MODEL").unwrap_or_else(|_| "default-model".to_string()),
            llm_max_input_chars: env_usize("LLM_MAX_INPUT_CHARS", 32_000),

            profile_version: std::env::var("PROFILE_VERSION").unwrap_or_else(|_| "v1".to_string()),

            cache_root: work_root.join("cache"),
            tmp_root: work_root.join("tmp"),
            upload_root: work_root.join("uploads"),
            db_path: work_root.join("state.db"),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        std::env::remove_var("CACHE_MAX_BYTES");
        std::env::remove_var("JOB_WORKER_COUNT");
        let c = Config::from_env();
        assert_eq!(c.job_worker_count, 1);
        assert_eq!(c.cache_max_bytes, 50 * 1024 * 1024 * 1024);
        assert_eq!(c.upload_chunk_size, 8 * 1024 * 1024);
    }
}
