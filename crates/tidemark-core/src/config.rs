use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: String,
    pub cors_origins: Vec<String>,
    pub duckdb_memory_limit: String,
    pub mode: AppMode,
    pub import: ImportLimits,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppMode {
    /// Every organization is unmetered.
    SelfHosted,
    /// Plans and overrides come from the `organizations` table.
    Cloud,
}

/// Resource bounds of the import pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportLimits {
    /// Non-terminal import jobs allowed per organization at once.
    pub max_concurrent_per_org: u32,
    pub chunk_size: usize,
    pub max_rows: u64,
    pub timeout_secs: u64,
    pub max_upload_bytes: usize,
    /// Directory holding uploaded files until their parse job finishes.
    pub storage_dir: String,
}

impl Default for ImportLimits {
    fn default() -> Self {
        Self {
            max_concurrent_per_org: 1,
            chunk_size: 5_000,
            max_rows: 10_000_000,
            timeout_secs: 30 * 60,
            max_upload_bytes: 100 * 1024 * 1024,
            storage_dir: "./data/imports".to_string(),
        }
    }
}

impl ImportLimits {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let data_dir =
            std::env::var("TIDEMARK_DATA_DIR").unwrap_or_else(|_| "./data".to_string());
        let defaults = ImportLimits::default();

        let max_concurrent_per_org = env_or(
            "TIDEMARK_IMPORT_MAX_CONCURRENT",
            defaults.max_concurrent_per_org,
        );
        if max_concurrent_per_org == 0 {
            return Err("TIDEMARK_IMPORT_MAX_CONCURRENT must be at least 1".to_string());
        }
        let chunk_size = env_or("TIDEMARK_IMPORT_CHUNK_SIZE", defaults.chunk_size);
        if chunk_size == 0 {
            return Err("TIDEMARK_IMPORT_CHUNK_SIZE must be at least 1".to_string());
        }

        Ok(Self {
            port: std::env::var("TIDEMARK_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|e| format!("invalid port: {e}"))?,
            cors_origins: std::env::var("TIDEMARK_CORS_ORIGINS")
                .map(|v| v.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
            duckdb_memory_limit: std::env::var("TIDEMARK_DUCKDB_MEMORY")
                .unwrap_or_else(|_| "1GB".to_string()),
            mode: {
                let raw =
                    std::env::var("TIDEMARK_MODE").unwrap_or_else(|_| "selfhosted".to_string());
                match raw.as_str() {
                    "cloud" => AppMode::Cloud,
                    _ => AppMode::SelfHosted,
                }
            },
            import: ImportLimits {
                max_concurrent_per_org,
                chunk_size,
                max_rows: env_or("TIDEMARK_IMPORT_MAX_ROWS", defaults.max_rows),
                timeout_secs: env_or("TIDEMARK_IMPORT_TIMEOUT_SECS", defaults.timeout_secs),
                max_upload_bytes: env_or(
                    "TIDEMARK_IMPORT_MAX_UPLOAD_BYTES",
                    defaults.max_upload_bytes,
                ),
                storage_dir: format!("{data_dir}/imports"),
            },
            data_dir,
        })
    }
}
