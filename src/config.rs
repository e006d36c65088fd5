use std::path::PathBuf;

const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024; // 10 MiB, §6
const DEFAULT_UPLOAD_FOLDER: &str = "uploads";
const DEFAULT_DATABASE_URL: &str = "sqlite://data.db?mode=rwc";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Process-wide, immutable-after-startup configuration (§9: "pass it as a
/// dependency into C6 rather than reading ambient globals in callees").
#[derive(Clone, Debug)]
pub struct Config {
    pub max_file_size: u64,
    pub upload_folder: PathBuf,
    pub allowed_origins: Vec<String>,
    pub database_url: String,
    pub bind_addr: String,
}

impl Config {
    /// Load configuration from the environment. In debug builds, first tries
    /// to load a `.env` file so local development doesn't need exported
    /// shell variables.
    pub fn load() -> Self {
        #[cfg(debug_assertions)]
        {
            if dotenvy::dotenv().is_ok() {
                tracing::info!("loaded .env file");
            }
        }

        let max_file_size = std::env::var("MAX_FILE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_FILE_SIZE);

        let upload_folder = std::env::var("UPLOAD_FOLDER")
            .unwrap_or_else(|_| DEFAULT_UPLOAD_FOLDER.to_string())
            .into();

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .ok()
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

        let bind_addr =
            std::env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());

        Self {
            max_file_size,
            upload_folder,
            allowed_origins,
            database_url,
            bind_addr,
        }
    }
}
