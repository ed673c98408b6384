use std::path::PathBuf;

/// Where and how verbosely the service logs.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub environment: String,
    pub level: String,
    pub directory: PathBuf,
}

impl LogConfig {
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// `EnvFilter` directives used when `RUST_LOG` is not set.
    pub fn default_directives(&self) -> String {
        format!(
            "case_backend={level},tower_http={level},axum=info,sqlx=warn",
            level = self.level
        )
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        let environment =
            std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| {
            if environment == "production" {
                "info".to_string()
            } else {
                "debug".to_string()
            }
        });
        let directory = std::env::var("LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("logs"));

        Self {
            environment,
            level,
            directory,
        }
    }
}
