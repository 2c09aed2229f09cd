use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Development,
    Test,
}

impl Environment {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "test" => Self::Test,
            _ => Self::Development,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Development => "development",
            Self::Test => "test",
        }
    }

    /// End-to-end budget for one learning event.
    pub fn event_timeout(&self) -> Duration {
        match self {
            Self::Production => Duration::from_millis(500),
            _ => Duration::from_millis(5000),
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        match self {
            Self::Production => Duration::from_millis(300),
            _ => Duration::from_millis(3000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub log_level: String,
    pub policy_path: Option<PathBuf>,
}

impl Config {
    /// Reads `.env` (if present) before the process environment.
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_env()
    }

    pub fn from_env() -> Self {
        let environment = std::env::var("AMAS_ENV")
            .map(|value| Environment::parse(&value))
            .unwrap_or(Environment::Development);

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let policy_path = std::env::var("AMAS_POLICY_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        Self {
            environment,
            log_level,
            policy_path,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            log_level: "info".to_string(),
            policy_path: None,
        }
    }
}
