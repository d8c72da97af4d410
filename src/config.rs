use std::env;
use std::time::Duration;

use crate::error::AppError;

const DEFAULT_MAX_IDLE_CONN: u32 = 10;
const DEFAULT_MAX_OPEN_CONN: u32 = 10;
const DEFAULT_CONN_MAX_LIFETIME_MINUTES: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub store_backend: StoreBackend,
    pub assign_timeout: Duration,
    pub database: DatabaseConfig,
}

/// Postgres connection and pool settings. Zero pool values mean "use the default".
#[derive(Debug, Clone, Default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub max_idle_conn: u32,
    pub max_open_conn: u32,
    pub conn_max_lifetime_minutes: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("APP_PORT", 8080)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            store_backend: parse_or_default("STORE_BACKEND", StoreBackend::Postgres)?,
            assign_timeout: Duration::from_millis(parse_or_default("ASSIGN_TIMEOUT_MS", 5000)?),
            database: DatabaseConfig {
                host: env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
                port: parse_or_default("DB_PORT", 5432)?,
                user: env::var("DB_USER").unwrap_or_else(|_| "postgres".to_string()),
                password: env::var("DB_PASSWORD").unwrap_or_default(),
                name: env::var("DB_NAME").unwrap_or_else(|_| "parcelsrv".to_string()),
                max_idle_conn: parse_or_default("DB_MAX_IDLE_CONN", 0)?,
                max_open_conn: parse_or_default("DB_MAX_OPEN_CONN", 0)?,
                conn_max_lifetime_minutes: parse_or_default("DB_CONN_MAX_LIFETIME_MINUTES", 0)?,
            },
        })
    }
}

impl DatabaseConfig {
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.name
        )
    }

    pub fn max_idle_conn(&self) -> u32 {
        if self.max_idle_conn == 0 {
            return DEFAULT_MAX_IDLE_CONN;
        }
        self.max_idle_conn
    }

    pub fn max_open_conn(&self) -> u32 {
        if self.max_open_conn == 0 {
            return DEFAULT_MAX_OPEN_CONN;
        }
        self.max_open_conn
    }

    pub fn conn_max_lifetime(&self) -> Duration {
        let minutes = if self.conn_max_lifetime_minutes == 0 {
            DEFAULT_CONN_MAX_LIFETIME_MINUTES
        } else {
            self.conn_max_lifetime_minutes
        };
        Duration::from_secs(minutes * 60)
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
