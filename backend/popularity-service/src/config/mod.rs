use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{PopularityError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub job: JobConfig,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub http_port: u16,
    pub service_name: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    /// TTL of cached run outcomes and job stats
    pub cache_ttl_secs: u64,
}

/// Tuning for the recompute jobs
#[derive(Debug, Clone, PartialEq)]
pub struct JobConfig {
    /// Entities written concurrently per persistence batch
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    /// Rows fetched per signal page
    pub page_size: usize,
    pub top_k: usize,
    /// Days kept in a review's rank trail
    pub history_capacity: usize,
    pub min_catalog_ratings: i64,
    pub min_review_ratings: i64,
    /// Window for a review's recent views
    pub recent_window_days: i32,
    pub write_retries: u32,
    pub write_timeout_ms: u64,
    pub schedule_enabled: bool,
    pub interval_secs: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_delay_ms: 100,
            page_size: 1000,
            top_k: 10,
            history_capacity: 30,
            min_catalog_ratings: 0,
            min_review_ratings: 0,
            recent_window_days: 7,
            write_retries: 2,
            write_timeout_ms: 5000,
            schedule_enabled: true,
            interval_secs: 86_400, // daily
        }
    }
}

impl JobConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            batch_size: parse_env("POPULARITY_BATCH_SIZE", defaults.batch_size)?,
            batch_delay_ms: parse_env("POPULARITY_BATCH_DELAY_MS", defaults.batch_delay_ms)?,
            page_size: parse_env("POPULARITY_PAGE_SIZE", defaults.page_size)?,
            top_k: parse_env("POPULARITY_TOP_K", defaults.top_k)?,
            history_capacity: parse_env(
                "POPULARITY_HISTORY_CAPACITY",
                defaults.history_capacity,
            )?,
            min_catalog_ratings: parse_env(
                "POPULARITY_MIN_CATALOG_RATINGS",
                defaults.min_catalog_ratings,
            )?,
            min_review_ratings: parse_env(
                "POPULARITY_MIN_REVIEW_RATINGS",
                defaults.min_review_ratings,
            )?,
            recent_window_days: parse_env(
                "POPULARITY_RECENT_WINDOW_DAYS",
                defaults.recent_window_days,
            )?,
            write_retries: parse_env("POPULARITY_WRITE_RETRIES", defaults.write_retries)?,
            write_timeout_ms: parse_env("POPULARITY_WRITE_TIMEOUT_MS", defaults.write_timeout_ms)?,
            schedule_enabled: parse_env(
                "POPULARITY_SCHEDULE_ENABLED",
                defaults.schedule_enabled,
            )?,
            interval_secs: parse_env("POPULARITY_INTERVAL_SECS", defaults.interval_secs)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("POPULARITY_BATCH_SIZE", self.batch_size as u64),
            ("POPULARITY_PAGE_SIZE", self.page_size as u64),
            ("POPULARITY_HISTORY_CAPACITY", self.history_capacity as u64),
            ("POPULARITY_RECENT_WINDOW_DAYS", self.recent_window_days.max(0) as u64),
            ("POPULARITY_WRITE_TIMEOUT_MS", self.write_timeout_ms),
            ("POPULARITY_INTERVAL_SECS", self.interval_secs),
        ];

        for (name, value) in positive {
            if value == 0 {
                return Err(PopularityError::Config(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        if self.min_catalog_ratings < 0 || self.min_review_ratings < 0 {
            return Err(PopularityError::Config(
                "minimum rating thresholds cannot be negative".to_string(),
            ));
        }

        Ok(())
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Config {
            service: ServiceConfig {
                http_port: parse_env("HTTP_PORT", 8095)?,
                service_name: env::var("SERVICE_NAME")
                    .unwrap_or_else(|_| "popularity-service".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .map_err(|_| PopularityError::Config("DATABASE_URL must be set".to_string()))?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
                cache_ttl_secs: parse_env("POPULARITY_CACHE_TTL_SECS", 3600)?,
            },
            job: JobConfig::from_env()?,
        })
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
{
    match env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| {
        PopularityError::Config(format!("{} has an invalid value '{}'", name, raw))
    })
}
