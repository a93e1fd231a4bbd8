//! Ledger configuration.

use std::time::Duration;

use interstellar_common::DEFAULT_AMOUNT_SCALE;

/// Main ledger configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Read-modify-write retries after a version conflict before giving up.
    pub max_update_retries: u32,
    /// Fractional digits kept for converted amounts.
    pub amount_scale: u32,
    /// Attempts at a compensating write before the intent is flagged for review.
    pub compensation_attempts: u32,
    /// Pause between compensation attempts (multiplied by the attempt number).
    pub compensation_backoff: Duration,
    /// Page size used when a query asks for 0 rows.
    pub default_page_size: usize,
    /// Largest page a query may ask for.
    pub max_page_size: usize,
    /// PostgreSQL connection string; in-memory stores are used when unset.
    pub database_url: Option<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_update_retries: 3,
            amount_scale: DEFAULT_AMOUNT_SCALE,
            compensation_attempts: 5,
            compensation_backoff: Duration::from_millis(10),
            default_page_size: 20,
            max_page_size: 100,
            database_url: None,
        }
    }
}

impl LedgerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(retries) = std::env::var("LEDGER_MAX_RETRIES") {
            if let Ok(retries) = retries.parse() {
                config.max_update_retries = retries;
            }
        }

        if let Ok(scale) = std::env::var("LEDGER_AMOUNT_SCALE") {
            if let Ok(scale) = scale.parse() {
                config.amount_scale = scale;
            }
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.is_empty() {
                config.database_url = Some(url);
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.amount_scale > 18 {
            return Err("Amount scale cannot exceed 18 decimal places".to_string());
        }

        if self.compensation_attempts == 0 {
            return Err("At least one compensation attempt is required".to_string());
        }

        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err("Default page size must be between 1 and the max page size".to_string());
        }

        Ok(())
    }

    /// Clamp a requested page size.
    pub fn page_size(&self, requested: usize) -> usize {
        match requested {
            0 => self.default_page_size,
            n => n.min(self.max_page_size),
        }
    }
}
