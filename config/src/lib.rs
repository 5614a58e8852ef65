use anyhow::Error;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error as DError;

/// Most decimals a ranking score can be rounded to
pub const MAX_DECIMALS: u32 = 12;

#[derive(Debug, Clone, DError, PartialEq)]
pub enum ConfigError {
    #[error("Invalid rating range [{0}, {1}]")]
    InvalidRatingRange(i32, i32),

    #[error("Ranking weights must be non-negative and add up to 1 (got {0})")]
    InvalidWeights(f64),

    #[error("Recency half-life must be positive (got {0})")]
    InvalidHalfLife(f64),

    #[error("Ranking scores can keep at most {1} decimals (got {0})")]
    TooManyDecimals(u32, u32),

    #[error("At least one transaction attempt is required")]
    NoTransactionAttempts,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    pub mongo_url: String,
    pub mongo_db: String,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct RatingConfig {
    pub min: i32,
    pub max: i32,
}

impl RatingConfig {
    pub fn contains(&self, rating: i32) -> bool {
        (self.min..=self.max).contains(&rating)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct RankingConfig {
    pub rating_weight: f64,
    pub likes_weight: f64,
    pub recency_weight: f64,
    pub recency_half_life_days: f64,
    pub decimals: u32,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct TransactionsConfig {
    pub max_attempts: usize,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Config {
    pub database: DatabaseConfig,
    pub rating: RatingConfig,
    pub ranking: RankingConfig,
    pub transactions: TransactionsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                mongo_url: "mongodb://localhost:27017".into(),
                mongo_db: "reviews".into(),
            },
            rating: RatingConfig { min: 1, max: 5 },
            ranking: RankingConfig {
                rating_weight: 0.5,
                likes_weight: 0.3,
                recency_weight: 0.2,
                recency_half_life_days: 30.0,
                decimals: 2,
            },
            transactions: TransactionsConfig { max_attempts: 3 },
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)?;
        let parsed: Self = toml::from_str(&contents)?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rating.min > self.rating.max || self.rating.max <= 0 {
            return Err(ConfigError::InvalidRatingRange(
                self.rating.min,
                self.rating.max,
            ));
        }

        let ranking = &self.ranking;
        let weights = [
            ranking.rating_weight,
            ranking.likes_weight,
            ranking.recency_weight,
        ];

        let total: f64 = weights.iter().sum();
        if weights.iter().any(|w| *w < 0.0) || (total - 1.0).abs() > 1e-9 {
            return Err(ConfigError::InvalidWeights(total));
        }

        if ranking.recency_half_life_days <= 0.0 {
            return Err(ConfigError::InvalidHalfLife(ranking.recency_half_life_days));
        }

        if ranking.decimals > MAX_DECIMALS {
            return Err(ConfigError::TooManyDecimals(ranking.decimals, MAX_DECIMALS));
        }

        if self.transactions.max_attempts == 0 {
            return Err(ConfigError::NoTransactionAttempts);
        }

        Ok(())
    }
}
