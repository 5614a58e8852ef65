//! Ranking score of a restaurant.
//!
//! The score mixes three terms brought to the same `[0, max_rating]` scale:
//! the average rating, the share of likes among all reactions, and how
//! recently the restaurant got its last review.

use chrono::{DateTime, Utc};
use config::{Config, MAX_DECIMALS};
use controller::RankingInputs;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

// Like ratio used while a restaurant has no reactions at all
const NEUTRAL_LIKE_RATIO: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ranking {
    pub rating_weight: f64,
    pub likes_weight: f64,
    pub recency_weight: f64,
    pub half_life_days: f64,
    pub decimals: u32,
    pub max_rating: f64,
}

impl Default for Ranking {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl Ranking {
    pub fn from_config(config: &Config) -> Self {
        let ranking = &config.ranking;

        Self {
            rating_weight: ranking.rating_weight,
            likes_weight: ranking.likes_weight,
            recency_weight: ranking.recency_weight,
            half_life_days: ranking.recency_half_life_days,
            decimals: ranking.decimals,
            max_rating: f64::from(config.rating.max),
        }
    }

    pub fn like_ratio(likes: u64, dislikes: u64) -> f64 {
        let total = likes + dislikes;
        if total == 0 {
            NEUTRAL_LIKE_RATIO
        } else {
            likes as f64 / total as f64
        }
    }

    /// 1 for a review written just now, halves every `half_life_days`, and 0
    /// when there is no review at all
    pub fn recency(&self, last_review_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
        let last_review_at = match last_review_at {
            Some(at) => at,
            None => return 0.0,
        };

        let age_days = (now - last_review_at).num_milliseconds() as f64 / MILLIS_PER_DAY;
        if age_days <= 0.0 {
            return 1.0;
        }

        0.5_f64.powf(age_days / self.half_life_days)
    }

    pub fn score(&self, inputs: &RankingInputs, now: DateTime<Utc>) -> f64 {
        let like_ratio = Self::like_ratio(inputs.total_likes, inputs.total_dislikes);
        let recency = self.recency(inputs.last_review_at, now);

        let score = inputs.average_rating * self.rating_weight
            + like_ratio * self.max_rating * self.likes_weight
            + recency * self.max_rating * self.recency_weight;

        round_to(score, self.decimals)
    }
}

// Configs built in code skip validation, so the exponent is capped here too
fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10_f64.powi(decimals.min(MAX_DECIMALS) as i32);
    (value * factor).round() / factor
}
