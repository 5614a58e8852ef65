//! Average rating and review count of a restaurant.

use anyhow::Error;
use chrono::Utc;
use controller::{Controller, Id, RatingSummary, Unit};

/// Mean and count of a set of ratings, a restaurant without reviews has mean 0
pub fn summarize(ratings: &[i32]) -> RatingSummary {
    if ratings.is_empty() {
        return RatingSummary::default();
    }

    let mut mean = 0.0;
    for rating in ratings {
        mean += f64::from(*rating);
    }

    RatingSummary {
        average_rating: mean / ratings.len() as f64,
        review_count: ratings.len() as u64,
    }
}

/// Recompute the rating summary of `restaurant` from its current reviews and
/// store it, as part of the caller's unit of work.
///
/// Only call this after a write that added or removed a review or changed a
/// rating value.
pub fn recompute_average<C: Controller>(
    controller: &C,
    restaurant: &Id,
    unit: &mut Unit<'_, C::Session>,
) -> Result<RatingSummary, Error> {
    let ratings = controller.ratings_for(restaurant, unit)?;
    let summary = summarize(&ratings);

    controller.set_rating_summary(restaurant, &summary, Utc::now(), unit)?;
    log::debug!(
        "Restaurant({}) now averages {} over {} reviews",
        restaurant,
        summary.average_rating,
        summary.review_count
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn mean_of_ratings() {
        let summary = summarize(&[3, 4, 5]);
        assert_approx_eq!(summary.average_rating, 4.0);
        assert_eq!(summary.review_count, 3);

        let summary = summarize(&[4, 5]);
        assert_approx_eq!(summary.average_rating, 4.5);
        assert_eq!(summary.review_count, 2);
    }

    #[test]
    fn no_rounding() {
        let summary = summarize(&[1, 2, 2]);
        assert_approx_eq!(summary.average_rating, 5.0 / 3.0, 1e-12);
    }

    #[test]
    fn empty_ratings() {
        assert_eq!(summarize(&[]), RatingSummary::default());
    }
}
