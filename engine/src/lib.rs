// Copyright (c) 2020 White Leaf
//
// This software is released under the MIT License.
// https://opensource.org/licenses/MIT

pub mod aggregate;
pub mod coordinator;
pub mod error;
pub mod ranking;
pub mod reactions;

pub use crate::coordinator::Coordinator;
pub use crate::ranking::Ranking;
pub use crate::reactions::ReactionKind;

use crate::error::ErrorKind;
use anyhow::Error;
use chrono::Utc;
use config::{Config, RatingConfig};
use controller::{Controller, Id, NewReview, RatingSummary, Review, ReviewChanges, Unit};

/// Review and reaction operations keeping restaurant aggregates up to date.
///
/// Each operation writes inside one unit of work, recomputing the average
/// rating in the same unit when a rating appeared, changed or disappeared.
/// The ranking score is refreshed afterwards, outside the unit, and a failed
/// refresh never fails the operation.
pub struct Engine<'a, C: Controller> {
    controller: &'a C,
    coordinator: Coordinator,
    ranking: Ranking,
    rating: RatingConfig,
}

impl<'a, C: Controller> Engine<'a, C> {
    pub fn with_controller(controller: &'a C) -> Self {
        Self::from_config(controller, &Config::default())
    }

    pub fn from_config(controller: &'a C, config: &Config) -> Self {
        Self {
            controller,
            coordinator: Coordinator::from_config(config),
            ranking: Ranking::from_config(config),
            rating: config.rating,
        }
    }

    pub fn controller(&self) -> &'a C {
        self.controller
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn ranking(&self) -> &Ranking {
        &self.ranking
    }

    fn check_rating(&self, rating: i32) -> Result<(), ErrorKind> {
        if self.rating.contains(rating) {
            Ok(())
        } else {
            Err(ErrorKind::RatingOutOfRange(
                rating,
                self.rating.min,
                self.rating.max,
            ))
        }
    }

    fn existing_review(&self, id: &Id, unit: &mut Unit<'_, C::Session>) -> Result<Review, Error> {
        self.controller
            .review(id, unit)?
            .ok_or_else(|| ErrorKind::NotFound("review", id.to_string()).into())
    }

    fn authored_review(
        &self,
        id: &Id,
        actor: &Id,
        unit: &mut Unit<'_, C::Session>,
    ) -> Result<Review, Error> {
        let review = self.existing_review(id, unit)?;
        if &review.author != actor {
            return Err(ErrorKind::NotAuthor(id.to_string()).into());
        }

        Ok(review)
    }

    pub fn create_review(
        &self,
        author: &str,
        restaurant: &str,
        rating: i32,
        comment: Option<String>,
    ) -> Result<Review, Error> {
        let author = Id::parse(author)?;
        let restaurant_id = Id::parse(restaurant)?;
        self.check_rating(rating)?;

        let review = self.coordinator.run_unit(self.controller, |unit| {
            let restaurant = self
                .controller
                .restaurant(&restaurant_id, unit)?
                .ok_or_else(|| ErrorKind::NotFound("restaurant", restaurant_id.to_string()))?;

            if !restaurant.approved {
                return Err(ErrorKind::RestaurantNotApproved(restaurant_id.to_string()).into());
            }

            if self
                .controller
                .review_by_author(&author, &restaurant_id, unit)?
                .is_some()
            {
                return Err(ErrorKind::DuplicateReview(
                    author.to_string(),
                    restaurant_id.to_string(),
                )
                .into());
            }

            let new_review = NewReview {
                restaurant: restaurant_id.clone(),
                author: author.clone(),
                rating,
                comment: comment.clone(),
                created_at: Utc::now(),
            };

            let review = self.controller.insert_review(new_review, unit)?;
            aggregate::recompute_average(self.controller, &restaurant_id, unit)?;
            Ok(review)
        })?;

        self.refresh_ranking_quietly(&restaurant_id);
        Ok(review)
    }

    pub fn update_review(
        &self,
        review: &str,
        actor: &str,
        changes: ReviewChanges,
    ) -> Result<Review, Error> {
        let review_id = Id::parse(review)?;
        let actor = Id::parse(actor)?;
        if let Some(rating) = changes.rating {
            self.check_rating(rating)?;
        }

        let (review, rating_changed) = self.coordinator.run_unit(self.controller, |unit| {
            let current = self.authored_review(&review_id, &actor, unit)?;
            if changes.is_empty() {
                return Ok((current, false));
            }

            let rating_changed = changes
                .rating
                .map_or(false, |rating| rating != current.rating);

            let updated = self
                .controller
                .update_review(&review_id, &changes, Utc::now(), unit)?;

            if rating_changed {
                aggregate::recompute_average(self.controller, &updated.restaurant, unit)?;
            }

            Ok((updated, rating_changed))
        })?;

        if rating_changed {
            self.refresh_ranking_quietly(&review.restaurant);
        }

        Ok(review)
    }

    pub fn delete_review(&self, review: &str, actor: &str) -> Result<Review, Error> {
        let review_id = Id::parse(review)?;
        let actor = Id::parse(actor)?;

        let deleted = self.coordinator.run_unit(self.controller, |unit| {
            self.authored_review(&review_id, &actor, unit)?;

            let deleted = self
                .controller
                .delete_review(&review_id, unit)?
                .ok_or_else(|| ErrorKind::NotFound("review", review_id.to_string()))?;

            aggregate::recompute_average(self.controller, &deleted.restaurant, unit)?;
            Ok(deleted)
        })?;

        self.refresh_ranking_quietly(&deleted.restaurant);
        Ok(deleted)
    }

    /// Toggle a like or dislike of `actor` on a review.
    ///
    /// The review is read again inside the unit, so the transition is decided
    /// on its latest reactions. The average rating doesn't change, only the
    /// ranking is refreshed.
    pub fn toggle_reaction(
        &self,
        review: &str,
        actor: &str,
        kind: ReactionKind,
    ) -> Result<Review, Error> {
        let review_id = Id::parse(review)?;
        let actor = Id::parse(actor)?;

        let review = self.coordinator.run_unit(self.controller, |unit| {
            let current = self.existing_review(&review_id, unit)?;
            let reactions = reactions::toggle(&current, &actor, kind)?;

            self.controller
                .replace_reactions(&review_id, &reactions, Utc::now(), unit)
        })?;

        log::debug!(
            "User({}) toggled {} on review({}): {} likes, {} dislikes",
            actor,
            kind,
            review_id,
            review.like_count(),
            review.dislike_count()
        );

        self.refresh_ranking_quietly(&review.restaurant);
        Ok(review)
    }

    /// Recompute the average rating of a restaurant in its own unit of work
    pub fn recompute_average(&self, restaurant: &str) -> Result<RatingSummary, Error> {
        let restaurant = Id::parse(restaurant)?;

        self.coordinator.run_unit(self.controller, |unit| {
            aggregate::recompute_average(self.controller, &restaurant, unit)
        })
    }

    /// Recompute and store the ranking score of a restaurant, returns the score
    pub fn refresh_ranking(&self, restaurant: &str) -> Result<f64, Error> {
        let restaurant = Id::parse(restaurant)?;
        self.update_ranking(&restaurant)
    }

    fn update_ranking(&self, restaurant: &Id) -> Result<f64, Error> {
        let mut unit = Unit::NoTransaction;

        let inputs = self.controller.ranking_inputs(restaurant, &mut unit)?;
        let score = self.ranking.score(&inputs, Utc::now());
        self.controller
            .set_ranking_score(restaurant, score, &mut unit)?;

        Ok(score)
    }

    fn refresh_ranking_quietly(&self, restaurant: &Id) {
        if let Err(e) = self.update_ranking(restaurant) {
            log::warn!(
                "Couldn't refresh ranking of restaurant({}), keeping the stale one: {}",
                restaurant,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use assert_approx_eq::assert_approx_eq;
    use controller::{error::ErrorKind as ControllerError, Restaurant};
    use memory::MemoryController;

    fn user(n: u64) -> String {
        Id::from_counter(10_000 + n).to_string()
    }

    fn stored(controller: &MemoryController, restaurant: &Restaurant) -> Restaurant {
        controller
            .restaurant_snapshot(&restaurant.id)
            .expect("restaurant should exist")
    }

    fn engine_error(err: &Error) -> Option<&ErrorKind> {
        err.downcast_ref::<ErrorKind>()
    }

    #[test]
    fn average_follows_reviews() -> Result<(), Error> {
        let controller = MemoryController::new();
        let engine = Engine::with_controller(&controller);
        let restaurant = controller.add_restaurant("Pardos", true);
        let id = restaurant.id.as_str();

        let three = engine.create_review(&user(1), id, 3, None)?;
        engine.create_review(&user(2), id, 4, Some("Good".into()))?;
        engine.create_review(&user(3), id, 5, None)?;

        let current = stored(&controller, &restaurant);
        assert_approx_eq!(current.average_rating, 4.0);
        assert_eq!(current.review_count, 3);

        engine.delete_review(three.id.as_str(), &user(1))?;
        let current = stored(&controller, &restaurant);
        assert_approx_eq!(current.average_rating, 4.5);
        assert_eq!(current.review_count, 2);

        Ok(())
    }

    #[test]
    fn deleting_every_review_resets_the_average() -> Result<(), Error> {
        let controller = MemoryController::new();
        let engine = Engine::with_controller(&controller);
        let restaurant = controller.add_restaurant("Pardos", true);

        let first = engine.create_review(&user(1), restaurant.id.as_str(), 2, None)?;
        let second = engine.create_review(&user(2), restaurant.id.as_str(), 5, None)?;
        engine.delete_review(first.id.as_str(), &user(1))?;
        engine.delete_review(second.id.as_str(), &user(2))?;

        let current = stored(&controller, &restaurant);
        assert_approx_eq!(current.average_rating, 0.0);
        assert_eq!(current.review_count, 0);

        Ok(())
    }

    #[test]
    fn rating_update_recomputes() -> Result<(), Error> {
        let controller = MemoryController::new();
        let engine = Engine::with_controller(&controller);
        let restaurant = controller.add_restaurant("Pardos", true);

        let review = engine.create_review(&user(1), restaurant.id.as_str(), 2, None)?;
        engine.create_review(&user(2), restaurant.id.as_str(), 4, None)?;

        let changes = ReviewChanges {
            rating: Some(5),
            ..Default::default()
        };
        let updated = engine.update_review(review.id.as_str(), &user(1), changes)?;
        assert_eq!(updated.rating, 5);
        assert_approx_eq!(stored(&controller, &restaurant).average_rating, 4.5);

        let changes = ReviewChanges {
            comment: Some("Changed my mind".into()),
            ..Default::default()
        };
        let updated = engine.update_review(review.id.as_str(), &user(1), changes)?;
        assert_eq!(updated.rating, 5);
        assert_eq!(updated.comment.as_deref(), Some("Changed my mind"));

        let unchanged = engine.update_review(review.id.as_str(), &user(1), Default::default())?;
        assert_eq!(unchanged, updated);

        Ok(())
    }

    #[test]
    fn only_authors_modify_reviews() -> Result<(), Error> {
        let controller = MemoryController::new();
        let engine = Engine::with_controller(&controller);
        let restaurant = controller.add_restaurant("Pardos", true);
        let review = engine.create_review(&user(1), restaurant.id.as_str(), 4, None)?;

        let err = engine
            .delete_review(review.id.as_str(), &user(2))
            .expect_err("strangers can't delete reviews");
        assert_eq!(
            engine_error(&err),
            Some(&ErrorKind::NotAuthor(review.id.to_string()))
        );
        assert!(controller.review_snapshot(&review.id).is_some());

        Ok(())
    }

    #[test]
    fn one_review_per_user_and_restaurant() -> Result<(), Error> {
        let controller = MemoryController::new();
        let engine = Engine::with_controller(&controller);
        let restaurant = controller.add_restaurant("Pardos", true);

        engine.create_review(&user(1), restaurant.id.as_str(), 4, None)?;
        let err = engine
            .create_review(&user(1), restaurant.id.as_str(), 2, None)
            .expect_err("second review should conflict");

        assert!(matches!(
            engine_error(&err),
            Some(ErrorKind::DuplicateReview(_, _))
        ));

        let current = stored(&controller, &restaurant);
        assert_eq!(current.review_count, 1);
        assert_approx_eq!(current.average_rating, 4.0);

        Ok(())
    }

    #[test]
    fn rejected_reviews() {
        let controller = MemoryController::new();
        let engine = Engine::with_controller(&controller);
        let pending = controller.add_restaurant("Secret Place", false);
        let open = controller.add_restaurant("Pardos", true);

        let err = engine
            .create_review(&user(1), pending.id.as_str(), 4, None)
            .expect_err("unapproved restaurant");
        assert!(matches!(
            engine_error(&err),
            Some(ErrorKind::RestaurantNotApproved(_))
        ));

        let err = engine
            .create_review(&user(1), open.id.as_str(), 6, None)
            .expect_err("rating above range");
        assert_eq!(
            engine_error(&err),
            Some(&ErrorKind::RatingOutOfRange(6, 1, 5))
        );

        let err = engine
            .create_review(&user(1), "not-an-id", 4, None)
            .expect_err("malformed id");
        assert!(matches!(
            err.downcast_ref::<ControllerError>(),
            Some(ControllerError::InvalidId(_))
        ));

        let missing = Id::from_counter(999_999).to_string();
        let err = engine
            .create_review(&user(1), &missing, 4, None)
            .expect_err("unknown restaurant");
        assert!(matches!(
            engine_error(&err),
            Some(ErrorKind::NotFound("restaurant", _))
        ));

        assert_eq!(controller.transactions_started(), 2);
    }

    #[test]
    fn reactions_toggle() -> Result<(), Error> {
        let controller = MemoryController::new();
        let engine = Engine::with_controller(&controller);
        let restaurant = controller.add_restaurant("Pardos", true);
        let review = engine.create_review(&user(1), restaurant.id.as_str(), 4, None)?;
        let id = review.id.as_str();

        let liked = engine.toggle_reaction(id, &user(2), ReactionKind::Like)?;
        assert_eq!((liked.like_count(), liked.dislike_count()), (1, 0));

        let switched = engine.toggle_reaction(id, &user(2), ReactionKind::Dislike)?;
        assert_eq!((switched.like_count(), switched.dislike_count()), (0, 1));

        let cleared = engine.toggle_reaction(id, &user(2), ReactionKind::Dislike)?;
        assert_eq!(cleared.reactions, review.reactions);

        let err = engine
            .toggle_reaction(id, &user(1), ReactionKind::Like)
            .expect_err("authors can't react");
        assert_eq!(engine_error(&err), Some(&ErrorKind::SelfReactionForbidden));
        assert_eq!(
            controller.review_snapshot(&review.id).map(|r| r.reactions),
            Some(review.reactions)
        );

        Ok(())
    }

    #[test]
    fn concurrent_reactions_are_not_lost() -> Result<(), Error> {
        let controller = MemoryController::new();
        let engine = Engine::with_controller(&controller);
        let restaurant = controller.add_restaurant("Pardos", true);
        let review = engine.create_review(&user(1), restaurant.id.as_str(), 4, None)?;
        let id = review.id.as_str();

        let (like, dislike) = std::thread::scope(|scope| {
            let like = scope.spawn(|| engine.toggle_reaction(id, &user(2), ReactionKind::Like));
            let dislike =
                scope.spawn(|| engine.toggle_reaction(id, &user(3), ReactionKind::Dislike));
            (like.join(), dislike.join())
        });

        like.expect("like thread panicked")?;
        dislike.expect("dislike thread panicked")?;

        let review = controller
            .review_snapshot(&review.id)
            .expect("review should exist");
        assert_eq!((review.like_count(), review.dislike_count()), (1, 1));

        Ok(())
    }

    #[test]
    fn misreporting_store_downgrades_once() -> Result<(), Error> {
        let controller = MemoryController::misreporting();
        let engine = Engine::with_controller(&controller);
        let restaurant = controller.add_restaurant("Pardos", true);

        let review = engine.create_review(&user(1), restaurant.id.as_str(), 4, None)?;
        assert_eq!(engine.coordinator().is_atomic(), Some(false));
        assert_eq!(controller.transactions_started(), 1);

        engine.create_review(&user(2), restaurant.id.as_str(), 2, None)?;
        engine.toggle_reaction(review.id.as_str(), &user(2), ReactionKind::Like)?;
        assert_eq!(controller.transactions_started(), 1);

        let current = stored(&controller, &restaurant);
        assert_approx_eq!(current.average_rating, 3.0);
        assert_eq!(current.review_count, 2);

        Ok(())
    }

    #[test]
    fn standalone_store() -> Result<(), Error> {
        let controller = MemoryController::standalone();
        let engine = Engine::with_controller(&controller);
        let restaurant = controller.add_restaurant("Pardos", true);

        engine.create_review(&user(1), restaurant.id.as_str(), 5, None)?;
        assert_eq!(engine.coordinator().is_atomic(), Some(false));
        assert_eq!(controller.transactions_started(), 0);
        assert_eq!(stored(&controller, &restaurant).review_count, 1);

        Ok(())
    }

    #[test]
    fn ranking_failures_are_not_fatal() -> Result<(), Error> {
        let controller = MemoryController::new();
        let engine = Engine::with_controller(&controller);
        let restaurant = controller.add_restaurant("Pardos", true);

        controller.fail_ranking_writes(true);
        let review = engine.create_review(&user(1), restaurant.id.as_str(), 4, None)?;
        engine.toggle_reaction(review.id.as_str(), &user(2), ReactionKind::Like)?;

        let current = stored(&controller, &restaurant);
        assert_eq!(current.review_count, 1);
        assert_approx_eq!(current.ranking_score, 0.0);

        assert!(engine.refresh_ranking(restaurant.id.as_str()).is_err());

        controller.fail_ranking_writes(false);
        let score = engine.refresh_ranking(restaurant.id.as_str())?;
        // 4 * 0.5 + 1 * 5 * 0.3 + 1 * 5 * 0.2
        assert_approx_eq!(score, 4.5);
        assert_approx_eq!(stored(&controller, &restaurant).ranking_score, 4.5);

        Ok(())
    }

    #[test]
    fn ranking_follows_writes() -> Result<(), Error> {
        let controller = MemoryController::new();
        let engine = Engine::with_controller(&controller);
        let restaurant = controller.add_restaurant("Pardos", true);

        let review = engine.create_review(&user(1), restaurant.id.as_str(), 4, None)?;
        // No reactions yet, the like ratio is neutral
        assert_approx_eq!(stored(&controller, &restaurant).ranking_score, 3.75);

        engine.toggle_reaction(review.id.as_str(), &user(2), ReactionKind::Dislike)?;
        assert_approx_eq!(stored(&controller, &restaurant).ranking_score, 3.0);

        Ok(())
    }

    #[test]
    fn transient_commit_failures_are_retried() -> Result<(), Error> {
        let controller = MemoryController::new();
        let engine = Engine::with_controller(&controller);
        let restaurant = controller.add_restaurant("Pardos", true);

        controller.fail_next_commits(1);
        engine.create_review(&user(1), restaurant.id.as_str(), 3, None)?;

        assert_eq!(controller.transactions_started(), 2);
        assert_eq!(stored(&controller, &restaurant).review_count, 1);

        Ok(())
    }
}
