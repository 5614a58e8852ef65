// Copyright (c) 2020 White Leaf
//
// This software is released under the MIT License.
// https://opensource.org/licenses/MIT

pub mod entity;
pub mod error;
pub mod id;
pub mod models;
pub mod unit;

use anyhow::Error;
use chrono::{DateTime, Utc};

pub use entity::{Entity, ToTable};
pub use id::Id;
pub use models::{
    NewReview, RankingInputs, RatingSummary, Reactions, Restaurant, Review, ReviewChanges,
};
pub use unit::Unit;

pub type Result<T> = std::result::Result<T, Error>;

/// A document store holding restaurants and their reviews.
///
/// Every read or write that belongs to a logical operation receives the same
/// `Unit`, either `Unit::InSession` for an atomic unit or
/// `Unit::NoTransaction` when the deployment cannot provide transactions.
pub trait Controller {
    /// Session handle, released when dropped.
    type Session;

    /// Topology probe, true when the deployment can run multi-document transactions
    fn supports_transactions(&self) -> Result<bool>;

    /// Open a new session
    fn start_session(&self) -> Result<Self::Session>;

    /// Begin a transaction on an open session
    fn start_transaction(&self, session: &mut Self::Session) -> Result<()>;

    /// Commit the running transaction
    fn commit_transaction(&self, session: &mut Self::Session) -> Result<()>;

    /// Abort the running transaction, discarding its writes
    fn abort_transaction(&self, session: &mut Self::Session) -> Result<()>;

    /// Get a restaurant by id, `None` if it doesn't exist
    fn restaurant(
        &self,
        id: &Id,
        unit: &mut Unit<'_, Self::Session>,
    ) -> Result<Option<Restaurant>>;

    /// Get a review by id, `None` if it doesn't exist
    fn review(&self, id: &Id, unit: &mut Unit<'_, Self::Session>) -> Result<Option<Review>>;

    /// Get the review written by `author` for `restaurant`, if any
    fn review_by_author(
        &self,
        author: &Id,
        restaurant: &Id,
        unit: &mut Unit<'_, Self::Session>,
    ) -> Result<Option<Review>>;

    /// Insert a new review, returns it with its assigned id
    fn insert_review(&self, review: NewReview, unit: &mut Unit<'_, Self::Session>)
        -> Result<Review>;

    /// Apply rating/comment changes to a review, returns the updated review
    fn update_review(
        &self,
        id: &Id,
        changes: &ReviewChanges,
        updated_at: DateTime<Utc>,
        unit: &mut Unit<'_, Self::Session>,
    ) -> Result<Review>;

    /// Delete a review, returns the deleted document if it existed
    fn delete_review(&self, id: &Id, unit: &mut Unit<'_, Self::Session>)
        -> Result<Option<Review>>;

    /// Overwrite both reaction sets and their counters in a single update
    fn replace_reactions(
        &self,
        id: &Id,
        reactions: &Reactions,
        updated_at: DateTime<Utc>,
        unit: &mut Unit<'_, Self::Session>,
    ) -> Result<Review>;

    /// Ratings of every review of a restaurant, nothing else is read
    fn ratings_for(&self, restaurant: &Id, unit: &mut Unit<'_, Self::Session>)
        -> Result<Vec<i32>>;

    /// Write average rating and review count of a restaurant in one update
    fn set_rating_summary(
        &self,
        restaurant: &Id,
        summary: &RatingSummary,
        updated_at: DateTime<Utc>,
        unit: &mut Unit<'_, Self::Session>,
    ) -> Result<()>;

    /// Aggregate the inputs of the ranking score for a restaurant
    fn ranking_inputs(
        &self,
        restaurant: &Id,
        unit: &mut Unit<'_, Self::Session>,
    ) -> Result<RankingInputs>;

    /// Store the ranking score of a restaurant
    fn set_ranking_score(
        &self,
        restaurant: &Id,
        score: f64,
        unit: &mut Unit<'_, Self::Session>,
    ) -> Result<()>;
}
