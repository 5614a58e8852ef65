// Copyright (c) 2020 White Leaf
//
// This software is released under the MIT License.
// https://opensource.org/licenses/MIT

//! In-process document store.
//!
//! Transactions are serialized: a session holds the transaction lock from
//! `start_transaction` until commit, abort or drop, works on a private copy
//! of the data, and on commit only the documents it changed are written
//! back. Writes made without a session go straight to the shared data.

use anyhow::Error;
use chrono::{DateTime, Utc};
use controller::{
    error::ErrorKind, Controller, Id, NewReview, RankingInputs, RatingSummary, Reactions,
    Restaurant, Review, ReviewChanges, Unit,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How the simulated deployment behaves regarding transactions
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Topology {
    /// Replica set, transactions work
    ReplicaSet,
    /// Single node, the probe reports no transaction support
    Standalone,
    /// The probe claims support but every operation inside a transaction fails
    Misreporting,
}

#[derive(Debug, Clone, Default)]
struct State {
    restaurants: BTreeMap<Id, Restaurant>,
    reviews: BTreeMap<Id, Review>,
}

impl State {
    fn restaurant_mut(&mut self, id: &Id) -> Result<&mut Restaurant, ErrorKind> {
        self.restaurants
            .get_mut(id)
            .ok_or_else(|| ErrorKind::NotFoundById(id.to_string()))
    }

    fn review_mut(&mut self, id: &Id) -> Result<&mut Review, ErrorKind> {
        self.reviews
            .get_mut(id)
            .ok_or_else(|| ErrorKind::NotFoundById(id.to_string()))
    }

    fn reviews_of<'a>(&'a self, restaurant: &'a Id) -> impl Iterator<Item = &'a Review> + 'a {
        self.reviews
            .values()
            .filter(move |review| &review.restaurant == restaurant)
    }

    // Copy into `self` every document that differs between `base` and `staged`
    fn merge_changes(&mut self, base: &State, staged: &State) {
        let review_ids: BTreeSet<_> = base.reviews.keys().chain(staged.reviews.keys()).collect();
        for id in review_ids {
            let (before, after) = (base.reviews.get(id), staged.reviews.get(id));
            if before == after {
                continue;
            }

            match after {
                Some(review) => self.reviews.insert(id.clone(), review.clone()),
                None => self.reviews.remove(id),
            };
        }

        let restaurant_ids: BTreeSet<_> = base
            .restaurants
            .keys()
            .chain(staged.restaurants.keys())
            .collect();

        for id in restaurant_ids {
            let (before, after) = (base.restaurants.get(id), staged.restaurants.get(id));
            if before == after {
                continue;
            }

            match after {
                Some(restaurant) => self.restaurants.insert(id.clone(), restaurant.clone()),
                None => self.restaurants.remove(id),
            };
        }
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    tx_busy: Mutex<bool>,
    tx_idle: Condvar,
    next_id: AtomicU64,
    topology: Topology,
    transactions_started: AtomicUsize,
    failing_commits: AtomicUsize,
    failing_rankings: AtomicBool,
}

impl Shared {
    fn acquire_transaction_lock(&self) {
        let mut busy = lock(&self.tx_busy);
        while *busy {
            busy = self
                .tx_idle
                .wait(busy)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *busy = true;
    }

    fn release_transaction_lock(&self) {
        *lock(&self.tx_busy) = false;
        self.tx_idle.notify_one();
    }
}

#[derive(Debug)]
struct Transaction {
    base: State,
    staged: State,
}

/// Session of a `MemoryController`, a running transaction is aborted on drop
#[derive(Debug)]
pub struct MemorySession {
    shared: Arc<Shared>,
    transaction: Option<Transaction>,
}

impl MemorySession {
    fn finish(&mut self) -> Option<Transaction> {
        let transaction = self.transaction.take()?;
        self.shared.release_transaction_lock();
        Some(transaction)
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if self.finish().is_some() {
            log::debug!("Session dropped with a running transaction, aborted it");
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemoryController {
    shared: Arc<Shared>,
}

impl Default for MemoryController {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryController {
    pub fn new() -> Self {
        Self::with_topology(Topology::ReplicaSet)
    }

    pub fn standalone() -> Self {
        Self::with_topology(Topology::Standalone)
    }

    pub fn misreporting() -> Self {
        Self::with_topology(Topology::Misreporting)
    }

    pub fn with_topology(topology: Topology) -> Self {
        let shared = Shared {
            state: Mutex::new(State::default()),
            tx_busy: Mutex::new(false),
            tx_idle: Condvar::new(),
            next_id: AtomicU64::new(1),
            topology,
            transactions_started: AtomicUsize::new(0),
            failing_commits: AtomicUsize::new(0),
            failing_rankings: AtomicBool::new(false),
        };

        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn topology(&self) -> Topology {
        self.shared.topology
    }

    fn next_id(&self) -> Id {
        Id::from_counter(self.shared.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Insert a restaurant with empty aggregates
    pub fn add_restaurant(&self, name: &str, approved: bool) -> Restaurant {
        let restaurant = Restaurant {
            id: self.next_id(),
            name: name.into(),
            approved,
            average_rating: 0.0,
            review_count: 0,
            ranking_score: 0.0,
            updated_at: Utc::now(),
        };

        lock(&self.shared.state)
            .restaurants
            .insert(restaurant.id.clone(), restaurant.clone());

        restaurant
    }

    /// Committed state of a restaurant
    pub fn restaurant_snapshot(&self, id: &Id) -> Option<Restaurant> {
        lock(&self.shared.state).restaurants.get(id).cloned()
    }

    /// Committed state of a review
    pub fn review_snapshot(&self, id: &Id) -> Option<Review> {
        lock(&self.shared.state).reviews.get(id).cloned()
    }

    /// Number of transactions started so far
    pub fn transactions_started(&self) -> usize {
        self.shared.transactions_started.load(Ordering::SeqCst)
    }

    /// Make the next `count` commits fail with a transient error
    pub fn fail_next_commits(&self, count: usize) {
        self.shared.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Make every ranking score write fail
    pub fn fail_ranking_writes(&self, fail: bool) {
        self.shared.failing_rankings.store(fail, Ordering::SeqCst);
    }

    fn with_state<T>(
        &self,
        unit: &mut Unit<'_, MemorySession>,
        f: impl FnOnce(&mut State) -> Result<T, Error>,
    ) -> Result<T, Error> {
        match unit {
            Unit::NoTransaction => {
                let mut state = lock(&self.shared.state);
                f(&mut state)
            }

            Unit::InSession(session) => {
                if self.shared.topology == Topology::Misreporting {
                    return Err(ErrorKind::TransactionsUnsupported.into());
                }

                let transaction = session
                    .transaction
                    .as_mut()
                    .ok_or(ErrorKind::NoActiveTransaction)?;

                f(&mut transaction.staged)
            }
        }
    }
}

impl Controller for MemoryController {
    type Session = MemorySession;

    fn supports_transactions(&self) -> Result<bool, Error> {
        Ok(self.shared.topology != Topology::Standalone)
    }

    fn start_session(&self) -> Result<Self::Session, Error> {
        Ok(MemorySession {
            shared: Arc::clone(&self.shared),
            transaction: None,
        })
    }

    fn start_transaction(&self, session: &mut Self::Session) -> Result<(), Error> {
        if self.shared.topology == Topology::Standalone {
            return Err(ErrorKind::TransactionsUnsupported.into());
        }

        // A session runs one transaction at a time
        session.finish();

        self.shared.acquire_transaction_lock();
        self.shared
            .transactions_started
            .fetch_add(1, Ordering::SeqCst);

        let base = lock(&self.shared.state).clone();
        session.transaction = Some(Transaction {
            staged: base.clone(),
            base,
        });

        Ok(())
    }

    fn commit_transaction(&self, session: &mut Self::Session) -> Result<(), Error> {
        let failing = self
            .shared
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        if failing {
            session.finish();
            return Err(ErrorKind::TransientTransaction("write conflict".into()).into());
        }

        let transaction = session
            .transaction
            .as_ref()
            .ok_or(ErrorKind::NoActiveTransaction)?;

        lock(&self.shared.state).merge_changes(&transaction.base, &transaction.staged);
        session.finish();

        Ok(())
    }

    fn abort_transaction(&self, session: &mut Self::Session) -> Result<(), Error> {
        session
            .finish()
            .map(|_| ())
            .ok_or_else(|| ErrorKind::NoActiveTransaction.into())
    }

    fn restaurant(
        &self,
        id: &Id,
        unit: &mut Unit<'_, Self::Session>,
    ) -> Result<Option<Restaurant>, Error> {
        self.with_state(unit, |state| Ok(state.restaurants.get(id).cloned()))
    }

    fn review(&self, id: &Id, unit: &mut Unit<'_, Self::Session>) -> Result<Option<Review>, Error> {
        self.with_state(unit, |state| Ok(state.reviews.get(id).cloned()))
    }

    fn review_by_author(
        &self,
        author: &Id,
        restaurant: &Id,
        unit: &mut Unit<'_, Self::Session>,
    ) -> Result<Option<Review>, Error> {
        self.with_state(unit, |state| {
            Ok(state
                .reviews_of(restaurant)
                .find(|review| &review.author == author)
                .cloned())
        })
    }

    fn insert_review(
        &self,
        review: NewReview,
        unit: &mut Unit<'_, Self::Session>,
    ) -> Result<Review, Error> {
        let review = review.into_review(self.next_id());
        self.with_state(unit, |state| {
            state.reviews.insert(review.id.clone(), review.clone());
            Ok(review)
        })
    }

    fn update_review(
        &self,
        id: &Id,
        changes: &ReviewChanges,
        updated_at: DateTime<Utc>,
        unit: &mut Unit<'_, Self::Session>,
    ) -> Result<Review, Error> {
        self.with_state(unit, |state| {
            let review = state.review_mut(id)?;
            changes.apply_to(review);
            review.updated_at = updated_at;
            Ok(review.clone())
        })
    }

    fn delete_review(
        &self,
        id: &Id,
        unit: &mut Unit<'_, Self::Session>,
    ) -> Result<Option<Review>, Error> {
        self.with_state(unit, |state| Ok(state.reviews.remove(id)))
    }

    fn replace_reactions(
        &self,
        id: &Id,
        reactions: &Reactions,
        updated_at: DateTime<Utc>,
        unit: &mut Unit<'_, Self::Session>,
    ) -> Result<Review, Error> {
        self.with_state(unit, |state| {
            let review = state.review_mut(id)?;
            review.reactions = reactions.clone();
            review.updated_at = updated_at;
            Ok(review.clone())
        })
    }

    fn ratings_for(
        &self,
        restaurant: &Id,
        unit: &mut Unit<'_, Self::Session>,
    ) -> Result<Vec<i32>, Error> {
        self.with_state(unit, |state| {
            Ok(state
                .reviews_of(restaurant)
                .map(|review| review.rating)
                .collect())
        })
    }

    fn set_rating_summary(
        &self,
        restaurant: &Id,
        summary: &RatingSummary,
        updated_at: DateTime<Utc>,
        unit: &mut Unit<'_, Self::Session>,
    ) -> Result<(), Error> {
        self.with_state(unit, |state| {
            let restaurant = state.restaurant_mut(restaurant)?;
            restaurant.average_rating = summary.average_rating;
            restaurant.review_count = summary.review_count;
            restaurant.updated_at = updated_at;
            Ok(())
        })
    }

    fn ranking_inputs(
        &self,
        restaurant: &Id,
        unit: &mut Unit<'_, Self::Session>,
    ) -> Result<RankingInputs, Error> {
        self.with_state(unit, |state| {
            let average_rating = state
                .restaurants
                .get(restaurant)
                .ok_or_else(|| ErrorKind::NotFoundById(restaurant.to_string()))?
                .average_rating;

            let mut inputs = RankingInputs {
                average_rating,
                ..Default::default()
            };

            for review in state.reviews_of(restaurant) {
                inputs.total_likes += review.like_count();
                inputs.total_dislikes += review.dislike_count();
                inputs.last_review_at = inputs.last_review_at.max(Some(review.created_at));
            }

            Ok(inputs)
        })
    }

    fn set_ranking_score(
        &self,
        restaurant: &Id,
        score: f64,
        unit: &mut Unit<'_, Self::Session>,
    ) -> Result<(), Error> {
        if self.shared.failing_rankings.load(Ordering::SeqCst) {
            return Err(ErrorKind::UpdateFailed(restaurant.to_string()).into());
        }

        self.with_state(unit, |state| {
            state.restaurant_mut(restaurant)?.ranking_score = score;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Error;

    fn new_review(restaurant: &Id, author: u64, rating: i32) -> NewReview {
        NewReview {
            restaurant: restaurant.clone(),
            author: Id::from_counter(1000 + author),
            rating,
            comment: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn committed_writes_are_visible() -> Result<(), Error> {
        let controller = MemoryController::new();
        let restaurant = controller.add_restaurant("Chifa Wa", true);

        let mut session = controller.start_session()?;
        controller.start_transaction(&mut session)?;

        let review = controller.insert_review(
            new_review(&restaurant.id, 1, 4),
            &mut Unit::InSession(&mut session),
        )?;
        assert!(controller.review_snapshot(&review.id).is_none());

        controller.commit_transaction(&mut session)?;
        assert_eq!(controller.review_snapshot(&review.id), Some(review));

        Ok(())
    }

    #[test]
    fn aborted_writes_are_discarded() -> Result<(), Error> {
        let controller = MemoryController::new();
        let restaurant = controller.add_restaurant("Chifa Wa", true);

        let mut session = controller.start_session()?;
        controller.start_transaction(&mut session)?;
        let review = controller.insert_review(
            new_review(&restaurant.id, 1, 4),
            &mut Unit::InSession(&mut session),
        )?;
        controller.abort_transaction(&mut session)?;

        assert!(controller.review_snapshot(&review.id).is_none());
        assert!(controller.abort_transaction(&mut session).is_err());

        Ok(())
    }

    #[test]
    fn dropped_session_releases_the_lock() -> Result<(), Error> {
        let controller = MemoryController::new();

        {
            let mut session = controller.start_session()?;
            controller.start_transaction(&mut session)?;
        }

        let mut session = controller.start_session()?;
        controller.start_transaction(&mut session)?;
        controller.commit_transaction(&mut session)?;
        assert_eq!(controller.transactions_started(), 2);

        Ok(())
    }

    #[test]
    fn commit_keeps_unrelated_direct_writes() -> Result<(), Error> {
        let controller = MemoryController::new();
        let restaurant = controller.add_restaurant("Chifa Wa", true);

        let mut session = controller.start_session()?;
        controller.start_transaction(&mut session)?;
        controller.insert_review(
            new_review(&restaurant.id, 1, 4),
            &mut Unit::InSession(&mut session),
        )?;

        controller.set_ranking_score(&restaurant.id, 3.5, &mut Unit::NoTransaction)?;
        controller.commit_transaction(&mut session)?;

        let restaurant = controller
            .restaurant_snapshot(&restaurant.id)
            .ok_or(ErrorKind::NotFoundById(restaurant.id.to_string()))?;
        assert_eq!(restaurant.ranking_score, 3.5);

        Ok(())
    }

    #[test]
    fn misreporting_fails_inside_transactions() -> Result<(), Error> {
        let controller = MemoryController::misreporting();
        let restaurant = controller.add_restaurant("Chifa Wa", true);
        assert!(controller.supports_transactions()?);

        let mut session = controller.start_session()?;
        controller.start_transaction(&mut session)?;
        let result = controller.ratings_for(&restaurant.id, &mut Unit::InSession(&mut session));

        let err = result.expect_err("operations inside a transaction should fail");
        assert!(matches!(
            err.downcast_ref::<ErrorKind>(),
            Some(ErrorKind::TransactionsUnsupported)
        ));

        Ok(())
    }

    #[test]
    fn ranking_inputs_sum_reactions() -> Result<(), Error> {
        let controller = MemoryController::standalone();
        let restaurant = controller.add_restaurant("Chifa Wa", true);
        let mut unit = Unit::NoTransaction;

        let first = controller.insert_review(new_review(&restaurant.id, 1, 4), &mut unit)?;
        let second = controller.insert_review(new_review(&restaurant.id, 2, 2), &mut unit)?;

        let mut reactions = Reactions::default();
        reactions.set_liked(&Id::from_counter(900));
        reactions.set_liked(&Id::from_counter(901));
        controller.replace_reactions(&first.id, &reactions, Utc::now(), &mut unit)?;

        let mut reactions = Reactions::default();
        reactions.set_disliked(&Id::from_counter(900));
        controller.replace_reactions(&second.id, &reactions, Utc::now(), &mut unit)?;

        let inputs = controller.ranking_inputs(&restaurant.id, &mut unit)?;
        assert_eq!(inputs.total_likes, 2);
        assert_eq!(inputs.total_dislikes, 1);
        assert_eq!(inputs.last_review_at, Some(second.created_at.max(first.created_at)));

        Ok(())
    }
}
