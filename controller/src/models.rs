// Copyright (c) 2020 White Leaf
//
// This software is released under the MIT License.
// https://opensource.org/licenses/MIT

use crate::entity::Entity;
use crate::id::Id;
use chrono::{DateTime, Utc};
use common_macros::hash_map;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq)]
pub struct Restaurant {
    pub id: Id,
    pub name: String,
    pub approved: bool,
    pub average_rating: f64,
    pub review_count: u64,
    pub ranking_score: f64,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Restaurant {
    type Id = Id;

    fn get_id(&self) -> Self::Id {
        self.id.clone()
    }

    fn get_data(&self) -> HashMap<String, String> {
        hash_map! {
            "name".into() => self.name.clone(),
            "approved".into() => self.approved.to_string(),
            "average_rating".into() => self.average_rating.to_string(),
            "review_count".into() => self.review_count.to_string(),
            "ranking_score".into() => self.ranking_score.to_string(),
        }
    }
}

/// Users who liked or disliked a review.
///
/// Counters are always derived from the sets, and a user is in at most one
/// of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reactions {
    pub(crate) liked_by: BTreeSet<Id>,
    pub(crate) disliked_by: BTreeSet<Id>,
}

impl Reactions {
    /// Build from persisted sets, a user present in both keeps only the dislike
    pub fn from_sets(liked_by: BTreeSet<Id>, disliked_by: BTreeSet<Id>) -> Self {
        let liked_by = liked_by.difference(&disliked_by).cloned().collect();
        Self {
            liked_by,
            disliked_by,
        }
    }

    pub fn liked_by(&self) -> &BTreeSet<Id> {
        &self.liked_by
    }

    pub fn disliked_by(&self) -> &BTreeSet<Id> {
        &self.disliked_by
    }

    pub fn like_count(&self) -> u64 {
        self.liked_by.len() as u64
    }

    pub fn dislike_count(&self) -> u64 {
        self.disliked_by.len() as u64
    }

    /// Mark `user` as liking, dropping a previous dislike
    pub fn set_liked(&mut self, user: &Id) {
        self.disliked_by.remove(user);
        self.liked_by.insert(user.clone());
    }

    /// Mark `user` as disliking, dropping a previous like
    pub fn set_disliked(&mut self, user: &Id) {
        self.liked_by.remove(user);
        self.disliked_by.insert(user.clone());
    }

    /// Remove any reaction of `user`
    pub fn clear(&mut self, user: &Id) {
        self.liked_by.remove(user);
        self.disliked_by.remove(user);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Review {
    pub id: Id,
    pub restaurant: Id,
    pub author: Id,
    pub rating: i32,
    pub comment: Option<String>,
    pub reactions: Reactions,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Review {
    pub fn like_count(&self) -> u64 {
        self.reactions.like_count()
    }

    pub fn dislike_count(&self) -> u64 {
        self.reactions.dislike_count()
    }
}

impl Entity for Review {
    type Id = Id;

    fn get_id(&self) -> Self::Id {
        self.id.clone()
    }

    fn get_data(&self) -> HashMap<String, String> {
        hash_map! {
            "restaurant".into() => self.restaurant.to_string(),
            "author".into() => self.author.to_string(),
            "rating".into() => self.rating.to_string(),
            "comment".into() => self.comment.clone().unwrap_or_default(),
            "likes".into() => self.like_count().to_string(),
            "dislikes".into() => self.dislike_count().to_string(),
        }
    }
}

// To insert a new review into the store
#[derive(Debug, Clone, PartialEq)]
pub struct NewReview {
    pub restaurant: Id,
    pub author: Id,
    pub rating: i32,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewReview {
    pub fn into_review(self, id: Id) -> Review {
        Review {
            id,
            restaurant: self.restaurant,
            author: self.author,
            rating: self.rating,
            comment: self.comment,
            reactions: Reactions::default(),
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

/// Fields of a review its author may edit, `None` leaves the field as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReviewChanges {
    pub rating: Option<i32>,
    pub comment: Option<String>,
}

impl ReviewChanges {
    pub fn is_empty(&self) -> bool {
        self.rating.is_none() && self.comment.is_none()
    }

    pub fn apply_to(&self, review: &mut Review) {
        if let Some(rating) = self.rating {
            review.rating = rating;
        }

        if let Some(comment) = &self.comment {
            review.comment = Some(comment.clone());
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RatingSummary {
    pub average_rating: f64,
    pub review_count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RankingInputs {
    pub average_rating: f64,
    pub total_likes: u64,
    pub total_dislikes: u64,
    pub last_review_at: Option<DateTime<Utc>>,
}
