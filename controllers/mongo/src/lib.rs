// Copyright (c) 2020 White Leaf
//
// This software is released under the MIT License.
// https://opensource.org/licenses/MIT

pub mod documents;

use crate::documents::{
    from_bson_date, get_number, new_review_doc, reactions_doc, restaurant_from_doc,
    review_from_doc, to_bson_date, to_oid,
};
use anyhow::Error;
use chrono::{DateTime, Utc};
use config::Config;
use controller::{
    error::ErrorKind, Controller, Id, NewReview, RankingInputs, RatingSummary, Reactions,
    Restaurant, Review, ReviewChanges, Unit,
};
use mongodb::bson::{doc, oid::ObjectId, Document};
use mongodb::error::{
    Error as MongoError, ErrorKind as MongoErrorKind, TRANSIENT_TRANSACTION_ERROR,
    UNKNOWN_TRANSACTION_COMMIT_RESULT,
};
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument};
use mongodb::sync::{Client, ClientSession, Collection, Database};
use mongodb::IndexModel;
use num_traits::Zero;

const RESTAURANTS: &str = "restaurants";
const REVIEWS: &str = "reviews";

// IllegalOperation, raised by standalone servers for transaction commands
const ILLEGAL_OPERATION: i32 = 20;

// WriteConflict between concurrent transactions
const WRITE_CONFLICT: i32 = 112;

// Messages the driver uses when the deployment can't run transactions
fn reports_unsupported(message: &str) -> bool {
    message.contains("Transactions are not supported")
        || message.contains("Transaction numbers")
        || message.contains("does not support retryable writes")
}

fn is_transient(err: &MongoError) -> bool {
    err.contains_label(TRANSIENT_TRANSACTION_ERROR)
        || err.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
        || matches!(*err.kind, MongoErrorKind::Command(ref command) if command.code == WRITE_CONFLICT)
}

fn is_unsupported(err: &MongoError) -> bool {
    match *err.kind {
        MongoErrorKind::Command(ref command) => command.code == ILLEGAL_OPERATION,
        MongoErrorKind::Transaction { ref message, .. } => reports_unsupported(message),
        _ => false,
    }
}

/// Turn driver errors the coordinator reacts to into controller errors
fn classify(err: MongoError) -> Error {
    if is_transient(&err) {
        ErrorKind::TransientTransaction(err.to_string()).into()
    } else if is_unsupported(&err) {
        ErrorKind::TransactionsUnsupported.into()
    } else {
        err.into()
    }
}

fn return_after() -> FindOneAndUpdateOptions {
    FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build()
}

pub struct MongoController {
    client: Client,
    mongo_db: Database,
}

impl MongoController {
    pub fn new() -> Result<Self, Error> {
        let cfg = Config::default();

        Self::from_config(&cfg)
    }

    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let db = &config.database;
        if db.mongo_url.is_empty() || db.mongo_db.is_empty() {
            return Err(ErrorKind::DbConfigError("database".into()).into());
        }

        Self::with_url(&db.mongo_url, &db.mongo_db)
    }

    pub fn with_url(mongo_url: &str, mongo_db: &str) -> Result<Self, Error> {
        let client = Client::with_uri_str(mongo_url)?;
        let mongo_db = client.database(mongo_db);

        Ok(Self { client, mongo_db })
    }

    fn restaurants(&self) -> Collection<Document> {
        self.mongo_db.collection(RESTAURANTS)
    }

    fn reviews(&self) -> Collection<Document> {
        self.mongo_db.collection(REVIEWS)
    }

    /// One review per user and restaurant, enforced by the store as well
    pub fn ensure_indexes(&self) -> Result<(), Error> {
        let options = IndexOptions::builder().unique(true).build();
        let index = IndexModel::builder()
            .keys(doc! { "user": 1, "restaurant": 1 })
            .options(options)
            .build();

        self.reviews().create_index(index, None)?;
        Ok(())
    }

    fn find_one(
        &self,
        collection: &Collection<Document>,
        filter: Document,
        unit: &mut Unit<'_, ClientSession>,
    ) -> Result<Option<Document>, Error> {
        let found = match unit {
            Unit::InSession(session) => {
                collection.find_one_with_session(filter, None, &mut **session)
            }
            Unit::NoTransaction => collection.find_one(filter, None),
        };

        found.map_err(classify)
    }

    fn find(
        &self,
        collection: &Collection<Document>,
        filter: Document,
        options: FindOptions,
        unit: &mut Unit<'_, ClientSession>,
    ) -> Result<Vec<Document>, Error> {
        match unit {
            Unit::InSession(session) => {
                let mut cursor = collection
                    .find_with_session(filter, options, &mut **session)
                    .map_err(classify)?;

                cursor
                    .iter(&mut **session)
                    .map(|doc| doc.map_err(classify))
                    .collect()
            }

            Unit::NoTransaction => collection
                .find(filter, options)
                .map_err(classify)?
                .map(|doc| doc.map_err(classify))
                .collect(),
        }
    }

    fn aggregate(
        &self,
        collection: &Collection<Document>,
        pipeline: Vec<Document>,
        unit: &mut Unit<'_, ClientSession>,
    ) -> Result<Vec<Document>, Error> {
        match unit {
            Unit::InSession(session) => {
                let mut cursor = collection
                    .aggregate_with_session(pipeline, None, &mut **session)
                    .map_err(classify)?;

                cursor
                    .iter(&mut **session)
                    .map(|doc| doc.map_err(classify))
                    .collect()
            }

            Unit::NoTransaction => collection
                .aggregate(pipeline, None)
                .map_err(classify)?
                .map(|doc| doc.map_err(classify))
                .collect(),
        }
    }

    fn update_one(
        &self,
        collection: &Collection<Document>,
        query: Document,
        update: Document,
        unit: &mut Unit<'_, ClientSession>,
    ) -> Result<u64, Error> {
        let result = match unit {
            Unit::InSession(session) => {
                collection.update_one_with_session(query, update, None, &mut **session)
            }
            Unit::NoTransaction => collection.update_one(query, update, None),
        };

        Ok(result.map_err(classify)?.matched_count)
    }

    fn find_one_and_update(
        &self,
        collection: &Collection<Document>,
        query: Document,
        update: Document,
        unit: &mut Unit<'_, ClientSession>,
    ) -> Result<Option<Document>, Error> {
        let result = match unit {
            Unit::InSession(session) => collection.find_one_and_update_with_session(
                query,
                update,
                return_after(),
                &mut **session,
            ),
            Unit::NoTransaction => collection.find_one_and_update(query, update, return_after()),
        };

        result.map_err(classify)
    }
}

impl Controller for MongoController {
    type Session = ClientSession;

    fn supports_transactions(&self) -> Result<bool, Error> {
        let reply = match self.mongo_db.run_command(doc! { "hello": 1 }, None) {
            Ok(reply) => reply,
            // Servers older than 4.4 only know the legacy handshake
            Err(e) => {
                log::debug!("hello failed, falling back to isMaster: {}", e);
                self.mongo_db.run_command(doc! { "isMaster": 1 }, None)?
            }
        };

        let replicated = reply.get_str("setName").is_ok();
        let sharded = reply.get_str("msg").map_or(false, |msg| msg == "isdbgrid");

        Ok(replicated || sharded)
    }

    fn start_session(&self) -> Result<Self::Session, Error> {
        Ok(self.client.start_session(None)?)
    }

    fn start_transaction(&self, session: &mut Self::Session) -> Result<(), Error> {
        session.start_transaction(None).map_err(classify)
    }

    fn commit_transaction(&self, session: &mut Self::Session) -> Result<(), Error> {
        session.commit_transaction().map_err(classify)
    }

    fn abort_transaction(&self, session: &mut Self::Session) -> Result<(), Error> {
        session.abort_transaction().map_err(classify)
    }

    fn restaurant(
        &self,
        id: &Id,
        unit: &mut Unit<'_, Self::Session>,
    ) -> Result<Option<Restaurant>, Error> {
        let filter = doc! { "_id": to_oid(id)? };

        self.find_one(&self.restaurants(), filter, unit)?
            .map(|doc| restaurant_from_doc(&doc))
            .transpose()
    }

    fn review(&self, id: &Id, unit: &mut Unit<'_, Self::Session>) -> Result<Option<Review>, Error> {
        let filter = doc! { "_id": to_oid(id)? };

        self.find_one(&self.reviews(), filter, unit)?
            .map(|doc| review_from_doc(&doc))
            .transpose()
    }

    fn review_by_author(
        &self,
        author: &Id,
        restaurant: &Id,
        unit: &mut Unit<'_, Self::Session>,
    ) -> Result<Option<Review>, Error> {
        let filter = doc! {
            "user": to_oid(author)?,
            "restaurant": to_oid(restaurant)?,
        };

        self.find_one(&self.reviews(), filter, unit)?
            .map(|doc| review_from_doc(&doc))
            .transpose()
    }

    fn insert_review(
        &self,
        review: NewReview,
        unit: &mut Unit<'_, Self::Session>,
    ) -> Result<Review, Error> {
        let oid = ObjectId::new();
        let doc = new_review_doc(oid, &review)?;

        let result = match unit {
            Unit::InSession(session) => {
                self.reviews().insert_one_with_session(doc, None, &mut **session)
            }
            Unit::NoTransaction => self.reviews().insert_one(doc, None),
        };

        result.map_err(classify)?;
        Ok(review.into_review(documents::from_oid(&oid)?))
    }

    fn update_review(
        &self,
        id: &Id,
        changes: &ReviewChanges,
        updated_at: DateTime<Utc>,
        unit: &mut Unit<'_, Self::Session>,
    ) -> Result<Review, Error> {
        let mut set = doc! { "updatedAt": to_bson_date(updated_at) };
        if let Some(rating) = changes.rating {
            set.insert("rating", rating);
        }

        if let Some(comment) = &changes.comment {
            set.insert("comment", comment.clone());
        }

        let query = doc! { "_id": to_oid(id)? };
        let update = doc! { "$set": set };

        match self.find_one_and_update(&self.reviews(), query, update, unit)? {
            Some(doc) => review_from_doc(&doc),
            None => Err(ErrorKind::NotFoundById(id.to_string()).into()),
        }
    }

    fn delete_review(
        &self,
        id: &Id,
        unit: &mut Unit<'_, Self::Session>,
    ) -> Result<Option<Review>, Error> {
        let query = doc! { "_id": to_oid(id)? };

        let deleted = match unit {
            Unit::InSession(session) => {
                self.reviews()
                    .find_one_and_delete_with_session(query, None, &mut **session)
            }
            Unit::NoTransaction => self.reviews().find_one_and_delete(query, None),
        };

        deleted
            .map_err(classify)?
            .map(|doc| review_from_doc(&doc))
            .transpose()
    }

    fn replace_reactions(
        &self,
        id: &Id,
        reactions: &Reactions,
        updated_at: DateTime<Utc>,
        unit: &mut Unit<'_, Self::Session>,
    ) -> Result<Review, Error> {
        let query = doc! { "_id": to_oid(id)? };
        let update = doc! { "$set": reactions_doc(reactions, updated_at)? };

        match self.find_one_and_update(&self.reviews(), query, update, unit)? {
            Some(doc) => review_from_doc(&doc),
            None => Err(ErrorKind::NotFoundById(id.to_string()).into()),
        }
    }

    fn ratings_for(
        &self,
        restaurant: &Id,
        unit: &mut Unit<'_, Self::Session>,
    ) -> Result<Vec<i32>, Error> {
        let filter = doc! { "restaurant": to_oid(restaurant)? };
        let options = FindOptions::builder()
            .projection(doc! { "rating": 1, "_id": 0 })
            .build();

        self.find(&self.reviews(), filter, options, unit)?
            .iter()
            .map(|doc| -> Result<i32, Error> { Ok(get_number(doc, "rating")? as i32) })
            .collect()
    }

    fn set_rating_summary(
        &self,
        restaurant: &Id,
        summary: &RatingSummary,
        updated_at: DateTime<Utc>,
        unit: &mut Unit<'_, Self::Session>,
    ) -> Result<(), Error> {
        let query = doc! { "_id": to_oid(restaurant)? };
        let update = doc! {
            "$set": {
                "averageRating": summary.average_rating,
                "reviewCount": summary.review_count as i64,
                "updatedAt": to_bson_date(updated_at),
            }
        };

        let matched = self.update_one(&self.restaurants(), query, update, unit)?;
        if matched.is_zero() {
            return Err(ErrorKind::NotFoundById(restaurant.to_string()).into());
        }

        Ok(())
    }

    fn ranking_inputs(
        &self,
        restaurant: &Id,
        unit: &mut Unit<'_, Self::Session>,
    ) -> Result<RankingInputs, Error> {
        let average_rating = self
            .restaurant(restaurant, unit)?
            .ok_or_else(|| ErrorKind::NotFoundById(restaurant.to_string()))?
            .average_rating;

        let pipeline = vec![
            doc! { "$match": { "restaurant": to_oid(restaurant)? } },
            doc! {
                "$group": {
                    "_id": null,
                    "totalLikes": { "$sum": "$likeCount" },
                    "totalDislikes": { "$sum": "$dislikeCount" },
                    "lastReviewAt": { "$max": "$createdAt" },
                }
            },
        ];

        let groups = self.aggregate(&self.reviews(), pipeline, unit)?;
        let group = match groups.first() {
            Some(group) => group,
            None => {
                return Ok(RankingInputs {
                    average_rating,
                    ..Default::default()
                })
            }
        };

        let last_review_at = match group.get_datetime("lastReviewAt") {
            Ok(date) => Some(from_bson_date(date)?),
            Err(_) => None,
        };

        Ok(RankingInputs {
            average_rating,
            total_likes: get_number(group, "totalLikes")? as u64,
            total_dislikes: get_number(group, "totalDislikes")? as u64,
            last_review_at,
        })
    }

    fn set_ranking_score(
        &self,
        restaurant: &Id,
        score: f64,
        unit: &mut Unit<'_, Self::Session>,
    ) -> Result<(), Error> {
        let query = doc! { "_id": to_oid(restaurant)? };
        let update = doc! { "$set": { "rankingScore": score } };

        let matched = self.update_one(&self.restaurants(), query, update, unit)?;
        if matched.is_zero() {
            return Err(ErrorKind::UpdateFailed(restaurant.to_string()).into());
        }

        Ok(())
    }
}


#[cfg(feature = "test-controller")]
#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Error;

    fn seed_restaurant(controller: &MongoController) -> Result<Id, Error> {
        let oid = ObjectId::new();
        controller.restaurants().insert_one(
            doc! {
                "_id": oid,
                "name": "Chifa Wa",
                "isApproved": true,
                "averageRating": 0.0,
                "reviewCount": 0_i64,
                "rankingScore": 0.0,
            },
            None,
        )?;

        documents::from_oid(&oid)
    }

    #[test]
    fn probe_topology() -> Result<(), Error> {
        let controller = MongoController::new()?;
        controller.supports_transactions()?;

        Ok(())
    }

    #[test]
    fn summary_and_inputs() -> Result<(), Error> {
        let controller = MongoController::new()?;
        let restaurant = seed_restaurant(&controller)?;
        let mut unit = Unit::NoTransaction;

        for (author, rating) in [(1, 3), (2, 4), (3, 5)].iter() {
            let review = NewReview {
                restaurant: restaurant.clone(),
                author: Id::from_counter(*author),
                rating: *rating,
                comment: None,
                created_at: Utc::now(),
            };

            controller.insert_review(review, &mut unit)?;
        }

        let mut ratings = controller.ratings_for(&restaurant, &mut unit)?;
        ratings.sort();
        assert_eq!(ratings, vec![3, 4, 5]);

        let summary = RatingSummary {
            average_rating: 4.0,
            review_count: 3,
        };
        controller.set_rating_summary(&restaurant, &summary, Utc::now(), &mut unit)?;

        let inputs = controller.ranking_inputs(&restaurant, &mut unit)?;
        assert_eq!(inputs.average_rating, 4.0);
        assert_eq!(inputs.total_likes, 0);
        assert!(inputs.last_review_at.is_some());

        Ok(())
    }
}
