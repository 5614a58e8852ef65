// Copyright (c) 2020 White Leaf
//
// This software is released under the MIT License.
// https://opensource.org/licenses/MIT

//! Mapping between store documents and controller models.

use anyhow::Error;
use chrono::{DateTime, TimeZone, Utc};
use controller::{error::ErrorKind, Id, NewReview, Reactions, Restaurant, Review};
use mongodb::bson::{doc, oid::ObjectId, Bson, DateTime as BsonDateTime, Document};
use std::collections::BTreeSet;

pub(crate) fn to_oid(id: &Id) -> Result<ObjectId, Error> {
    Ok(ObjectId::parse_str(id.as_str())?)
}

pub(crate) fn from_oid(oid: &ObjectId) -> Result<Id, Error> {
    Ok(Id::parse(&oid.to_hex())?)
}

pub(crate) fn to_bson_date(date: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_millis(date.timestamp_millis())
}

pub(crate) fn from_bson_date(date: &BsonDateTime) -> Result<DateTime<Utc>, Error> {
    Utc.timestamp_millis_opt(date.timestamp_millis())
        .single()
        .ok_or_else(|| ErrorKind::BsonConvert.into())
}

// Counters may have been written as any numeric type
pub(crate) fn get_number(doc: &Document, key: &str) -> Result<f64, Error> {
    match doc.get(key) {
        Some(Bson::Double(val)) => Ok(*val),
        Some(Bson::Int32(val)) => Ok(f64::from(*val)),
        Some(Bson::Int64(val)) => Ok(*val as f64),
        None | Some(Bson::Null) => Ok(0.0),
        Some(_) => Err(ErrorKind::BsonConvert.into()),
    }
}

fn get_id_set(doc: &Document, key: &str) -> Result<BTreeSet<Id>, Error> {
    let array = match doc.get(key) {
        Some(Bson::Array(array)) => array,
        None | Some(Bson::Null) => return Ok(BTreeSet::new()),
        Some(_) => return Err(ErrorKind::BsonConvert.into()),
    };

    array
        .iter()
        .map(|value| match value {
            Bson::ObjectId(oid) => from_oid(oid),
            _ => Err(ErrorKind::BsonConvert.into()),
        })
        .collect()
}

fn id_array(ids: &BTreeSet<Id>) -> Result<Vec<Bson>, Error> {
    ids.iter()
        .map(|id| -> Result<_, Error> { Ok(Bson::ObjectId(to_oid(id)?)) })
        .collect()
}

pub(crate) fn restaurant_from_doc(doc: &Document) -> Result<Restaurant, Error> {
    let updated_at = match doc.get_datetime("updatedAt") {
        Ok(date) => from_bson_date(date)?,
        Err(_) => Utc::now(),
    };

    Ok(Restaurant {
        id: from_oid(&doc.get_object_id("_id")?)?,
        name: doc.get_str("name").unwrap_or_default().to_owned(),
        approved: doc.get_bool("isApproved").unwrap_or(false),
        average_rating: get_number(doc, "averageRating")?,
        review_count: get_number(doc, "reviewCount")? as u64,
        ranking_score: get_number(doc, "rankingScore")?,
        updated_at,
    })
}

pub(crate) fn review_from_doc(doc: &Document) -> Result<Review, Error> {
    let author = from_oid(&doc.get_object_id("user")?)?;

    // Authors never react to their own review, drop them if stored anyway
    let mut reactions = Reactions::from_sets(
        get_id_set(doc, "likedBy")?,
        get_id_set(doc, "dislikedBy")?,
    );
    reactions.clear(&author);

    let created_at = from_bson_date(doc.get_datetime("createdAt")?)?;
    let updated_at = match doc.get_datetime("updatedAt") {
        Ok(date) => from_bson_date(date)?,
        Err(_) => created_at,
    };

    Ok(Review {
        id: from_oid(&doc.get_object_id("_id")?)?,
        restaurant: from_oid(&doc.get_object_id("restaurant")?)?,
        author,
        rating: get_number(doc, "rating")? as i32,
        comment: doc.get_str("comment").ok().map(Into::into),
        reactions,
        created_at,
        updated_at,
    })
}

pub(crate) fn new_review_doc(oid: ObjectId, review: &NewReview) -> Result<Document, Error> {
    let created_at = to_bson_date(review.created_at);

    Ok(doc! {
        "_id": oid,
        "restaurant": to_oid(&review.restaurant)?,
        "user": to_oid(&review.author)?,
        "rating": review.rating,
        "comment": review.comment.clone().map_or(Bson::Null, Bson::String),
        "likeCount": 0_i64,
        "dislikeCount": 0_i64,
        "likedBy": [],
        "dislikedBy": [],
        "createdAt": created_at,
        "updatedAt": created_at,
    })
}

/// `$set` body writing both reaction sets and their counters together
pub(crate) fn reactions_doc(
    reactions: &Reactions,
    updated_at: DateTime<Utc>,
) -> Result<Document, Error> {
    Ok(doc! {
        "likedBy": id_array(reactions.liked_by())?,
        "dislikedBy": id_array(reactions.disliked_by())?,
        "likeCount": reactions.like_count() as i64,
        "dislikeCount": reactions.dislike_count() as i64,
        "updatedAt": to_bson_date(updated_at),
    })
}
