use thiserror::Error as DError;

#[derive(Debug, Clone, DError, PartialEq)]
pub enum ErrorKind {
    #[error("Rating {0} is out of range [{1}, {2}]")]
    RatingOutOfRange(i32, i32, i32),

    #[error("User({0}) already reviewed restaurant({1})")]
    DuplicateReview(String, String),

    #[error("Users can't react to their own review")]
    SelfReactionForbidden,

    #[error("Only the author can modify review({0})")]
    NotAuthor(String),

    #[error("Restaurant({0}) is not approved")]
    RestaurantNotApproved(String),

    #[error("Couldn't found {0} with id({1})")]
    NotFound(&'static str, String),
}
