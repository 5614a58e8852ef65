//! Like/dislike toggling on reviews.

use crate::error::ErrorKind;
use controller::{Id, Reactions, Review};
use std::fmt::{self, Display};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ReactionKind {
    Like,
    Dislike,
}

impl FromStr for ReactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "like" => Ok(Self::Like),
            "dislike" => Ok(Self::Dislike),
            other => Err(format!("Unknown reaction '{}'", other)),
        }
    }
}

impl Display for ReactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReactionKind::Like => write!(f, "like"),
            ReactionKind::Dislike => write!(f, "dislike"),
        }
    }
}

/// Reaction of one user on one review
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ReactionState {
    NoReaction,
    Liked,
    Disliked,
}

impl ReactionState {
    pub fn of(reactions: &Reactions, user: &Id) -> Self {
        if reactions.liked_by().contains(user) {
            Self::Liked
        } else if reactions.disliked_by().contains(user) {
            Self::Disliked
        } else {
            Self::NoReaction
        }
    }

    /// Repeating the current reaction removes it, anything else switches to it
    pub fn next(self, kind: ReactionKind) -> Self {
        match (self, kind) {
            (Self::Liked, ReactionKind::Like) | (Self::Disliked, ReactionKind::Dislike) => {
                Self::NoReaction
            }
            (_, ReactionKind::Like) => Self::Liked,
            (_, ReactionKind::Dislike) => Self::Disliked,
        }
    }
}

/// Compute the reactions of `review` after `actor` toggles `kind`.
///
/// The result holds both sets, so persisting it is a single update whatever
/// the transition was.
pub fn toggle(review: &Review, actor: &Id, kind: ReactionKind) -> Result<Reactions, ErrorKind> {
    if &review.author == actor {
        return Err(ErrorKind::SelfReactionForbidden);
    }

    let mut reactions = review.reactions.clone();
    match ReactionState::of(&reactions, actor).next(kind) {
        ReactionState::NoReaction => reactions.clear(actor),
        ReactionState::Liked => reactions.set_liked(actor),
        ReactionState::Disliked => reactions.set_disliked(actor),
    }

    Ok(reactions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Error;
    use chrono::Utc;
    use common_macros::b_tree_set;

    fn review_by(author: u64) -> Review {
        Review {
            id: Id::from_counter(1),
            restaurant: Id::from_counter(2),
            author: Id::from_counter(author),
            rating: 4,
            comment: None,
            reactions: Reactions::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn transitions() {
        use ReactionKind::*;
        use ReactionState::*;

        assert_eq!(NoReaction.next(Like), Liked);
        assert_eq!(NoReaction.next(Dislike), Disliked);
        assert_eq!(Liked.next(Like), NoReaction);
        assert_eq!(Disliked.next(Dislike), NoReaction);
        assert_eq!(Liked.next(Dislike), Disliked);
        assert_eq!(Disliked.next(Like), Liked);
    }

    #[test]
    fn like_then_switch_to_dislike() -> Result<(), Error> {
        let mut review = review_by(10);
        let actor = Id::from_counter(20);

        review.reactions = toggle(&review, &actor, ReactionKind::Like)?;
        assert_eq!(review.reactions.liked_by(), &b_tree_set! { actor.clone() });
        assert_eq!(review.like_count(), 1);

        review.reactions = toggle(&review, &actor, ReactionKind::Dislike)?;
        assert!(review.reactions.liked_by().is_empty());
        assert_eq!(review.reactions.disliked_by(), &b_tree_set! { actor.clone() });
        assert_eq!((review.like_count(), review.dislike_count()), (0, 1));

        Ok(())
    }

    #[test]
    fn even_toggles_restore_the_review() -> Result<(), Error> {
        let original = review_by(10);
        let actor = Id::from_counter(20);

        let mut review = original.clone();
        for _ in 0..4 {
            review.reactions = toggle(&review, &actor, ReactionKind::Like)?;
        }

        assert_eq!(review.reactions, original.reactions);

        Ok(())
    }

    #[test]
    fn authors_cannot_react() {
        let review = review_by(10);
        let author = review.author.clone();

        assert_eq!(
            toggle(&review, &author, ReactionKind::Like),
            Err(ErrorKind::SelfReactionForbidden)
        );
        assert_eq!(
            toggle(&review, &author, ReactionKind::Dislike),
            Err(ErrorKind::SelfReactionForbidden)
        );
    }

    #[test]
    fn parse_kinds() {
        assert_eq!("like".parse(), Ok(ReactionKind::Like));
        assert_eq!("dislike".parse(), Ok(ReactionKind::Dislike));
        assert!("love".parse::<ReactionKind>().is_err());
    }
}
