// Copyright (c) 2020 White Leaf
//
// This software is released under the MIT License.
// https://opensource.org/licenses/MIT

mod basics;

use basics::{parse_ident, parse_number, parse_separator, parse_string};
use engine::ReactionKind;
use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::char;
use nom::combinator::{all_consuming, map, opt, value};
use nom::sequence::{delimited, preceded, tuple};
use nom::IResult;

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Statement {
    Restaurant(String),
    Review(String),
    Rate {
        author: String,
        restaurant: String,
        rating: i32,
        comment: Option<String>,
    },
    Rerate {
        review: String,
        author: String,
        rating: i32,
    },
    Comment {
        review: String,
        author: String,
        comment: String,
    },
    Unrate {
        review: String,
        author: String,
    },
    React {
        review: String,
        actor: String,
        kind: ReactionKind,
    },
    Rank(String),
    Average(String),
    AddRestaurant(String),
    Mode,
}

fn parens<'a, O, F>(inner: F) -> impl Fn(&'a str) -> IResult<&'a str, O>
where
    F: Fn(&'a str) -> IResult<&'a str, O>,
{
    delimited(char('('), inner, char(')'))
}

fn single_id<'a>(name: &'static str) -> impl Fn(&'a str) -> IResult<&'a str, String> {
    map(preceded(tag(name), parens(parse_ident)), String::from)
}

fn review_and_user(input: &str) -> IResult<&str, (String, String)> {
    map(
        tuple((parse_ident, parse_separator, parse_ident)),
        |(review, _, user): (&str, &str, &str)| (review.into(), user.into()),
    )(input)
}

fn parse_rate(input: &str) -> IResult<&str, Statement> {
    let args = tuple((
        parse_ident,
        parse_separator,
        parse_ident,
        parse_separator,
        parse_number,
        opt(preceded(parse_separator, parse_string)),
    ));

    map(
        preceded(tag("rate"), parens(args)),
        |(author, _, restaurant, _, rating, comment)| Statement::Rate {
            author: author.into(),
            restaurant: restaurant.into(),
            rating,
            comment: comment.map(String::from),
        },
    )(input)
}

fn parse_rerate(input: &str) -> IResult<&str, Statement> {
    let args = tuple((review_and_user, parse_separator, parse_number));

    map(
        preceded(tag("rerate"), parens(args)),
        |((review, author), _, rating)| Statement::Rerate {
            review,
            author,
            rating,
        },
    )(input)
}

fn parse_comment(input: &str) -> IResult<&str, Statement> {
    let args = tuple((review_and_user, parse_separator, parse_string));

    map(
        preceded(tag("comment"), parens(args)),
        |((review, author), _, comment)| Statement::Comment {
            review,
            author,
            comment: comment.into(),
        },
    )(input)
}

fn parse_unrate(input: &str) -> IResult<&str, Statement> {
    map(
        preceded(tag("unrate"), parens(review_and_user)),
        |(review, author)| Statement::Unrate { review, author },
    )(input)
}

fn parse_reaction(input: &str) -> IResult<&str, Statement> {
    let kind = alt((
        value(ReactionKind::Dislike, tag("dislike")),
        value(ReactionKind::Like, tag("like")),
    ));

    map(
        tuple((kind, parens(review_and_user))),
        |(kind, (review, actor))| Statement::React {
            review,
            actor,
            kind,
        },
    )(input)
}

fn parse_add_restaurant(input: &str) -> IResult<&str, Statement> {
    map(
        preceded(tag("add_restaurant"), parens(parse_string)),
        |name: &str| Statement::AddRestaurant(name.into()),
    )(input)
}

fn parse_statement(input: &str) -> IResult<&str, Statement> {
    alt((
        parse_add_restaurant,
        map(single_id("restaurant"), Statement::Restaurant),
        map(single_id("review"), Statement::Review),
        map(single_id("rank"), Statement::Rank),
        map(single_id("average"), Statement::Average),
        parse_rerate,
        parse_rate,
        parse_unrate,
        parse_comment,
        parse_reaction,
        value(Statement::Mode, tag("mode")),
    ))(input)
}

pub fn parse_line(input: &str) -> Option<Statement> {
    let (_, statement) = all_consuming(parse_statement)(input.trim()).ok()?;
    Some(statement)
}
