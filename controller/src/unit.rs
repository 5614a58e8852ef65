// Copyright (c) 2020 White Leaf
//
// This software is released under the MIT License.
// https://opensource.org/licenses/MIT

/// The unit of work a store call belongs to.
///
/// All calls of one logical operation receive the same unit, so either every
/// write lands in the session's transaction or none does.
#[derive(Debug)]
pub enum Unit<'s, S> {
    NoTransaction,
    InSession(&'s mut S),
}

impl<'s, S> Unit<'s, S> {
    pub fn is_atomic(&self) -> bool {
        matches!(self, Self::InSession(_))
    }
}
