// Copyright (c) 2020 White Leaf
//
// This software is released under the MIT License.
// https://opensource.org/licenses/MIT

use thiserror::Error as DError;

#[derive(Debug, Clone, DError)]
pub enum ErrorKind {
    #[error("Couldn't found entity with id({0})")]
    NotFoundById(String),

    #[error("Invalid id({0}), expected 24 hexadecimal characters")]
    InvalidId(String),

    #[error("Transactions are not supported by this deployment")]
    TransactionsUnsupported,

    #[error("Transaction failed with a transient error: {0}")]
    TransientTransaction(String),

    #[error("No transaction is running on this session")]
    NoActiveTransaction,

    #[error("Failed to cast bson value")]
    BsonConvert,

    #[error("Failed to get database config for {0}")]
    DbConfigError(String),

    #[error("Couldn't update document with id({0})")]
    UpdateFailed(String),
}

impl ErrorKind {
    /// Whether this error only says the deployment can't run transactions
    pub fn is_capability_error(&self) -> bool {
        matches!(self, Self::TransactionsUnsupported)
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientTransaction(_))
    }
}
