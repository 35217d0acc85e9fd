//! Data models shared by the session and ledger layers.
//!
//! - `User`, `Organization`: authenticated identity
//! - `Transaction`, `TransactionType`: server-issued ledger entries
//! - `PaginatedHistory`: one page of ledger history

pub mod transaction;
pub mod user;

pub use transaction::{PaginatedHistory, Transaction, TransactionType};
pub use user::{Organization, User};

use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum Id {
    Str(String),
    Int(i64),
    Uint(u64),
}

impl From<Id> for String {
    fn from(id: Id) -> Self {
        match id {
            Id::Str(s) => s,
            Id::Int(n) => n.to_string(),
            Id::Uint(n) => n.to_string(),
        }
    }
}

/// Backends disagree on whether ids are numbers or strings; accept both.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Id::deserialize(deserializer)?.into())
}

pub(crate) fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Id>::deserialize(deserializer)?.map(String::from))
}
