use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{opt_string_or_number, string_or_number};

/// Kind of ledger entry. Unrecognized server values parse as `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub enum TransactionType {
    Spend,
    Add,
    Bonus,
    Refund,
    Manual,
    Cancelled,
    #[serde(other)]
    Other,
}

impl TransactionType {
    /// Types accepted by the `add` operation.
    pub fn is_credit(&self) -> bool {
        matches!(
            self,
            TransactionType::Add
                | TransactionType::Bonus
                | TransactionType::Refund
                | TransactionType::Manual
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Spend => "spend",
            TransactionType::Add => "add",
            TransactionType::Bonus => "bonus",
            TransactionType::Refund => "refund",
            TransactionType::Manual => "manual",
            TransactionType::Cancelled => "cancelled",
            TransactionType::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "spend" => Some(TransactionType::Spend),
            "add" => Some(TransactionType::Add),
            "bonus" => Some(TransactionType::Bonus),
            "refund" => Some(TransactionType::Refund),
            "manual" => Some(TransactionType::Manual),
            "cancelled" => Some(TransactionType::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Immutable server-issued ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct Transaction {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    /// Magnitude; the sign is implied by `kind`.
    pub amount: i64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub reference_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub balance_after: Option<i64>,
}

impl Transaction {
    pub fn signed_amount(&self) -> i64 {
        match self.kind {
            TransactionType::Spend => -self.amount.abs(),
            _ => self.amount.abs(),
        }
    }

    pub fn display_amount(&self) -> String {
        format!("{:+}", self.signed_amount())
    }
}

/// One page of history. Each fetch replaces the previous page outright.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct PaginatedHistory {
    pub transactions: Vec<Transaction>,
    pub page: u32,
    pub total_pages: u32,
    pub total_count: u64,
}

impl PaginatedHistory {
    /// Build a page, ordering transactions newest first. The server's order
    /// is not relied on.
    pub fn new(mut transactions: Vec<Transaction>, page: u32, page_size: u32, total_count: u64) -> Self {
        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total_pages = total_count.div_ceil(u64::from(page_size.max(1)));
        Self {
            transactions,
            page,
            total_pages: u32::try_from(total_pages).unwrap_or(u32::MAX),
            total_count,
        }
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }
}
