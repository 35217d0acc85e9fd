use serde::Serialize;

use crate::models::PaginatedHistory;

/// Client-side cache of ledger values. Only a UI hint; the backend is the authority.
#[derive(Debug, Clone, Default)]
pub struct LedgerState {
    /// Last balance the backend returned. `None` until first fetched.
    pub balance: Option<i64>,
    /// Locally computed post-mutation balance, used only when the backend did
    /// not report one. Replaced by the next authoritative fetch.
    pub provisional_balance: Option<i64>,
    /// The most recently fetched history page.
    pub history: Option<PaginatedHistory>,
    pub last_error: Option<String>,
}

impl LedgerState {
    pub fn record_balance(&mut self, balance: i64) {
        self.balance = Some(balance);
        self.provisional_balance = None;
        self.last_error = None;
    }

    /// Best value to show right now: provisional if one is pending.
    pub fn display_balance(&self) -> Option<i64> {
        self.provisional_balance.or(self.balance)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceReport {
    pub balance: i64,
}

/// Result of a spend/add.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationReceipt {
    pub new_balance: Option<i64>,
    /// True when `new_balance` was computed locally instead of reported by the backend.
    pub provisional: bool,
}
