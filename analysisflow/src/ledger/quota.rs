//! Prepaid quota accounts and their statement history.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::errors::FlowError;
use crate::utils::{dedupe_key, generate_serial, now_utc, Timestamp};

/// Quota balance and storage usage of one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaAccount {
    /// Owning user.
    pub user_id: String,
    /// Remaining quota units. May go negative after a debit.
    pub balance: f64,
    /// Bytes of storage in use.
    #[serde(default)]
    pub storage_used_bytes: u64,
    /// Bytes of storage the user may use.
    #[serde(default)]
    pub storage_capacity_bytes: u64,
}

impl QuotaAccount {
    /// Creates an account with a starting balance and no storage limit set.
    #[must_use]
    pub fn new(user_id: impl Into<String>, balance: f64) -> Self {
        Self {
            user_id: user_id.into(),
            balance,
            storage_used_bytes: 0,
            storage_capacity_bytes: u64::MAX,
        }
    }

    /// Sets the storage capacity.
    #[must_use]
    pub fn with_storage_capacity(mut self, bytes: u64) -> Self {
        self.storage_capacity_bytes = bytes;
        self
    }

    /// Sets the storage in use.
    #[must_use]
    pub fn with_storage_used(mut self, bytes: u64) -> Self {
        self.storage_used_bytes = bytes;
        self
    }

    /// Returns true if quota is left.
    #[must_use]
    pub fn has_quota(&self) -> bool {
        self.balance > 0.0
    }

    /// Returns true if storage is left.
    #[must_use]
    pub fn has_storage_headroom(&self) -> bool {
        self.storage_used_bytes < self.storage_capacity_bytes
    }
}

/// Who caused a statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Operator {
    /// The engine itself (metering).
    System,
    /// An administrator.
    Admin(String),
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::Admin(id) => write!(f, "admin:{id}"),
        }
    }
}

/// Kind of balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatementKind {
    /// Metered consumption of an invocation.
    Consumption,
    /// Balance top-up.
    Recharge,
    /// Manual correction.
    Adjustment,
}

/// The record a statement is linked to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedEvent {
    /// Analysis.
    pub analysis_id: String,
    /// Task, for per-invocation statements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

/// An immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaStatement {
    /// Time-ordered serial.
    pub serial: String,
    /// Account owner.
    pub user_id: String,
    /// Who caused the change.
    pub operator: Operator,
    /// Kind of change.
    pub kind: StatementKind,
    /// Balance before.
    pub original_balance: f64,
    /// Balance after.
    pub new_balance: f64,
    /// Signed change (negative for consumption).
    pub delta: f64,
    /// Linked analysis/task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_event: Option<LinkedEvent>,
    /// Key used to reject duplicate requests.
    pub dedupe_key: String,
    /// Creation time.
    pub created_at: Timestamp,
}

/// A request to charge a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebitRequest {
    /// User to charge.
    pub user_id: String,
    /// Positive amount of quota units.
    pub amount: f64,
    /// Source of the charge; one statement per source.
    pub source_id: String,
    /// Linked analysis/task.
    pub linked_event: Option<LinkedEvent>,
    /// Who charges.
    pub operator: Operator,
}

impl DebitRequest {
    /// Creates a system consumption charge for one queue entry.
    #[must_use]
    pub fn consumption(
        user_id: impl Into<String>,
        amount: f64,
        entry_id: impl Into<String>,
        linked_event: LinkedEvent,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            amount,
            source_id: entry_id.into(),
            linked_event: Some(linked_event),
            operator: Operator::System,
        }
    }

    /// Returns the dedupe key of this request.
    #[must_use]
    pub fn dedupe_key(&self) -> String {
        dedupe_key("consumption", &[&self.user_id, &self.source_id])
    }
}

/// Result of a debit.
#[derive(Debug, Clone, PartialEq)]
pub enum DebitOutcome {
    /// A new statement was recorded.
    Recorded(QuotaStatement),
    /// The source was already charged; the earlier statement is returned.
    Duplicate(QuotaStatement),
}

impl DebitOutcome {
    /// Returns the statement, new or earlier.
    #[must_use]
    pub fn statement(&self) -> &QuotaStatement {
        match self {
            Self::Recorded(s) | Self::Duplicate(s) => s,
        }
    }

    /// Returns true if this call recorded the statement.
    #[must_use]
    pub fn is_recorded(&self) -> bool {
        matches!(self, Self::Recorded(_))
    }
}

/// Quota ledger.
///
/// Every balance change writes the new balance and its statement in one
/// atomic step.
#[async_trait]
pub trait QuotaLedger: Send + Sync {
    /// Creates or replaces an account.
    async fn open_account(&self, account: QuotaAccount) -> Result<(), FlowError>;

    /// Loads an account.
    async fn account(&self, user_id: &str) -> Result<Option<QuotaAccount>, FlowError>;

    /// Charges a user once per request source.
    async fn debit(&self, request: DebitRequest) -> Result<DebitOutcome, FlowError>;

    /// Adds quota to a user's balance.
    async fn recharge(
        &self,
        user_id: &str,
        amount: f64,
        operator: Operator,
    ) -> Result<QuotaStatement, FlowError>;

    /// Records storage in use.
    async fn set_storage_used(&self, user_id: &str, bytes: u64) -> Result<(), FlowError>;

    /// Returns the statements of a user, oldest first.
    async fn statements(&self, user_id: &str) -> Result<Vec<QuotaStatement>, FlowError>;
}

#[derive(Debug, Default)]
struct LedgerState {
    accounts: HashMap<String, QuotaAccount>,
    statements: Vec<QuotaStatement>,
    by_dedupe_key: HashMap<String, usize>,
}

impl LedgerState {
    fn apply(
        &mut self,
        user_id: &str,
        delta: f64,
        kind: StatementKind,
        operator: Operator,
        linked_event: Option<LinkedEvent>,
        dedupe_key: String,
    ) -> Result<QuotaStatement, FlowError> {
        let account = self
            .accounts
            .get_mut(user_id)
            .ok_or_else(|| FlowError::not_found("quota account", user_id))?;

        // Balances move in whole cents, so the recorded delta must too.
        let delta = round_cents(delta);
        let original_balance = account.balance;
        account.balance = round_cents(original_balance + delta);

        let statement = QuotaStatement {
            serial: generate_serial(),
            user_id: user_id.to_string(),
            operator,
            kind,
            original_balance,
            new_balance: account.balance,
            delta,
            linked_event,
            dedupe_key: dedupe_key.clone(),
            created_at: now_utc(),
        };
        self.by_dedupe_key.insert(dedupe_key, self.statements.len());
        self.statements.push(statement.clone());
        Ok(statement)
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// In-memory ledger guarded by a single lock.
#[derive(Debug, Default)]
pub struct InMemoryQuotaLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryQuotaLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ledger with accounts already opened.
    #[must_use]
    pub fn with_accounts(accounts: impl IntoIterator<Item = QuotaAccount>) -> Self {
        let ledger = Self::new();
        {
            let mut state = ledger.state.lock();
            for account in accounts {
                state.accounts.insert(account.user_id.clone(), account);
            }
        }
        ledger
    }

    /// Returns the total number of statements.
    #[must_use]
    pub fn statement_count(&self) -> usize {
        self.state.lock().statements.len()
    }
}

#[async_trait]
impl QuotaLedger for InMemoryQuotaLedger {
    async fn open_account(&self, account: QuotaAccount) -> Result<(), FlowError> {
        self.state
            .lock()
            .accounts
            .insert(account.user_id.clone(), account);
        Ok(())
    }

    async fn account(&self, user_id: &str) -> Result<Option<QuotaAccount>, FlowError> {
        Ok(self.state.lock().accounts.get(user_id).cloned())
    }

    async fn debit(&self, request: DebitRequest) -> Result<DebitOutcome, FlowError> {
        if !request.amount.is_finite() || request.amount <= 0.0 {
            return Err(FlowError::invalid_state(
                "debit",
                &request.source_id,
                format!("amount must be positive, got {}", request.amount),
            ));
        }
        let key = request.dedupe_key();

        let mut state = self.state.lock();
        if let Some(&index) = state.by_dedupe_key.get(&key) {
            return Ok(DebitOutcome::Duplicate(state.statements[index].clone()));
        }
        let statement = state.apply(
            &request.user_id,
            -request.amount,
            StatementKind::Consumption,
            request.operator,
            request.linked_event,
            key,
        )?;
        Ok(DebitOutcome::Recorded(statement))
    }

    async fn recharge(
        &self,
        user_id: &str,
        amount: f64,
        operator: Operator,
    ) -> Result<QuotaStatement, FlowError> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(FlowError::invalid_state(
                "recharge",
                user_id,
                format!("amount must be positive, got {amount}"),
            ));
        }
        let serial_key = dedupe_key("recharge", &[user_id, &generate_serial()]);
        self.state
            .lock()
            .apply(user_id, amount, StatementKind::Recharge, operator, None, serial_key)
    }

    async fn set_storage_used(&self, user_id: &str, bytes: u64) -> Result<(), FlowError> {
        let mut state = self.state.lock();
        let account = state
            .accounts
            .get_mut(user_id)
            .ok_or_else(|| FlowError::not_found("quota account", user_id))?;
        account.storage_used_bytes = bytes;
        Ok(())
    }

    async fn statements(&self, user_id: &str) -> Result<Vec<QuotaStatement>, FlowError> {
        Ok(self
            .state
            .lock()
            .statements
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn linked() -> LinkedEvent {
        LinkedEvent {
            analysis_id: "a1".into(),
            task_id: Some("t1".into()),
        }
    }

    #[tokio::test]
    async fn test_debit_records_statement() {
        let ledger = InMemoryQuotaLedger::with_accounts([QuotaAccount::new("u1", 10.0)]);

        let outcome = ledger
            .debit(DebitRequest::consumption("u1", 1.25, "e1", linked()))
            .await
            .unwrap();

        assert!(outcome.is_recorded());
        let statement = outcome.statement();
        assert!((statement.original_balance - 10.0).abs() < f64::EPSILON);
        assert!((statement.new_balance - 8.75).abs() < f64::EPSILON);
        assert!((statement.delta + 1.25).abs() < f64::EPSILON);
        assert_eq!(statement.kind, StatementKind::Consumption);
        assert_eq!(statement.operator, Operator::System);
    }

    #[tokio::test]
    async fn test_debit_is_deduplicated() {
        let ledger = InMemoryQuotaLedger::with_accounts([QuotaAccount::new("u1", 10.0)]);
        let request = DebitRequest::consumption("u1", 1.0, "e1", linked());

        let first = ledger.debit(request.clone()).await.unwrap();
        let second = ledger.debit(request).await.unwrap();

        assert!(!second.is_recorded());
        assert_eq!(first.statement().serial, second.statement().serial);
        assert_eq!(ledger.statement_count(), 1);
        let balance = ledger.account("u1").await.unwrap().unwrap().balance;
        assert!((balance - 9.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_concurrent_debits_keep_balance_and_statements_consistent() {
        let ledger = Arc::new(InMemoryQuotaLedger::with_accounts([QuotaAccount::new("u1", 100.0)]));
        let handles: Vec<_> = (0..20)
            .map(|i| {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    ledger
                        .debit(DebitRequest::consumption("u1", 0.5, format!("e{}", i % 10), linked()))
                        .await
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let statements = ledger.statements("u1").await.unwrap();
        assert_eq!(statements.len(), 10);
        let balance = ledger.account("u1").await.unwrap().unwrap().balance;
        assert!((balance - 95.0).abs() < 1e-9);
        for pair in statements.windows(2) {
            assert!((pair[0].new_balance - pair[1].original_balance).abs() < 1e-9);
            assert!(pair[0].serial < pair[1].serial);
        }
    }

    #[tokio::test]
    async fn test_debit_may_go_negative() {
        let ledger = InMemoryQuotaLedger::with_accounts([QuotaAccount::new("u1", 0.5)]);
        ledger
            .debit(DebitRequest::consumption("u1", 2.0, "e1", linked()))
            .await
            .unwrap();
        let account = ledger.account("u1").await.unwrap().unwrap();
        assert!(account.balance < 0.0);
        assert!(!account.has_quota());
    }

    #[tokio::test]
    async fn test_debit_unknown_user_and_bad_amount() {
        let ledger = InMemoryQuotaLedger::new();
        let err = ledger
            .debit(DebitRequest::consumption("ghost", 1.0, "e1", linked()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT-FOUND");

        let err = ledger
            .debit(DebitRequest::consumption("ghost", 0.0, "e1", linked()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID-STATE");
        assert_eq!(ledger.statement_count(), 0);
    }

    #[tokio::test]
    async fn test_recharge() {
        let ledger = InMemoryQuotaLedger::with_accounts([QuotaAccount::new("u1", 0.0)]);
        let statement = ledger
            .recharge("u1", 5.0, Operator::Admin("root".into()))
            .await
            .unwrap();
        assert_eq!(statement.kind, StatementKind::Recharge);
        assert_eq!(statement.operator.to_string(), "admin:root");
        assert!(ledger.account("u1").await.unwrap().unwrap().has_quota());
    }

    #[tokio::test]
    async fn test_sub_cent_amounts_keep_statement_arithmetic() {
        let ledger = InMemoryQuotaLedger::with_accounts([QuotaAccount::new("u1", 10.0)]);
        let recharge = ledger
            .recharge("u1", 0.004_9, Operator::System)
            .await
            .unwrap();
        let debit = ledger
            .debit(DebitRequest::consumption("u1", 0.123_456, "e1", linked()))
            .await
            .unwrap();

        for statement in [&recharge, debit.statement()] {
            assert!(
                (statement.original_balance + statement.delta - statement.new_balance).abs() < 1e-9,
                "{statement:?}"
            );
        }
        assert!(recharge.delta.abs() < 1e-9);
        assert!((debit.statement().delta + 0.12).abs() < 1e-9);
        let balance = ledger.account("u1").await.unwrap().unwrap().balance;
        assert!((balance - 9.88).abs() < 1e-9);
    }

    #[test]
    fn test_storage_headroom() {
        let account = QuotaAccount::new("u1", 1.0)
            .with_storage_capacity(100)
            .with_storage_used(100);
        assert!(!account.has_storage_headroom());
        assert!(QuotaAccount::new("u1", 1.0).has_storage_headroom());
    }
}
