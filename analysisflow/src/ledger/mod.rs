//! Quota ledger: prepaid balances, immutable statements, atomic debits.

mod admission;
mod quota;

pub use admission::LedgerAdmission;
pub use quota::{
    DebitOutcome, DebitRequest, InMemoryQuotaLedger, LinkedEvent, Operator, QuotaAccount,
    QuotaLedger, QuotaStatement, StatementKind,
};
