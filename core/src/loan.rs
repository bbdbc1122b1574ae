//! Loan state machine and lazy normalization.
//!
//! There is no scheduler: loan state is re-evaluated by [`normalize`] at the
//! top of every ledger transaction that touches the account. The function is
//! pure over an injected `now`, which keeps every transition reachable from
//! a test with a fixed clock.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::account::{Account, AccountId};
use crate::config::EconomyConfig;
use crate::history::{HistoryDraft, reasons};

/// Loan state. Absence of a [`Loan`] means "none".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    /// Running and not yet due.
    Active,
    /// Missed its due date; debt inflated and actively swept.
    Delinquent,
}

/// A loan embedded in an account's extension column.
///
/// Timestamps are encoded as epoch milliseconds in the JSON column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loan {
    /// Current state.
    pub status: LoanStatus,
    /// Amount originally credited to the wallet.
    pub principal: i64,
    /// Outstanding amount owed; strictly positive while the loan exists.
    pub debt: i64,
    /// Interest charged at take time, in basis points of the principal.
    pub interest_rate_bps: u32,
    /// Penalty applied to the debt on delinquency, in basis points.
    pub overdue_penalty_bps: u32,
    /// When the loan falls due.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub due_at: DateTime<Utc>,
    /// When the loan was taken.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub taken_at: DateTime<Utc>,
    /// When the loan turned delinquent, if it did.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub defaulted_at: Option<DateTime<Utc>>,
    /// Set once the near-due reminder has been emitted.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub near_due_notified_at: Option<DateTime<Utc>>,
    /// Set once the overdue notice has been emitted.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub overdue_notified_at: Option<DateTime<Utc>>,
    /// Which product was taken.
    pub option_id: String,
}

impl Loan {
    /// Open a loan from a configured product.
    #[must_use]
    pub fn open(option: &LoanOption, now: DateTime<Utc>) -> Self {
        Self {
            status: LoanStatus::Active,
            principal: option.principal,
            debt: option.total_debt(),
            interest_rate_bps: option.interest_bps,
            overdue_penalty_bps: option.overdue_penalty_bps,
            due_at: now + Duration::days(option.duration_days),
            taken_at: now,
            defaulted_at: None,
            near_due_notified_at: None,
            overdue_notified_at: None,
            option_id: option.id.clone(),
        }
    }
}

/// A configured loan product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanOption {
    /// Product id referenced by `take_loan`.
    pub id: String,
    /// Amount credited to the wallet.
    pub principal: i64,
    /// Days until the loan falls due.
    pub duration_days: i64,
    /// Interest in basis points of the principal.
    pub interest_bps: u32,
    /// Delinquency penalty in basis points of the outstanding debt.
    pub overdue_penalty_bps: u32,
}

impl LoanOption {
    /// Define a loan product.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        principal: i64,
        duration_days: i64,
        interest_bps: u32,
        overdue_penalty_bps: u32,
    ) -> Self {
        Self {
            id: id.into(),
            principal,
            duration_days,
            interest_bps,
            overdue_penalty_bps,
        }
    }

    /// Interest owed on top of the principal.
    #[must_use]
    pub fn interest(&self) -> i64 {
        bps_share(self.principal, self.interest_bps)
    }

    /// Principal plus interest: the debt created at take time.
    #[must_use]
    pub fn total_debt(&self) -> i64 {
        self.principal.saturating_add(self.interest())
    }
}

/// Notification produced by normalization, relayed to the user exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoanEvent {
    /// The loan falls due within the configured window.
    NearDue {
        /// Affected account.
        id: AccountId,
        /// When the loan falls due.
        due_at: DateTime<Utc>,
        /// Outstanding debt.
        debt: i64,
    },
    /// The loan crossed its due date and turned delinquent.
    Overdue {
        /// Affected account.
        id: AccountId,
        /// Debt after the penalty.
        debt: i64,
        /// Penalty that was added.
        penalty: i64,
    },
}

/// What [`normalize`] did to the account.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct NormalizeOutcome {
    /// Whether the account must be re-persisted.
    pub changed: bool,
    /// Reminder notifications to relay after commit.
    pub events: Vec<LoanEvent>,
    /// Audit entries to append in the same transaction.
    pub history: Vec<HistoryDraft>,
}

/// Re-evaluate the account's loan against `now`.
///
/// An `Active` loan past its due date turns `Delinquent`: the debt is
/// inflated by the overdue penalty and wallet then bank funds are swept
/// toward it, clamped so neither balance goes negative and at most the debt
/// is consumed. A loan whose debt reaches zero is removed. Reminder events
/// are emitted at most once each, guarded by the persisted markers.
pub fn normalize(account: &mut Account, now: DateTime<Utc>, config: &EconomyConfig) -> NormalizeOutcome {
    let mut outcome = NormalizeOutcome::default();
    let Some(mut loan) = account.extension.loan.take() else {
        return outcome;
    };

    if loan.status == LoanStatus::Active && now > loan.due_at {
        let penalty = bps_share(loan.debt, loan.overdue_penalty_bps);
        loan.debt = loan.debt.saturating_add(penalty);
        loan.status = LoanStatus::Delinquent;
        loan.defaulted_at = Some(now);
        outcome.changed = true;
        outcome
            .history
            .push(HistoryDraft::new(reasons::LOAN_OVERDUE, 0));
        if loan.overdue_notified_at.is_none() {
            loan.overdue_notified_at = Some(now);
            outcome.events.push(LoanEvent::Overdue {
                id: account.id.clone(),
                debt: loan.debt,
                penalty,
            });
        }
        tracing::info!(
            account = %account.id,
            debt = loan.debt,
            penalty = penalty,
            "loan turned delinquent"
        );
    } else if loan.status == LoanStatus::Active
        && loan.near_due_notified_at.is_none()
        && loan.due_at - now <= config.loan.near_due_window
    {
        loan.near_due_notified_at = Some(now);
        outcome.changed = true;
        outcome.events.push(LoanEvent::NearDue {
            id: account.id.clone(),
            due_at: loan.due_at,
            debt: loan.debt,
        });
    }

    if loan.status == LoanStatus::Delinquent {
        let from_wallet = account.wallet.min(loan.debt).max(0);
        if from_wallet > 0 {
            account.wallet -= from_wallet;
            loan.debt -= from_wallet;
            outcome.changed = true;
            outcome
                .history
                .push(HistoryDraft::new(reasons::LOAN_SWEEP_WALLET, -from_wallet));
        }
        let from_bank = account.extension.bank.balance.min(loan.debt).max(0);
        if from_bank > 0 {
            account.extension.bank.balance -= from_bank;
            loan.debt -= from_bank;
            outcome.changed = true;
            outcome
                .history
                .push(HistoryDraft::new(reasons::LOAN_SWEEP_BANK, -from_bank));
        }
    }

    if loan.debt <= 0 {
        outcome.changed = true;
        outcome
            .history
            .push(HistoryDraft::new(reasons::LOAN_CLEARED, 0));
    } else {
        account.extension.loan = Some(loan);
    }

    outcome
}

/// How a voluntary loan payment splits across wallet and bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaymentPlan {
    /// Portion drawn from the wallet.
    pub from_wallet: i64,
    /// Portion drawn from the bank.
    pub from_bank: i64,
}

impl PaymentPlan {
    /// Total payment.
    #[must_use]
    pub const fn total(&self) -> i64 {
        self.from_wallet + self.from_bank
    }
}

/// Plan a payment of `requested` (or everything affordable when `None`),
/// capped at the outstanding debt and the total available funds, drawn from
/// the wallet first.
#[must_use]
pub fn plan_payment(wallet: i64, bank: i64, debt: i64, requested: Option<i64>) -> PaymentPlan {
    let cap = requested
        .unwrap_or(i64::MAX)
        .min(debt)
        .min(wallet.saturating_add(bank))
        .max(0);
    let from_wallet = wallet.min(cap);
    let from_bank = (cap - from_wallet).min(bank);
    PaymentPlan {
        from_wallet,
        from_bank,
    }
}

/// Share of `base` expressed in basis points, floored.
pub(crate) fn bps_share(base: i64, bps: u32) -> i64 {
    let share = i128::from(base) * i128::from(bps) / 10_000;
    i64::try_from(share).unwrap_or(i64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::account::AccountId;
    use crate::config::LoanConfig;
    use chrono::TimeZone;

    fn starter_option() -> LoanOption {
        // principal 500, 1 day, 10% interest, 10% overdue penalty
        LoanOption::new("starter", 500, 1, 1_000, 1_000)
    }

    fn config() -> EconomyConfig {
        EconomyConfig::default().with_loan(LoanConfig::new(vec![starter_option()]))
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn account_with_loan(wallet: i64, bank: i64, loan: Loan) -> Account {
        let mut account = Account::new(AccountId::new("u1", "c1"), 0);
        account.wallet = wallet;
        account.extension.bank.balance = bank;
        account.extension.loan = Some(loan);
        account
    }

    #[test]
    fn no_loan_is_a_no_op() {
        let mut account = Account::new(AccountId::new("u1", "c1"), 250);
        let outcome = normalize(&mut account, now(), &config());
        assert_eq!(outcome, NormalizeOutcome::default());
        assert_eq!(account.wallet, 250);
    }

    #[test]
    fn active_loan_before_window_is_untouched() {
        let loan = Loan::open(&LoanOption::new("starter", 500, 3, 1_000, 1_000), now());
        let mut account = account_with_loan(100, 0, loan.clone());
        let outcome = normalize(&mut account, now(), &config());
        assert!(!outcome.changed);
        assert!(outcome.events.is_empty());
        assert_eq!(account.extension.loan, Some(loan));
    }

    #[test]
    fn near_due_fires_once() {
        let loan = Loan::open(&starter_option(), now());
        let mut account = account_with_loan(0, 0, loan);
        let later = now() + Duration::hours(1); // due in 23h, inside 24h window

        let outcome = normalize(&mut account, later, &config());
        assert!(outcome.changed);
        assert!(matches!(outcome.events.as_slice(), [LoanEvent::NearDue { debt: 550, .. }]));

        let again = normalize(&mut account, later + Duration::hours(1), &config());
        assert!(again.events.is_empty());
    }

    #[test]
    fn delinquency_applies_penalty_and_sweeps_wallet_then_bank() {
        // debt 550, penalty 10% -> 605; wallet 400 + bank 300 covers it
        let loan = Loan::open(&starter_option(), now());
        let mut account = account_with_loan(400, 300, loan);
        let past_due = now() + Duration::days(2);

        let outcome = normalize(&mut account, past_due, &config());

        assert!(outcome.changed);
        assert!(matches!(
            outcome.events.as_slice(),
            [LoanEvent::Overdue { debt: 605, penalty: 55, .. }]
        ));
        assert_eq!(account.wallet, 0);
        assert_eq!(account.extension.bank.balance, 95); // 300 - (605 - 400)
        assert!(account.extension.loan.is_none());
        let tags: Vec<&str> = outcome.history.iter().map(|h| h.reason.as_str()).collect();
        assert_eq!(
            tags,
            [
                reasons::LOAN_OVERDUE,
                reasons::LOAN_SWEEP_WALLET,
                reasons::LOAN_SWEEP_BANK,
                reasons::LOAN_CLEARED
            ]
        );
        assert_eq!(outcome.history[1].amount, -400);
        assert_eq!(outcome.history[2].amount, -205);
    }

    #[test]
    fn partial_sweep_leaves_the_loan_delinquent() {
        let loan = Loan::open(&starter_option(), now());
        let mut account = account_with_loan(100, 50, loan);
        let past_due = now() + Duration::days(2);

        let outcome = normalize(&mut account, past_due, &config());

        let remaining = account.extension.loan.clone().unwrap();
        assert_eq!(remaining.status, LoanStatus::Delinquent);
        assert_eq!(remaining.debt, 455); // 605 - 150
        assert_eq!(account.wallet, 0);
        assert_eq!(account.extension.bank.balance, 0);
        assert_eq!(outcome.events.len(), 1);

        // Re-normalizing emits no second overdue notice.
        let again = normalize(&mut account, past_due + Duration::hours(1), &config());
        assert!(again.events.is_empty());
        assert!(!again.changed);
    }

    #[test]
    fn large_wallet_absorbs_the_whole_penalized_debt() {
        // wallet 1420 with debt 550 -> penalty brings debt to 605,
        // sweep leaves wallet 815 and no loan.
        let loan = Loan::open(&starter_option(), now());
        let mut account = account_with_loan(1_420, 0, loan);

        let outcome = normalize(&mut account, now() + Duration::days(2), &config());

        assert_eq!(account.wallet, 815);
        assert_eq!(account.extension.bank.balance, 0);
        assert!(account.extension.loan.is_none());
        assert!(matches!(
            outcome.events.as_slice(),
            [LoanEvent::Overdue { debt: 605, penalty: 55, .. }]
        ));
    }

    #[test]
    fn payment_plan_draws_wallet_first() {
        assert_eq!(
            plan_payment(100, 200, 250, None),
            PaymentPlan { from_wallet: 100, from_bank: 150 }
        );
        assert_eq!(
            plan_payment(100, 200, 250, Some(120)),
            PaymentPlan { from_wallet: 100, from_bank: 20 }
        );
        // Capped at the debt even when more was requested and available.
        assert_eq!(
            plan_payment(500, 0, 50, Some(400)),
            PaymentPlan { from_wallet: 50, from_bank: 0 }
        );
        // Nothing available.
        assert_eq!(
            plan_payment(0, 0, 50, None),
            PaymentPlan { from_wallet: 0, from_bank: 0 }
        );
    }

    #[test]
    fn bps_share_floors() {
        assert_eq!(bps_share(500, 1_000), 50);
        assert_eq!(bps_share(999, 1), 0); // 0.0999 floors to 0
        assert_eq!(bps_share(i64::MAX, 10_000), i64::MAX);
    }

    #[test]
    fn loan_json_uses_epoch_millis() {
        let loan = Loan::open(&starter_option(), now());
        let value = serde_json::to_value(&loan).unwrap();
        assert_eq!(value["taken_at"], serde_json::json!(now().timestamp_millis()));
        assert_eq!(value["status"], serde_json::json!("active"));
        assert!(value.get("defaulted_at").is_none());

        let back: Loan = serde_json::from_value(value).unwrap();
        assert_eq!(back, loan);
    }
}
