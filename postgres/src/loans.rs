//! Loan lifecycle operations.

use guildbank_core::account::AccountId;
use guildbank_core::error::{LedgerError, Result};
use guildbank_core::history::{HistoryDraft, reasons};
use guildbank_core::loan::{Loan, LoanOption, plan_payment};

use crate::ledger::LedgerService;
use crate::retry::{map_sqlx, with_retry};

/// Outcome of a voluntary loan payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoanPayment {
    /// Amount actually paid (wallet plus bank).
    pub paid: i64,
    /// Debt still outstanding; zero means the loan is gone.
    pub remaining_debt: i64,
}

impl LedgerService {
    /// The configured loan products.
    #[must_use]
    pub fn get_loan_options(&self) -> &[LoanOption] {
        &self.config().loan.options
    }

    /// Current loan state, normalized first.
    ///
    /// # Errors
    ///
    /// Store faults only.
    pub async fn get_loan_state(&self, id: &AccountId) -> Result<Option<Loan>> {
        let account = with_retry("get_loan_state", || self.touch_tx(id)).await?;
        Ok(account.extension.loan)
    }

    /// Take a loan: credit the principal to the wallet and open the debt.
    ///
    /// # Errors
    ///
    /// [`LedgerError::LoanOptionInvalid`] for an unknown product,
    /// [`LedgerError::LoanAlreadyActive`] when a loan survives
    /// normalization.
    pub async fn take_loan(&self, id: &AccountId, option_id: &str) -> Result<Loan> {
        let option = self
            .config()
            .loan
            .option(option_id)
            .ok_or_else(|| LedgerError::LoanOptionInvalid {
                option_id: option_id.to_string(),
            })?
            .clone();
        with_retry("take_loan", || self.take_loan_tx(id, &option)).await
    }

    async fn take_loan_tx(&self, id: &AccountId, option: &LoanOption) -> Result<Loan> {
        let now = self.clock().now();
        let mut tx = self.pool().begin().await.map_err(map_sqlx)?;
        let mut account = self.lock_account(&mut tx, id).await?;
        let mut outcome = guildbank_core::loan::normalize(&mut account, now, self.config());

        if account.extension.loan.is_some() {
            return Err(LedgerError::LoanAlreadyActive);
        }

        let loan = Loan::open(option, now);
        account.wallet = account
            .wallet
            .checked_add(option.principal)
            .ok_or_else(|| LedgerError::AmountOutOfRange {
                label: "balance".to_string(),
            })?;
        account.extension.loan = Some(loan.clone());
        outcome
            .history
            .push(HistoryDraft::new(reasons::LOAN_TAKE, option.principal).with_item(&option.id));

        self.persist_account(&mut tx, &account).await?;
        self.append_history(&mut tx, id, &outcome.history, now).await?;
        tx.commit().await.map_err(map_sqlx)?;
        self.finish(&account, outcome).await;

        tracing::info!(
            account = %id,
            option = %option.id,
            principal = option.principal,
            debt = loan.debt,
            "loan taken"
        );
        metrics::counter!("ledger.loan.taken").increment(1);
        Ok(loan)
    }

    /// Pay down the loan. `amount: None` means "pay everything affordable".
    ///
    /// Payment is drawn from the wallet first, then the bank, capped at the
    /// lesser of the requested amount, the outstanding debt, and the total
    /// available funds. Debt reaching zero removes the loan.
    ///
    /// # Errors
    ///
    /// [`LedgerError::AmountNotPositive`] for a requested amount ≤ 0,
    /// [`LedgerError::NoActiveLoan`] without a loan,
    /// [`LedgerError::NoFundsAvailable`] when wallet and bank are both
    /// empty.
    pub async fn pay_loan(&self, id: &AccountId, amount: Option<i64>) -> Result<LoanPayment> {
        if let Some(requested) = amount {
            if requested <= 0 {
                return Err(LedgerError::AmountNotPositive {
                    label: "amount".to_string(),
                });
            }
        }
        with_retry("pay_loan", || self.pay_loan_tx(id, amount)).await
    }

    async fn pay_loan_tx(&self, id: &AccountId, amount: Option<i64>) -> Result<LoanPayment> {
        let now = self.clock().now();
        let mut tx = self.pool().begin().await.map_err(map_sqlx)?;
        let mut account = self.lock_account(&mut tx, id).await?;
        let mut outcome = guildbank_core::loan::normalize(&mut account, now, self.config());

        let Some(mut loan) = account.extension.loan.take() else {
            return Err(LedgerError::NoActiveLoan);
        };

        let plan = plan_payment(
            account.wallet,
            account.extension.bank.balance,
            loan.debt,
            amount,
        );
        if plan.total() == 0 {
            return Err(LedgerError::NoFundsAvailable);
        }

        account.wallet -= plan.from_wallet;
        account.extension.bank.balance -= plan.from_bank;
        loan.debt -= plan.total();
        if plan.from_wallet > 0 {
            outcome
                .history
                .push(HistoryDraft::new(reasons::LOAN_PAYMENT, -plan.from_wallet));
        }
        if plan.from_bank > 0 {
            outcome.history.push(HistoryDraft::new(
                reasons::LOAN_PAYMENT_BANK,
                -plan.from_bank,
            ));
        }

        let remaining_debt = loan.debt;
        if loan.debt > 0 {
            account.extension.loan = Some(loan);
        } else {
            outcome
                .history
                .push(HistoryDraft::new(reasons::LOAN_CLEARED, 0));
        }

        self.persist_account(&mut tx, &account).await?;
        self.append_history(&mut tx, id, &outcome.history, now).await?;
        tx.commit().await.map_err(map_sqlx)?;
        self.finish(&account, outcome).await;

        tracing::info!(
            account = %id,
            paid = plan.total(),
            remaining_debt = remaining_debt,
            "loan payment"
        );
        Ok(LoanPayment {
            paid: plan.total(),
            remaining_debt,
        })
    }
}
