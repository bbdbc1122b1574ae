//! Transfers and the wallet/bank subsystem.

use guildbank_core::account::{AccountId, BankState, expanded_max};
use guildbank_core::error::{LedgerError, Result};
use guildbank_core::history::{HistoryDraft, reasons};
use guildbank_core::loan::{LoanStatus, normalize};

use crate::ledger::LedgerService;
use crate::retry::{map_sqlx, with_retry};

impl LedgerService {
    /// Bank balance and effective capacity, normalized first.
    ///
    /// # Errors
    ///
    /// Store faults only.
    pub async fn get_bank_data(&self, id: &AccountId) -> Result<BankState> {
        let account = with_retry("get_bank_data", || self.touch_tx(id)).await?;
        Ok(BankState {
            balance: account.extension.bank.balance,
            max: account.bank_max(&self.config().bank),
        })
    }

    /// Move funds from the wallet into the bank.
    ///
    /// # Errors
    ///
    /// [`LedgerError::AmountNotPositive`] for an amount ≤ 0,
    /// [`LedgerError::TransferBlocked`] while the loan is delinquent,
    /// [`LedgerError::InsufficientBalance`] when the wallet does not cover
    /// it, [`LedgerError::BankCapacityExceeded`] when it would overflow the
    /// capacity.
    pub async fn deposit(&self, id: &AccountId, amount: i64) -> Result<BankState> {
        ensure_positive(amount)?;
        with_retry("deposit", || self.deposit_tx(id, amount)).await
    }

    /// Move funds from the bank back into the wallet.
    ///
    /// # Errors
    ///
    /// [`LedgerError::AmountNotPositive`] for an amount ≤ 0,
    /// [`LedgerError::TransferBlocked`] while the loan is delinquent,
    /// [`LedgerError::InsufficientBalance`] when the bank does not cover
    /// it.
    pub async fn withdraw(&self, id: &AccountId, amount: i64) -> Result<BankState> {
        ensure_positive(amount)?;
        with_retry("withdraw", || self.withdraw_tx(id, amount)).await
    }

    /// Apply `quantity` capacity upgrade units at the given level; each
    /// unit compounds off the capacity left by the previous one. Returns
    /// the new capacity.
    ///
    /// # Errors
    ///
    /// [`LedgerError::AmountNotPositive`] for a zero quantity.
    pub async fn expand_bank_capacity(
        &self,
        id: &AccountId,
        quantity: u32,
        level: i64,
    ) -> Result<i64> {
        if quantity == 0 {
            return Err(LedgerError::AmountNotPositive {
                label: "quantity".to_string(),
            });
        }
        with_retry("expand_bank_capacity", || {
            self.expand_bank_capacity_tx(id, quantity, level)
        })
        .await
    }

    /// Move `amount` from one wallet to another, atomically.
    ///
    /// Both rows are locked (sender then recipient) and normalized inside
    /// one transaction; the debit, the credit, and both history entries
    /// commit together, so total funds are conserved.
    ///
    /// # Errors
    ///
    /// [`LedgerError::AmountNotPositive`] for an amount ≤ 0,
    /// [`LedgerError::TransferBlocked`] on self-transfer or when either
    /// party holds a loan (active or delinquent),
    /// [`LedgerError::InsufficientBalance`] when the sender's wallet does
    /// not cover it.
    pub async fn transfer(&self, from: &AccountId, to: &AccountId, amount: i64) -> Result<()> {
        ensure_positive(amount)?;
        if from == to {
            return Err(LedgerError::TransferBlocked {
                detail: "cannot transfer to the same account".to_string(),
            });
        }
        with_retry("transfer", || self.transfer_tx(from, to, amount)).await
    }

    async fn deposit_tx(&self, id: &AccountId, amount: i64) -> Result<BankState> {
        let now = self.clock().now();
        let mut tx = self.pool().begin().await.map_err(map_sqlx)?;
        let mut account = self.lock_account(&mut tx, id).await?;
        let mut outcome = normalize(&mut account, now, self.config());

        ensure_not_delinquent(&account)?;
        if account.wallet < amount {
            return Err(LedgerError::InsufficientBalance);
        }
        let max = account.bank_max(&self.config().bank);
        if account.extension.bank.balance.saturating_add(amount) > max {
            return Err(LedgerError::BankCapacityExceeded);
        }

        account.wallet -= amount;
        account.extension.bank.balance += amount;
        outcome
            .history
            .push(HistoryDraft::new(reasons::BANK_DEPOSIT, -amount));

        self.persist_account(&mut tx, &account).await?;
        self.append_history(&mut tx, id, &outcome.history, now).await?;
        tx.commit().await.map_err(map_sqlx)?;
        let bank = BankState {
            balance: account.extension.bank.balance,
            max,
        };
        self.finish(&account, outcome).await;
        Ok(bank)
    }

    async fn withdraw_tx(&self, id: &AccountId, amount: i64) -> Result<BankState> {
        let now = self.clock().now();
        let mut tx = self.pool().begin().await.map_err(map_sqlx)?;
        let mut account = self.lock_account(&mut tx, id).await?;
        let mut outcome = normalize(&mut account, now, self.config());

        ensure_not_delinquent(&account)?;
        if account.extension.bank.balance < amount {
            return Err(LedgerError::InsufficientBalance);
        }

        account.extension.bank.balance -= amount;
        account.wallet = account
            .wallet
            .checked_add(amount)
            .ok_or_else(|| LedgerError::AmountOutOfRange {
                label: "balance".to_string(),
            })?;
        outcome
            .history
            .push(HistoryDraft::new(reasons::BANK_WITHDRAW, amount));

        self.persist_account(&mut tx, &account).await?;
        self.append_history(&mut tx, id, &outcome.history, now).await?;
        tx.commit().await.map_err(map_sqlx)?;
        let bank = BankState {
            balance: account.extension.bank.balance,
            max: account.bank_max(&self.config().bank),
        };
        self.finish(&account, outcome).await;
        Ok(bank)
    }

    async fn expand_bank_capacity_tx(
        &self,
        id: &AccountId,
        quantity: u32,
        level: i64,
    ) -> Result<i64> {
        let now = self.clock().now();
        let mut tx = self.pool().begin().await.map_err(map_sqlx)?;
        let mut account = self.lock_account(&mut tx, id).await?;
        let mut outcome = normalize(&mut account, now, self.config());

        let current = account.bank_max(&self.config().bank);
        let new_max = expanded_max(current, quantity, level, &self.config().bank);
        account.extension.bank.max = new_max;
        outcome
            .history
            .push(HistoryDraft::new(reasons::BANK_EXPAND, 0));

        self.persist_account(&mut tx, &account).await?;
        self.append_history(&mut tx, id, &outcome.history, now).await?;
        tx.commit().await.map_err(map_sqlx)?;
        self.finish(&account, outcome).await;

        tracing::info!(
            account = %id,
            quantity = quantity,
            level = level,
            bank_max = new_max,
            "bank capacity expanded"
        );
        Ok(new_max)
    }

    async fn transfer_tx(&self, from: &AccountId, to: &AccountId, amount: i64) -> Result<()> {
        let now = self.clock().now();
        let mut tx = self.pool().begin().await.map_err(map_sqlx)?;

        // Sender first, then recipient; call sites always address accounts
        // in this order, so the lock order is consistent.
        let mut sender = self.lock_account(&mut tx, from).await?;
        let mut recipient = self.lock_account(&mut tx, to).await?;
        let mut sender_outcome = normalize(&mut sender, now, self.config());
        let mut recipient_outcome = normalize(&mut recipient, now, self.config());

        if sender.extension.loan.is_some() {
            return Err(LedgerError::TransferBlocked {
                detail: "sender has an outstanding loan".to_string(),
            });
        }
        if recipient.extension.loan.is_some() {
            return Err(LedgerError::TransferBlocked {
                detail: "recipient has an outstanding loan".to_string(),
            });
        }
        if sender.wallet < amount {
            return Err(LedgerError::InsufficientBalance);
        }

        sender.wallet -= amount;
        recipient.wallet = recipient
            .wallet
            .checked_add(amount)
            .ok_or_else(|| LedgerError::AmountOutOfRange {
                label: "balance".to_string(),
            })?;
        sender_outcome
            .history
            .push(HistoryDraft::new(reasons::TRANSFER_OUT, -amount));
        recipient_outcome
            .history
            .push(HistoryDraft::new(reasons::TRANSFER_IN, amount));

        self.persist_account(&mut tx, &sender).await?;
        self.persist_account(&mut tx, &recipient).await?;
        self.append_history(&mut tx, from, &sender_outcome.history, now)
            .await?;
        self.append_history(&mut tx, to, &recipient_outcome.history, now)
            .await?;
        tx.commit().await.map_err(map_sqlx)?;
        self.finish(&sender, sender_outcome).await;
        self.finish(&recipient, recipient_outcome).await;

        tracing::info!(from = %from, to = %to, amount = amount, "transfer");
        Ok(())
    }
}

fn ensure_positive(amount: i64) -> Result<()> {
    if amount <= 0 {
        return Err(LedgerError::AmountNotPositive {
            label: "amount".to_string(),
        });
    }
    Ok(())
}

fn ensure_not_delinquent(account: &guildbank_core::account::Account) -> Result<()> {
    if account
        .extension
        .loan
        .as_ref()
        .is_some_and(|loan| loan.status == LoanStatus::Delinquent)
    {
        return Err(LedgerError::TransferBlocked {
            detail: "account has a delinquent loan".to_string(),
        });
    }
    Ok(())
}
