//! The ledger service: accounts, balances, audit history.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use guildbank_core::account::{Account, AccountId};
use guildbank_core::config::EconomyConfig;
use guildbank_core::environment::{Clock, SystemClock};
use guildbank_core::error::{LedgerError, Result};
use guildbank_core::history::{HistoryDraft, HistoryEntry, reasons};
use guildbank_core::loan::{LoanEvent, LoanStatus, NormalizeOutcome, normalize};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::cache::AccountCache;
use crate::retry::{map_sqlx, with_retry};

const CACHE_TTL: Duration = Duration::from_secs(30);
const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// The account ledger over `PostgreSQL`.
///
/// Cheap to share: wrap in an [`Arc`] and clone the handle.
pub struct LedgerService {
    pool: PgPool,
    config: EconomyConfig,
    clock: Arc<dyn Clock>,
    cache: AccountCache,
    pending_events: Mutex<Vec<LoanEvent>>,
}

impl LedgerService {
    /// Connect to the database and build a service.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::TransientStore`] or [`LedgerError::Database`]
    /// if the pool cannot be established.
    pub async fn connect(database_url: &str, config: EconomyConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(map_sqlx)?;
        Ok(Self::with_pool(pool, config))
    }

    /// Build a service on an existing pool.
    ///
    /// Must be called from within a tokio runtime (the cache eviction loop
    /// starts here).
    #[must_use]
    pub fn with_pool(pool: PgPool, config: EconomyConfig) -> Self {
        Self {
            pool,
            config,
            clock: Arc::new(SystemClock),
            cache: AccountCache::new(CACHE_TTL, CACHE_SWEEP_INTERVAL),
            pending_events: Mutex::new(Vec::new()),
        }
    }

    /// Replace the clock; used by tests to cross loan due dates.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::Database {
                detail: format!("migration failed: {e}"),
            })?;
        Ok(())
    }

    /// Stop background housekeeping. The service remains usable; only the
    /// cache sweeper is affected.
    pub fn shutdown(&self) {
        self.cache.shutdown();
    }

    /// The economy configuration this service runs with.
    #[must_use]
    pub const fn config(&self) -> &EconomyConfig {
        &self.config
    }

    pub(crate) const fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    // ═══════════════════════════════════════════════════════════════════
    // Balance operations
    // ═══════════════════════════════════════════════════════════════════

    /// Current wallet balance.
    ///
    /// Read-only to the caller, but loan normalization may itself mutate
    /// and persist state; this is how delinquency is detected on the next
    /// touch of an account, with no scheduler.
    ///
    /// # Errors
    ///
    /// Store faults only; this operation has no domain rejections.
    pub async fn get_balance(&self, id: &AccountId) -> Result<i64> {
        if let Some(account) = self.cache.get(id).await {
            if account.extension.loan.is_none() {
                tracing::debug!(account = %id, "balance served from cache");
                return Ok(account.wallet);
            }
        }
        let account = with_retry("get_balance", || self.touch_tx(id)).await?;
        Ok(account.wallet)
    }

    /// Full normalized account snapshot.
    ///
    /// # Errors
    ///
    /// Store faults only.
    pub async fn get_account(&self, id: &AccountId) -> Result<Account> {
        with_retry("get_account", || self.touch_tx(id)).await
    }

    /// Apply a signed delta to the wallet and record it under `reason`.
    ///
    /// While the account's loan is `Delinquent`, a positive delta pays the
    /// debt first (any remainder credited to the wallet) and a negative
    /// delta grows the debt instead of the wallet, so the account cannot be
    /// driven negative while delinquent. Otherwise the delta applies
    /// directly, and the result must stay at or above the configured
    /// minimum.
    ///
    /// Returns the new wallet balance.
    ///
    /// # Errors
    ///
    /// [`LedgerError::MinimumBalanceViolation`] if the delta would drop the
    /// wallet below the minimum; the transaction rolls back and the account
    /// is unchanged.
    pub async fn update_balance(&self, id: &AccountId, delta: i64, reason: &str) -> Result<i64> {
        with_retry("update_balance", || {
            self.update_balance_tx(id, delta, reason, false)
        })
        .await
    }

    /// Administrative wallet overwrite, clamped to the configured minimum.
    ///
    /// Returns the new wallet balance.
    ///
    /// # Errors
    ///
    /// Store faults only.
    pub async fn set_balance(&self, id: &AccountId, amount: i64) -> Result<i64> {
        with_retry("set_balance", || self.set_balance_tx(id, amount)).await
    }

    /// [`Self::update_balance`] that also stamps the grow timestamp in the
    /// same transaction, for the daily grow reward.
    ///
    /// # Errors
    ///
    /// As [`Self::update_balance`].
    pub async fn record_grow(&self, id: &AccountId, delta: i64, reason: &str) -> Result<i64> {
        with_retry("record_grow", || {
            self.update_balance_tx(id, delta, reason, true)
        })
        .await
    }

    /// When the grow reward was last claimed.
    ///
    /// # Errors
    ///
    /// Store faults only.
    pub async fn get_last_grow(&self, id: &AccountId) -> Result<Option<DateTime<Utc>>> {
        let account = with_retry("get_last_grow", || self.touch_tx(id)).await?;
        Ok(account.extension.last_grow_at)
    }

    /// Most recent audit entries for an account, newest first.
    ///
    /// # Errors
    ///
    /// Store faults only.
    pub async fn history(&self, id: &AccountId, limit: i64) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            r"
            SELECT id, user_id, community_id, reason, item_id, amount, created_at
            FROM account_history
            WHERE user_id = $1 AND community_id = $2
            ORDER BY id DESC
            LIMIT $3
            ",
        )
        .bind(&id.user_id)
        .bind(&id.community_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter()
            .map(|row| {
                Ok(HistoryEntry {
                    id: row.try_get("id").map_err(map_sqlx)?,
                    user_id: row.try_get("user_id").map_err(map_sqlx)?,
                    community_id: row.try_get("community_id").map_err(map_sqlx)?,
                    reason: row.try_get("reason").map_err(map_sqlx)?,
                    item_id: row.try_get("item_id").map_err(map_sqlx)?,
                    amount: row.try_get("amount").map_err(map_sqlx)?,
                    created_at: row.try_get("created_at").map_err(map_sqlx)?,
                })
            })
            .collect()
    }

    /// Drain pending loan reminder notifications.
    ///
    /// Each near-due/overdue notification is produced exactly once: the
    /// emission markers are persisted inside the loan itself, so a restart
    /// cannot re-emit, and this queue only buffers them between commit and
    /// relay.
    #[must_use]
    pub fn consume_loan_reminder_events(&self) -> Vec<LoanEvent> {
        match self.pending_events.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Transaction bodies
    // ═══════════════════════════════════════════════════════════════════

    /// Lock, normalize, persist if needed. The body behind every plain
    /// read.
    pub(crate) async fn touch_tx(&self, id: &AccountId) -> Result<Account> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        let mut account = self.lock_account(&mut tx, id).await?;
        let outcome = normalize(&mut account, now, &self.config);
        if outcome.changed {
            self.persist_account(&mut tx, &account).await?;
            self.append_history(&mut tx, id, &outcome.history, now).await?;
        }
        tx.commit().await.map_err(map_sqlx)?;
        self.finish(&account, outcome).await;
        Ok(account)
    }

    async fn update_balance_tx(
        &self,
        id: &AccountId,
        delta: i64,
        reason: &str,
        stamp_grow: bool,
    ) -> Result<i64> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        let mut account = self.lock_account(&mut tx, id).await?;
        let mut outcome = normalize(&mut account, now, &self.config);

        if let Some(mut loan) = account
            .extension
            .loan
            .take_if(|loan| loan.status == LoanStatus::Delinquent)
        {
            if delta >= 0 {
                let payment = delta.min(loan.debt);
                loan.debt -= payment;
                account.wallet = account.wallet.saturating_add(delta - payment);
            } else {
                // Losses become additional debt; the wallet is untouched.
                loan.debt = loan.debt.saturating_add(delta.saturating_neg());
            }
            if loan.debt > 0 {
                account.extension.loan = Some(loan);
            } else {
                outcome
                    .history
                    .push(HistoryDraft::new(reasons::LOAN_CLEARED, 0));
            }
        } else {
            let new_wallet =
                account
                    .wallet
                    .checked_add(delta)
                    .ok_or_else(|| LedgerError::AmountOutOfRange {
                        label: "balance".to_string(),
                    })?;
            if new_wallet < self.config.min_balance {
                return Err(LedgerError::MinimumBalanceViolation);
            }
            account.wallet = new_wallet;
        }

        if stamp_grow {
            account.extension.last_grow_at = Some(now);
        }
        outcome.history.push(HistoryDraft::new(reason, delta));

        self.persist_account(&mut tx, &account).await?;
        self.append_history(&mut tx, id, &outcome.history, now).await?;
        tx.commit().await.map_err(map_sqlx)?;
        self.finish(&account, outcome).await;
        Ok(account.wallet)
    }

    async fn set_balance_tx(&self, id: &AccountId, amount: i64) -> Result<i64> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        let mut account = self.lock_account(&mut tx, id).await?;
        let mut outcome = normalize(&mut account, now, &self.config);

        let new_wallet = amount.max(self.config.min_balance);
        outcome.history.push(HistoryDraft::new(
            reasons::SET_BALANCE,
            new_wallet - account.wallet,
        ));
        account.wallet = new_wallet;

        self.persist_account(&mut tx, &account).await?;
        self.append_history(&mut tx, id, &outcome.history, now).await?;
        tx.commit().await.map_err(map_sqlx)?;
        self.finish(&account, outcome).await;
        Ok(account.wallet)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Row plumbing shared by all transaction bodies
    // ═══════════════════════════════════════════════════════════════════

    /// Row-lock the account, creating it with defaults if absent.
    pub(crate) async fn lock_account(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: &AccountId,
    ) -> Result<Account> {
        let default_extension =
            serde_json::to_value(guildbank_core::account::AccountExtension::default()).map_err(
                |e| LedgerError::Serialization {
                    detail: e.to_string(),
                },
            )?;
        sqlx::query(
            r"
            INSERT INTO accounts (user_id, community_id, wallet, extension)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, community_id) DO NOTHING
            ",
        )
        .bind(&id.user_id)
        .bind(&id.community_id)
        .bind(self.config.default_balance)
        .bind(&default_extension)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx)?;

        let row = sqlx::query(
            r"
            SELECT wallet, extension
            FROM accounts
            WHERE user_id = $1 AND community_id = $2
            FOR UPDATE
            ",
        )
        .bind(&id.user_id)
        .bind(&id.community_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(map_sqlx)?;

        let wallet: i64 = row.try_get("wallet").map_err(map_sqlx)?;
        let extension_value: serde_json::Value = row.try_get("extension").map_err(map_sqlx)?;
        let extension = serde_json::from_value(extension_value).map_err(|e| {
            LedgerError::Serialization {
                detail: format!("corrupt extension column for {id}: {e}"),
            }
        })?;

        Ok(Account {
            id: id.clone(),
            wallet,
            extension,
        })
    }

    /// Persist wallet and extension atomically together.
    pub(crate) async fn persist_account(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        account: &Account,
    ) -> Result<()> {
        let extension =
            serde_json::to_value(&account.extension).map_err(|e| LedgerError::Serialization {
                detail: e.to_string(),
            })?;
        sqlx::query(
            r"
            UPDATE accounts
            SET wallet = $3, extension = $4, updated_at = now()
            WHERE user_id = $1 AND community_id = $2
            ",
        )
        .bind(&account.id.user_id)
        .bind(&account.id.community_id)
        .bind(account.wallet)
        .bind(&extension)
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    /// Append audit entries inside the transaction.
    pub(crate) async fn append_history(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: &AccountId,
        drafts: &[HistoryDraft],
        now: DateTime<Utc>,
    ) -> Result<()> {
        for draft in drafts {
            sqlx::query(
                r"
                INSERT INTO account_history
                    (user_id, community_id, reason, item_id, amount, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ",
            )
            .bind(&id.user_id)
            .bind(&id.community_id)
            .bind(&draft.reason)
            .bind(&draft.item_id)
            .bind(draft.amount)
            .bind(now)
            .execute(&mut **tx)
            .await
            .map_err(map_sqlx)?;
        }
        Ok(())
    }

    /// Post-commit bookkeeping: refresh the cache and queue reminder
    /// events for relay.
    pub(crate) async fn finish(&self, account: &Account, outcome: NormalizeOutcome) {
        self.cache.insert(account).await;
        if outcome.events.is_empty() {
            return;
        }
        metrics::counter!("ledger.loan.reminders").increment(outcome.events.len() as u64);
        match self.pending_events.lock() {
            Ok(mut events) => events.extend(outcome.events),
            Err(poisoned) => poisoned.into_inner().extend(outcome.events),
        }
    }
}

#[cfg(feature = "test-utils")]
impl LedgerService {
    /// Force the account's loan due date into the past, so the next touch
    /// runs the delinquency transition. Test fixtures only.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NoActiveLoan`] if the account has no loan.
    pub async fn force_loan_due_now(&self, id: &AccountId) -> Result<()> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        let mut account = self.lock_account(&mut tx, id).await?;
        let Some(loan) = account.extension.loan.as_mut() else {
            return Err(LedgerError::NoActiveLoan);
        };
        loan.due_at = now - chrono::Duration::milliseconds(1);
        self.persist_account(&mut tx, &account).await?;
        tx.commit().await.map_err(map_sqlx)?;
        self.cache.invalidate(id).await;
        Ok(())
    }
}
