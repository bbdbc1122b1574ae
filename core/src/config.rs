//! Economy configuration.
//!
//! Configuration values are provided by the application, not hardcoded.
//! Builder-style setters keep call sites readable when only one knob moves.

use chrono::Duration;

use crate::loan::LoanOption;

/// Top-level economy configuration shared by all ledger operations.
#[derive(Debug, Clone)]
pub struct EconomyConfig {
    /// Wallet balance for implicitly created accounts.
    pub default_balance: i64,

    /// Floor the wallet can never drop below (normally 0).
    pub min_balance: i64,

    /// Bank capacity rules.
    pub bank: BankConfig,

    /// Loan products and reminder windows.
    pub loan: LoanConfig,
}

impl EconomyConfig {
    /// Replace the default starting balance.
    #[must_use]
    pub const fn with_default_balance(mut self, balance: i64) -> Self {
        self.default_balance = balance;
        self
    }

    /// Replace the bank configuration.
    #[must_use]
    pub fn with_bank(mut self, bank: BankConfig) -> Self {
        self.bank = bank;
        self
    }

    /// Replace the loan configuration.
    #[must_use]
    pub fn with_loan(mut self, loan: LoanConfig) -> Self {
        self.loan = loan;
        self
    }
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            default_balance: 0,
            min_balance: 0,
            bank: BankConfig::default(),
            loan: LoanConfig::default(),
        }
    }
}

/// Bank capacity rules.
#[derive(Debug, Clone)]
pub struct BankConfig {
    /// Capacity floor for every account; stored capacities below it are
    /// read as this value.
    pub default_max: i64,

    /// Smallest capacity gain a single upgrade unit can yield.
    pub min_increase: i64,

    /// Per-unit capacity growth as a share of the current capacity, in
    /// basis points.
    pub growth_bps: u32,

    /// Flat bonus added per upgrade level.
    pub per_level_bonus: i64,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            default_max: 1_000,
            min_increase: 100,
            growth_bps: 500,
            per_level_bonus: 50,
        }
    }
}

/// Loan products and notification window.
#[derive(Debug, Clone)]
pub struct LoanConfig {
    /// Products offered by `take_loan`.
    pub options: Vec<LoanOption>,

    /// How far ahead of the due date the near-due reminder fires.
    ///
    /// Default: 24 hours.
    pub near_due_window: Duration,
}

impl LoanConfig {
    /// Create a loan configuration offering the given products.
    #[must_use]
    pub fn new(options: Vec<LoanOption>) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Replace the near-due reminder window.
    #[must_use]
    pub const fn with_near_due_window(mut self, window: Duration) -> Self {
        self.near_due_window = window;
        self
    }

    /// Look up a product by id.
    #[must_use]
    pub fn option(&self, option_id: &str) -> Option<&LoanOption> {
        self.options.iter().find(|option| option.id == option_id)
    }
}

impl Default for LoanConfig {
    fn default() -> Self {
        Self {
            options: Vec::new(),
            near_due_window: Duration::hours(24),
        }
    }
}
