use crate::domain::Coins;
use crate::storage::RetryPolicy;

/// Wallet balance of a freshly created profile
pub const DEFAULT_STARTING_WALLET: Coins = 500;

/// Bank balance of a freshly created profile
pub const DEFAULT_STARTING_BANK: Coins = 500;

/// Namespace the economy keeps its profiles under
pub const DEFAULT_NAMESPACE: &str = "economy";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub starting_wallet: Coins,
    pub starting_bank: Coins,
    /// Namespace used by the `init`/`connect`/`in_memory` constructors
    pub namespace: Option<String>,
    /// Applied to every store call. Transfer compensation ignores
    /// `max_attempts` and keeps going with the same backoff.
    pub retry: RetryPolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            starting_wallet: DEFAULT_STARTING_WALLET,
            starting_bank: DEFAULT_STARTING_BANK,
            namespace: Some(DEFAULT_NAMESPACE.to_string()),
            retry: RetryPolicy::default(),
        }
    }
}

impl LedgerConfig {
    pub fn with_starting_balances(mut self, wallet: Coins, bank: Coins) -> Self {
        self.starting_wallet = wallet;
        self.starting_bank = bank;
        self
    }

    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
