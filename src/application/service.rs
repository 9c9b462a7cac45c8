use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::domain::{
    normalize_choice, Balances, Coins, DiceRoller, PlayerProfile, ProfileKey, RandomDie,
    WagerOutcome,
};
use crate::storage::{KeyValueStore, MemoryBackend, SqliteBackend};

use super::{LedgerConfig, LedgerError};

/// Application service for the economy ledger.
///
/// Every balance change is a single atomic update of one profile record, so
/// two commands racing on the same profile can never both spend the same
/// credits. This is the primary interface for any client (bot commands, CLI).
#[derive(Clone)]
pub struct LedgerService {
    store: KeyValueStore,
    config: LedgerConfig,
    dice: Arc<dyn DiceRoller>,
}

/// Balances of both parties once a transfer has settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReceipt {
    pub amount: Coins,
    pub sender: Balances,
    pub receiver: Balances,
}

fn ensure_positive(amount: Coins) -> Result<(), LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(amount));
    }
    Ok(())
}

fn credit(key: &str, balance: Coins, amount: Coins) -> Result<Coins, LedgerError> {
    balance
        .checked_add(amount)
        .ok_or_else(|| LedgerError::BalanceOverflow {
            key: key.to_string(),
            balance,
            amount,
        })
}

impl LedgerService {
    /// Create a ledger over an injected store handle. The handle's keys are
    /// used as-is; namespace it before passing it in if needed.
    pub fn new(store: KeyValueStore, config: LedgerConfig) -> Self {
        Self {
            store: store.with_retry(config.retry),
            config,
            dice: Arc::new(RandomDie),
        }
    }

    /// Replace the die used to settle wagers.
    pub fn with_roller(mut self, roller: impl DiceRoller + 'static) -> Self {
        self.dice = Arc::new(roller);
        self
    }

    fn scoped(store: KeyValueStore, config: &LedgerConfig) -> KeyValueStore {
        match &config.namespace {
            Some(namespace) => store.namespaced(namespace.clone()),
            None => store,
        }
    }

    /// Initialize a new database at the given path.
    pub async fn init(database_path: &str, config: LedgerConfig) -> Result<Self, LedgerError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let backend = SqliteBackend::init(&db_url).await?;
        let store = Self::scoped(KeyValueStore::new(backend), &config);
        Ok(Self::new(store, config))
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: &str, config: LedgerConfig) -> Result<Self, LedgerError> {
        let db_url = format!("sqlite:{}", database_path);
        let backend = SqliteBackend::connect(&db_url).await?;
        let store = Self::scoped(KeyValueStore::new(backend), &config);
        Ok(Self::new(store, config))
    }

    /// A ledger that keeps everything in process memory.
    pub fn in_memory(config: LedgerConfig) -> Self {
        let store = Self::scoped(KeyValueStore::new(MemoryBackend::new()), &config);
        Self::new(store, config)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &KeyValueStore {
        &self.store
    }

    // ========================
    // Profile operations
    // ========================

    /// Create a profile with the configured starting balances.
    pub async fn create_profile(
        &self,
        entity_id: &str,
        scope_id: &str,
    ) -> Result<PlayerProfile, LedgerError> {
        let key = ProfileKey::new(entity_id, scope_id).storage_key();
        let fresh = PlayerProfile::new(
            entity_id,
            self.config.starting_wallet,
            self.config.starting_bank,
        );

        // Existence check and write happen in the same update, so two
        // concurrent creates cannot both succeed.
        let created = self
            .store
            .transact(&key, |current: Option<PlayerProfile>| match current {
                Some(_) => Err(LedgerError::ProfileAlreadyExists(key.clone())),
                None => Ok(Some(fresh.clone())),
            })
            .await?
            .ok_or_else(|| LedgerError::ProfileNotFound(key.clone()))?;

        info!(key = %key, wallet = created.wallet, bank = created.bank, "Created profile");
        Ok(created)
    }

    /// Get a profile. Reading never creates one.
    pub async fn get_profile(
        &self,
        entity_id: &str,
        scope_id: &str,
    ) -> Result<Option<PlayerProfile>, LedgerError> {
        let key = ProfileKey::new(entity_id, scope_id).storage_key();
        Ok(self.store.get(&key).await?)
    }

    /// Delete a profile. Returns whether one existed.
    pub async fn delete_profile(&self, entity_id: &str, scope_id: &str) -> Result<bool, LedgerError> {
        let key = ProfileKey::new(entity_id, scope_id).storage_key();
        let existed = self.store.delete(&key).await?;
        if existed {
            info!(key = %key, "Deleted profile");
        }
        Ok(existed)
    }

    // ========================
    // Balance operations
    // ========================

    /// Move credits from the bank into the wallet.
    pub async fn withdraw(
        &self,
        entity_id: &str,
        scope_id: &str,
        amount: Coins,
    ) -> Result<Balances, LedgerError> {
        ensure_positive(amount)?;
        let key = ProfileKey::new(entity_id, scope_id).storage_key();

        let (profile, ()) = self
            .mutate(&key, |profile| {
                if profile.bank < amount {
                    return Err(LedgerError::InsufficientBankFunds {
                        key: key.clone(),
                        balance: profile.bank,
                        required: amount,
                    });
                }
                profile.wallet = credit(&key, profile.wallet, amount)?;
                profile.bank -= amount;
                Ok(())
            })
            .await?;

        Ok(profile.balances())
    }

    /// Move credits from the wallet into the bank.
    pub async fn deposit(
        &self,
        entity_id: &str,
        scope_id: &str,
        amount: Coins,
    ) -> Result<Balances, LedgerError> {
        ensure_positive(amount)?;
        let key = ProfileKey::new(entity_id, scope_id).storage_key();

        let (profile, ()) = self
            .mutate(&key, |profile| {
                if profile.wallet < amount {
                    return Err(LedgerError::InsufficientWalletFunds {
                        key: key.clone(),
                        balance: profile.wallet,
                        required: amount,
                    });
                }
                profile.bank = credit(&key, profile.bank, amount)?;
                profile.wallet -= amount;
                Ok(())
            })
            .await?;

        Ok(profile.balances())
    }

    // ========================
    // Transfer operations
    // ========================

    /// Send credits from one wallet to another within the same scope.
    ///
    /// The sender is debited first; the receiver is credited only if the
    /// debit committed. If the credit fails the sender is refunded before the
    /// error is returned. Both legs run on their own task, so dropping the
    /// returned future does not abandon a debited sender.
    pub async fn transfer(
        &self,
        sender_id: &str,
        receiver_id: &str,
        scope_id: &str,
        amount: Coins,
    ) -> Result<TransferReceipt, LedgerError> {
        ensure_positive(amount)?;
        if sender_id == receiver_id {
            return Err(LedgerError::SelfTransferNotAllowed);
        }

        let sender_key = ProfileKey::new(sender_id, scope_id).storage_key();
        let receiver_key = ProfileKey::new(receiver_id, scope_id).storage_key();

        // Receivers are never created implicitly.
        if self.store.get::<PlayerProfile>(&receiver_key).await?.is_none() {
            return Err(LedgerError::ProfileNotFound(receiver_key));
        }

        let this = self.clone();
        let legs = tokio::spawn(async move {
            this.settle_transfer(&sender_key, &receiver_key, amount)
                .await
        });

        match legs.await {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => std::panic::resume_unwind(join_err.into_panic()),
            Err(join_err) => Err(LedgerError::StoreUnavailable(format!(
                "Transfer task did not finish: {}",
                join_err
            ))),
        }
    }

    async fn settle_transfer(
        &self,
        sender_key: &str,
        receiver_key: &str,
        amount: Coins,
    ) -> Result<TransferReceipt, LedgerError> {
        let (sender, ()) = self
            .mutate(sender_key, |profile| {
                if profile.wallet < amount {
                    return Err(LedgerError::InsufficientWalletFunds {
                        key: sender_key.to_string(),
                        balance: profile.wallet,
                        required: amount,
                    });
                }
                profile.wallet -= amount;
                Ok(())
            })
            .await?;

        let credited = self
            .mutate(receiver_key, |profile| {
                profile.wallet = credit(receiver_key, profile.wallet, amount)?;
                Ok(())
            })
            .await;

        match credited {
            Ok((receiver, ())) => {
                debug!(sender = sender_key, receiver = receiver_key, amount, "Transfer settled");
                Ok(TransferReceipt {
                    amount,
                    sender: sender.balances(),
                    receiver: receiver.balances(),
                })
            }
            Err(err) => {
                warn!(
                    sender = sender_key,
                    receiver = receiver_key,
                    amount,
                    error = %err,
                    "Credit failed after debit, refunding sender"
                );
                // Refund failures are logged by `refund` itself
                let _ = self.refund(sender_key, amount).await;
                Err(err)
            }
        }
    }

    /// Put `amount` back into the sender's wallet.
    ///
    /// Store outages are retried until the refund lands. Any other failure
    /// (the sender's profile is gone or unreadable) is logged once and
    /// returned.
    async fn refund(&self, key: &str, amount: Coins) -> Result<(), LedgerError> {
        let retry = self.config.retry;
        let mut attempt: u32 = 1;
        loop {
            let refunded = self
                .mutate(key, |profile| {
                    profile.wallet = credit(key, profile.wallet, amount)?;
                    Ok(())
                })
                .await;

            match refunded {
                Ok((profile, ())) => {
                    info!(key, amount, wallet = profile.wallet, attempt, "Refund applied");
                    return Ok(());
                }
                Err(err @ LedgerError::StoreUnavailable(_)) => {
                    let delay = retry.backoff(attempt);
                    error!(
                        key,
                        amount,
                        attempt,
                        ?delay,
                        error = %err,
                        "Refund failed, credits are in flight until it succeeds"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(err) => {
                    error!(
                        key,
                        amount,
                        attempt,
                        error = %err,
                        "Refund cannot be applied, debited credits are lost"
                    );
                    return Err(err);
                }
            }
        }
    }

    // ========================
    // Wager operations
    // ========================

    /// Bet `amount` on a die face. A win adds `amount` to the wallet, a loss
    /// takes it away.
    ///
    /// A `chosen_number` that is not a die face is not rejected: a random
    /// face is bet on instead and the outcome is flagged `substituted`.
    pub async fn settle_wager(
        &self,
        entity_id: &str,
        scope_id: &str,
        chosen_number: i64,
        amount: Coins,
    ) -> Result<WagerOutcome, LedgerError> {
        ensure_positive(amount)?;
        let key = ProfileKey::new(entity_id, scope_id).storage_key();
        let dice = Arc::clone(&self.dice);

        let (profile, (chosen, substituted, outcome, win)) = self
            .mutate(&key, |profile| {
                if profile.wallet < amount {
                    return Err(LedgerError::InsufficientWalletFunds {
                        key: key.clone(),
                        balance: profile.wallet,
                        required: amount,
                    });
                }

                let (chosen, substituted) = normalize_choice(chosen_number, dice.as_ref());
                let outcome = dice.roll();
                let win = outcome == chosen;
                if win {
                    profile.wallet = credit(&key, profile.wallet, amount)?;
                } else {
                    profile.wallet -= amount;
                }
                Ok((chosen, substituted, outcome, win))
            })
            .await?;

        if substituted {
            debug!(key = %key, chosen_number, chosen, "Chosen number is not a die face, bet on a random face");
        }

        Ok(WagerOutcome {
            chosen,
            substituted,
            outcome,
            win,
            amount,
            wallet: profile.wallet,
        })
    }

    /// Apply `apply` to an existing profile inside one atomic update.
    /// Any error from `apply` leaves the record untouched.
    async fn mutate<R, F>(&self, key: &str, mut apply: F) -> Result<(PlayerProfile, R), LedgerError>
    where
        R: Send,
        F: FnMut(&mut PlayerProfile) -> Result<R, LedgerError> + Send,
    {
        let mut output: Option<R> = None;
        let committed = self
            .store
            .transact(key, |current: Option<PlayerProfile>| {
                let mut profile =
                    current.ok_or_else(|| LedgerError::ProfileNotFound(key.to_string()))?;
                output = Some(apply(&mut profile)?);
                debug_assert!(profile.is_solvent(), "profile {} went negative", key);
                Ok(Some(profile))
            })
            .await?;

        match (committed, output) {
            (Some(profile), Some(output)) => Ok((profile, output)),
            _ => Err(LedgerError::ProfileNotFound(key.to_string())),
        }
    }
}
