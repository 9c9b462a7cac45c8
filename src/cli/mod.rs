use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::time::Duration;

use crate::application::{
    DEFAULT_NAMESPACE, DEFAULT_STARTING_BANK, DEFAULT_STARTING_WALLET, LedgerConfig, LedgerError,
    LedgerService,
};
use crate::domain::{PlayerProfile, ProfileKey, format_coins, parse_coins};
use crate::storage::RetryPolicy;

/// Flashcore - economy ledger over an atomic key-value store
#[derive(Parser, Debug)]
#[command(name = "flashcore")]
#[command(about = "Economy profiles, transfers and dice wagers on a local key-value store")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "FLASHCORE_DATABASE", default_value = "flashcore.db")]
    pub database: String,

    /// Namespace profiles are stored under (empty for none)
    #[arg(long, env = "FLASHCORE_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Wallet balance of new profiles
    #[arg(long, env = "FLASHCORE_STARTING_WALLET", default_value_t = DEFAULT_STARTING_WALLET)]
    pub starting_wallet: i64,

    /// Bank balance of new profiles
    #[arg(long, env = "FLASHCORE_STARTING_BANK", default_value_t = DEFAULT_STARTING_BANK)]
    pub starting_bank: i64,

    /// Attempts per store call before reporting the store as unavailable
    #[arg(long, env = "FLASHCORE_RETRY_ATTEMPTS", default_value_t = 5)]
    pub retry_attempts: u32,

    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, env = "FLASHCORE_LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Profile management commands
    #[command(subcommand)]
    Profile(ProfileCommands),

    /// Move credits from the bank to the wallet
    Withdraw {
        /// Amount to withdraw (e.g., "200" or "$1,200")
        amount: String,

        #[command(flatten)]
        who: Who,
    },

    /// Move credits from the wallet to the bank
    Deposit {
        /// Amount to deposit
        amount: String,

        #[command(flatten)]
        who: Who,
    },

    /// Send wallet credits to another user in the same guild
    Transfer {
        /// Amount to send
        amount: String,

        /// Sending user ID
        #[arg(long)]
        from: String,

        /// Receiving user ID
        #[arg(long)]
        to: String,

        /// Guild ID
        #[arg(short, long)]
        guild: String,
    },

    /// Roll the dice: bet wallet credits on a face from 1 to 6
    Wager {
        /// Face to bet on
        number: i64,

        /// Amount to bet
        amount: String,

        #[command(flatten)]
        who: Who,
    },
}

#[derive(Subcommand, Debug)]
pub enum ProfileCommands {
    /// Create a profile with the starting balances
    Create {
        #[command(flatten)]
        who: Who,
    },

    /// Show a profile
    Show {
        #[command(flatten)]
        who: Who,
    },

    /// Delete a profile
    Delete {
        #[command(flatten)]
        who: Who,
    },
}

/// The profile a command acts on
#[derive(clap::Args, Debug)]
pub struct Who {
    /// User ID
    #[arg(short, long)]
    pub user: String,

    /// Guild ID
    #[arg(short, long)]
    pub guild: String,
}

impl Cli {
    /// Directive for the `flashcore` target when RUST_LOG is unset.
    pub fn log_filter(&self) -> &str {
        if self.verbose { "debug" } else { &self.log_level }
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        let namespace = if self.namespace.is_empty() {
            None
        } else {
            Some(self.namespace.clone())
        };

        LedgerConfig::default()
            .with_starting_balances(self.starting_wallet, self.starting_bank)
            .with_namespace(namespace)
            .with_retry(RetryPolicy {
                max_attempts: self.retry_attempts.max(1),
                initial_backoff: Duration::from_millis(25),
                max_backoff: Duration::from_secs(2),
            })
    }

    pub async fn run(self) -> Result<()> {
        let config = self.ledger_config();

        if matches!(self.command, Commands::Init) {
            LedgerService::init(&self.database, config).await?;
            println!("Database initialized: {}", self.database);
            return Ok(());
        }

        let service = LedgerService::connect(&self.database, config)
            .await
            .with_context(|| format!("Failed to open {}. Run `flashcore init` first?", self.database))?;

        match run_command(&service, self.command).await {
            Err(err) => match err.downcast_ref::<LedgerError>().and_then(rejection_message) {
                Some(message) => {
                    println!("{}", message);
                    Ok(())
                }
                None => Err(err),
            },
            ok => ok,
        }
    }
}

async fn run_command(service: &LedgerService, command: Commands) -> Result<()> {
    match command {
        Commands::Init => unreachable!("init is handled before connecting"),

        Commands::Profile(profile_cmd) => run_profile_command(service, profile_cmd).await?,

        Commands::Withdraw { amount, who } => {
            let amount = parse_amount(&amount)?;
            service.withdraw(&who.user, &who.guild, amount).await?;
            println!(
                "You withdrew **{}** credits from your bank to your wallet.",
                format_coins(amount)
            );
        }

        Commands::Deposit { amount, who } => {
            let amount = parse_amount(&amount)?;
            service.deposit(&who.user, &who.guild, amount).await?;
            println!(
                "Your wallet is a little lighter now, but your bank balance increased by **{}** credits.",
                format_coins(amount)
            );
        }

        Commands::Transfer {
            amount,
            from,
            to,
            guild,
        } => {
            let amount = parse_amount(&amount)?;
            let receipt = match service.transfer(&from, &to, &guild, amount).await {
                Err(LedgerError::ProfileNotFound(key))
                    if key == ProfileKey::new(&to, &guild).storage_key() =>
                {
                    println!("<@{}> Haven't created their player profile yet :(", to);
                    return Ok(());
                }
                other => other?,
            };
            println!(
                "Successfully! Sent ` {} ` to <@{}> from <@{}>'s Wallet!",
                format_coins(receipt.amount),
                to,
                from
            );
        }

        Commands::Wager {
            number,
            amount,
            who,
        } => {
            let amount = parse_amount(&amount)?;
            let outcome = service
                .settle_wager(&who.user, &who.guild, number, amount)
                .await?;
            if outcome.substituted {
                println!("{} is not on the die, betting on {} instead.", number, outcome.chosen);
            }
            println!(
                "The dice landed on ` {} `. You **{}** total **{}** credits.",
                outcome.outcome,
                if outcome.win { "WON" } else { "LOST" },
                format_coins(outcome.amount)
            );
        }
    }
    Ok(())
}

async fn run_profile_command(service: &LedgerService, cmd: ProfileCommands) -> Result<()> {
    match cmd {
        ProfileCommands::Create { who } => {
            let profile = service.create_profile(&who.user, &who.guild).await?;
            println!("Created profile for <@{}>", who.user);
            print_profile(&profile);
        }

        ProfileCommands::Show { who } => match service.get_profile(&who.user, &who.guild).await? {
            Some(profile) => print_profile(&profile),
            None => println!("<@{}> has no player profile in this guild.", who.user),
        },

        ProfileCommands::Delete { who } => {
            if service.delete_profile(&who.user, &who.guild).await? {
                println!("Deleted profile for <@{}>", who.user);
            } else {
                println!("<@{}> has no player profile in this guild.", who.user);
            }
        }
    }
    Ok(())
}

fn print_profile(profile: &PlayerProfile) {
    println!("Profile: <@{}>", profile.id);
    println!("  Wallet:     {:>12}", format_coins(profile.wallet));
    println!("  Bank:       {:>12}", format_coins(profile.bank));
    println!("  {}", "-".repeat(24));
    println!("  Net worth:  {:>12}", format_coins(profile.net_worth()));
}

fn parse_amount(input: &str) -> Result<i64> {
    parse_coins(input).with_context(|| format!("Invalid amount '{}'. Use '500' or '$1,200'", input))
}

/// User-facing wording for the rejections a bot user can trigger.
/// Store failures are not rejections and are reported as errors.
pub fn rejection_message(err: &LedgerError) -> Option<String> {
    let message = match err {
        LedgerError::ProfileNotFound(_) => {
            "You don't have a player profile yet. Create one first!".to_string()
        }
        LedgerError::ProfileAlreadyExists(_) => "You already have a player profile.".to_string(),
        LedgerError::InsufficientBankFunds { .. } => {
            "**Insufficient funds** in your bank to complete the withdrawal".to_string()
        }
        LedgerError::InsufficientWalletFunds { .. } => {
            "Sorry, your wallet **balance is too low** for this.".to_string()
        }
        LedgerError::SelfTransferNotAllowed => {
            "Oops, you **can't send credits to yourself**. Please select a different recipient."
                .to_string()
        }
        LedgerError::InvalidAmount(amount) => {
            format!("The amount must be a positive number of credits (got {}).", amount)
        }
        LedgerError::BalanceOverflow { .. } => {
            "That would put more credits in the balance than it can hold.".to_string()
        }
        LedgerError::StoreUnavailable(_)
        | LedgerError::CorruptRecord(_)
        | LedgerError::Database(_) => return None,
    };
    Some(message)
}
