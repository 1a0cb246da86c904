//! Claimcraft CLI
//!
//! Operator interface for reward claim epochs: build epochs from the reward
//! ledger, record root commitments, and drive claims by hand for support.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use claimcraft_aggregator::SqliteLedger;
use claimcraft_core::{EpochRef, EpochSummary, WalletAddress};
use claimcraft_distributor::config::expand_path;
use claimcraft_distributor::{
    default_settings_path, history_csv, BuildOutcome, ClaimStart, Distributor, DistributorConfig,
    Settings,
};
use claimcraft_logging::{init, LogLevel};
use claimcraft_settlement::{SettlementClient, SettlementMode};
use claimcraft_store::{MemoryStore, SqliteStore};

/// Claimcraft - Merkle reward claim epochs
#[derive(Parser)]
#[command(name = "claimcraft")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (created with defaults if missing)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the epoch for a period (latest payable period if omitted)
    BuildEpoch {
        #[arg(short, long)]
        period: Option<String>,
    },

    /// Show an epoch (latest if omitted)
    Status {
        /// Epoch number or period key (`period:<key>` for a numeric key)
        #[arg(short, long)]
        epoch: Option<String>,
    },

    /// Record a root published out of band, after checking it on-chain
    MarkCommitted {
        epoch: u64,

        /// Transaction that published the root
        #[arg(long)]
        tx: Option<String>,
    },

    /// Publish an epoch root on-chain and record it (admin keypair required)
    CommitRoot { epoch: u64 },

    /// Print a user's leaf and proof
    Prepare {
        user: String,
        /// Epoch number or period key (`period:<key>` for a numeric key)
        epoch: String,
    },

    /// Print the leaf paid to a wallet
    Leaf {
        /// Epoch number or period key (`period:<key>` for a numeric key)
        epoch: String,
        wallet: String,
    },

    /// Open or resume a claim
    ClaimStart { user: String, epoch: String },

    /// Mark a claim settled by a transaction
    ClaimComplete {
        user: String,
        epoch: String,
        tx: String,
    },

    /// Mark a claim submission as failed
    ClaimFail {
        user: String,
        epoch: String,
        #[arg(long, default_value = "submission failed")]
        reason: String,
    },

    /// Show a user's claim history
    History {
        user: String,
        #[arg(long)]
        csv: bool,
    },

    /// Re-derive an epoch from its leaves and report inconsistencies
    Audit {
        /// Epoch number or period key (`period:<key>` for a numeric key)
        epoch: String,
    },

    /// Record commitments for epochs whose roots are already on-chain
    Reconcile {
        /// Also probe the chain for the highest committed epoch
        #[arg(long)]
        probe: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init(LogLevel::from_verbosity(cli.verbose));

    let config_path = cli.config.unwrap_or_else(default_settings_path);
    let settings: Settings<DistributorConfig> = Settings::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    let config = settings.config;

    let dist = open_distributor(&config)?;

    match cli.command {
        Commands::BuildEpoch { period } => {
            let outcome = match period {
                Some(p) => dist.build_epoch(&p).await?,
                None => dist.build_latest().await?,
            };
            print_outcome(&outcome);
        }
        Commands::Status { epoch } => {
            let summary = match epoch {
                Some(e) => Some(dist.epoch(parse_epoch(&e)).await?),
                None => dist.latest_epoch().await?,
            };
            match summary {
                Some(s) => print_summary(&s),
                None => println!("No epochs built yet"),
            }
        }
        Commands::MarkCommitted { epoch, tx } => {
            let epoch = dist
                .mark_committed(epoch, tx)
                .await
                .context("Failed to record commitment")?;
            print_summary(&epoch.summary());
        }
        Commands::CommitRoot { epoch } => {
            if config.settlement.mode == SettlementMode::Mock {
                warn!("Mock settlement: the published root only lives in this process");
            }
            let epoch = dist
                .commit_root(epoch)
                .await
                .context("Failed to publish root")?;
            print_summary(&epoch.summary());
        }
        Commands::Prepare { user, epoch } => {
            let payload = dist.prepare_claim(&user, parse_epoch(&epoch)).await?;
            print_json(&payload)?;
        }
        Commands::Leaf { epoch, wallet } => {
            let wallet: WalletAddress = wallet.parse()?;
            match dist.leaf_for_wallet(parse_epoch(&epoch), &wallet).await? {
                Some(leaf) => print_json(&leaf)?,
                None => println!("No leaf for {} in {}", wallet, epoch),
            }
        }
        Commands::ClaimStart { user, epoch } => {
            match dist.start_claim(&user, parse_epoch(&epoch)).await? {
                ClaimStart::AlreadyClaimed { attempt } => {
                    println!(
                        "Already claimed in tx {}",
                        attempt.on_chain_tx_ref.as_deref().unwrap_or("-")
                    );
                }
                ready @ ClaimStart::Ready { .. } => print_json(&ready)?,
            }
        }
        Commands::ClaimComplete { user, epoch, tx } => {
            let attempt = dist.complete_claim(&user, parse_epoch(&epoch), &tx).await?;
            println!(
                "Claim {} for {} in epoch {}: {}",
                attempt.id, attempt.user_id, attempt.epoch_number, attempt.status
            );
        }
        Commands::ClaimFail {
            user,
            epoch,
            reason,
        } => {
            let attempt = dist.fail_claim(&user, parse_epoch(&epoch), &reason).await?;
            println!(
                "Claim {} for {} in epoch {}: {}",
                attempt.id, attempt.user_id, attempt.epoch_number, attempt.status
            );
        }
        Commands::History { user, csv } => {
            let attempts = dist.claims_for_user(&user).await?;
            if csv {
                print!("{}", history_csv(&attempts));
            } else if attempts.is_empty() {
                println!("No claims for {}", user);
            } else {
                println!("{:<8} {:<16} {:<12} {}", "Epoch", "Amount", "Status", "Tx");
                for a in &attempts {
                    println!(
                        "{:<8} {:<16} {:<12} {}",
                        a.epoch_number,
                        a.amount_atomic,
                        a.status.as_str(),
                        a.on_chain_tx_ref.as_deref().unwrap_or("-")
                    );
                }
            }
        }
        Commands::Audit { epoch } => {
            let audit = dist.audit_epoch(parse_epoch(&epoch)).await?;
            if audit.is_clean() {
                println!(
                    "Epoch {}: {} leaves verified",
                    audit.epoch_number, audit.leaves_checked
                );
            } else {
                print_json(&audit)?;
                return Err(anyhow!(
                    "epoch {} has {} issues",
                    audit.epoch_number,
                    audit.issues.len()
                ));
            }
        }
        Commands::Reconcile { probe } => {
            let marked = dist.reconcile_commitments().await?;
            println!("Recorded {} commitments {:?}", marked.len(), marked);
            if probe {
                let latest = dist.find_latest_committed_epoch().await?;
                println!("Highest epoch root on-chain: {}", latest);
            }
        }
    }

    Ok(())
}

fn open_distributor(config: &DistributorConfig) -> Result<Distributor> {
    let settlement_config = config
        .to_settlement_config()
        .context("Invalid settlement config")?;

    let chain = match &config.settlement.keypair_path {
        Some(path) => {
            let path = expand_path(path);
            let keypair = solana_sdk::signature::read_keypair_file(&path)
                .map_err(|e| anyhow!("Failed to read keypair {}: {}", path.display(), e))?;
            SettlementClient::with_keypair(settlement_config, keypair)
        }
        None => SettlementClient::new(settlement_config),
    };
    let chain = Arc::new(chain);

    let ledger = match &config.ledger_path {
        Some(path) => SqliteLedger::open(expand_path(path))
            .with_context(|| format!("Failed to open ledger {}", path.display()))?,
        None => {
            warn!("No ledger_path configured; builds will find no claimables");
            SqliteLedger::open_in_memory()?
        }
    };
    let ledger = Arc::new(ledger);

    let dist = match &config.database_path {
        Some(path) => {
            let store = SqliteStore::open(expand_path(path))
                .with_context(|| format!("Failed to open database {}", path.display()))?
                .with_lock_ttl(config.build_lock_ttl_secs);
            Distributor::new(config, Arc::new(store), ledger.clone(), ledger, chain.clone())?
        }
        None => {
            warn!("No database_path configured; epoch state is kept in memory");
            Distributor::new(
                config,
                Arc::new(MemoryStore::new()),
                ledger.clone(),
                ledger,
                chain.clone(),
            )?
        }
    };

    if config.verify_claim_transactions {
        info!("Claim transactions are verified against the chain");
        Ok(dist.with_verifier(chain))
    } else {
        Ok(dist)
    }
}

/// Prefix for selecting a period key that would otherwise read as a number.
const PERIOD_PREFIX: &str = "period:";

/// A bare number selects by epoch number, anything else by period key.
/// `period:<key>` always selects by period key.
fn parse_epoch(s: &str) -> EpochRef {
    if let Some(key) = s.strip_prefix(PERIOD_PREFIX) {
        return EpochRef::Period(key.to_string());
    }
    match s.parse::<u64>() {
        Ok(n) => EpochRef::Number(n),
        Err(_) => EpochRef::Period(s.to_string()),
    }
}

fn print_outcome(outcome: &BuildOutcome) {
    match outcome {
        BuildOutcome::Built(s) => {
            println!("Built epoch {}", s.epoch_number);
            print_summary(s);
        }
        BuildOutcome::AlreadyExists(s) => {
            println!("Epoch {} already exists for {}", s.epoch_number, s.period_key);
            print_summary(s);
        }
        BuildOutcome::Skipped { reason } => {
            println!("Build skipped: {:?}", reason);
        }
    }
}

fn print_summary(s: &EpochSummary) {
    println!("Epoch:      {}", s.epoch_number);
    println!("Period:     {}", s.period_key);
    println!("Root:       {}", s.root_hex);
    println!("Leaves:     {}", s.leaf_count);
    println!("Total:      {}", s.total_atomic);
    println!("Committed:  {}", s.committed_on_chain);
    if let Some(tx) = &s.on_chain_tx_ref {
        println!("Commit tx:  {}", tx);
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
