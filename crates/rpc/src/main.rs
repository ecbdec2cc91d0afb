//! CoinLedger CLI - Main entry point

use coinledger_core::{AccountId, CoinClass};
use coinledger_grants::GrantKind;
use coinledger_rpc::{commands, AppContext};
use coinledger_settlement::{SettleInstruction, SettleRequest};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "coinledger")]
#[command(about = "CoinLedger - Coin settlement core", long_about = None)]
struct Cli {
    /// Data directory path
    #[arg(short, long, default_value = "./data")]
    data: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open an account with the signup bonus
    Open { account: AccountId },

    /// Show balances of an account
    Balance { account: AccountId },

    /// Send a gift
    Gift {
        sender: AccountId,
        receiver: AccountId,
        amount: i64,
        /// Transaction id (generated if omitted)
        #[arg(long)]
        id: Option<String>,
    },

    /// Charge an enforcement fee by code (kick, ban, ...)
    Fee {
        payer: AccountId,
        code: String,
        /// Officer credited with the commission
        #[arg(long)]
        beneficiary: Option<AccountId>,
        #[arg(long)]
        id: Option<String>,
    },

    /// Credit a reward
    Reward {
        recipient: AccountId,
        amount: i64,
        /// Class credited (defaults to the configured reward class)
        #[arg(long)]
        class: Option<CoinClass>,
        #[arg(long)]
        id: Option<String>,
    },

    /// Cash out coins
    Payout {
        account: AccountId,
        amount: i64,
        #[arg(long)]
        id: Option<String>,
    },

    /// Administrative credit or debit of one class
    Adjust {
        account: AccountId,
        class: CoinClass,
        #[arg(allow_hyphen_values = true)]
        amount: i64,
        #[arg(long)]
        id: Option<String>,
    },

    /// Settle a raw JSON request
    Settle {
        /// Request body, e.g. '{"transaction_id":"t1","kind":"fee","payer":"alice","code":"kick"}'
        json: String,
    },

    /// Freeze an account
    Freeze {
        account: AccountId,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long, default_value = "admin")]
        by: String,
    },

    /// Unfreeze an account
    Unfreeze {
        account: AccountId,
        #[arg(long, default_value = "admin")]
        by: String,
    },

    /// Report a fraud signal
    RiskSignal {
        account: AccountId,
        reason: String,
        points: u64,
    },

    /// Frozen count and highest risk scores
    RiskOverview {
        #[arg(long)]
        top: Option<usize>,
    },

    /// Spin a chance game
    Draw {
        account: AccountId,
        #[arg(long, default_value = "wheel")]
        game: String,
        /// Draw id (generated if omitted)
        #[arg(long)]
        id: Option<String>,
    },

    /// Create a time-bounded grant starting now
    Grant {
        /// officer_assignment, feature_cycle, insurance or multiplier
        kind: GrantKind,
        subject: AccountId,
        #[arg(long, default_value = "60")]
        minutes: i64,
        /// Winner prize (feature cycles only)
        #[arg(long)]
        prize: Option<u64>,
    },

    /// Set the winner of a feature cycle
    AssignWinner { grant: String, winner: AccountId },

    /// Finalize expired grants
    Sweep {
        /// Keep sweeping on the configured interval until Ctrl-C
        #[arg(long)]
        watch: bool,
    },

    /// Show journal counts and the latest records
    Journal {
        #[arg(long, default_value = "10")]
        last: usize,
    },
}

fn transaction_id(id: Option<String>, prefix: &str) -> String {
    id.unwrap_or_else(|| format!("{prefix}-{}", Uuid::new_v4()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    // Create application context
    let ctx = AppContext::new(&cli.data).await?;

    match cli.command {
        Commands::Open { account } => commands::open(&ctx, &account).await?,

        Commands::Balance { account } => commands::balance(&ctx, &account).await?,

        Commands::Gift {
            sender,
            receiver,
            amount,
            id,
        } => {
            let request = SettleRequest::gift(transaction_id(id, "gift"), sender, receiver, amount);
            commands::settle(&ctx, &request).await?;
        }

        Commands::Fee {
            payer,
            code,
            beneficiary,
            id,
        } => {
            let request = SettleRequest::new(
                transaction_id(id, "fee"),
                SettleInstruction::Fee {
                    payer,
                    code,
                    beneficiary,
                },
            );
            commands::settle(&ctx, &request).await?;
        }

        Commands::Reward {
            recipient,
            amount,
            class,
            id,
        } => {
            let request = SettleRequest::new(
                transaction_id(id, "reward"),
                SettleInstruction::Reward {
                    recipient,
                    amount,
                    class,
                    stake: None,
                    forfeit: None,
                },
            );
            commands::settle(&ctx, &request).await?;
        }

        Commands::Payout { account, amount, id } => {
            let request = SettleRequest::payout(transaction_id(id, "payout"), account, amount);
            commands::settle(&ctx, &request).await?;
        }

        Commands::Adjust {
            account,
            class,
            amount,
            id,
        } => {
            let request =
                SettleRequest::adjustment(transaction_id(id, "adjust"), account, class, amount);
            commands::settle(&ctx, &request).await?;
        }

        Commands::Settle { json } => {
            commands::settle_json(&ctx, &json).await?;
        }

        Commands::Freeze {
            account,
            reason,
            by,
        } => commands::freeze(&ctx, &account, reason, &by).await?,

        Commands::Unfreeze { account, by } => commands::unfreeze(&ctx, &account, &by).await?,

        Commands::RiskSignal {
            account,
            reason,
            points,
        } => commands::risk_signal(&ctx, &account, &reason, points).await?,

        Commands::RiskOverview { top } => commands::risk_overview(&ctx, top).await?,

        Commands::Draw { account, game, id } => {
            let draw_id = transaction_id(id, "draw");
            commands::draw(&ctx, &account, &game, &draw_id).await?;
        }

        Commands::Grant {
            kind,
            subject,
            minutes,
            prize,
        } => commands::grant(&ctx, kind, subject, minutes, prize).await?,

        Commands::AssignWinner { grant, winner } => {
            commands::assign_winner(&ctx, &grant, &winner).await?
        }

        Commands::Sweep { watch } => {
            if watch {
                let (stop, shutdown) = tokio::sync::watch::channel(false);
                let sweeper = ctx.sweeper.clone();
                let handle = tokio::spawn(async move { sweeper.run(shutdown).await });
                tokio::signal::ctrl_c().await?;
                let _ = stop.send(true);
                handle.await?;
            } else {
                commands::sweep(&ctx).await?;
            }
        }

        Commands::Journal { last } => commands::journal(&ctx, last).await?,
    }

    Ok(())
}
