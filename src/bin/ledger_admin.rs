// Ledger maintenance tool
// Usage: cargo run --bin ledger_admin -- <audit | rebuild --wallet <id> | rebuild --all | fund-float --currency NGN --amount 100000>

use clap::{Parser, Subcommand};
use futures::stream::{self, StreamExt, TryStreamExt};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use payroll_ledger_api::{
    database,
    models::{fits_money_scale, Currency, MONEY_SCALE},
    services::LedgerService,
    store::{PayrollStore, PgStore, WalletLedgerStore},
    Config,
};

const REBUILD_CONCURRENCY: usize = 4;

#[derive(Parser)]
#[command(name = "ledger_admin", about = "Audit and repair wallet projections")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compare every wallet with its ledger and list unbalanced entry sets
    Audit,
    /// Recompute wallet balances from the ledger
    Rebuild {
        #[arg(long, conflicts_with = "all", required_unless_present = "all")]
        wallet: Option<Uuid>,
        #[arg(long)]
        all: bool,
    },
    /// Add funds to the admin float of a currency
    FundFloat {
        #[arg(long)]
        currency: Currency,
        #[arg(long)]
        amount: Decimal,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load environment variables
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "payroll_ledger_api=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    let pool = database::new_pool(&config.database_url, 2).await?;
    database::migrate(&pool).await?;
    let store = PgStore::new(pool);
    let ledger = LedgerService::new(Arc::new(store.clone()));

    match cli.command {
        Command::Audit => {
            let report = ledger.audit().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_clean() {
                std::process::exit(2);
            }
        }
        Command::Rebuild { wallet: Some(id), .. } => {
            let wallet = ledger.rebuild_wallet(id).await?;
            println!(
                "✅ Wallet {} rebuilt: available {} {}, pending {}",
                wallet.id, wallet.available_balance, wallet.currency, wallet.pending_balance
            );
        }
        Command::Rebuild { wallet: None, .. } => {
            let wallets = store.all_wallets().await?;
            let rebuilt: Vec<_> = stream::iter(wallets.iter().map(|w| ledger.rebuild_wallet(w.id)))
                .buffer_unordered(REBUILD_CONCURRENCY)
                .try_collect()
                .await?;
            println!("✅ Rebuilt {} wallets", rebuilt.len());
        }
        Command::FundFloat { currency, amount } => {
            if amount <= Decimal::ZERO {
                anyhow::bail!("Amount must be greater than zero");
            }
            if !fits_money_scale(amount) {
                anyhow::bail!("Amount cannot have more than {} decimal places", MONEY_SCALE);
            }
            let balance = store.credit_admin_balance(currency, amount).await?;
            println!("✅ {} float is now {}", balance.currency, balance.balance);
        }
    }

    Ok(())
}
