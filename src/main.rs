//! `economy`: seed and inspect a galaxy economy database.
//!
//! Usage:
//!   economy seed
//!   economy open-account --entity player:1
//!   economy deposit --entity player:1 --amount 1000
//!   economy transfer --from player:1 --to settlement:4 --amount 250 --memo "rent"
//!   economy quote --value 10000 --route-risk 0.6

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use galaxy_economy::config::EconomyConfig;
use galaxy_economy::economy::Economy;
use galaxy_economy::entity::EntityRef;
use galaxy_economy::insurance::RiskFactors;
use galaxy_economy::ledger::{Account, Currency};
use rust_decimal::Decimal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "economy")]
#[command(about = "Ledger, market and insurance tooling for the galaxy economy")]
struct Cli {
    /// SQLite database path (overrides ECONOMY_DB_PATH)
    #[arg(long, env = "ECONOMY_DB_PATH")]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the trade currency, tax authority and NPC insurers
    Seed,

    /// Find or create an account
    OpenAccount {
        /// Owner, written kind:id (e.g. player:1)
        #[arg(long)]
        entity: EntityRef,
        /// Currency symbol (defaults to the trade currency)
        #[arg(long)]
        currency: Option<String>,
    },

    Deposit {
        #[arg(long)]
        entity: EntityRef,
        #[arg(long)]
        amount: Decimal,
        #[arg(long)]
        currency: Option<String>,
        #[arg(long)]
        memo: Option<String>,
    },

    Withdraw {
        #[arg(long)]
        entity: EntityRef,
        #[arg(long)]
        amount: Decimal,
        #[arg(long)]
        currency: Option<String>,
        #[arg(long)]
        memo: Option<String>,
    },

    Transfer {
        #[arg(long)]
        from: EntityRef,
        #[arg(long)]
        to: EntityRef,
        #[arg(long)]
        amount: Decimal,
        #[arg(long)]
        currency: Option<String>,
        #[arg(long)]
        memo: Option<String>,
    },

    /// Show balances for an entity
    Balance {
        #[arg(long)]
        entity: EntityRef,
    },

    /// Show an account's transaction history
    History {
        #[arg(long)]
        entity: EntityRef,
        #[arg(long)]
        currency: Option<String>,
        /// Most recent rows to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Set the exchange rate between two currencies
    SetRate {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        rate: Decimal,
    },

    /// Quote insurance for a contract across insurers and tiers
    Quote {
        #[arg(long)]
        value: Decimal,
        #[arg(long)]
        route_risk: Option<f64>,
        #[arg(long)]
        reliability: Option<f64>,
        #[arg(long)]
        cargo_value: Option<Decimal>,
    },

    /// List insurers with reserve and solvency
    Insurers,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "galaxy_economy=info,economy=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = EconomyConfig::from_env()?;
    if let Some(db_path) = cli.db_path {
        config.db_path = db_path;
    }
    let economy = Economy::bootstrap(config).await?;

    match cli.command {
        Commands::Seed => seed(&economy).await?,
        Commands::OpenAccount { entity, currency } => {
            let account = account_for(&economy, entity, currency.as_deref()).await?;
            print_account(&account);
        }
        Commands::Deposit {
            entity,
            amount,
            currency,
            memo,
        } => {
            let mut account = account_for(&economy, entity, currency.as_deref()).await?;
            let balance = economy
                .ledger
                .deposit(&mut account, amount, memo.as_deref())
                .await
                .with_context(|| format!("Deposit into {} failed", entity))?;
            println!("{} balance: {}", entity, balance);
        }
        Commands::Withdraw {
            entity,
            amount,
            currency,
            memo,
        } => {
            let mut account = account_for(&economy, entity, currency.as_deref()).await?;
            let balance = economy
                .ledger
                .withdraw(&mut account, amount, memo.as_deref())
                .await
                .with_context(|| format!("Withdrawal from {} failed", entity))?;
            println!("{} balance: {}", entity, balance);
        }
        Commands::Transfer {
            from,
            to,
            amount,
            currency,
            memo,
        } => {
            let mut sender = account_for(&economy, from, currency.as_deref()).await?;
            let mut receiver = account_for(&economy, to, currency.as_deref()).await?;
            let reference = economy
                .ledger
                .transfer(&mut sender, amount, &mut receiver, memo.as_deref())
                .await
                .with_context(|| format!("Transfer {} -> {} failed", from, to))?;
            println!("Transfer {} posted", reference);
            print_account(&sender);
            print_account(&receiver);
        }
        Commands::Balance { entity } => {
            let accounts = economy.ledger.accounts_of(entity).await?;
            if accounts.is_empty() {
                println!("{} has no accounts", entity);
            }
            for account in &accounts {
                print_account(account);
            }
        }
        Commands::History {
            entity,
            currency,
            limit,
        } => {
            let account = account_for(&economy, entity, currency.as_deref()).await?;
            let transactions = economy.ledger.transactions(account.id).await?;
            println!("=== {} (account {}) ===", entity, account.id);
            for tx in transactions.iter().rev().take(limit) {
                println!(
                    "{}  {:<14} {:>14}  {:<24} {}",
                    tx.created_at.format("%Y-%m-%d %H:%M:%S"),
                    tx.transaction_type,
                    tx.amount,
                    tx.recipient,
                    tx.description.as_deref().unwrap_or("")
                );
            }
        }
        Commands::SetRate { from, to, rate } => {
            let from_currency = lookup_currency(&economy, &from).await?;
            let to_currency = lookup_currency(&economy, &to).await?;
            economy
                .ledger
                .set_rate(from_currency.id, to_currency.id, rate)
                .await?;
            println!("1 {} = {} {}", from_currency.symbol, rate, to_currency.symbol);
        }
        Commands::Quote {
            value,
            route_risk,
            reliability,
            cargo_value,
        } => {
            let factors = RiskFactors {
                route_risk,
                contractor_reliability: reliability,
                cargo_value,
            };
            let quotes = economy.insurance.quote_options(value, &factors).await?;
            if quotes.is_empty() {
                println!("No active insurers; run `economy seed` first");
            }
            for quote in &quotes {
                println!(
                    "{:<32} {:<8} coverage {:>12}  premium {:>10}  deductible {:>10}",
                    quote.insurer_name,
                    quote.tier,
                    quote.coverage_amount,
                    quote.premium,
                    quote.deductible
                );
            }
        }
        Commands::Insurers => {
            for insurer in economy.insurance.insurers().await? {
                let reserve = economy.insurance.reserve(insurer.id).await?;
                println!(
                    "{:>3}  {:<32} {:<13} reserve {:>14}  solvency {:>9.4}  base premium {:.4}",
                    insurer.id,
                    insurer.name,
                    insurer.status,
                    reserve,
                    insurer.solvency_ratio,
                    insurer.base_premium()
                );
            }
        }
    }

    Ok(())
}

async fn seed(economy: &Economy) -> Result<()> {
    let insurers = economy
        .insurance_market
        .seed_npc_insurers()
        .await
        .context("Failed to seed NPC insurers")?;
    println!(
        "Trade currency {} (id {}), sales tax {}",
        economy.trade_currency.symbol, economy.trade_currency.id, economy.config.sales_tax_rate
    );
    for insurer in &insurers {
        println!("Insurer {:>3}  {}", insurer.id, insurer.name);
    }
    Ok(())
}

async fn lookup_currency(economy: &Economy, symbol: &str) -> Result<Currency> {
    economy
        .ledger
        .find_currency(symbol)
        .await?
        .with_context(|| format!("unknown currency {}", symbol))
}

async fn account_for(
    economy: &Economy,
    entity: EntityRef,
    currency: Option<&str>,
) -> Result<Account> {
    let currency_id = match currency {
        Some(symbol) => lookup_currency(economy, symbol).await?.id,
        None => economy.trade_currency.id,
    };
    economy
        .ledger
        .find_or_create_account(entity, currency_id)
        .await
        .with_context(|| format!("Failed to open account for {}", entity))
}

fn print_account(account: &Account) {
    println!(
        "account {:>4}  {:<28} currency {:>3}  balance {:>14}  v{}",
        account.id, account.accountable, account.currency_id, account.balance, account.lock_version
    );
}
