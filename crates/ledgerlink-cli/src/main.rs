//! ledgerlink - terminal client for the credit ledger.
//!
//! Runs the core in standalone mode: log in with email and password, then
//! check the balance, spend or add credits, and page through history. The
//! session persists between invocations in the user's cache directory.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ledgerlink_core::api::HttpTransport;
use ledgerlink_core::auth::FileStore;
use ledgerlink_core::mode::StaticContext;
use ledgerlink_core::models::{PaginatedHistory, TransactionType};
use ledgerlink_core::{Config, CreditSystem, Mode, Outcome};

/// Session scope used by the terminal client.
const SESSION_SCOPE: &str = "cli";

const USAGE: &str = "\
Usage: ledgerlink [--json] <command> [args]

Commands:
  login [email]                       Log in (password is prompted)
  logout                              Clear the stored session
  status                              Show session and cached balance
  balance                             Fetch the current balance
  spend <amount> <description...>     Spend credits
  add <amount> [--type <type>] <description...>
                                      Add credits (type: add, bonus, refund, manual)
  history [page] [page-size]          Show a page of transactions

Environment:
  RUST_LOG            Log filter (default: warn)
  LEDGERLINK_LOG_DIR  Also write logs to a daily file in this directory
  LEDGERLINK_*        Config overrides (see config.json)";

/// Initialize the tracing subscriber. Logs go to stderr, and to a daily
/// rolling file when `LEDGERLINK_LOG_DIR` is set. The returned guard must be
/// held until exit so buffered file output is flushed.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr_layer = fmt::layer().with_writer(io::stderr);

    match std::env::var("LEDGERLINK_LOG_DIR") {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "ledgerlink.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(stderr_layer)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .with(filter)
                .init();
            Some(guard)
        }
        _ => {
            tracing_subscriber::registry()
                .with(stderr_layer)
                .with(filter)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _guard = init_tracing();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let json = take_flag(&mut args, "--json");
    if args.is_empty() || args[0] == "--help" || args[0] == "-h" {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = Config::load()?;
    let store = FileStore::open(&Config::session_dir()?, SESSION_SCOPE)?;
    let transport = HttpTransport::new(config.request_timeout())?;
    let system = CreditSystem::new(
        config,
        &StaticContext::top_level(),
        Arc::new(transport),
        Arc::new(store),
    )?;
    if system.mode() != Mode::Standalone {
        bail!("The terminal client only runs in standalone mode; check the `mode` setting");
    }
    system.start().await;
    info!(command = %args[0], "ledgerlink starting");

    let command = args.remove(0);
    match command.as_str() {
        "login" => login(&system, args.first().cloned(), json).await,
        "logout" => {
            system.logout().await;
            println!("Logged out.");
            Ok(())
        }
        "status" => status(&system, json).await,
        "balance" => {
            let result = system.check_balance().await;
            report(result, json, |b| println!("Balance: {}", b.balance))
        }
        "spend" => {
            let (amount, description) = amount_and_description(&args)?;
            let result = system.spend(amount, &description).await;
            report(result, json, |r| print_receipt("Spent", amount, r.new_balance, r.provisional))
        }
        "add" => {
            let kind = match take_option(&mut args, "--type") {
                Some(raw) => TransactionType::parse(&raw)
                    .with_context(|| format!("Unknown transaction type: {}", raw))?,
                None => TransactionType::Add,
            };
            let (amount, description) = amount_and_description(&args)?;
            let result = system.add(amount, kind, &description).await;
            report(result, json, |r| print_receipt("Added", amount, r.new_balance, r.provisional))
        }
        "history" => {
            let page = parse_arg(args.first(), 1, "page")?;
            let page_size = parse_arg(args.get(1), system.config().history_page_size, "page size")?;
            let result = system.get_history(page, page_size).await;
            report(result, json, print_history)
        }
        other => bail!("Unknown command: {}\n\n{}", other, USAGE),
    }
}

async fn login(system: &CreditSystem, email: Option<String>, json: bool) -> Result<()> {
    let email = match email {
        Some(email) => email,
        None => prompt("Email: ")?,
    };
    let password = rpassword::prompt_password("Password: ").context("Failed to read password")?;
    if email.trim().is_empty() || password.is_empty() {
        bail!("Email and password required");
    }

    let result = system.login(email.trim(), &password).await;
    report(result, json, |user| println!("Logged in as {}", user.display_name()))
}

async fn status(system: &CreditSystem, json: bool) -> Result<()> {
    let snapshot = system.snapshot().await;
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    match snapshot.user {
        Some(ref user) if snapshot.is_authenticated => {
            println!("Logged in as {} <{}>", user.display_name(), user.email)
        }
        _ => println!("Not logged in ({})", system.session().state().await),
    }
    match snapshot.balance {
        Some(balance) => println!("Cached balance: {}", balance),
        None => println!("Cached balance: unknown (run `ledgerlink balance`)"),
    }
    if let Some(error) = snapshot.error {
        println!("Last error: {}", error);
    }
    Ok(())
}

/// Print a result, either as the `{success, ...}` envelope or as text.
/// A failed operation exits non-zero.
fn report<T: Serialize>(
    result: ledgerlink_core::Result<T>,
    json: bool,
    print: impl FnOnce(&T),
) -> Result<()> {
    if json {
        let outcome = Outcome::from(result);
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        if !outcome.is_success() {
            std::process::exit(1);
        }
        return Ok(());
    }

    match result {
        Ok(value) => {
            print(&value);
            Ok(())
        }
        Err(e) => bail!("{} ({})", e, e.code()),
    }
}

fn print_receipt(verb: &str, amount: i64, new_balance: Option<i64>, provisional: bool) {
    match new_balance {
        Some(balance) if provisional => println!("{} {}. New balance: ~{} (pending refresh)", verb, amount, balance),
        Some(balance) => println!("{} {}. New balance: {}", verb, amount, balance),
        None => println!("{} {}.", verb, amount),
    }
}

fn print_history(history: &PaginatedHistory) {
    if history.transactions.is_empty() {
        println!("No transactions.");
    }
    for tx in &history.transactions {
        println!(
            "{}  {:>8}  {:<9}  {}",
            tx.created_at.format("%Y-%m-%d %H:%M"),
            tx.display_amount(),
            tx.kind,
            tx.description.as_deref().unwrap_or("")
        );
    }
    println!(
        "Page {} of {} ({} transactions)",
        history.page,
        history.total_pages.max(1),
        history.total_count
    );
    if history.has_next() {
        println!("Next page: ledgerlink history {}", history.page + 1);
    }
}

// ============================================================================
// Argument helpers
// ============================================================================

fn take_flag(args: &mut Vec<String>, flag: &str) -> bool {
    let before = args.len();
    args.retain(|a| a != flag);
    args.len() != before
}

fn take_option(args: &mut Vec<String>, name: &str) -> Option<String> {
    let idx = args.iter().position(|a| a == name)?;
    args.remove(idx);
    if idx < args.len() {
        Some(args.remove(idx))
    } else {
        None
    }
}

fn amount_and_description(args: &[String]) -> Result<(i64, String)> {
    let raw = args.first().context("Missing amount")?;
    let amount = raw
        .parse()
        .with_context(|| format!("Amount must be a whole number of credits: {}", raw))?;
    Ok((amount, args[1..].join(" ")))
}

fn parse_arg(arg: Option<&String>, default: u32, what: &str) -> Result<u32> {
    match arg {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("Invalid {}: {}", what, raw)),
        None => Ok(default),
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
