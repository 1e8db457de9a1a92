use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};

use stk_audit::{SyncAuditLog, DEFAULT_AUDIT_PATH, RECOVERY_WINDOW_HOURS};

#[derive(Parser)]
#[command(name = "stk")]
#[command(about = "StockKeep Core operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },

    /// Sync audit log utilities
    Audit {
        #[command(subcommand)]
        cmd: AuditCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply SQL migrations. Guardrail: refuses while unresolved sales are still pending retry unless --yes is provided.
    Migrate {
        /// Acknowledge migrating a DB that still has unresolved sales queued.
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Compute layered config hash + print canonical JSON
    Hash {
        /// Paths in merge order (base -> store -> local overrides)
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum AuditCmd {
    /// List sales whose latest recorded attempt is still unresolved
    Unresolved {
        /// Audit log path (defaults to STK_AUDIT_LOG, then the standard name)
        #[arg(long)]
        log: Option<String>,

        /// Window to scan, in hours
        #[arg(long, default_value_t = RECOVERY_WINDOW_HOURS)]
        hours: i64,
    },

    /// Print the newest audit records as JSON lines
    Tail {
        /// Audit log path (defaults to STK_AUDIT_LOG, then the standard name)
        #[arg(long)]
        log: Option<String>,

        /// How many records to print
        #[arg(short = 'n', long, default_value_t = 20)]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = stk_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = stk_db::status(&pool).await?;
                    println!(
                        "db_ok={} has_stock_levels_table={}",
                        s.ok, s.has_stock_levels_table
                    );
                }
                DbCmd::Migrate { yes } => {
                    // Guardrail: unresolved sales mean the retry queue still has
                    // writes to land; migrating under them needs an explicit ack.
                    let n = stk_db::count_unresolved_sales(&pool).await?;
                    if n > 0 && !yes {
                        anyhow::bail!(
                            "REFUSING MIGRATE: {} unresolved sale(s) still pending retry. Re-run with: `stk db migrate --yes`",
                            n
                        );
                    }

                    stk_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::Config { cmd } => match cmd {
            ConfigCmd::Hash { paths } => {
                let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
                let loaded = stk_config::load_layered_yaml(&path_refs)?;
                println!("config_hash={}", loaded.config_hash);
                println!("{}", loaded.canonical_json);
            }
        },

        Commands::Audit { cmd } => match cmd {
            AuditCmd::Unresolved { log, hours } => {
                let log = SyncAuditLog::open(audit_path(log))?;
                let unresolved = log.unresolved_since(Utc::now(), hours, usize::MAX)?;
                for o in &unresolved {
                    println!(
                        "sale_id={} status={} attempt={} ts={} error={}",
                        o.sale_id,
                        o.status.as_str(),
                        o.attempt,
                        o.ts_utc.to_rfc3339(),
                        o.error_details.as_deref().unwrap_or("-"),
                    );
                }
                println!("unresolved={}", unresolved.len());
            }
            AuditCmd::Tail { log, count } => {
                let log = SyncAuditLog::open(audit_path(log))?;
                let records = log.scan()?;
                let start = records.len().saturating_sub(count);
                for record in &records[start..] {
                    println!("{}", serde_json::to_string(record)?);
                }
            }
        },
    }

    Ok(())
}

/// --log flag, then STK_AUDIT_LOG, then the standard file name.
fn audit_path(flag: Option<String>) -> String {
    flag.or_else(|| std::env::var("STK_AUDIT_LOG").ok())
        .unwrap_or_else(|| DEFAULT_AUDIT_PATH.to_string())
}
