//! coupon-cli: Command-line admin interface for coupon-server.
//!
//! Lists, adds and toggles coupons and shows the claim history through the
//! server's admin API.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

mod client;

use client::AdminClient;
use coupon_core::{ClaimRecord, Coupon};

/// Coupon Drop admin interface.
#[derive(Parser)]
#[command(name = "coupon-cli")]
#[command(version, about = "Manage the Coupon Drop pool.")]
struct Cli {
    #[command(flatten)]
    conn: ConnArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConnArgs {
    /// coupon-server base URL.
    #[arg(long, global = true, env = "COUPON_SERVER", default_value = "http://127.0.0.1:8080")]
    server: String,

    /// Admin bearer token.
    #[arg(long, global = true, env = "COUPON_ADMIN_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Coupon pool management subcommands.
    Coupons {
        #[command(subcommand)]
        action: CouponAction,
    },
    /// Show the claim history, oldest first.
    Claims,
    /// Show pool counts and cooldown windows.
    Status,
}

#[derive(Subcommand)]
enum CouponAction {
    /// List every coupon.
    List,
    /// Add coupons.
    Add(AddArgs),
    /// Flip a coupon's active flag.
    Toggle {
        /// Coupon code.
        code: String,
    },
}

#[derive(Args)]
struct AddArgs {
    /// Codes to add.
    codes: Vec<String>,

    /// Read additional codes from a file, one per line.
    #[arg(short, long)]
    file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let client = AdminClient::new(&cli.conn.server, cli.conn.token)?;

    match cli.command {
        Commands::Coupons { action } => match action {
            CouponAction::List => coupons_list(&client).await,
            CouponAction::Add(args) => coupons_add(&client, args).await,
            CouponAction::Toggle { code } => coupons_toggle(&client, &code).await,
        },
        Commands::Claims => claims_list(&client).await,
        Commands::Status => status(&client).await,
    }
}

async fn coupons_list(client: &AdminClient) -> Result<()> {
    let coupons = client.list_coupons().await?;
    if coupons.is_empty() {
        println!("No coupons.");
        return Ok(());
    }
    for c in &coupons {
        println!("{}", coupon_line(c));
    }
    println!("\n{} coupon(s)", coupons.len());
    Ok(())
}

async fn coupons_add(client: &AdminClient, args: AddArgs) -> Result<()> {
    let mut codes = args.codes;
    if let Some(path) = &args.file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        codes.extend(parse_code_list(&text));
    }
    if codes.is_empty() {
        bail!("No codes given");
    }

    let mut failed = 0usize;
    for code in &codes {
        match client.add_coupon(code).await {
            Ok(c) => println!("added   {}", c.code),
            Err(e) => {
                failed += 1;
                eprintln!("failed  {code}: {e:#}");
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} code(s) not added", codes.len());
    }
    Ok(())
}

async fn coupons_toggle(client: &AdminClient, code: &str) -> Result<()> {
    let c = client.toggle_coupon(code).await?;
    println!("{}", coupon_line(&c));
    Ok(())
}

async fn claims_list(client: &AdminClient) -> Result<()> {
    let claims = client.list_claims().await?;
    if claims.is_empty() {
        println!("No claims yet.");
        return Ok(());
    }
    for r in &claims {
        println!("{}", claim_line(r));
    }
    println!("\n{} claim(s)", claims.len());
    Ok(())
}

async fn status(client: &AdminClient) -> Result<()> {
    let s = client.status().await?;
    println!("\n=== COUPON POOL ===");
    println!("Total:     {}", s.coupons_total);
    println!("Available: {}", s.coupons_available);
    println!("Claimed:   {}", s.coupons_claimed);
    println!("Inactive:  {}", s.coupons_inactive);
    println!();
    println!("Session cooldown: {}s", s.session_cooldown_secs);
    println!("Address cooldown: {}s", s.address_cooldown_secs);
    Ok(())
}

// ── Formatting ────────────────────────────────────────────────────────────────

fn coupon_line(c: &Coupon) -> String {
    let state = match (&c.claim, c.active) {
        (Some(claim), _) => format!("claimed by {} at {}", claim.by, claim.at.to_rfc3339()),
        (None, true) => "available".to_string(),
        (None, false) => "inactive".to_string(),
    };
    format!("{:<24} {}", c.code, state)
}

fn claim_line(r: &ClaimRecord) -> String {
    format!(
        "{}  {:<24} {:<40} session {}",
        r.claimed_at.to_rfc3339(),
        r.coupon_code,
        r.address.as_str(),
        r.session
    )
}

/// One code per line; blank lines and `#` comments skipped.
fn parse_code_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use coupon_core::{ClientAddress, CouponClaim};

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "coupon-cli",
            "coupons",
            "add",
            "A",
            "B",
            "--server",
            "http://example:9000",
            "--token",
            "t",
        ])
        .unwrap();
        assert_eq!(cli.conn.server, "http://example:9000");
        assert_eq!(cli.conn.token.as_deref(), Some("t"));
        match cli.command {
            Commands::Coupons { action: CouponAction::Add(args) } => assert_eq!(args.codes, ["A", "B"]),
            _ => panic!("expected coupons add"),
        }
    }

    #[test]
    fn code_list_skips_blank_and_comments() {
        let codes = parse_code_list("# batch 1\nA\n\n  B  \n#C\n");
        assert_eq!(codes, ["A", "B"]);
    }

    #[test]
    fn coupon_line_states() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut c = Coupon::new("SAVE10", t);
        assert!(coupon_line(&c).ends_with("available"));
        c.active = false;
        assert!(coupon_line(&c).ends_with("inactive"));
        c.claim = Some(CouponClaim {
            by: ClientAddress::parse("203.0.113.1").unwrap(),
            at: t,
        });
        assert!(coupon_line(&c).contains("claimed by 203.0.113.1"));
    }
}
