// Hotel Back-Office - API stub server
// In-memory stand-in for the back-office REST API, for local runs of the CLI and TUI

use anyhow::{Context, Result};
use clap::Parser;
use hotel_backoffice::stub::{self, StubState, ADMIN_PASSWORD, ADMIN_USERNAME};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "backoffice-stub", version, about = "In-memory back-office API for local testing")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8000")]
    addr: String,

    /// Issue this code for every OTP instead of a random one
    #[arg(long)]
    otp: Option<String>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).compact().init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    println!("🏨 Hotel Back-Office - API Stub");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let mut state = StubState::system().with_printed_otps();
    if let Some(code) = args.otp {
        println!("✓ Fixed OTP: {}", code);
        state = state.with_fixed_otp(code);
    }

    let listener = tokio::net::TcpListener::bind(&args.addr)
        .await
        .with_context(|| format!("Failed to bind to {}", args.addr))?;
    let addr = listener.local_addr()?;

    println!("\n🚀 Stub running on http://{}", addr);
    println!("   Login: {} / {}", ADMIN_USERNAME, ADMIN_PASSWORD);
    println!("   OTPs are printed here when issued");
    println!("\n   Press Ctrl+C to stop\n");

    stub::serve(listener, state).await.context("Server error")?;
    Ok(())
}
