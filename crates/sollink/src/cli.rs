use std::path::PathBuf;

use clap::{Parser, Subcommand};

use sollink_core::types::{Commitment, PublicKey};

/// Sollink: diagnostic client for ledger-node JSON-RPC and subscription endpoints.
#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    /// HTTP JSON-RPC endpoint.
    #[arg(long, default_value = "http://127.0.0.1:8899", env = "SOLLINK_RPC_URL")]
    pub rpc_url: String,

    /// Websocket subscription endpoint.
    #[arg(long, default_value = "ws://127.0.0.1:8900", env = "SOLLINK_WS_URL")]
    pub ws_url: String,

    /// Commitment level for reads and confirmations.
    #[arg(long, default_value = "confirmed", env = "SOLLINK_COMMITMENT")]
    pub commitment: Commitment,

    /// Client-side cap on HTTP requests per second.
    #[arg(long, env = "SOLLINK_RPS")]
    pub requests_per_second: Option<u32>,

    /// HTTP request timeout in seconds.
    #[arg(long, default_value = "30")]
    pub timeout_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the balance of an account in lamports.
    Balance { address: PublicKey },

    /// Print an account's owner, lamports and data.
    Account {
        address: PublicKey,
        /// Print the full data as hex instead of its length.
        #[arg(long)]
        data: bool,
    },

    /// Derive a program address from UTF-8 seeds, or a seeded address with `--base`.
    Derive {
        /// Owning program.
        #[arg(long)]
        program: PublicKey,
        /// Seeds in order (repeatable).
        #[arg(long = "seed")]
        seeds: Vec<String>,
        /// Derive `create_with_seed(base, seed, program)` instead; takes exactly one seed.
        #[arg(long)]
        base: Option<PublicKey>,
    },

    /// Request test lamports from the node's faucet.
    Airdrop {
        address: PublicKey,
        lamports: u64,
        /// Wait for the airdrop transaction through the subscription stream.
        #[arg(long)]
        confirm: bool,
        /// Seconds to wait for confirmation.
        #[arg(long, default_value = "60")]
        confirm_timeout_secs: u64,
    },

    /// Print slot updates until interrupted or `--count` is reached.
    WatchSlots {
        #[arg(long)]
        count: Option<u64>,
    },

    /// Print the public address of a keygen JSON key file.
    AddressFromKeypair { path: PathBuf },
}
