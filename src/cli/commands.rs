use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "ledger-chain", about = "Single-node proof-of-work ledger")]
pub struct Opt {
    #[arg(
        long,
        global = true,
        help = "Path to a TOML configuration file (default: ./ledger.toml)"
    )]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    #[command(name = "createblockchain", about = "Create a new blockchain")]
    Createblockchain {
        #[arg(long, help = "The address to send genesis block reward to")]
        address: String,
    },
    #[command(
        name = "getbalance",
        about = "Get the wallet balance of the target address"
    )]
    GetBalance {
        #[arg(long, help = "The wallet address")]
        address: String,
    },
    #[command(name = "transfer", about = "Transfer value between addresses and mine it")]
    Transfer {
        #[arg(long, help = "Source wallet address")]
        from: String,
        #[arg(long, help = "Destination wallet address")]
        to: String,
        #[arg(long, help = "Amount to transfer")]
        amount: u64,
    },
    #[command(name = "createwallet", about = "Create a new wallet")]
    Createwallet,
    #[command(name = "addresses", about = "Print local wallet addresses")]
    Addresses,
    #[command(name = "chaindata", about = "Print all blocks in the blockchain")]
    Chaindata,
    #[command(name = "reindexutxo", about = "Rebuild UTXO index set")]
    Reindexutxo,
}
