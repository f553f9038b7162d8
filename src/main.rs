// Entry point for the ledger CLI
// Each command opens the chain store, runs one ledger operation and exits

use clap::Parser;
use env_logger::Env;
use ledger_chain::{
    address_to_pub_key_hash, convert_address, hash_pub_key, Command, Config, Ledger,
    LedgerError, Opt, Result, Wallets,
};
use log::error;
use std::process;

fn main() {
    let opt = Opt::parse();

    // the log level lives in the configuration, so read it before logging starts
    let config = Config::load(opt.config.as_deref());
    let log_level = config
        .as_ref()
        .map(|config| config.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    if let Err(e) = config.and_then(|config| run_command(&config, opt.command)) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn open_ledger(config: &Config) -> Result<Ledger> {
    Ledger::open(config.open_store()?, config.chain_params())
}

fn run_command(config: &Config, command: Command) -> Result<()> {
    match command {
        Command::Createblockchain { address } => {
            let pub_key_hash = address_to_pub_key_hash(&address)?;
            let ledger = Ledger::create(
                config.open_store()?,
                config.chain_params(),
                &pub_key_hash,
            )?;
            ledger.flush()?;
            println!("Done!");
        }
        Command::GetBalance { address } => {
            let pub_key_hash = address_to_pub_key_hash(&address)?;
            let ledger = open_ledger(config)?;
            let balance = ledger.balance(&pub_key_hash);
            println!("Balance of {address}: {balance}");
        }
        Command::Transfer { from, to, amount } => {
            address_to_pub_key_hash(&from)?;
            let to_pub_key_hash = address_to_pub_key_hash(&to)?;

            let wallets = Wallets::load(&config.wallet_file)?;
            let wallet = wallets
                .get_wallet(&from)
                .ok_or_else(|| LedgerError::Wallet(format!("No local wallet for {from}")))?;

            let ledger = open_ledger(config)?;
            let block = ledger.transfer(wallet, &to_pub_key_hash, amount)?;
            println!("Success! Mined block {}", block.get_hash_hex());
        }
        Command::Createwallet => {
            let mut wallets = Wallets::load(&config.wallet_file)?;
            let address = wallets.create_wallet()?;
            println!("Your new address: {address}");
        }
        Command::Addresses => {
            let wallets = Wallets::load(&config.wallet_file)?;
            for address in wallets.get_addresses() {
                println!("{address}");
            }
        }
        Command::Chaindata => {
            let ledger = open_ledger(config)?;
            for block in ledger.iter() {
                let block = block?;
                println!("============ Block {} ============", block.get_hash_hex());
                println!("Prev. block: {}", data_encoding::HEXLOWER.encode(block.get_prev_hash()));
                println!("Timestamp:   {}", block.get_timestamp());
                println!("Nonce:       {}", block.get_nonce());
                for tx in block.get_transactions() {
                    println!("{tx}");
                    if !tx.is_coinbase() {
                        for input in tx.get_inputs() {
                            let from = convert_address(&hash_pub_key(input.get_pub_key()));
                            println!("     From: {from}");
                        }
                    }
                    for output in tx.get_outputs() {
                        println!("     To:   {}", convert_address(output.get_pub_key_hash()));
                    }
                }
                println!("PoW: {}", ledger.pow().validate(&block));
                println!();
            }
        }
        Command::Reindexutxo => {
            let ledger = open_ledger(config)?;
            let count = ledger.reindex_utxo()?;
            println!("Done! There are {count} transactions in the UTXO set.");
        }
    }
    Ok(())
}
