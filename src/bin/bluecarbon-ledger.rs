#![forbid(unsafe_code)]
//! Command-line access to the blue carbon credit ledger

use std::path::PathBuf;

use bluecarbon_ledger::blockchain::Block;
use bluecarbon_ledger::cli::{load_ledger_from_config, short_hash};
use bluecarbon_ledger::crypto::{iso_timestamp, verify_hash};
use bluecarbon_ledger::export::LedgerExport;
use bluecarbon_ledger::transaction::{ApprovalEvent, Transaction};
use clap::{Parser, Subcommand};
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, ContentArrangement, Table};

#[derive(Parser, Debug)]
#[command(
    name = "bluecarbon-ledger",
    about = "Hash-chained ledger for blue carbon restoration credits",
    version
)]
struct Cli {
    /// Path to the ledger configuration file (TOML).
    #[arg(long, short = 'c', env = "BLUECARBON_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record an approved project and seal pending transactions into a block.
    Approve {
        #[arg(long)]
        project: String,
        /// Recipient of the credits (the project owner).
        #[arg(long)]
        user: String,
        #[arg(long)]
        credits: f64,
        /// Reference to the proof document.
        #[arg(long)]
        proof: Option<String>,
        #[arg(long)]
        verifier: Option<String>,
    },
    /// Seal any pending transactions left behind by a failed write.
    Seal {
        #[arg(long)]
        validator: Option<String>,
    },
    /// List all blocks.
    Blocks,
    /// Show one block with its transactions.
    Block { index: u64 },
    /// List transactions waiting for a block.
    Pending,
    /// Re-verify every block hash, link and Merkle root.
    Verify,
    /// Export the whole chain as JSON.
    Export {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Import blocks from a JSON export.
    Import { file: PathBuf },
    /// Show the issuance certificate for a project.
    Certificate { project: String },
    /// Check a SHA-256 digest against its input, e.g. a block pre-image.
    VerifyHash {
        #[arg(long)]
        data: String,
        #[arg(long)]
        expected: String,
    },
}

fn block_table(blocks: &[Block]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Index").add_attribute(Attribute::Bold),
            Cell::new("Timestamp").add_attribute(Attribute::Bold),
            Cell::new("Txs").add_attribute(Attribute::Bold),
            Cell::new("Merkle Root").add_attribute(Attribute::Bold),
            Cell::new("Previous").add_attribute(Attribute::Bold),
            Cell::new("Hash").add_attribute(Attribute::Bold),
        ]);
    for block in blocks {
        table.add_row(vec![
            Cell::new(block.index),
            Cell::new(iso_timestamp(&block.timestamp)),
            Cell::new(block.transaction_count),
            Cell::new(short_hash(&block.merkle_root)),
            Cell::new(short_hash(&block.previous_hash)),
            Cell::new(short_hash(&block.block_hash)),
        ]);
    }
    table
}

fn transaction_table(transactions: &[Transaction]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Tx Id").add_attribute(Attribute::Bold),
            Cell::new("Project").add_attribute(Attribute::Bold),
            Cell::new("To").add_attribute(Attribute::Bold),
            Cell::new("Credits").add_attribute(Attribute::Bold),
            Cell::new("Timestamp").add_attribute(Attribute::Bold),
        ]);
    for tx in transactions {
        table.add_row(vec![
            Cell::new(short_hash(&tx.tx_id)),
            Cell::new(&tx.project_id),
            Cell::new(&tx.to),
            Cell::new(format!("{:.2}", tx.credits)),
            Cell::new(iso_timestamp(&tx.timestamp)),
        ]);
    }
    table
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let (config, ledger) = load_ledger_from_config(&cli.config)?;

    match cli.command {
        Command::Approve {
            project,
            user,
            credits,
            proof,
            verifier,
        } => {
            let mut event = ApprovalEvent::new(project, user, credits);
            event.proof_reference = proof;
            event.verifier_id = verifier;

            let outcome = ledger.record_approval(&event)?;
            println!("{}", "✅ Approval recorded".bright_green().bold());
            println!("   Transaction: {}", outcome.transaction.tx_id.bright_white());
            match outcome.block {
                Some(block) => {
                    println!("   Sealed block #{}: {}", block.index, block.block_hash.cyan());
                    println!("   Pre-image:     {}", block.block_hash_input.dimmed());
                }
                None => println!("{}", "   Transaction is pending".yellow()),
            }
        }
        Command::Seal { validator } => {
            let validator = validator.unwrap_or(config.ledger.default_validator);
            match ledger.seal_pending(&validator)? {
                Some(block) => println!(
                    "{} #{} with {} transaction(s): {}",
                    "✅ Sealed block".bright_green().bold(),
                    block.index,
                    block.transaction_count,
                    block.block_hash.cyan()
                ),
                None => println!("{}", "Nothing pending".yellow()),
            }
        }
        Command::Blocks => {
            let blocks = ledger.blocks()?;
            if blocks.is_empty() {
                println!("{}", "No blocks yet".yellow());
            } else {
                println!("{}", block_table(&blocks));
            }
        }
        Command::Block { index } => {
            let block = ledger
                .block_by_index(index)?
                .ok_or_else(|| format!("No block at index {}", index))?;
            println!("{}", format!("📦 Block #{}", block.index).bright_cyan().bold());
            println!("   Hash:        {}", block.block_hash);
            println!("   Previous:    {}", block.previous_hash);
            println!("   Merkle root: {}", block.merkle_root);
            println!("   Pre-image:   {}", block.block_hash_input);
            println!(
                "   Validator:   {}",
                block.validator_signature.as_deref().unwrap_or("-")
            );
            println!("{}", transaction_table(&ledger.block_transactions(&block.id)?));
        }
        Command::Pending => {
            let pending = ledger.pending_transactions()?;
            if pending.is_empty() {
                println!("{}", "No pending transactions".green());
            } else {
                println!("{}", transaction_table(&pending));
            }
        }
        Command::Verify => {
            let report = ledger.verify_chain()?;
            if report.ok {
                println!(
                    "{} ({} block(s), {} pending)",
                    "✅ Chain verified".bright_green().bold(),
                    report.blocks_checked,
                    report.pending_transactions
                );
            } else {
                println!("{}", "❌ Chain verification failed".red().bold());
                for error in &report.errors {
                    println!("   - {}", error.red());
                }
                std::process::exit(1);
            }
        }
        Command::Export { out } => {
            let json = ledger.export()?.to_json_pretty()?;
            match out {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    println!("{} {}", "✅ Exported to".bright_green(), path.display());
                }
                None => println!("{}", json),
            }
        }
        Command::Import { file } => {
            let export = LedgerExport::from_json(&std::fs::read_to_string(&file)?)?;
            let imported = ledger.import(&export)?;
            println!(
                "{} {} block(s)",
                "✅ Imported".bright_green().bold(),
                imported
            );
        }
        Command::Certificate { project } => match ledger.certificate(&project)? {
            Some(cert) => println!("{}", serde_json::to_string_pretty(&cert)?),
            None => {
                eprintln!("{}", format!("No issuance recorded for {}", project).red());
                std::process::exit(1);
            }
        },
        Command::VerifyHash { data, expected } => {
            if verify_hash(&data, &expected) {
                println!("{}", "✅ Hash matches".bright_green().bold());
            } else {
                println!("{}", "❌ Hash does not match".red().bold());
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
