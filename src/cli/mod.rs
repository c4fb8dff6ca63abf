//! The interactive command line front-end.

pub mod command;

use std::path::Path;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use self::command::Command;
use crate::crypto::Address;
use crate::node::NodeHandle;
use crate::transaction::TransactionKind;

const HELP: &str = "\
Available commands:
  transaction <node_id> <coins|message> <value>  Send coins or a message
  stake <amount>                                 Lock funds for validation
  balance                                        Show the current balance
  view                                           View the last block
  history                                        Show transaction history
  logs                                           Show the node logs
  help                                           Show this help text
  exit                                           Exit the client";

const BOLD: &str = "\x1b[1m";
const RESET_COLOR: &str = "\x1b[0m";

/// The colour-coded identity prefix on every response line, so the output of
/// several nodes sharing a terminal stays tellable apart.
fn node_tag(handle: &NodeHandle) -> String {
    let label = if handle.id() == 0 {
        "[BOOTSTRAP]".to_owned()
    } else {
        format!("[NODE-{}]", handle.id())
    };
    format!("{}{BOLD}{label}{RESET_COLOR}", handle.color())
}

/// Reads commands until `exit`, ctrl-c or ctrl-d.
pub fn run(handle: &NodeHandle, log_path: Option<&Path>) -> rustyline::Result<()> {
    let mut rl = DefaultEditor::new()?;
    let tag = node_tag(handle);
    println!("{tag} Connected. Type 'help' to see the available commands.");

    loop {
        match rl.readline("blockchat> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                rl.add_history_entry(line.as_str())?;
                match line.parse::<Command>() {
                    Ok(Command::Exit) => break,
                    Ok(command) => execute(handle, command, log_path),
                    Err(err) => println!("{tag} Error: {err}"),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("{tag} Error: {err:?}");
                return Err(err);
            }
        }
    }
    println!("Exiting");
    Ok(())
}

fn execute(handle: &NodeHandle, command: Command, log_path: Option<&Path>) {
    let tag = node_tag(handle);
    match command {
        Command::NewTransaction(tx) => {
            match handle.execute_transaction(tx.receiver_id, tx.kind, tx.value) {
                Ok(()) => println!("{tag} Transaction broadcast"),
                Err(err) => println!("{tag} Error: {err}"),
            }
        }
        Command::Stake(stake) => match handle.set_stake(stake.amount) {
            Ok(()) => println!("{tag} Stake broadcast"),
            Err(err) => println!("{tag} Error: {err}"),
        },
        Command::ShowBalance => {
            let funds = handle.funds();
            println!(
                "{tag} Balance: {} BCC ({} staked, {} available)",
                funds.balance,
                funds.stake,
                funds.available()
            );
        }
        Command::ViewLastBlock => match serde_json::to_string_pretty(&handle.last_block()) {
            Ok(rendered) => {
                println!("{tag} Last block:");
                println!("{rendered}");
            }
            Err(err) => println!("{tag} Error: {err}"),
        },
        Command::ShowHistory => {
            let roster = handle.roster();
            let history = handle.history();
            if history.is_empty() {
                println!("{tag} No transactions yet");
            }
            let name = |address: &Address| {
                roster
                    .iter()
                    .find(|node| node.key == *address)
                    .map_or("?".to_owned(), |node| format!("node {}", node.id))
            };
            for tx in history {
                let line = match tx.type_of_transaction {
                    TransactionKind::Coins => format!(
                        "coins {} {} -> {}",
                        tx.value.amount().unwrap_or(0.0),
                        name(&tx.sender_address),
                        name(&tx.receiver_address)
                    ),
                    TransactionKind::Message => format!(
                        "message {:?} {} -> {}",
                        tx.value.text().unwrap_or(""),
                        name(&tx.sender_address),
                        name(&tx.receiver_address)
                    ),
                    TransactionKind::Stake => format!(
                        "stake {} by {}",
                        tx.value.amount().unwrap_or(0.0),
                        name(&tx.sender_address)
                    ),
                };
                println!("{tag} [{}] {line}", tx.timestamp.format("%H:%M:%S%.3f"));
            }
        }
        Command::ShowLogs => match log_path {
            Some(path) => match std::fs::read_to_string(path) {
                Ok(contents) => {
                    let lines: Vec<&str> = contents.lines().collect();
                    let tail = lines.len().saturating_sub(40);
                    for line in &lines[tail..] {
                        println!("{line}");
                    }
                }
                Err(err) => println!("{tag} Error: failed to read {}: {err}", path.display()),
            },
            None => println!("{tag} File logging is disabled"),
        },
        Command::Help => println!("{HELP}"),
        Command::Exit => unreachable!("handled by the prompt loop"),
    }
}
