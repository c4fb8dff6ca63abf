//! The various commands supported by the CLI.

use std::str::FromStr;

use crate::transaction::{TransactionKind, TransactionValue};

#[derive(Debug, PartialEq)]
pub enum Command {
    NewTransaction(NewTransactionCommand),
    Stake(StakeCommand),
    ShowBalance,
    ViewLastBlock,
    ShowHistory,
    ShowLogs,
    Help,
    Exit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(cmd: &str) -> Result<Self, Self::Err> {
        let cmd = cmd.trim();
        Ok(match cmd {
            "balance" => Command::ShowBalance,
            "view" => Command::ViewLastBlock,
            "history" => Command::ShowHistory,
            "logs" => Command::ShowLogs,
            "help" => Command::Help,
            "exit" => Command::Exit,
            cmd if cmd.starts_with("transaction ") => Command::NewTransaction(cmd.parse()?),
            cmd if cmd.starts_with("stake ") => Command::Stake(cmd.parse()?),
            cmd => return Err(format!("invalid command: {cmd}")),
        })
    }
}

#[derive(Debug, PartialEq)]
pub struct NewTransactionCommand {
    pub receiver_id: i64,
    pub kind: TransactionKind,
    pub value: TransactionValue,
}

impl FromStr for NewTransactionCommand {
    type Err = String;

    fn from_str(cmd: &str) -> Result<Self, Self::Err> {
        let mut parts = cmd.splitn(4, ' ');

        assert_eq!(parts.next(), Some("transaction"));

        let receiver_id = match parts.next() {
            Some(id) => id
                .parse::<i64>()
                .map_err(|_| "Could not parse the node id.".to_owned())?,
            None => return Err("No node id provided.".into()),
        };

        let kind = match parts.next() {
            Some("coins") => TransactionKind::Coins,
            Some("message") => TransactionKind::Message,
            Some(other) => return Err(format!("Invalid transaction type: {other}")),
            None => return Err("No transaction type provided.".into()),
        };

        let value = match parts.next() {
            None => return Err("No value provided.".into()),
            Some(raw) if kind == TransactionKind::Coins => TransactionValue::Amount(
                raw.trim()
                    .parse::<f64>()
                    .map_err(|_| "Could not parse the amount.".to_owned())?,
            ),
            Some(raw) => TransactionValue::Text(raw.to_owned()),
        };

        Ok(NewTransactionCommand {
            receiver_id,
            kind,
            value,
        })
    }
}

#[derive(Debug, PartialEq)]
pub struct StakeCommand {
    pub amount: f64,
}

impl FromStr for StakeCommand {
    type Err = String;

    fn from_str(cmd: &str) -> Result<Self, Self::Err> {
        let mut parts = cmd.split_whitespace();

        assert_eq!(parts.next(), Some("stake"));

        let amount = match parts.next() {
            Some(raw) => raw
                .parse::<f64>()
                .map_err(|_| "Could not parse the amount.".to_owned())?,
            None => return Err("No amount provided.".into()),
        };

        Ok(StakeCommand { amount })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_coins_transaction_test() {
        let command: Command = "transaction 2 coins 10".parse().unwrap();

        assert_eq!(
            command,
            Command::NewTransaction(NewTransactionCommand {
                receiver_id: 2,
                kind: TransactionKind::Coins,
                value: TransactionValue::Amount(10.0),
            })
        );
    }

    #[test]
    fn parse_message_keeps_spaces_test() {
        let command: Command = "transaction 1 message hello there world".parse().unwrap();

        assert_eq!(
            command,
            Command::NewTransaction(NewTransactionCommand {
                receiver_id: 1,
                kind: TransactionKind::Message,
                value: TransactionValue::Text("hello there world".to_owned()),
            })
        );
    }

    #[test]
    fn parse_stake_test() {
        let command: Command = "stake 12.5".parse().unwrap();

        assert_eq!(command, Command::Stake(StakeCommand { amount: 12.5 }));
    }

    #[test]
    fn parse_simple_commands_test() {
        assert_eq!("balance".parse::<Command>().unwrap(), Command::ShowBalance);
        assert_eq!("view".parse::<Command>().unwrap(), Command::ViewLastBlock);
        assert_eq!("history".parse::<Command>().unwrap(), Command::ShowHistory);
        assert_eq!("logs".parse::<Command>().unwrap(), Command::ShowLogs);
        assert_eq!("help".parse::<Command>().unwrap(), Command::Help);
        assert_eq!(" exit ".parse::<Command>().unwrap(), Command::Exit);
    }

    #[test]
    fn parse_invalid_commands_test() {
        assert!("gossip".parse::<Command>().is_err());
        assert!("transaction 2 shares 10".parse::<Command>().is_err());
        assert!("transaction two coins 10".parse::<Command>().is_err());
        assert!("transaction 2 coins".parse::<Command>().is_err());
        assert!("stake ten".parse::<Command>().is_err());
    }
}
