//! The scripted test-transaction driver.
//!
//! Replays `trans<id>.txt` from a data directory: each line has the form
//! `id<N> <text>` and becomes a message transaction to participant N. The
//! driver waits for each transaction to settle before issuing the next one,
//! since receivers drop out-of-order nonces instead of buffering them.

use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::node::NodeHandle;
use crate::transaction::{TransactionKind, TransactionValue};

const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

pub fn run(handle: &NodeHandle, data_dir: &Path) -> Result<()> {
    let path = data_dir.join(format!("trans{}.txt", handle.id()));
    let data = std::fs::read_to_string(&path)?;
    log::info!("driver replaying {}", path.display());

    for line in data.lines() {
        let Some((target, message)) = parse_line(line) else {
            log::warn!("driver skipping malformed line {line:?}");
            continue;
        };

        if let Err(err) = handle.execute_transaction(
            target,
            TransactionKind::Message,
            TransactionValue::Text(message.to_owned()),
        ) {
            log::warn!("driver transaction to node {target} failed: {err}");
            continue;
        }
        if !handle.wait_settled(SETTLE_TIMEOUT) {
            log::warn!("driver timed out waiting for settlement");
        }
    }

    log::info!("driver finished");
    Ok(())
}

fn parse_line(line: &str) -> Option<(i64, &str)> {
    let (target, message) = line.strip_prefix("id")?.split_once(' ')?;
    Some((target.parse().ok()?, message))
}
