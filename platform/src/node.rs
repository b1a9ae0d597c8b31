// Device node helpers shared by every table and filesystem operation.

use diskwright_core::WaitPolicy;
use std::path::{Path, PathBuf};
use std::thread;

/// Path of partition `number` on `disk`: `/dev/sda` + 1, `/dev/nvme0n1` + p1.
pub fn partition_node(disk: &Path, number: u8) -> PathBuf {
    let name = disk.to_string_lossy();
    let needs_p = name
        .chars()
        .last()
        .map(|c| c.is_ascii_digit())
        .unwrap_or(false);
    if needs_p {
        PathBuf::from(format!("{}p{}", name, number))
    } else {
        PathBuf::from(format!("{}{}", name, number))
    }
}

/// Polls until `path` exists. Returns false when the policy runs out.
pub fn wait_for_node(path: &Path, policy: WaitPolicy) -> bool {
    poll(policy, || path.exists())
}

/// Polls until `path` is gone. Returns false when the policy runs out.
pub fn wait_for_node_removal(path: &Path, policy: WaitPolicy) -> bool {
    poll(policy, || !path.exists())
}

fn poll<F: Fn() -> bool>(policy: WaitPolicy, done: F) -> bool {
    for attempt in 0..policy.attempts {
        if done() {
            return true;
        }
        if attempt + 1 < policy.attempts {
            thread::sleep(policy.interval());
        }
    }
    done()
}
