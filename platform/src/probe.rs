use diskwright_core::{ToolCommand, ToolRunner};
use std::path::Path;

/// Filesystem signature of a partition node as reported by `blkid`.
///
/// Names are normalised to the engine's vocabulary (`vfat` is `fat32`,
/// `swap` is `linux-swap`). Any probe failure yields `None`.
pub fn probe_filesystem(runner: &dyn ToolRunner, blkid: &str, node: &Path) -> Option<String> {
    let command = ToolCommand::new(blkid)
        .args(["-o", "value", "-s", "TYPE"])
        .arg(node.display().to_string());

    let output = match runner.run(command) {
        Ok(output) if output.success() => output,
        Ok(_) => return None,
        Err(e) => {
            log::debug!("Signature probe of {} failed: {}", node.display(), e);
            return None;
        }
    };

    let value = output.stdout.lines().next()?.trim().trim_matches('"');
    match value {
        "" => None,
        "vfat" => Some("fat32".to_string()),
        "swap" => Some("linux-swap".to_string()),
        other => Some(other.to_string()),
    }
}
