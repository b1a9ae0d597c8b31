use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::Result;

/// Names or paths of the external programs the engine drives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub sfdisk: String,
    pub blkid: String,
    pub blockdev: String,
    pub parted: String,
    pub ms_sys: String,
    pub ntfsclone: String,
    pub ntfsresize: String,
    /// Prefixed to the filesystem name, e.g. `partclone.` + `ext4`.
    pub partclone_prefix: String,
    pub partclone_restore: String,
    pub shred: String,
    pub dd_rescue: String,
    pub mkfs_vfat: String,
    pub mkswap: String,
    pub mkfs_ntfs: String,
    pub mkfs_xfs: String,
    pub mkfs_reiserfs: String,
    pub mkfs_reiser4: String,
    /// Prefixed to `ext2`/`ext3`/`ext4`.
    pub mkfs_ext_prefix: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            sfdisk: "sfdisk".to_string(),
            blkid: "blkid".to_string(),
            blockdev: "blockdev".to_string(),
            parted: "parted".to_string(),
            ms_sys: "ms-sys".to_string(),
            ntfsclone: "ntfsclone".to_string(),
            ntfsresize: "ntfsresize".to_string(),
            partclone_prefix: "partclone.".to_string(),
            partclone_restore: "partclone.restore".to_string(),
            shred: "shred".to_string(),
            dd_rescue: "dd_rescue".to_string(),
            mkfs_vfat: "mkfs.vfat".to_string(),
            mkswap: "mkswap".to_string(),
            mkfs_ntfs: "mkfs.ntfs".to_string(),
            mkfs_xfs: "mkfs.xfs".to_string(),
            mkfs_reiserfs: "mkfs.reiserfs".to_string(),
            mkfs_reiser4: "mkfs.reiser4".to_string(),
            mkfs_ext_prefix: "mkfs.".to_string(),
        }
    }
}

/// Bounded polling loop: `attempts` checks spaced `interval_ms` apart.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WaitPolicy {
    pub attempts: u32,
    pub interval_ms: u64,
}

impl WaitPolicy {
    pub const fn new(attempts: u32, interval_ms: u64) -> Self {
        Self { attempts, interval_ms }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub poll_interval_ms: u64,
    /// Silent polling intervals tolerated from an image capture/restore tool.
    pub clone_stall_limit: u32,
    /// Silent polling intervals tolerated from erase and fill tools.
    pub wipe_stall_limit: u32,
    pub channel_capacity: usize,
    pub chunk_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            clone_stall_limit: 3000,
            wipe_stall_limit: 6000,
            channel_capacity: 64,
            chunk_size: 512,
        }
    }
}

impl StreamConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tools: ToolPaths,
    /// Shared library preloaded into the table tool on hosts whose BIOS
    /// geometry must be faked.
    pub geometry_override: Option<PathBuf>,
    pub force_geometry_override: bool,
    pub node_appear_wait: WaitPolicy,
    pub node_vanish_wait: WaitPolicy,
    pub mkfs_node_wait: WaitPolicy,
    pub settle_delay_ms: u64,
    pub resize_margin_bytes: u64,
    pub stream: StreamConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tools: ToolPaths::default(),
            geometry_override: None,
            force_geometry_override: false,
            node_appear_wait: WaitPolicy::new(15, 1000),
            node_vanish_wait: WaitPolicy::new(5, 1000),
            mkfs_node_wait: WaitPolicy::new(6, 2000),
            settle_delay_ms: 2000,
            resize_margin_bytes: 10 * 1024 * 1024,
            stream: StreamConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        log::debug!("Loaded engine configuration from {}", path.display());
        Self::from_json(&text)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Configuration with every wait shortened to nothing, for tests and dry tooling.
    pub fn without_delays() -> Self {
        Self {
            node_appear_wait: WaitPolicy::new(1, 0),
            node_vanish_wait: WaitPolicy::new(1, 0),
            mkfs_node_wait: WaitPolicy::new(1, 0),
            settle_delay_ms: 0,
            stream: StreamConfig {
                poll_interval_ms: 10,
                ..StreamConfig::default()
            },
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{ "settle_delay_ms": 500, "tools": { "sfdisk": "/sbin/sfdisk" } }"#)
            .unwrap();

        assert_eq!(config.settle_delay_ms, 500);
        assert_eq!(config.tools.sfdisk, "/sbin/sfdisk");
        assert_eq!(config.tools.blkid, "blkid");
        assert_eq!(config.node_appear_wait, WaitPolicy::new(15, 1000));
        assert_eq!(config.resize_margin_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let result = EngineConfig::from_json("{ not json");
        assert!(matches!(result, Err(crate::DiskError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "geometry_override": "/usr/lib/fakegeo.so", "stream": { "wipe_stall_limit": 12 } }"#)
            .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.geometry_override, Some(PathBuf::from("/usr/lib/fakegeo.so")));
        assert_eq!(config.stream.wipe_stall_limit, 12);
        assert_eq!(config.stream.poll_interval_ms, 100);

        let missing = EngineConfig::load(&dir.path().join("absent.json"));
        assert!(matches!(missing, Err(crate::DiskError::Io(_))));
    }
}
