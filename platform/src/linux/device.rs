use std::fs;
use std::path::{Path, PathBuf};

/// Read-only view of `/sys/block` for one disk.
#[derive(Debug, Clone)]
pub struct SysBlock {
    root: PathBuf,
    name: String,
}

impl SysBlock {
    pub fn for_device(device: &Path) -> Self {
        Self::with_root("/sys/block", device)
    }

    /// Same as `for_device` but rooted elsewhere, e.g. a fixture directory.
    pub fn with_root(root: impl Into<PathBuf>, device: &Path) -> Self {
        let name = device
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { root: root.into(), name }
    }

    fn attribute(&self, relative: &str) -> Option<String> {
        fs::read_to_string(self.root.join(&self.name).join(relative))
            .ok()
            .map(|content| content.trim().to_string())
    }

    /// `queue/rotational`; `None` when the kernel does not say.
    pub fn is_rotational(&self) -> Option<bool> {
        match self.attribute("queue/rotational")?.as_str() {
            "1" => Some(true),
            "0" => Some(false),
            _ => None,
        }
    }

    pub fn model(&self) -> String {
        if let Some(model) = self.attribute("device/model").filter(|m| !m.is_empty()) {
            return model;
        }

        // Fallback to vendor
        if let Some(vendor) = self.attribute("device/vendor").filter(|v| !v.is_empty()) {
            return vendor;
        }

        self.name.to_uppercase()
    }
}

/// Commits dirty buffers so raw record writes reach the device before a reread.
pub fn flush_buffers() {
    log::debug!("Syncing filesystem buffers");
    nix::unistd::sync();
}
