use diskwright_core::{
    CoordinateSystem, DiskError, DiskLabel, EngineConfig, Geometry, HookRegistry, OpArgs, OpOutput,
    Operation, Partition, Result, SystemRunner, ToolRunner,
};
use diskwright_platform::SysBlock;
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{geometry, records};

/// Everything a `Disk` is constructed with besides its device path.
#[derive(Clone)]
pub struct DiskOptions {
    pub config: Arc<EngineConfig>,
    pub runner: Arc<dyn ToolRunner>,
    pub hooks: Arc<HookRegistry>,
    pub dos_compatibility: bool,
    pub block_alignment: bool,
}

impl Default for DiskOptions {
    fn default() -> Self {
        Self {
            config: Arc::new(EngineConfig::default()),
            runner: Arc::new(SystemRunner),
            hooks: Arc::new(HookRegistry::new()),
            dos_compatibility: true,
            block_alignment: false,
        }
    }
}

pub struct Disk {
    pub(crate) device: PathBuf,
    pub(crate) model: String,
    pub(crate) signature: u32,
    pub(crate) geometry: Geometry,
    pub(crate) label: Option<DiskLabel>,
    pub(crate) partitions: Vec<Partition>,
    pub(crate) dos_compatibility: bool,
    pub(crate) block_alignment: bool,
    pub(crate) rotational: Option<bool>,
    pub(crate) geometry_override: Option<PathBuf>,
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) runner: Arc<dyn ToolRunner>,
    pub(crate) hooks: Arc<HookRegistry>,
}

/// Serializable snapshot for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct DiskReport {
    pub device: PathBuf,
    pub model: String,
    pub signature: u32,
    pub geometry: Geometry,
    pub label: Option<DiskLabel>,
    pub dos_compatibility: bool,
    pub block_alignment: bool,
    pub rotational: Option<bool>,
    pub partitions: Vec<Partition>,
}

impl Disk {
    pub fn open(device: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(device, DiskOptions::default())
    }

    /// Detects geometry, reads the partition table and probes the media.
    pub fn open_with(device: impl AsRef<Path>, options: DiskOptions) -> Result<Self> {
        let device = device.as_ref().to_path_buf();
        if !device.exists() {
            return Err(DiskError::DeviceNotFound(device.display().to_string()));
        }

        let sys = SysBlock::for_device(&device);
        let geometry_override = geometry::override_library(&options.config);
        if let Some(ref library) = geometry_override {
            log::info!("Using geometry override {} for {}", library.display(), device.display());
        }

        let mut disk = Disk {
            model: sys.model(),
            rotational: sys.is_rotational(),
            device,
            signature: 0,
            geometry: Geometry::default(),
            label: None,
            partitions: Vec::new(),
            dos_compatibility: options.dos_compatibility,
            block_alignment: options.block_alignment,
            geometry_override,
            config: options.config,
            runner: options.runner,
            hooks: options.hooks,
        };

        disk.read_partition_table()?;
        let mut file = File::open(&disk.device)?;
        disk.signature = records::read_signature(&mut file)?;

        log::info!(
            "Opened {} ({}): {} bytes, {} partition(s), signature 0x{:08X}",
            disk.device.display(),
            disk.model,
            disk.geometry.size,
            disk.partitions.len(),
            disk.signature
        );
        Ok(disk)
    }

    pub fn device(&self) -> &Path {
        &self.device
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Signature as read when the disk was opened or last queried.
    pub fn signature(&self) -> u32 {
        self.signature
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn label(&self) -> Option<DiskLabel> {
        self.label
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn partition(&self, number: u8) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.number == number)
    }

    pub fn is_rotational(&self) -> Option<bool> {
        self.rotational
    }

    pub fn dos_compatibility(&self) -> bool {
        self.dos_compatibility
    }

    pub fn set_dos_compatibility(&mut self, enabled: bool) {
        self.dos_compatibility = enabled;
    }

    pub fn block_alignment(&self) -> bool {
        self.block_alignment
    }

    pub fn set_block_alignment(&mut self, enabled: bool) {
        self.block_alignment = enabled;
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Sector units when block aligned, cylinders otherwise.
    pub fn coordinate_system(&self) -> CoordinateSystem {
        if self.block_alignment {
            CoordinateSystem::Sectors
        } else {
            CoordinateSystem::Cylinders
        }
    }

    pub fn report(&self) -> DiskReport {
        DiskReport {
            device: self.device.clone(),
            model: self.model.clone(),
            signature: self.signature,
            geometry: self.geometry.clone(),
            label: self.label,
            dos_compatibility: self.dos_compatibility,
            block_alignment: self.block_alignment,
            rotational: self.rotational,
            partitions: self.partitions.clone(),
        }
    }

    pub(crate) fn require_partition(&self, number: u8) -> Result<Partition> {
        if !(1..=4).contains(&number) {
            return Err(DiskError::SlotOutOfRange(number));
        }
        self.partition(number)
            .cloned()
            .ok_or(DiskError::PartitionNotFound(number))
    }

    /// Runs `body` inside the hook broadcast for `args`.
    pub(crate) fn hooked<F>(&mut self, args: OpArgs, body: F) -> Result<OpOutput>
    where
        F: FnOnce(&mut Disk, &OpArgs) -> Result<OpOutput>,
    {
        let hooks = Arc::clone(&self.hooks);
        let device = self.device.clone();
        hooks.run(&device, args, |args| body(self, args))
    }
}

pub(crate) fn expect_unit(output: OpOutput, operation: Operation) -> Result<()> {
    match output {
        OpOutput::Unit => Ok(()),
        other => Err(DiskError::invalid(format!(
            "{} produced unexpected output {:?}",
            operation.name(),
            other
        ))),
    }
}

impl std::fmt::Debug for Disk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disk")
            .field("device", &self.device)
            .field("model", &self.model)
            .field("geometry", &self.geometry)
            .field("partitions", &self.partitions)
            .field("block_alignment", &self.block_alignment)
            .finish()
    }
}
