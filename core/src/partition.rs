use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::{DiskError, Result};

/// One-byte MBR partition type code, displayed as two lowercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionType(pub u8);

impl PartitionType {
    pub const EMPTY: PartitionType = PartitionType(0x00);
    pub const NTFS: PartitionType = PartitionType(0x07);
    pub const FAT32: PartitionType = PartitionType(0x0b);
    pub const FAT32_LBA: PartitionType = PartitionType(0x0c);
    pub const FAT16_LBA: PartitionType = PartitionType(0x0e);
    pub const LINUX_SWAP: PartitionType = PartitionType(0x82);
    pub const LINUX: PartitionType = PartitionType(0x83);

    /// Parses a one or two digit hex code, with or without `0x`.
    pub fn parse(code: &str) -> Result<Self> {
        let code = code.trim();
        let digits = code
            .strip_prefix("0x")
            .or_else(|| code.strip_prefix("0X"))
            .unwrap_or(code);
        if digits.is_empty() || digits.len() > 2 {
            return Err(DiskError::invalid(format!("bad partition type code '{}'", code)));
        }
        u8::from_str_radix(digits, 16)
            .map(PartitionType)
            .map_err(|_| DiskError::invalid(format!("bad partition type code '{}'", code)))
    }

    /// Accepts either an explicit two-digit hex code or a filesystem name.
    pub fn for_filesystem(name: &str) -> Result<Self> {
        let name = name.trim().to_lowercase();
        if name.len() == 2 && name.chars().all(|c| c.is_ascii_hexdigit()) {
            return Self::parse(&name);
        }
        if name == "linux" {
            return Ok(Self::LINUX);
        }
        let kind: FilesystemKind = name.parse()?;
        Ok(kind.partition_type())
    }

    /// Filesystem assumed when signature probing finds nothing.
    pub fn default_filesystem(&self) -> Option<&'static str> {
        match self.0 {
            0x0b | 0x0c | 0x0e => Some("fat32"),
            0x07 => Some("ntfs"),
            _ => None,
        }
    }

    pub fn is_lba(&self) -> bool {
        matches!(self.0, 0x0c | 0x0e | 0x0f)
    }

    /// Form used in table tool input (`7`, `c`, `83`).
    pub fn script_code(&self) -> String {
        format!("{:x}", self.0)
    }
}

impl fmt::Display for PartitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilesystemKind {
    Fat32,
    LinuxSwap,
    Ext2,
    Ext3,
    Ext4,
    Ntfs,
    Xfs,
    Reiserfs,
    Reiser4,
}

impl FilesystemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilesystemKind::Fat32 => "fat32",
            FilesystemKind::LinuxSwap => "linux-swap",
            FilesystemKind::Ext2 => "ext2",
            FilesystemKind::Ext3 => "ext3",
            FilesystemKind::Ext4 => "ext4",
            FilesystemKind::Ntfs => "ntfs",
            FilesystemKind::Xfs => "xfs",
            FilesystemKind::Reiserfs => "reiserfs",
            FilesystemKind::Reiser4 => "reiser4",
        }
    }

    pub fn partition_type(&self) -> PartitionType {
        match self {
            FilesystemKind::Fat32 => PartitionType::FAT32_LBA,
            FilesystemKind::LinuxSwap => PartitionType::LINUX_SWAP,
            FilesystemKind::Ntfs => PartitionType::NTFS,
            _ => PartitionType::LINUX,
        }
    }
}

impl FromStr for FilesystemKind {
    type Err = DiskError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "fat32" | "vfat" => Ok(FilesystemKind::Fat32),
            "linux-swap" | "swap" => Ok(FilesystemKind::LinuxSwap),
            "ext2" => Ok(FilesystemKind::Ext2),
            "ext3" => Ok(FilesystemKind::Ext3),
            "ext4" => Ok(FilesystemKind::Ext4),
            "ntfs" => Ok(FilesystemKind::Ntfs),
            "xfs" => Ok(FilesystemKind::Xfs),
            "reiserfs" => Ok(FilesystemKind::Reiserfs),
            "reiser4" => Ok(FilesystemKind::Reiser4),
            other => Err(DiskError::UnsupportedFilesystem(other.to_string())),
        }
    }
}

impl fmt::Display for FilesystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinateSystem {
    Cylinders,
    Sectors,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub size: u64,
    pub cylinders: u64,
    pub heads: u64,
    pub sectors: u64,
    pub bytes_per_cylinder: u64,
    pub bytes_per_sector: u64,
    pub total_cylinders: u64,
    pub total_sectors: u64,
}

impl Geometry {
    pub fn unit_bytes(&self, system: CoordinateSystem) -> u64 {
        match system {
            CoordinateSystem::Cylinders => self.bytes_per_cylinder,
            CoordinateSystem::Sectors => self.bytes_per_sector,
        }
    }

    pub fn total_units(&self, system: CoordinateSystem) -> u64 {
        match system {
            CoordinateSystem::Cylinders => self.total_cylinders,
            CoordinateSystem::Sectors => self.total_sectors,
        }
    }
}

/// Inclusive range of native units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    pub start: u64,
    pub end: u64,
    pub size: u64,
}

impl Extent {
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end,
            size: end.saturating_sub(start) + 1,
        }
    }

    pub fn overlaps(&self, other: &Extent) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub number: u8,
    pub device: PathBuf,
    pub cylinders: Extent,
    /// Present once the sector listing has been merged in.
    pub sectors: Option<Extent>,
    /// Bytes, from the table's active coordinate system.
    pub size: u64,
    pub part_type: PartitionType,
    pub filesystem: String,
    pub boot: bool,
    pub lba: bool,
}

impl Partition {
    pub fn extent(&self, system: CoordinateSystem) -> Option<Extent> {
        match system {
            CoordinateSystem::Cylinders => Some(self.cylinders),
            CoordinateSystem::Sectors => self.sectors,
        }
    }

    /// First sector of the partition, falling back to the cylinder start.
    pub fn start_sector(&self, geometry: &Geometry) -> u64 {
        match self.sectors {
            Some(extent) => extent.start,
            None if geometry.bytes_per_sector > 0 => {
                self.cylinders.start * geometry.bytes_per_cylinder / geometry.bytes_per_sector
            }
            None => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskLabel {
    Bsd,
    Gpt,
    Loop,
    Mac,
    Mips,
    Msdos,
    Pc98,
    Sun,
}

impl DiskLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskLabel::Bsd => "bsd",
            DiskLabel::Gpt => "gpt",
            DiskLabel::Loop => "loop",
            DiskLabel::Mac => "mac",
            DiskLabel::Mips => "mips",
            DiskLabel::Msdos => "msdos",
            DiskLabel::Pc98 => "pc98",
            DiskLabel::Sun => "sun",
        }
    }
}

impl FromStr for DiskLabel {
    type Err = DiskError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "bsd" => Ok(DiskLabel::Bsd),
            "gpt" => Ok(DiskLabel::Gpt),
            "loop" => Ok(DiskLabel::Loop),
            "mac" => Ok(DiskLabel::Mac),
            "mips" => Ok(DiskLabel::Mips),
            "msdos" => Ok(DiskLabel::Msdos),
            "pc98" => Ok(DiskLabel::Pc98),
            "sun" => Ok(DiskLabel::Sun),
            other => Err(DiskError::invalid(format!("unknown disk label type '{}'", other))),
        }
    }
}

/// Operating system family whose master boot code gets installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootCodeFamily {
    Auto,
    Nt5,
    Nt6,
    Dos,
    Win95,
    Win98,
}

impl BootCodeFamily {
    pub fn installer_flag(&self) -> &'static str {
        match self {
            BootCodeFamily::Auto => "-w",
            BootCodeFamily::Nt5 => "--mbr",
            BootCodeFamily::Nt6 => "--mbr7",
            BootCodeFamily::Dos => "--mbrdos",
            BootCodeFamily::Win95 => "--mbr95b",
            BootCodeFamily::Win98 => "--mbr98",
        }
    }
}

impl FromStr for BootCodeFamily {
    type Err = DiskError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(BootCodeFamily::Auto),
            "nt5" | "win2000" | "winxp" | "win2003" => Ok(BootCodeFamily::Nt5),
            "nt6" | "vista" | "win7" => Ok(BootCodeFamily::Nt6),
            "dos" | "win9x" => Ok(BootCodeFamily::Dos),
            "win95" => Ok(BootCodeFamily::Win95),
            "win98" => Ok(BootCodeFamily::Win98),
            other => Err(DiskError::invalid(format!("unknown boot code family '{}'", other))),
        }
    }
}

/// Partition boot record flavours understood by the boot code installer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootRecordKind {
    Fat12,
    Fat16,
    Fat32Nt,
    Fat32,
    Ntfs,
}

impl BootRecordKind {
    pub fn installer_flag(&self) -> &'static str {
        match self {
            BootRecordKind::Fat12 => "--fat12",
            BootRecordKind::Fat16 => "--fat16",
            BootRecordKind::Fat32Nt => "--fat32nt",
            BootRecordKind::Fat32 => "--fat32",
            BootRecordKind::Ntfs => "--ntfs",
        }
    }
}

impl FromStr for BootRecordKind {
    type Err = DiskError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "fat12" => Ok(BootRecordKind::Fat12),
            "fat16" => Ok(BootRecordKind::Fat16),
            "fat32nt" => Ok(BootRecordKind::Fat32Nt),
            "fat32" => Ok(BootRecordKind::Fat32),
            "ntfs" => Ok(BootRecordKind::Ntfs),
            other => Err(DiskError::invalid(format!("unknown boot record kind '{}'", other))),
        }
    }
}
