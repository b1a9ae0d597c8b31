use diskwright_core::{
    CoordinateSystem, DiskError, Extent, OpArgs, OpOutput, Operation, Partition, PartitionType,
    Result, ToolCommand,
};
use diskwright_platform::{partition_node, probe_filesystem, wait_for_node};
use std::collections::BTreeMap;
use std::path::Path;

use super::{MAX_SLOTS, UNRECOGNIZED_TABLE};
use crate::disk::{expect_unit, Disk};
use crate::geometry;

/// A partition line of a table listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingLine {
    Entry {
        number: u8,
        boot: bool,
        extent: Extent,
        part_type: PartitionType,
    },
    /// Slot shown with `-` as its end.
    EmptySlot(u8),
}

fn parse_failure(device: &Path, reason: String) -> DiskError {
    DiskError::TableParseFailure {
        device: device.display().to_string(),
        reason,
    }
}

fn parse_unit(device: &Path, line: &str, field: &str) -> Result<u64> {
    field
        .trim_end_matches(|c| c == '+' || c == '-')
        .parse()
        .map_err(|_| parse_failure(device, format!("bad number '{}' in '{}'", field, line)))
}

/// Slot number of a line starting with a partition node of `device`.
fn slot_number(device: &str, token: &str) -> Option<u8> {
    let suffix = token.strip_prefix(device)?;
    let digits = suffix.strip_prefix('p').unwrap_or(suffix);
    digits.parse().ok()
}

fn parse_line(device: &Path, line: &str, system: CoordinateSystem) -> Result<Option<ListingLine>> {
    let device_name = device.display().to_string();
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let number = match tokens.first().and_then(|t| slot_number(&device_name, t)) {
        Some(number) => number,
        None => return Ok(None),
    };
    if !(1..=MAX_SLOTS).contains(&number) {
        log::debug!("Ignoring slot {} of {}", number, device.display());
        return Ok(None);
    }

    let boot = tokens.get(1) == Some(&"*");
    let first = if boot { 2 } else { 1 };
    // cylinder listings carry an extra #blocks column before the type code
    let id_column = match system {
        CoordinateSystem::Cylinders => first + 4,
        CoordinateSystem::Sectors => first + 3,
    };
    if tokens.len() <= id_column {
        return Err(parse_failure(device, format!("truncated partition line '{}'", line)));
    }

    if tokens[first + 1] == "-" {
        return Ok(Some(ListingLine::EmptySlot(number)));
    }

    let start = parse_unit(device, line, tokens[first])?;
    let end = parse_unit(device, line, tokens[first + 1])?;
    let part_type = PartitionType::parse(tokens[id_column])
        .map_err(|_| parse_failure(device, format!("bad type code in '{}'", line)))?;
    if part_type == PartitionType::EMPTY {
        return Ok(Some(ListingLine::EmptySlot(number)));
    }
    if end < start {
        return Err(parse_failure(device, format!("end before start in '{}'", line)));
    }

    Ok(Some(ListingLine::Entry {
        number,
        boot,
        extent: Extent::new(start, end),
        part_type,
    }))
}

/// Partition lines of one listing, in the order the tool printed them.
pub fn parse_listing(device: &Path, listing: &str, system: CoordinateSystem) -> Result<Vec<ListingLine>> {
    let mut lines = Vec::new();
    for line in listing.lines() {
        if let Some(parsed) = parse_line(device, line.trim(), system)? {
            lines.push(parsed);
        }
    }
    Ok(lines)
}

impl Disk {
    pub(crate) fn table_tool(&self) -> ToolCommand {
        ToolCommand::new(&self.config.tools.sfdisk)
            .envs(&geometry::override_overlay(self.geometry_override.as_deref()))
    }

    fn list(&self, system: CoordinateSystem) -> Result<String> {
        let mut command = self.table_tool();
        if system == CoordinateSystem::Sectors {
            command = command.arg("-uS");
        }
        let command = command.arg("-l").arg(self.device.display().to_string());
        let line = command.command_line();
        let output = self.runner.run(command)?;

        let text = output.combined();
        if text.to_lowercase().contains(UNRECOGNIZED_TABLE) {
            return Ok(text);
        }
        Ok(output.check(&line)?.stdout)
    }

    fn list_cylinders(&self) -> Result<String> {
        let listing = self.list(CoordinateSystem::Cylinders)?;
        if !listing.to_lowercase().contains(UNRECOGNIZED_TABLE) {
            return Ok(listing);
        }

        log::warn!("{} has no recognizable partition table, writing an empty one", self.device.display());
        self.apply_table_script(&[])?;
        let listing = self.list(CoordinateSystem::Cylinders)?;
        if listing.to_lowercase().contains(UNRECOGNIZED_TABLE) {
            return Err(parse_failure(&self.device, "table still unrecognized after initialization".to_string()));
        }
        Ok(listing)
    }

    /// Re-detects geometry and replaces the partition list with what is on disk.
    pub fn read_partition_table(&mut self) -> Result<()> {
        let output = self.hooked(OpArgs::ReadPartitionTable, |disk, args| {
            if !matches!(args, OpArgs::ReadPartitionTable) {
                return Err(args.mismatch(Operation::ReadPartitionTable));
            }
            disk.load_table()?;
            Ok(OpOutput::Unit)
        })?;
        expect_unit(output, Operation::ReadPartitionTable)
    }

    fn load_table(&mut self) -> Result<()> {
        let size = geometry::device_size(&self.device)?;

        let cylinder_listing = self.list_cylinders()?;
        let mut geometry = geometry::parse_cylinder_header(&self.device, &cylinder_listing, size)?;
        let cylinder_lines = parse_listing(&self.device, &cylinder_listing, CoordinateSystem::Cylinders)?;

        let sector_listing = self.list(CoordinateSystem::Sectors)?;
        geometry::apply_sector_units(&self.device, &sector_listing, &mut geometry)?;
        let sector_extents: BTreeMap<u8, Extent> = parse_listing(&self.device, &sector_listing, CoordinateSystem::Sectors)?
            .into_iter()
            .filter_map(|line| match line {
                ListingLine::Entry { number, extent, .. } => Some((number, extent)),
                ListingLine::EmptySlot(_) => None,
            })
            .collect();

        let system = self.coordinate_system();
        let mut partitions = Vec::new();
        for line in cylinder_lines {
            let ListingLine::Entry { number, boot, extent, part_type } = line else {
                continue;
            };
            let sectors = sector_extents.get(&number).copied();
            let size = match (system, sectors) {
                (CoordinateSystem::Sectors, Some(sectors)) => sectors.size * geometry.bytes_per_sector,
                _ => extent.size * geometry.bytes_per_cylinder,
            };
            let node = partition_node(&self.device, number);
            partitions.push(Partition {
                number,
                device: node,
                cylinders: extent,
                sectors,
                size,
                part_type,
                filesystem: String::new(),
                boot,
                lba: system == CoordinateSystem::Sectors && part_type.is_lba(),
            });
        }

        for partition in &mut partitions {
            if !wait_for_node(&partition.device, self.config.node_appear_wait) {
                log::warn!("Partition node {} did not appear", partition.device.display());
            }
            partition.filesystem = probe_filesystem(self.runner.as_ref(), &self.config.tools.blkid, &partition.device)
                .or_else(|| partition.part_type.default_filesystem().map(str::to_string))
                .unwrap_or_else(|| "unknown".to_string());
            log::debug!(
                "Partition {}: cylinders {}-{}, type {}, {}{}",
                partition.number,
                partition.cylinders.start,
                partition.cylinders.end,
                partition.part_type,
                partition.filesystem,
                if partition.boot { ", bootable" } else { "" }
            );
        }

        self.geometry = geometry;
        self.partitions = partitions;
        Ok(())
    }
}
