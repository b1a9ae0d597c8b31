// Geometry detection from the table tool's listing headers.
//
//   Disk /dev/sdb: 1011 cylinders, 255 heads, 63 sectors/track
//   Units = cylinders of 8225280 bytes, blocks of 1024 bytes, counting from 0
//   Units = sectors of 512 bytes, counting from 0

use diskwright_core::{DiskError, EngineConfig, Geometry, Result};
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Raw size in bytes; works for block devices and regular image files alike.
pub fn device_size(device: &Path) -> Result<u64> {
    let mut file = File::open(device).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => DiskError::DeviceNotFound(device.display().to_string()),
        _ => DiskError::Io(e),
    })?;
    Ok(file.seek(SeekFrom::End(0))?)
}

/// The geometry-override library to preload, if this host needs one.
pub fn override_library(config: &EngineConfig) -> Option<PathBuf> {
    let library = config.geometry_override.as_ref()?;
    if cfg!(target_pointer_width = "32") || config.force_geometry_override {
        Some(library.clone())
    } else {
        None
    }
}

/// Environment overlay for one table tool invocation.
pub fn override_overlay(library: Option<&Path>) -> Vec<(String, String)> {
    match library {
        Some(path) => vec![("LD_PRELOAD".to_string(), path.display().to_string())],
        None => Vec::new(),
    }
}

fn tokens(line: &str) -> Vec<&str> {
    line.split_whitespace()
        .map(|t| t.trim_end_matches(|c| c == ',' || c == ':'))
        .collect()
}

/// The number immediately preceding `word` (`1011 cylinders`).
fn number_before(line: &str, word: &str) -> Option<u64> {
    let tokens = tokens(line);
    let index = tokens.iter().position(|t| t.starts_with(word))?;
    tokens.get(index.checked_sub(1)?)?.parse().ok()
}

/// The number following `first second` (`cylinders of 8225280`).
fn number_after(line: &str, first: &str, second: &str) -> Option<u64> {
    let tokens = tokens(line);
    let index = tokens
        .windows(2)
        .position(|pair| pair[0] == first && pair[1] == second)?;
    tokens.get(index + 2)?.parse().ok()
}

fn failure(device: &Path, reason: impl Into<String>) -> DiskError {
    DiskError::GeometryDetectionFailure {
        device: device.display().to_string(),
        reason: reason.into(),
    }
}

/// Cylinder-unit listing header: C/H/S counts and bytes per cylinder.
pub fn parse_cylinder_header(device: &Path, listing: &str, size: u64) -> Result<Geometry> {
    let mut geometry = Geometry {
        size,
        ..Geometry::default()
    };
    let mut found_chs = false;

    for line in listing.lines().map(str::trim) {
        let lower = line.to_lowercase();
        if lower.starts_with("disk") && lower.contains("cylinders") {
            geometry.cylinders = number_before(&lower, "cylinders")
                .ok_or_else(|| failure(device, format!("no cylinder count in '{}'", line)))?;
            geometry.heads = number_before(&lower, "heads")
                .ok_or_else(|| failure(device, format!("no head count in '{}'", line)))?;
            geometry.sectors = number_before(&lower, "sectors")
                .ok_or_else(|| failure(device, format!("no sector count in '{}'", line)))?;
            geometry.total_cylinders = geometry.cylinders;
            found_chs = true;
        } else if lower.starts_with("units") {
            geometry.bytes_per_cylinder = number_after(&lower, "cylinders", "of")
                .filter(|bytes| *bytes > 0)
                .ok_or_else(|| failure(device, format!("no bytes per cylinder in '{}'", line)))?;
            geometry.total_cylinders = size / geometry.bytes_per_cylinder;
        }
    }

    if !found_chs {
        return Err(failure(device, "listing has no cylinder/head/sector header"));
    }
    if geometry.bytes_per_cylinder == 0 {
        return Err(failure(device, "listing has no cylinder units line"));
    }

    log::info!(
        "Geometry of {}: {} cylinders, {} heads, {} sectors, {} bytes/cylinder, {} bytes",
        device.display(),
        geometry.cylinders,
        geometry.heads,
        geometry.sectors,
        geometry.bytes_per_cylinder,
        size
    );
    Ok(geometry)
}

/// Sector-unit listing header: bytes per sector and total sectors.
pub fn apply_sector_units(device: &Path, listing: &str, geometry: &mut Geometry) -> Result<()> {
    let bytes_per_sector = listing
        .lines()
        .map(|line| line.trim().to_lowercase())
        .filter(|line| line.starts_with("units"))
        .find_map(|line| number_after(&line, "sectors", "of"))
        .filter(|bytes| *bytes > 0)
        .ok_or_else(|| failure(device, "sector listing has no units line"))?;

    geometry.bytes_per_sector = bytes_per_sector;
    geometry.total_sectors = geometry.size / bytes_per_sector;
    Ok(())
}
