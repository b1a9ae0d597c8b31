//! Whole-partition streaming: image save/restore, erase and fill.
//!
//! Every transfer runs a long-lived external tool whose output is parsed into
//! [`ProgressUpdate`]s. Image formats are recognised by the magic string at
//! the start of the image, before the target partition is touched.

mod progress;
mod stream;

pub use progress::{
    NoProgress, ProgressFormat, ProgressObserver, ProgressUpdate, Transfer, TransferState,
};

use diskwright_core::{
    DiskError, FilesystemKind, OpArgs, OpOutput, Operation, Partition, Result, ToolCommand,
};
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use crate::disk::{expect_unit, Disk};

/// Bytes inspected when sniffing an image header.
pub const HEADER_PROBE_LEN: usize = 64;
pub const NTFSCLONE_MAGIC: &[u8] = b"ntfsclone-image";
pub const PARTCLONE_MAGIC: &[u8] = b"partclone-image";
pub const DEFAULT_FILL_SOURCE: &str = "/dev/zero";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    NtfsClone,
    Partclone,
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

impl ImageFormat {
    pub fn sniff(header: &[u8]) -> Option<Self> {
        let header = &header[..header.len().min(HEADER_PROBE_LEN)];
        if contains(header, NTFSCLONE_MAGIC) {
            Some(ImageFormat::NtfsClone)
        } else if contains(header, PARTCLONE_MAGIC) {
            Some(ImageFormat::Partclone)
        } else {
            None
        }
    }

    fn progress_format(&self) -> ProgressFormat {
        match self {
            ImageFormat::NtfsClone => ProgressFormat::NtfsClone,
            ImageFormat::Partclone => ProgressFormat::Partclone,
        }
    }
}

pub fn is_fifo(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.file_type().is_fifo())
        .unwrap_or(false)
}

/// Reads up to `HEADER_PROBE_LEN` bytes, fewer only at end of stream.
fn read_header(source: &mut File) -> Result<Vec<u8>> {
    let mut header = Vec::with_capacity(HEADER_PROBE_LEN);
    source
        .by_ref()
        .take(HEADER_PROBE_LEN as u64)
        .read_to_end(&mut header)?;
    Ok(header)
}

/// Tool used to capture `partition`, chosen by its filesystem.
fn capture_format(partition: &Partition) -> Result<(ImageFormat, FilesystemKind)> {
    let kind: FilesystemKind = partition.filesystem.parse()?;
    match kind {
        FilesystemKind::Ntfs => Ok((ImageFormat::NtfsClone, kind)),
        FilesystemKind::LinuxSwap => Err(DiskError::UnsupportedFilesystem(format!(
            "image of {}",
            kind
        ))),
        _ => Ok((ImageFormat::Partclone, kind)),
    }
}

struct TransferRun<'a> {
    command: ToolCommand,
    format: ProgressFormat,
    stall_limit: u32,
    feed: Option<(Vec<u8>, File)>,
    observer: &'a mut dyn ProgressObserver,
}

impl Disk {
    fn run_transfer(&self, run: TransferRun<'_>) -> Result<()> {
        let TransferRun { command, format, stall_limit, feed, observer } = run;
        let line = command.command_line();
        log::info!("Starting transfer: {}", line);

        let mut child = self.runner.spawn(command)?;
        if let Some((header, source)) = feed {
            match child.stdin.take() {
                Some(stdin) => stream::spawn_feeder(stdin, header, source),
                None => log::warn!("`{}` has no stdin to feed", line),
            }
        }

        let mut transfer = Transfer::new(format);
        let outcome = stream::pump(&mut child, &line, &self.config.stream, stall_limit, |text| {
            log::debug!("{}", text);
            if let Some(update) = transfer.feed_line(text) {
                observer.on_progress(&update);
            }
        });

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                if let DiskError::StreamStalled { .. } = e {
                    if let Some(update) = transfer.time_out() {
                        observer.on_progress(&update);
                    }
                }
                return Err(e);
            }
        };

        if let Some(update) = transfer.finish(outcome.success) {
            observer.on_progress(&update);
        }
        if transfer.state() == TransferState::Completed {
            log::info!("Transfer finished: {}", line);
            Ok(())
        } else {
            Err(DiskError::tool_failure(line, outcome.code, outcome.tail))
        }
    }

    /// Captures partition `number` into `target`, a file or a FIFO.
    pub fn save_image(
        &mut self,
        number: u8,
        target: impl AsRef<Path>,
        observer: &mut dyn ProgressObserver,
    ) -> Result<()> {
        let args = OpArgs::SaveImage { partition: number, target: target.as_ref().to_path_buf() };
        let output = self.hooked(args, |disk, args| {
            let OpArgs::SaveImage { partition, target } = args else {
                return Err(args.mismatch(Operation::SaveImage));
            };
            let partition = disk.require_partition(*partition)?;
            let (format, kind) = capture_format(&partition)?;
            let node = partition.device.display().to_string();
            let tools = &disk.config.tools;

            let pipe = is_fifo(target);
            let output_arg = if pipe { "-".to_string() } else { target.display().to_string() };
            let mut command = match format {
                ImageFormat::NtfsClone => ToolCommand::new(&tools.ntfsclone)
                    .args(["--save-image", "--output"])
                    .args([output_arg, node]),
                ImageFormat::Partclone => {
                    let command = ToolCommand::new(format!("{}{}", tools.partclone_prefix, kind.as_str()))
                        .args(["--clone", "--rescue", "--force", "--source"])
                        .arg(node);
                    if pipe {
                        command.args(["--output", "-"])
                    } else {
                        command.args(["--overwrite", output_arg.as_str()])
                    }
                }
            };
            if pipe {
                let sink = OpenOptions::new().write(true).open(target)?;
                command = command.stdout_to(sink);
            }

            disk.run_transfer(TransferRun {
                command,
                format: format.progress_format(),
                stall_limit: disk.config.stream.clone_stall_limit,
                feed: None,
                observer: &mut *observer,
            })?;
            Ok(OpOutput::Unit)
        })?;
        expect_unit(output, Operation::SaveImage)
    }

    /// Restores partition `number` from `source`, a file or a FIFO.
    ///
    /// NTFS images get their boot sector start fixed and the filesystem
    /// grown to the partition afterwards.
    pub fn restore_image(
        &mut self,
        number: u8,
        source: impl AsRef<Path>,
        observer: &mut dyn ProgressObserver,
    ) -> Result<()> {
        let args = OpArgs::RestoreImage { partition: number, source: source.as_ref().to_path_buf() };
        let output = self.hooked(args, |disk, args| {
            let OpArgs::RestoreImage { partition, source } = args else {
                return Err(args.mismatch(Operation::RestoreImage));
            };
            let partition = disk.require_partition(*partition)?;

            let mut input = File::open(source)?;
            let header = read_header(&mut input)?;
            let format = ImageFormat::sniff(&header)
                .ok_or_else(|| DiskError::ImageFormatUnrecognized(source.display().to_string()))?;
            log::info!("{} is a {:?} image", source.display(), format);

            let pipe = is_fifo(source);
            let input_arg = if pipe { "-".to_string() } else { source.display().to_string() };
            let node = partition.device.display().to_string();
            let tools = &disk.config.tools;
            let mut command = match format {
                ImageFormat::NtfsClone => ToolCommand::new(&tools.ntfsclone)
                    .args(["--restore-image", "--overwrite"])
                    .args([node, input_arg]),
                ImageFormat::Partclone => ToolCommand::new(&tools.partclone_restore)
                    .args(["--restore", "--source"])
                    .args([input_arg, "--output".to_string(), node]),
            };
            let feed = if pipe {
                command = command.piped_stdin();
                Some((header, input))
            } else {
                None
            };

            disk.run_transfer(TransferRun {
                command,
                format: format.progress_format(),
                stall_limit: disk.config.stream.clone_stall_limit,
                feed,
                observer: &mut *observer,
            })?;

            if format == ImageFormat::NtfsClone {
                disk.set_ntfs_partition_start_sector(partition.number, None)?;
                disk.resize_filesystem(partition.number, None, Some(FilesystemKind::Ntfs))?;
            }
            Ok(OpOutput::Unit)
        })?;
        expect_unit(output, Operation::RestoreImage)
    }

    /// Overwrites partition `number` `iterations` times, optionally ending with zeros.
    pub fn shred_partition(
        &mut self,
        number: u8,
        iterations: u32,
        zero_pass: bool,
        observer: &mut dyn ProgressObserver,
    ) -> Result<()> {
        let args = OpArgs::ShredPartition { partition: number, iterations, zero_pass };
        let output = self.hooked(args, |disk, args| {
            let OpArgs::ShredPartition { partition, iterations, zero_pass } = *args else {
                return Err(args.mismatch(Operation::ShredPartition));
            };
            let partition = disk.require_partition(partition)?;
            let mut command = ToolCommand::new(&disk.config.tools.shred)
                .args(["-v", "-n"])
                .arg(iterations.to_string());
            if zero_pass {
                command = command.arg("-z");
            }
            let command = command.arg(partition.device.display().to_string());

            disk.run_transfer(TransferRun {
                command,
                format: ProgressFormat::Shred,
                stall_limit: disk.config.stream.wipe_stall_limit,
                feed: None,
                observer: &mut *observer,
            })?;
            Ok(OpOutput::Unit)
        })?;
        expect_unit(output, Operation::ShredPartition)
    }

    /// Copies `source` (default `/dev/zero`) over the whole of partition `number`.
    pub fn fill_partition(
        &mut self,
        number: u8,
        source: Option<PathBuf>,
        observer: &mut dyn ProgressObserver,
    ) -> Result<()> {
        let source = source.unwrap_or_else(|| PathBuf::from(DEFAULT_FILL_SOURCE));
        let args = OpArgs::FillPartition { partition: number, source };
        let output = self.hooked(args, |disk, args| {
            let OpArgs::FillPartition { partition, source } = args else {
                return Err(args.mismatch(Operation::FillPartition));
            };
            let partition = disk.require_partition(*partition)?;
            let total_kib = partition.size / 1024;
            let command = ToolCommand::new(&disk.config.tools.dd_rescue)
                .args(["-A", "-m"])
                .arg(format!("{}k", total_kib))
                .arg(source.display().to_string())
                .arg(partition.device.display().to_string());

            disk.run_transfer(TransferRun {
                command,
                format: ProgressFormat::DdRescue { total_kib },
                stall_limit: disk.config.stream.wipe_stall_limit,
                feed: None,
                observer: &mut *observer,
            })?;
            Ok(OpOutput::Unit)
        })?;
        expect_unit(output, Operation::FillPartition)
    }
}
