// Line pump over a long-running child.
//
// One reader thread per output pipe pushes raw chunks into a bounded channel.
// The pump waits on the channel one polling interval at a time; every empty
// interval counts towards the stall limit and any chunk resets the count.

use diskwright_core::tool::{tail_lines, OUTPUT_TAIL_LINES};
use diskwright_core::{DiskError, Result, StreamConfig};
use std::fs::File;
use std::io::{self, Read, Write};
use std::process::{Child, ChildStdin};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::thread;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Stdout,
    Stderr,
}

type Chunk = (Source, Option<Vec<u8>>);

#[derive(Debug)]
pub(crate) struct Outcome {
    pub success: bool,
    pub code: Option<i32>,
    pub tail: String,
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R, source: Source, chunk_size: usize, tx: SyncSender<Chunk>) {
    thread::spawn(move || {
        let mut buffer = vec![0u8; chunk_size.max(1)];
        loop {
            match pipe.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send((source, Some(buffer[..n].to_vec()))).is_err() {
                        return;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::debug!("Reading {:?} failed: {}", source, e);
                    break;
                }
            }
        }
        let _ = tx.send((source, None));
    });
}

/// Splits complete lines off `pending`; both `\n` and `\r` end a line.
fn drain_lines(pending: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(position) = pending.iter().position(|b| *b == b'\n' || *b == b'\r') {
        let rest = pending.split_off(position + 1);
        let line = String::from_utf8_lossy(&pending[..position]).into_owned();
        *pending = rest;
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines
}

/// Drives `child` to exit, handing every output line to `on_line`.
///
/// Kills the child and fails with `StreamStalled` after more than
/// `stall_limit` consecutive silent intervals.
pub(crate) fn pump<F>(
    child: &mut Child,
    command_line: &str,
    config: &StreamConfig,
    stall_limit: u32,
    mut on_line: F,
) -> Result<Outcome>
where
    F: FnMut(&str),
{
    let (tx, rx) = mpsc::sync_channel::<Chunk>(config.channel_capacity.max(1));
    let mut open = 0;
    if let Some(stdout) = child.stdout.take() {
        spawn_reader(stdout, Source::Stdout, config.chunk_size, tx.clone());
        open += 1;
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_reader(stderr, Source::Stderr, config.chunk_size, tx.clone());
        open += 1;
    }
    drop(tx);

    let mut pending_stdout = Vec::new();
    let mut pending_stderr = Vec::new();
    let mut history = Vec::new();
    let mut idle = 0u32;

    let mut emit = |line: String, history: &mut Vec<String>| {
        on_line(&line);
        history.push(line);
        if history.len() > OUTPUT_TAIL_LINES * 2 {
            history.drain(..OUTPUT_TAIL_LINES);
        }
    };

    while open > 0 {
        match rx.recv_timeout(config.poll_interval()) {
            Ok((source, chunk)) => {
                idle = 0;
                let pending = match source {
                    Source::Stdout => &mut pending_stdout,
                    Source::Stderr => &mut pending_stderr,
                };
                match chunk {
                    Some(bytes) => {
                        pending.extend_from_slice(&bytes);
                        for line in drain_lines(pending) {
                            emit(line, &mut history);
                        }
                    }
                    None => {
                        open -= 1;
                        if !pending.is_empty() {
                            let line = String::from_utf8_lossy(pending).into_owned();
                            pending.clear();
                            emit(line, &mut history);
                        }
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                idle += 1;
                if idle > stall_limit {
                    log::error!("`{}` produced no output for {} intervals, killing it", command_line, idle);
                    if let Err(e) = child.kill() {
                        log::warn!("Killing `{}` failed: {}", command_line, e);
                    }
                    let _ = child.wait();
                    return Err(DiskError::StreamStalled {
                        command: command_line.to_string(),
                        iterations: idle,
                    });
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let status = child.wait()?;
    log::debug!("`{}` exited with {:?}", command_line, status.code());
    Ok(Outcome {
        success: status.success(),
        code: status.code(),
        tail: tail_lines(&history.join("\n"), OUTPUT_TAIL_LINES),
    })
}

/// Replays `header` and then copies `source` into the child's stdin.
pub(crate) fn spawn_feeder(mut stdin: ChildStdin, header: Vec<u8>, mut source: File) {
    thread::spawn(move || {
        let result = stdin
            .write_all(&header)
            .and_then(|()| io::copy(&mut source, &mut stdin).map(|_| ()));
        if let Err(e) = result {
            log::warn!("Feeding image stream failed: {}", e);
        }
    });
}
