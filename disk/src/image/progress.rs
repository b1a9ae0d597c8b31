// Progress extraction from the text streams of clone, erase and fill tools.
//
//   ntfsclone    " 12.34 percent completed"            done on "Syncing"
//   partclone    "Completed:  12.34%, ..."            done on "successfully", failed on "fail"
//   shred        "pass 2/3 (random)...10MiB/1.0GiB 1%"  done on exit 0
//   dd_rescue    "ipos:   1024.0k ... avg.rate: 512kB/s" done on exit 0

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransferState {
    Starting,
    Scanning,
    Transferring,
    Completed,
    Failed,
    TimedOut,
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Completed | TransferState::Failed | TransferState::TimedOut)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub state: TransferState,
    pub percent: f64,
    /// KiB per second, when the tool reports a rate.
    pub rate_kib: Option<u64>,
}

pub trait ProgressObserver {
    fn on_progress(&mut self, update: &ProgressUpdate);
}

impl<F: FnMut(&ProgressUpdate)> ProgressObserver for F {
    fn on_progress(&mut self, update: &ProgressUpdate) {
        self(update)
    }
}

/// Observer that ignores every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&mut self, _update: &ProgressUpdate) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressFormat {
    NtfsClone,
    Partclone,
    Shred,
    /// Progress is measured against the partition size in KiB.
    DdRescue { total_kib: u64 },
}

impl ProgressFormat {
    /// Clone tools must print their success marker; the others only need exit 0.
    pub fn requires_marker(&self) -> bool {
        matches!(self, ProgressFormat::NtfsClone | ProgressFormat::Partclone)
    }
}

fn number_prefix(text: &str) -> Option<f64> {
    let end = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    text[..end].parse().ok()
}

/// `"12.34 percent"`
fn ntfsclone_percent(line: &str) -> Option<f64> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let index = tokens.iter().position(|t| *t == "percent")?;
    tokens.get(index.checked_sub(1)?)?.parse().ok()
}

/// `"Completed:  12.34%"`
fn partclone_percent(line: &str) -> Option<f64> {
    let (_, rest) = line.split_once("Completed:")?;
    number_prefix(rest.trim_start())
}

/// `"pass 2/3 (random)...10MiB/1.0GiB 40%"` as an overall percentage.
/// The keyword is matched in any case.
fn shred_percent(line: &str) -> Option<f64> {
    let index = line.to_ascii_lowercase().find("pass ")?;
    let rest = &line[index + "pass ".len()..];
    let (current, rest) = rest.split_once('/')?;
    let current: f64 = current.trim().parse().ok()?;
    let total = number_prefix(rest)?;
    if total <= 0.0 || current < 1.0 {
        return None;
    }
    let pass_percent = line
        .split_whitespace()
        .last()
        .and_then(|t| t.strip_suffix('%'))
        .and_then(|t| t.parse::<f64>().ok())
        .unwrap_or(0.0);
    Some(((current - 1.0) * 100.0 + pass_percent) / total)
}

/// Value following `key`, with `suffix` and any decimals dropped.
fn keyed_kib(line: &str, key: &str, suffix: &str) -> Option<u64> {
    let (_, rest) = line.split_once(key)?;
    let token = rest.split_whitespace().next()?;
    let value = number_prefix(token.strip_suffix(suffix).unwrap_or(token))?;
    Some(value as u64)
}

/// Feeds lines through the transfer state machine.
#[derive(Debug)]
pub struct Transfer {
    format: ProgressFormat,
    state: TransferState,
    percent: f64,
    rate_kib: Option<u64>,
    last_reported: Option<(TransferState, i64)>,
}

fn hundredths(percent: f64) -> i64 {
    (percent * 100.0).round() as i64
}

impl Transfer {
    pub fn new(format: ProgressFormat) -> Self {
        Self {
            format,
            state: TransferState::Starting,
            percent: 0.0,
            rate_kib: None,
            last_reported: None,
        }
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn percent(&self) -> f64 {
        self.percent
    }

    fn extract_percent(&mut self, line: &str) -> Option<f64> {
        match self.format {
            ProgressFormat::NtfsClone => ntfsclone_percent(line),
            ProgressFormat::Partclone => partclone_percent(line),
            ProgressFormat::Shred => shred_percent(line),
            ProgressFormat::DdRescue { total_kib } => {
                if let Some(rate) = keyed_kib(line, "avg.rate:", "kB/s") {
                    self.rate_kib = Some(rate);
                }
                let position = keyed_kib(line, "ipos:", "k")?;
                (total_kib > 0).then(|| position as f64 * 100.0 / total_kib as f64)
            }
        }
    }

    fn is_success_marker(&self, line: &str) -> bool {
        match self.format {
            ProgressFormat::NtfsClone => line.contains("Syncing"),
            ProgressFormat::Partclone => line.contains("successfully"),
            _ => false,
        }
    }

    fn is_failure_marker(&self, line: &str) -> bool {
        self.format == ProgressFormat::Partclone && line.to_lowercase().contains("fail")
    }

    /// Advances on one output line. Returns an update when something changed.
    pub fn feed_line(&mut self, line: &str) -> Option<ProgressUpdate> {
        if self.state.is_terminal() {
            return None;
        }
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if self.is_failure_marker(line) {
            log::warn!("Transfer tool reported failure: {}", line);
            self.state = TransferState::Failed;
        } else if self.is_success_marker(line) {
            self.state = TransferState::Completed;
            self.percent = 100.0;
        } else if let Some(percent) = self.extract_percent(line) {
            self.state = TransferState::Transferring;
            self.percent = percent.clamp(0.0, 100.0);
        } else if self.state == TransferState::Starting {
            self.state = if line.contains("used") || line.contains("in use") {
                TransferState::Transferring
            } else {
                TransferState::Scanning
            };
        } else if self.state == TransferState::Scanning && (line.contains("used") || line.contains("in use")) {
            self.state = TransferState::Transferring;
        }

        self.changed()
    }

    /// Settles the final state from the exit status.
    pub fn finish(&mut self, exit_success: bool) -> Option<ProgressUpdate> {
        if !self.state.is_terminal() {
            self.state = if exit_success && !self.format.requires_marker() {
                self.percent = 100.0;
                TransferState::Completed
            } else {
                TransferState::Failed
            };
        } else if self.state == TransferState::Completed && !exit_success {
            self.state = TransferState::Failed;
        }
        self.changed()
    }

    pub fn time_out(&mut self) -> Option<ProgressUpdate> {
        self.state = TransferState::TimedOut;
        self.changed()
    }

    fn changed(&mut self) -> Option<ProgressUpdate> {
        let key = (self.state, hundredths(self.percent));
        if self.last_reported == Some(key) {
            return None;
        }
        self.last_reported = Some(key);
        Some(ProgressUpdate {
            state: self.state,
            percent: self.percent,
            rate_kib: self.rate_kib,
        })
    }
}
