use thiserror::Error;

pub type Result<T> = std::result::Result<T, DiskError>;

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Unable to detect geometry of {device}: {reason}")]
    GeometryDetectionFailure { device: String, reason: String },

    #[error("Unable to parse partition table of {device}: {reason}")]
    TableParseFailure { device: String, reason: String },

    #[error("Partition {number} cannot be placed: {reason}")]
    OverlapUnresolvable { number: u8, reason: String },

    #[error("Partition slot {0} out of range (1-4)")]
    SlotOutOfRange(u8),

    #[error("Partition {0} not found")]
    PartitionNotFound(u8),

    #[error("Filesystem not supported: {0}")]
    UnsupportedFilesystem(String),

    #[error("Image format not recognized: {0}")]
    ImageFormatUnrecognized(String),

    #[error("No output from `{command}` after {iterations} polling intervals")]
    StreamStalled { command: String, iterations: u32 },

    #[error("`{command}` failed (exit code {code:?}): {output}")]
    ExternalToolFailure {
        command: String,
        code: Option<i32>,
        output: String,
    },

    #[error("Verification failed: {0}")]
    VerificationMismatch(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

impl DiskError {
    pub fn tool_failure(command: impl Into<String>, code: Option<i32>, output: impl Into<String>) -> Self {
        DiskError::ExternalToolFailure {
            command: command.into(),
            code,
            output: output.into(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        DiskError::InvalidInput(msg.into())
    }
}
