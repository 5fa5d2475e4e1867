use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type CdxResult<T> = std::result::Result<T, CdxError>;

#[derive(Debug, Error)]
pub enum CdxError {
    /// Nothing to act on; reported to the user but not a process failure.
    #[error("{0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error(
        "`{program}` was not found on PATH; install it or point CDX_CODEX_BIN at the executable"
    )]
    ToolMissing { program: String },

    #[error("`{program}` exited with status {code}")]
    ToolFailed { program: String, code: i32 },

    #[error(
        "could not determine the new session id (no fresh session file under {sessions_root} and no new history record); registry left unchanged"
    )]
    Discovery { sessions_root: PathBuf },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl CdxError {
    /// Exit code the binary reports for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::NotFound(_) => 0,
            Self::ToolFailed { code, .. } => u8::try_from(*code)
                .ok()
                .filter(|code| *code != 0)
                .unwrap_or(1),
            _ => 1,
        }
    }
}
