use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by workspace create/destroy/diff operations.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("git {command} failed (exit {exit_code:?}): {stderr}")]
    GitCommand {
        command: String,
        stderr: String,
        exit_code: Option<i32>,
    },

    #[error("workspace not found: {path}")]
    NotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
