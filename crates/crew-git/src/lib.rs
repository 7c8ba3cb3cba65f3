//! Git-worktree-backed isolation for agent scratch workspaces.
//!
//! No crate upstream of this one should shell out to `git` directly; they
//! depend on `crew-git` and program against [`Workspace`].

mod error;
mod workspace;

pub use error::WorkspaceError;
pub use workspace::Workspace;
