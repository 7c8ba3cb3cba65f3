//! Isolated, detached git worktrees used as agent scratch spaces.
//!
//! Mirrors the reference orchestrator's `create_worktree` / `collect_changed_files`
//! / `collect_diff`: every operation shells out to `git` rather than linking a
//! git library, since the VCS tooling is an external, fixed-interface collaborator.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::WorkspaceError;

/// One detached scratch working copy, rooted at a merge base commit-ish.
pub struct Workspace {
    path: PathBuf,
    repo_root: PathBuf,
}

impl Workspace {
    /// Create a fresh detached worktree of `repo_root` at `base` under `path`,
    /// replacing any prior contents.
    ///
    /// # Errors
    /// Returns [`WorkspaceError::GitCommand`] if `git worktree add` fails.
    pub fn create(repo_root: &Path, path: &Path, base: &str) -> Result<Self, WorkspaceError> {
        if path.exists() {
            let _ = std::fs::remove_dir_all(path);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Stale worktree registrations for this path would otherwise make
        // `worktree add` refuse to reuse it.
        let _ = git_run(repo_root, &["worktree", "prune"]);

        git_run(
            repo_root,
            &[
                "worktree",
                "add",
                "--detach",
                &path.to_string_lossy(),
                base,
            ],
        )?;

        Ok(Self {
            path: path.to_path_buf(),
            repo_root: repo_root.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Best-effort removal of the scratch working copy. Never panics.
    pub fn destroy(&self) {
        let result = git_run(
            &self.repo_root,
            &["worktree", "remove", "--force", &self.path.to_string_lossy()],
        );
        if result.is_err() {
            let _ = std::fs::remove_dir_all(&self.path);
            let _ = git_run(&self.repo_root, &["worktree", "prune"]);
        }
    }

    /// Sorted, unique, repo-relative paths changed relative to the merge base,
    /// including untracked files. An empty list is valid.
    ///
    /// # Errors
    /// Returns [`WorkspaceError::GitCommand`] if `git status` fails.
    pub fn changed_files(&self) -> Result<Vec<PathBuf>, WorkspaceError> {
        let output = git_stdout(&self.path, &["status", "--short", "--untracked-files=all"])?;
        let mut files: Vec<PathBuf> = parse_porcelain_status(&output);
        files.sort();
        files.dedup();
        Ok(files)
    }

    /// The concatenation of the tracked binary-safe diff and a synthesized
    /// "new file" patch for each untracked file. Ends with a single trailing
    /// newline iff non-empty.
    ///
    /// # Errors
    /// Returns [`WorkspaceError::GitCommand`] if the underlying `git diff`
    /// invocation fails.
    pub fn diff(&self) -> Result<String, WorkspaceError> {
        let tracked = git_stdout(&self.path, &["diff", "--binary", "HEAD"])?;
        let untracked_names =
            git_stdout(&self.path, &["ls-files", "--others", "--exclude-standard"])?;

        let mut out = String::new();
        out.push_str(&tracked);

        for name in untracked_names.lines().filter(|l| !l.is_empty()) {
            let full = self.path.join(name);
            out.push_str(&synthesize_new_file_patch(name, &full));
        }

        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        Ok(out)
    }
}

/// Synthesize a unified-diff-style "new file" patch for one untracked path.
/// Binary files get a `Binary file ... differ` placeholder instead.
fn synthesize_new_file_patch(name: &str, full_path: &Path) -> String {
    let Ok(bytes) = std::fs::read(full_path) else {
        return String::new();
    };
    match std::str::from_utf8(&bytes) {
        Ok(text) => {
            let mut patch = String::new();
            patch.push_str(&format!("diff --git a/{name} b/{name}\n"));
            patch.push_str("new file mode 100644\n");
            patch.push_str("--- /dev/null\n");
            patch.push_str(&format!("+++ b/{name}\n"));
            let lines: Vec<&str> = if text.is_empty() {
                Vec::new()
            } else {
                text.split('\n').collect()
            };
            let count = lines.len();
            patch.push_str(&format!("@@ -0,0 +1,{count} @@\n"));
            for (i, line) in lines.iter().enumerate() {
                if i + 1 == count && !text.ends_with('\n') {
                    patch.push_str(&format!("+{line}\n"));
                    patch.push('+'); // non-standard no-trailing-newline marker
                    patch.push('\n');
                } else {
                    patch.push_str(&format!("+{line}\n"));
                }
            }
            patch
        }
        Err(_) => {
            format!(
                "diff --git a/{name} b/{name}\nnew file mode 100644\nindex 0000000..0000000\nBinary file /dev/null and b/{name} differ\n"
            )
        }
    }
}

/// Parse `git status --short --untracked-files=all` output into repo-relative
/// paths. Handles the `XY path` and `R  old -> new` (rename) forms.
fn parse_porcelain_status(output: &str) -> Vec<PathBuf> {
    let mut result = Vec::new();
    for line in output.lines() {
        if line.len() < 4 {
            continue;
        }
        let rest = &line[3..];
        let path_part = if let Some(idx) = rest.find(" -> ") {
            &rest[idx + 4..]
        } else {
            rest
        };
        let cleaned = path_part.trim().trim_matches('"');
        if !cleaned.is_empty() {
            result.push(PathBuf::from(cleaned));
        }
    }
    result
}

fn git_stdout(dir: &Path, args: &[&str]) -> Result<String, WorkspaceError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()?;
    if !output.status.success() {
        return Err(WorkspaceError::GitCommand {
            command: format!("git {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn git_run(dir: &Path, args: &[&str]) -> Result<(), WorkspaceError> {
    git_stdout(dir, args).map(|_| ())
}
