//! Project workspaces - the only filesystem surface tools may touch
//!
//! Every project gets its own directory under a configured base:
//!
//! ```text
//! <base>/                      ← workspace.root from config
//! ├── proj-a/                  ← created on first use
//! │   ├── package.json
//! │   └── src/App.tsx
//! └── proj-b/
//! ```
//!
//! Paths supplied by the model are always relative and always go through
//! [`Workspace::resolve`], which refuses anything that would land outside
//! the project root (`..` segments, absolute paths, symlinks pointing out).

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Error type for workspace resolution
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("invalid project id '{0}'")]
    InvalidProjectId(String),

    #[error("path must not be empty")]
    EmptyPath,

    #[error("absolute paths are not allowed: {0}")]
    AbsolutePath(String),

    #[error("path escapes the project root: {0}")]
    Escape(String),

    #[error("workspace I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolves project ids to isolated directories under a base root
#[derive(Debug, Clone)]
pub struct Workspace {
    base_dir: PathBuf,
}

impl Workspace {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Root directory of a project, created on first use
    pub async fn project_root(&self, project_id: &str) -> Result<PathBuf, WorkspaceError> {
        validate_project_id(project_id)?;
        let root = self.base_dir.join(project_id);
        tokio::fs::create_dir_all(&root).await?;
        Ok(root)
    }

    /// Resolve a model-supplied relative path inside a project
    ///
    /// `.` and interior `..` segments are normalized away. Anything that
    /// would end up outside the project root is rejected, including paths
    /// that only escape through an existing symlink.
    pub async fn resolve(
        &self,
        project_id: &str,
        relative: &str,
    ) -> Result<PathBuf, WorkspaceError> {
        let root = self.project_root(project_id).await?;
        let normalized = normalize_relative(relative)?;
        let candidate = root.join(normalized);
        ensure_no_symlink_escape(&root, &candidate, relative).await?;
        Ok(candidate)
    }

    /// Render a resolved path relative to its project root, using `/`
    pub fn display_path(&self, project_id: &str, path: &Path) -> String {
        let root = self.base_dir.join(project_id);
        let rel = path.strip_prefix(&root).unwrap_or(path);
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.is_empty() {
            ".".to_string()
        } else {
            parts.join("/")
        }
    }
}

fn validate_project_id(project_id: &str) -> Result<(), WorkspaceError> {
    let valid_chars = project_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if project_id.is_empty() || project_id == "." || project_id == ".." || !valid_chars {
        return Err(WorkspaceError::InvalidProjectId(project_id.to_string()));
    }
    Ok(())
}

/// Lexically normalize a relative path, refusing to climb above its start
fn normalize_relative(relative: &str) -> Result<PathBuf, WorkspaceError> {
    if relative.trim().is_empty() {
        return Err(WorkspaceError::EmptyPath);
    }

    let mut out = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return Err(WorkspaceError::Escape(relative.to_string()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(WorkspaceError::AbsolutePath(relative.to_string()));
            }
        }
    }
    Ok(out)
}

/// Canonicalize the nearest existing ancestor and make sure it is still
/// under the canonical project root
async fn ensure_no_symlink_escape(
    root: &Path,
    candidate: &Path,
    original: &str,
) -> Result<(), WorkspaceError> {
    let canonical_root = tokio::fs::canonicalize(root).await?;

    for ancestor in candidate.ancestors() {
        if tokio::fs::symlink_metadata(ancestor).await.is_err() {
            continue;
        }
        let canonical = tokio::fs::canonicalize(ancestor)
            .await
            .map_err(|_| WorkspaceError::Escape(original.to_string()))?;
        if !canonical.starts_with(&canonical_root) {
            return Err(WorkspaceError::Escape(original.to_string()));
        }
        return Ok(());
    }

    Err(WorkspaceError::Escape(original.to_string()))
}
