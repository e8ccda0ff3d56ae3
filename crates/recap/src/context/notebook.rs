//! Best-effort working-notebook attachment for the summarization prompt.
//!
//! When the rounds being summarized executed notebook cells, the summary is
//! much better with the notebook's current state in view. The most recent
//! notebook tool call is located, its path argument resolved, and the live
//! document looked up. Any miss omits the attachment; it never fails the
//! build. [`find_notebook_attachment`] reports which step missed so each
//! cause is observable on its own.

use crate::config::NotebookConfig;
use crate::history::Round;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

/// Resolves a raw path argument to a workspace path.
pub trait PathResolver: Send + Sync {
    fn resolve(&self, raw: &str) -> Option<PathBuf>;
}

/// Looks up the live state of an open notebook by resolved path.
pub trait DocumentLookup: Send + Sync {
    fn notebook(&self, path: &Path) -> Option<NotebookSnapshot>;
}

/// Current content of an open notebook.
#[derive(Debug, Clone, PartialEq)]
pub struct NotebookSnapshot {
    pub path: PathBuf,
    pub content: String,
}

/// A notebook snapshot chosen for inclusion in the prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct NotebookAttachment {
    /// The tool call that referenced the notebook.
    pub tool_call_id: String,
    pub snapshot: NotebookSnapshot,
}

/// Why no notebook attachment was produced.
#[derive(Debug, Clone, PartialEq)]
pub enum AttachmentMiss {
    /// No selected round called a notebook tool.
    NoNotebookCall,
    /// The latest notebook call's arguments were not a JSON object.
    MalformedArguments,
    /// The arguments had no string value under the path key.
    MissingPath,
    /// The path resolver could not resolve the path.
    Unresolvable(String),
    /// No open document matched the resolved path.
    NoOpenDocument(PathBuf),
}

/// Locate the notebook referenced by the most recent notebook tool call.
///
/// `rounds` must yield the selected rounds newest first. Only the latest
/// notebook call is considered; older calls never stand in for it.
pub fn find_notebook_attachment<'r>(
    rounds: impl IntoIterator<Item = &'r Round>,
    config: &NotebookConfig,
    resolver: &dyn PathResolver,
    documents: &dyn DocumentLookup,
) -> Result<NotebookAttachment, AttachmentMiss> {
    let call = rounds
        .into_iter()
        .flat_map(|r| r.tool_calls.iter().rev())
        .find(|c| config.is_notebook_tool(&c.name))
        .ok_or(AttachmentMiss::NoNotebookCall)?;

    let args: serde_json::Value =
        serde_json::from_str(&call.arguments).map_err(|_| AttachmentMiss::MalformedArguments)?;
    let obj = args.as_object().ok_or(AttachmentMiss::MalformedArguments)?;
    let raw = obj
        .get(&config.path_argument)
        .and_then(|v| v.as_str())
        .ok_or(AttachmentMiss::MissingPath)?;

    let resolved = resolver
        .resolve(raw)
        .ok_or_else(|| AttachmentMiss::Unresolvable(raw.to_string()))?;
    let snapshot = documents
        .notebook(&resolved)
        .ok_or(AttachmentMiss::NoOpenDocument(resolved))?;

    Ok(NotebookAttachment {
        tool_call_id: call.id.clone(),
        snapshot,
    })
}

// ── Default collaborators ──────────────────────────────────────────

/// Resolves paths lexically against a workspace root.
///
/// Accepts absolute paths, root-relative paths, and `file://` URIs. Paths
/// that escape the root via `..` are rejected. The filesystem is never
/// touched.
#[derive(Debug, Clone)]
pub struct WorkspaceResolver {
    root: PathBuf,
}

impl WorkspaceResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: normalize(&root.into()).unwrap_or_default(),
        }
    }
}

impl PathResolver for WorkspaceResolver {
    fn resolve(&self, raw: &str) -> Option<PathBuf> {
        let raw = raw.trim();
        let raw = raw.strip_prefix("file://").unwrap_or(raw);
        if raw.is_empty() {
            return None;
        }
        let path = Path::new(raw);
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let normalized = normalize(&joined)?;
        normalized.starts_with(&self.root).then_some(normalized)
    }
}

/// Lexically normalize `.` and `..` components. `None` if `..` climbs past
/// the start of the path.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}

/// In-memory registry of open notebooks keyed by resolved path.
#[derive(Debug, Clone, Default)]
pub struct OpenNotebooks {
    docs: HashMap<PathBuf, NotebookSnapshot>,
}

impl OpenNotebooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open notebook. `path` must already be resolved.
    pub fn open(&mut self, path: impl Into<PathBuf>, content: impl Into<String>) {
        let path = path.into();
        self.docs.insert(
            path.clone(),
            NotebookSnapshot {
                path,
                content: content.into(),
            },
        );
    }

    /// Read a notebook from disk and register it under its resolved path.
    pub fn open_file(&mut self, resolver: &dyn PathResolver, raw: &str) -> Result<(), String> {
        let path = resolver
            .resolve(raw)
            .ok_or_else(|| format!("cannot resolve notebook path '{raw}'"))?;
        let content = std::fs::read_to_string(&path)
            .map_err(|e| format!("failed to read notebook '{}': {e}", path.display()))?;
        self.open(path, content);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

impl DocumentLookup for OpenNotebooks {
    fn notebook(&self, path: &Path) -> Option<NotebookSnapshot> {
        self.docs.get(path).cloned()
    }
}
