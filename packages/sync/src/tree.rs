// ABOUTME: FileTree tagged union and tar packing for bulk sandbox transfer
// ABOUTME: Strict tree of files and directories, paths relative to the project root

use crate::{Result, SyncError};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One node of a project file tree: either a file with its contents or a
/// directory of named children. Every traversal matches both arms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FileNode {
    File {
        contents: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        encoding: Option<String>,
    },
    Directory {
        children: BTreeMap<String, FileNode>,
    },
}

impl FileNode {
    pub fn file(contents: impl Into<String>) -> Self {
        FileNode::File {
            contents: contents.into(),
            encoding: None,
        }
    }

    pub fn directory(children: BTreeMap<String, FileNode>) -> Self {
        FileNode::Directory { children }
    }
}

/// A project snapshot (or subtree) to materialize inside a sandbox.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileTree {
    pub entries: BTreeMap<String, FileNode>,
}

impl FileTree {
    pub fn new(entries: BTreeMap<String, FileNode>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every relative path in the tree, directories included, in
    /// parent-before-child order.
    pub fn relative_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        collect_paths(&self.entries, "", &mut paths);
        paths
    }

    /// Pack the tree into a single tar archive so the transfer into the
    /// sandbox is one round-trip instead of one write per file.
    pub fn to_tar(&self) -> Result<Vec<u8>> {
        let mut builder = tar::Builder::new(Vec::new());
        append_entries(&mut builder, &self.entries, "")?;
        builder
            .into_inner()
            .map_err(|e| SyncError::Archive(e.to_string()))
    }
}

fn collect_paths(entries: &BTreeMap<String, FileNode>, prefix: &str, out: &mut Vec<String>) {
    for (name, node) in entries {
        let path = join_relative(prefix, name);
        out.push(path.clone());
        match node {
            FileNode::File { .. } => {}
            FileNode::Directory { children } => collect_paths(children, &path, out),
        }
    }
}

fn append_entries(
    builder: &mut tar::Builder<Vec<u8>>,
    entries: &BTreeMap<String, FileNode>,
    prefix: &str,
) -> Result<()> {
    for (name, node) in entries {
        let path = join_relative(prefix, name);
        match node {
            FileNode::File { contents, encoding } => {
                let bytes = decode_contents(&path, contents, encoding.as_deref())?;
                let mut header = tar::Header::new_gnu();
                header.set_size(bytes.len() as u64);
                header.set_mode(0o644);
                builder
                    .append_data(&mut header, &path, bytes.as_slice())
                    .map_err(|e| SyncError::Archive(e.to_string()))?;
            }
            FileNode::Directory { children } => {
                let mut header = tar::Header::new_gnu();
                header.set_entry_type(tar::EntryType::Directory);
                header.set_size(0);
                header.set_mode(0o755);
                builder
                    .append_data(&mut header, format!("{}/", path), std::io::empty())
                    .map_err(|e| SyncError::Archive(e.to_string()))?;
                append_entries(builder, children, &path)?;
            }
        }
    }
    Ok(())
}

fn decode_contents(path: &str, contents: &str, encoding: Option<&str>) -> Result<Vec<u8>> {
    match encoding {
        None | Some("utf8") | Some("utf-8") => Ok(contents.as_bytes().to_vec()),
        Some("base64") => base64::engine::general_purpose::STANDARD
            .decode(contents)
            .map_err(|e| SyncError::Encoding {
                path: path.to_string(),
                reason: e.to_string(),
            }),
        Some(other) => Err(SyncError::Encoding {
            path: path.to_string(),
            reason: format!("unsupported encoding: {}", other),
        }),
    }
}

fn join_relative(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}
