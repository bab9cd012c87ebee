use std::collections::BTreeMap;

use serde::Serialize;

/// Payload of a single file inside a [`FileTree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContents {
    Text(String),
    Binary(Vec<u8>),
}

impl FileContents {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            FileContents::Text(text) => text.as_bytes(),
            FileContents::Binary(bytes) => bytes,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, FileContents::Binary(_))
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEntry {
    File(FileContents),
    Directory(FileTree),
}

/// Hierarchical in-memory file structure handed to [`SandboxRuntime::mount`].
///
/// Names are unique per directory because entries are keyed by name; a
/// file's path is the `/`-join of its ancestor directory names.
///
/// [`SandboxRuntime::mount`]: super::SandboxRuntime::mount
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTree {
    entries: BTreeMap<String, FileEntry>,
}

impl FileTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a flat `path -> contents` record list into a tree.
    ///
    /// Empty path segments are ignored, so `"a//b"` and `"/a/b"` both land at
    /// `a/b`. Records with no segments at all are dropped.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = (String, FileContents)>,
    {
        let mut tree = Self::new();
        for (path, contents) in records {
            tree.insert(&path, contents);
        }
        tree
    }

    /// Insert a file, creating intermediate directories on demand.
    ///
    /// A file sitting where a directory is needed is replaced by that
    /// directory. Returns `false` when `path` has no usable segments.
    pub fn insert(&mut self, path: &str, contents: FileContents) -> bool {
        let parts: Vec<&str> = split_path(path).collect();
        let Some((file_name, dirs)) = parts.split_last() else {
            return false;
        };

        let mut current = self;
        for dir in dirs {
            let entry = current
                .entries
                .entry((*dir).to_string())
                .or_insert_with(|| FileEntry::Directory(FileTree::new()));
            if !matches!(entry, FileEntry::Directory(_)) {
                *entry = FileEntry::Directory(FileTree::new());
            }
            current = match entry {
                FileEntry::Directory(tree) => tree,
                FileEntry::File(_) => return false,
            };
        }

        current
            .entries
            .insert((*file_name).to_string(), FileEntry::File(contents));
        true
    }

    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        let mut parts = split_path(path).peekable();
        let mut current = self;
        while let Some(part) = parts.next() {
            let entry = current.entries.get(part)?;
            if parts.peek().is_none() {
                return Some(entry);
            }
            match entry {
                FileEntry::Directory(tree) => current = tree,
                FileEntry::File(_) => return None,
            }
        }
        None
    }

    pub fn file(&self, path: &str) -> Option<&FileContents> {
        match self.get(path)? {
            FileEntry::File(contents) => Some(contents),
            FileEntry::Directory(_) => None,
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &FileEntry)> {
        self.entries.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Visit every entry depth-first with its full path.
    pub fn visit<'a, F>(&'a self, f: &mut F)
    where
        F: FnMut(&str, &'a FileEntry),
    {
        self.visit_with_prefix("", f);
    }

    fn visit_with_prefix<'a, F>(&'a self, prefix: &str, f: &mut F)
    where
        F: FnMut(&str, &'a FileEntry),
    {
        for (name, entry) in &self.entries {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}/{name}")
            };
            f(&path, entry);
            if let FileEntry::Directory(tree) = entry {
                tree.visit_with_prefix(&path, f);
            }
        }
    }

    /// All leaf files with their reconstructed paths.
    pub fn files(&self) -> Vec<(String, &FileContents)> {
        let mut files = Vec::new();
        self.visit(&mut |path, entry| {
            if let FileEntry::File(contents) = entry {
                files.push((path.to_string(), contents));
            }
        });
        files
    }

    pub fn file_count(&self) -> usize {
        self.entries
            .values()
            .map(|entry| match entry {
                FileEntry::File(_) => 1,
                FileEntry::Directory(tree) => tree.file_count(),
            })
            .sum()
    }

    /// Check that every name is a single, non-special path segment.
    pub fn validate(&self) -> Result<(), String> {
        for (name, entry) in &self.entries {
            if name.is_empty()
                || name == "."
                || name == ".."
                || name.contains('/')
                || name.contains('\\')
            {
                return Err(format!("invalid entry name '{name}'"));
            }
            if let FileEntry::Directory(tree) = entry {
                tree.validate()?;
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn insert_raw(&mut self, name: &str, entry: FileEntry) {
        self.entries.insert(name.to_string(), entry);
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|part| !part.is_empty())
}

/// Notifications emitted by a sandbox runtime about servers inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SandboxEvent {
    ServerReady { port: u16, url: String },
    Port { port: u16, status: PortStatus, url: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortStatus {
    Open,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Local,
    Memory,
}

/// Static capabilities of a runtime backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuntimeInfo {
    pub kind: RuntimeKind,
    /// The hosting page must be cross-origin isolated for this runtime to work.
    pub requires_cross_origin_isolation: bool,
    /// Byte buffers survive a bulk mount unmodified. When false, binary files
    /// are rewritten one by one after mounting.
    pub binary_safe_mount: bool,
}

pub type EnvMap = BTreeMap<String, String>;
