//! The path grammar of the document tree.
//!
//! Paths are absolute, `/`-separated strings. A trailing `/` marks a
//! directory; anything else is a document. Directory names inside a path
//! keep their trailing slash, so `/path/to/x.json` decomposes into the
//! links `("/", "path/")`, `("/path/", "to/")` and `("/path/to/",
//! "x.json")`, which are exactly the entries that must exist for the
//! document to be reachable.

use std::fmt;

const SEP: char = '/';

/// A parsed document or directory path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    path: String,
    links: Vec<(String, String)>,
}

impl Path {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let links = parse(&path);
        Self { path, links }
    }

    /// Whether the path is absolute.
    pub fn is_valid(&self) -> bool {
        self.path.starts_with(SEP)
    }

    /// Whether the path names a directory.
    pub fn is_dir(&self) -> bool {
        self.path.ends_with(SEP)
    }

    /// Whether the path names a document.
    pub fn is_doc(&self) -> bool {
        !self.is_dir()
    }

    /// The full path string.
    pub fn full(&self) -> &str {
        &self.path
    }

    /// The ancestor directories, from the root down.
    pub fn dirs(&self) -> impl Iterator<Item = &str> {
        self.links.iter().map(|(dir, _)| dir.as_str())
    }

    /// The (directory, entry name) pairs that must be linked for this path
    /// to be reachable, from the root down.
    pub fn links(&self) -> &[(String, String)] {
        &self.links
    }

    /// Append a directory entry name, producing the entry's own path.
    pub fn join(&self, name: &str) -> Path {
        Path::new(format!("{}{}", self.path, name))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

fn parse(path: &str) -> Vec<(String, String)> {
    let mut parts: Vec<String> = path.split(SEP).map(str::to_owned).collect();

    let last = parts.len() - 1;
    for part in &mut parts[..last] {
        part.push(SEP);
    }
    if parts[last].is_empty() {
        parts.pop();
    }

    (1..parts.len())
        .map(|i| (parts[..i].concat(), parts[i].clone()))
        .collect()
}
