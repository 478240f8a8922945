/*!
Virtual directories: a list of URL prefixes each bound to a set of callbacks, checked longest-
prefix-first so that `/dev/` can be registered alongside a more specific `/dev/icons/`.
*/

use crate::error::Error;
use std::io::Read;
use std::sync::Arc;

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

/// File metadata a virtual directory's `get_info` callback hands back to the router.
#[derive(Clone, Debug)]
pub struct FileInfo {
    pub length: u64,
    pub is_directory: bool,
    pub is_readable: bool,
    pub content_type: String,
    pub last_modified: std::time::SystemTime,
}

/// The four callbacks a virtual directory registers — a caller-supplied backend for files that
/// don't live under a plain filesystem root. `read`/`seek` collapse into the `Read` trait object
/// `open` returns; `write`/`close` stay as explicit callbacks since a POST's body arrives as a
/// push, not a pull.
pub struct DirCallbacks {
    pub get_info: Box<dyn Fn(&str) -> Option<FileInfo> + Send + Sync>,
    pub open: Box<dyn Fn(&str) -> Result<Box<dyn Read + Send>, Error> + Send + Sync>,
    /// Called once per chunk of a POST body, in arrival order, as the web server consumes the
    /// request entity and feeds each chunk through.
    pub write: Box<dyn Fn(&str, &[u8]) -> Result<(), Error> + Send + Sync>,
    /// Called exactly once after the last `write`, whether or not any chunk failed.
    pub close: Box<dyn Fn(&str) + Send + Sync>,
}

impl std::fmt::Debug for DirCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirCallbacks").finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct VirtualDir {
    pub prefix: String,
    pub callbacks: Arc<DirCallbacks>,
}

///
/// A flat table of registered virtual directories, matched by longest prefix so a more specific
/// registration always wins over a shorter, earlier one.
///
#[derive(Debug, Default)]
pub struct VirtualDirTable {
    entries: Vec<VirtualDir>,
}

// ------------------------------------------------------------------------------------------------
// Implementations
// ------------------------------------------------------------------------------------------------

impl VirtualDirTable {
    pub fn new() -> Self {
        VirtualDirTable { entries: Vec::new() }
    }

    pub fn add(&mut self, prefix: impl Into<String>, callbacks: DirCallbacks) {
        let prefix = normalize_prefix(prefix.into());
        self.entries.retain(|e| e.prefix != prefix);
        self.entries.push(VirtualDir {
            prefix,
            callbacks: Arc::new(callbacks),
        });
    }

    pub fn remove(&mut self, prefix: &str) -> bool {
        let prefix = normalize_prefix(prefix.to_string());
        let before = self.entries.len();
        self.entries.retain(|e| e.prefix != prefix);
        self.entries.len() != before
    }

    /// Find the virtual directory whose prefix is the longest match for `path`.
    pub fn find(&self, path: &str) -> Option<&VirtualDir> {
        self.entries
            .iter()
            .filter(|e| path.starts_with(&e.prefix))
            .max_by_key(|e| e.prefix.len())
    }
}

fn normalize_prefix(mut prefix: String) -> String {
    if !prefix.starts_with('/') {
        prefix.insert(0, '/');
    }
    if !prefix.ends_with('/') {
        prefix.push('/');
    }
    prefix
}

// ------------------------------------------------------------------------------------------------
// Unit Tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_callbacks() -> DirCallbacks {
        DirCallbacks {
            get_info: Box::new(|_| None),
            open: Box::new(|_| Err(Error::NotFound)),
            write: Box::new(|_, _| Ok(())),
            close: Box::new(|_| {}),
        }
    }

    #[test]
    fn longest_prefix_wins() {
        let mut table = VirtualDirTable::new();
        table.add("/dev", dummy_callbacks());
        table.add("/dev/icons", dummy_callbacks());
        let found = table.find("/dev/icons/large.png").unwrap();
        assert_eq!(found.prefix, "/dev/icons/");
    }

    #[test]
    fn no_match_outside_registered_prefixes() {
        let mut table = VirtualDirTable::new();
        table.add("/dev", dummy_callbacks());
        assert!(table.find("/other/path").is_none());
    }
}
