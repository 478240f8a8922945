/*!
The device description document alias: a single, frequently-swapped `(name, content)` pair served
out of memory rather than off disk, so that `RegisterRootDevice`'s generated description is always
reachable at a stable URL.
*/

use std::sync::{Arc, RwLock};
use std::time::SystemTime;

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct AliasContent {
    name: String,
    content: Arc<Vec<u8>>,
    content_type: String,
    last_modified: SystemTime,
}

///
/// Holds the current alias document behind a lock so that swapping in a freshly regenerated
/// description never blocks an in-flight GET for longer than the swap itself takes.
///
#[derive(Debug, Default)]
pub struct WebAlias {
    current: RwLock<Option<AliasContent>>,
}

// ------------------------------------------------------------------------------------------------
// Implementations
// ------------------------------------------------------------------------------------------------

impl WebAlias {
    pub fn new() -> Self {
        WebAlias {
            current: RwLock::new(None),
        }
    }

    pub fn set(&self, name: impl Into<String>, content: Vec<u8>, content_type: impl Into<String>) {
        let mut guard = self.current.write().unwrap();
        *guard = Some(AliasContent {
            name: name.into(),
            content: Arc::new(content),
            content_type: content_type.into(),
            last_modified: SystemTime::now(),
        });
    }

    pub fn clear(&self) {
        *self.current.write().unwrap() = None;
    }

    /// Returns the alias's bytes, MIME type and modification time if `path` matches the
    /// currently registered alias name.
    pub fn get(&self, path: &str) -> Option<(Arc<Vec<u8>>, String, SystemTime)> {
        let guard = self.current.read().unwrap();
        let entry = guard.as_ref()?;
        if entry.name == path {
            Some((Arc::clone(&entry.content), entry.content_type.clone(), entry.last_modified))
        } else {
            None
        }
    }

    pub fn is_aliased(&self, path: &str) -> bool {
        self.current
            .read()
            .unwrap()
            .as_ref()
            .map(|e| e.name == path)
            .unwrap_or(false)
    }
}

// ------------------------------------------------------------------------------------------------
// Unit Tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_matches_by_name() {
        let alias = WebAlias::new();
        alias.set("/description.xml", b"<root/>".to_vec(), "text/xml");
        let (content, mime, _) = alias.get("/description.xml").unwrap();
        assert_eq!(content.as_slice(), b"<root/>");
        assert_eq!(mime, "text/xml");
        assert!(alias.get("/other.xml").is_none());
    }

    #[test]
    fn clear_removes_alias() {
        let alias = WebAlias::new();
        alias.set("/description.xml", b"<root/>".to_vec(), "text/xml");
        alias.clear();
        assert!(alias.get("/description.xml").is_none());
    }
}
