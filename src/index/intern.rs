use fasthash::xx::Hash64;
use fasthash::RandomState;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};

/// Process-wide string interning pool.
///
/// Equal strings intern to one shared canonical instance, so repeated keys
/// across collections cost a pointer instead of a fresh allocation. The pool
/// is created lazily on first use and lives for the rest of the process;
/// callers hold an explicit handle obtained from [`InternPool::global`]
/// rather than reaching through a hidden global at every call site.
///
/// Several collections may intern concurrently, so the table sits behind a
/// mutex held only for the duration of one lookup-or-insert.
pub struct InternPool {
    entries: Mutex<HashSet<Arc<str>, RandomState<Hash64>>>,
}

static POOL: OnceLock<InternPool> = OnceLock::new();

impl InternPool {
    /// Handle to the shared pool, initializing it on first use.
    pub fn global() -> &'static InternPool {
        POOL.get_or_init(|| InternPool {
            entries: Mutex::new(HashSet::with_hasher(RandomState::new())),
        })
    }

    /// Returns the canonical shared instance for `text`.
    pub fn intern(&self, text: &str) -> Arc<str> {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(existing) = entries.get(text) {
            return Arc::clone(existing);
        }
        let canonical: Arc<str> = Arc::from(text);
        entries.insert(Arc::clone(&canonical));
        canonical
    }

    /// Number of distinct strings interned so far.
    pub fn len(&self) -> usize {
        match self.entries.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}
