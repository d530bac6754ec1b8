//! In-memory registry backing `?file=<id>` share links.
//!
//! The sending side parks a file here and hands out the generated id inside
//! a share link. A claim through the same id returns the file's name, type,
//! and bytes. Entries are short-lived: each carries a deadline, a lookup
//! past the deadline counts as a miss and drops the entry, and
//! [`ShareStore::purge_expired`] reclaims whatever lookups never touched.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::Rng;
use tracing::debug;

/// How long a shared file stays claimable.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Random prefix length of a share id, in base36 characters.
const ID_RANDOM_CHARS: usize = 9;

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Errors from registry lookups.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("link expired: {0}")]
    Expired(String),
}

/// A file held by the registry, as returned to a claimant.
///
/// The bytes are shared behind an `Arc`, so cloning a `StoredFile` does not
/// duplicate the payload.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub id: String,
    pub file_name: String,
    pub mime_type: String,
    pub data: Arc<Vec<u8>>,
}

impl StoredFile {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

#[derive(Debug)]
struct StoredEntry {
    file: StoredFile,
    expires_at: Instant,
}

/// Keyed map of shared files with per-entry deadlines.
///
/// All methods take `&self`; the store is safe to share behind an `Arc`.
#[derive(Debug)]
pub struct ShareStore {
    entries: Mutex<HashMap<String, StoredEntry>>,
    ttl: Duration,
}

impl ShareStore {
    /// Creates a store whose entries live for [`DEFAULT_TTL`].
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    /// Creates a store with a custom default time-to-live.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Registers a file under a fresh share id and returns the stored form.
    pub fn insert(
        &self,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        data: Vec<u8>,
    ) -> StoredFile {
        self.insert_with_ttl(file_name, mime_type, data, self.ttl)
    }

    /// Registers a file with an entry-specific time-to-live.
    pub fn insert_with_ttl(
        &self,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        data: Vec<u8>,
        ttl: Duration,
    ) -> StoredFile {
        let file = StoredFile {
            id: generate_share_id(),
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            data: Arc::new(data),
        };
        let entry = StoredEntry {
            file: file.clone(),
            expires_at: Instant::now() + ttl,
        };
        debug!(
            share = %file.id,
            name = %file.file_name,
            size = file.size(),
            "file registered"
        );
        self.entries.lock().unwrap().insert(file.id.clone(), entry);
        file
    }

    /// Looks up a share id.
    ///
    /// A hit past its deadline is removed on the spot and reported as
    /// [`StoreError::Expired`]; a later lookup of the same id sees
    /// [`StoreError::NotFound`].
    pub fn get(&self, id: &str) -> Result<StoredFile, StoreError> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(id) {
            None => return Err(StoreError::NotFound(id.to_string())),
            Some(entry) if entry.expires_at > Instant::now() => {
                return Ok(entry.file.clone());
            }
            Some(_) => {}
        }
        entries.remove(id);
        debug!(share = %id, "share link expired");
        Err(StoreError::Expired(id.to_string()))
    }

    /// Drops an entry, returning the file if it was present.
    pub fn remove(&self, id: &str) -> Option<StoredFile> {
        self.entries.lock().unwrap().remove(id).map(|entry| entry.file)
    }

    /// Drops every entry past its deadline and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let dropped = before - entries.len();
        if dropped > 0 {
            debug!(count = dropped, "expired shares purged");
        }
        dropped
    }

    /// Number of resident entries, counting any not yet purged.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

impl Default for ShareStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Generates a share id: random base36 characters plus a base36 timestamp.
///
/// The random prefix carries the uniqueness; the timestamp suffix keeps ids
/// roughly sortable by creation time.
pub fn generate_share_id() -> String {
    let mut rng = rand::thread_rng();
    let mut id = String::with_capacity(ID_RANDOM_CHARS + 9);
    for _ in 0..ID_RANDOM_CHARS {
        id.push(BASE36[rng.gen_range(0..BASE36.len())] as char);
    }
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    push_base36(&mut id, millis);
    id
}

fn push_base36(out: &mut String, mut value: u128) {
    if value == 0 {
        out.push('0');
        return;
    }
    let start = out.len();
    while value > 0 {
        out.insert(start, BASE36[(value % 36) as usize] as char);
        value /= 36;
    }
}
