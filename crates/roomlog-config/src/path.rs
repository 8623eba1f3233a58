//! Path layout for room logs and identity records.
//!
//! Every process that shares a home directory must derive the same file
//! names from the same resource identifier, so all naming lives here.
//!
//! ```text
//! ~/.roomlog/
//! ├── rooms/
//! │   ├── 3f2a...c9.room        # gzip(json(RoomLog))
//! │   └── 3f2a...c9.room.lock   # cross-process lock
//! └── identities/
//!     ├── .assign.lock
//!     └── 4242-1718000000000.json
//! ```

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Extension of a room log file
pub const ROOM_FILE_EXT: &str = "room";
/// Extension appended to a room log file name for its lock
pub const LOCK_FILE_EXT: &str = "lock";
/// Lock serializing identity assignment across processes
pub const IDENTITY_LOCK_NAME: &str = ".assign.lock";

/// Default home directory: `~/.roomlog` (or `/tmp/.roomlog` without a home)
pub fn default_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".roomlog")
}

pub fn rooms_dir(home: impl AsRef<Path>) -> PathBuf {
    home.as_ref().join("rooms")
}

pub fn identities_dir(home: impl AsRef<Path>) -> PathBuf {
    home.as_ref().join("identities")
}

/// Stable room id: lowercase hex SHA-256 of the resource identifier.
///
/// The identifier is hashed byte-for-byte; callers that want `.` and the
/// absolute path to name the same room should normalize first
/// (see [`normalize_room_key`]).
pub fn compute_room_id(resource_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(resource_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// File name of a room log inside the rooms directory.
pub fn room_file_name(resource_id: &str) -> String {
    format!("{}.{}", compute_room_id(resource_id), ROOM_FILE_EXT)
}

/// Lock path guarding a given data file.
pub fn lock_path_for(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_os_string();
    name.push(".");
    name.push(LOCK_FILE_EXT);
    PathBuf::from(name)
}

/// True if `path` looks like a room log (not a lock or temp file).
pub fn is_room_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == ROOM_FILE_EXT)
}

/// Normalize a room key given on a command line.
///
/// Keys naming an existing path resolve to their canonical absolute form.
/// Anything else is used verbatim.
pub fn normalize_room_key(key: &str) -> String {
    let path = Path::new(key);
    match path.canonicalize() {
        Ok(canonical) => canonical.to_string_lossy().into_owned(),
        Err(_) => key.to_string(),
    }
}
