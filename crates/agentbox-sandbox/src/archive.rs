//! In-memory single-file tar archives for the container boundary
//!
//! Content is carried as raw bytes in both directions; nothing is
//! re-encoded.

use crate::error::{Error, Result};
use std::io::Read;

/// Pack `content` as a single regular file named `name`
pub fn pack_single_file(name: &str, content: &[u8], mtime: u64) -> Result<Vec<u8>> {
    if name.is_empty() || name.contains('/') {
        return Err(Error::Archive(format!("invalid member name '{}'", name)));
    }

    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(mtime);

    let mut builder = tar::Builder::new(Vec::new());
    builder
        .append_data(&mut header, name, content)
        .map_err(|e| Error::Archive(e.to_string()))?;
    builder
        .into_inner()
        .map_err(|e| Error::Archive(e.to_string()))
}

/// Extract the first member of `archive`
///
/// Returns `None` for an empty archive or when the first member is not a
/// regular file (a directory was requested).
pub fn unpack_first_file(archive: &[u8]) -> Result<Option<Vec<u8>>> {
    let mut archive = tar::Archive::new(archive);
    let mut entries = archive
        .entries()
        .map_err(|e| Error::Archive(e.to_string()))?;

    let Some(entry) = entries.next() else {
        return Ok(None);
    };
    let mut entry = entry.map_err(|e| Error::Archive(e.to_string()))?;

    if !entry.header().entry_type().is_file() {
        return Ok(None);
    }

    let mut content = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut content)
        .map_err(|e| Error::Archive(e.to_string()))?;
    Ok(Some(content))
}
