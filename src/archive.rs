//! Compressed-archive ingest (§4.5 item 2): extracts a zip archive in
//! memory and admits only recognized image entries.

use std::io::{Cursor, Read};

use crate::image_validation::{has_recognized_extension, validate_magic_bytes};

/// Extracts `archive_bytes`, returning `(original_name, bytes)` for every
/// admitted image entry. Non-image entries and entries that fail the
/// magic-byte check are silently dropped rather than treated as submission
/// errors: an archive is a bulk container, not a single validated input.
pub fn extract_images(archive_bytes: &[u8]) -> anyhow::Result<Vec<(String, Vec<u8>)>> {
    let reader = Cursor::new(archive_bytes);
    let mut zip = zip::ZipArchive::new(reader)?;
    let mut out = Vec::new();

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if !has_recognized_extension(&name) {
            continue;
        }

        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;
        if validate_magic_bytes(&bytes).is_err() {
            continue;
        }
        out.push((name, bytes));
    }

    Ok(out)
}
