//! Zip helpers shared by the store implementations.

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::domain::RemoteError;

/// Build an in-memory zip holding exactly one entry.
pub fn zip_single_file(entry_name: &str, contents: &[u8]) -> Result<Vec<u8>, RemoteError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    writer.start_file(entry_name, options)?;
    writer.write_all(contents)?;
    let cursor = writer.finish()?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn archive_contains_the_single_entry() {
        let bytes = zip_single_file("timestamp.txt", b"2025-01-01T00:00:00Z").unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 1);

        let mut entry = archive.by_name("timestamp.txt").unwrap();
        let mut text = String::new();
        entry.read_to_string(&mut text).unwrap();
        assert_eq!(text, "2025-01-01T00:00:00Z");
    }
}
