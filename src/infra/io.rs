//! Reading and committing host source files.

use std::{fs, io::Write, path::Path};

use crate::core::error::IntegrationError;

/// Read a target as UTF-8; anything else is an I/O failure.
pub fn read_source(path: &Path) -> Result<String, IntegrationError> {
    let bytes = fs::read(path).map_err(|e| IntegrationError::io(path, e))?;
    String::from_utf8(bytes).map_err(|e| {
        IntegrationError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.utf8_error()),
        )
    })
}

/// Line terminator used by `text`: CRLF if its first newline is CRLF.
pub fn line_ending(text: &str) -> &'static str {
    match memchr::memchr(b'\n', text.as_bytes()) {
        Some(pos) if pos > 0 && text.as_bytes()[pos - 1] == b'\r' => "\r\n",
        _ => "\n",
    }
}

/// Replace `path` with `data` via a same-directory temp file and rename.
pub fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    // Prefer same-dir tempfile; fall back to OS temp on EPERM/ENOENT
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    // Preserve original permissions
    let perms = fs::metadata(path).map(|m| m.permissions()).ok();

    let tmp = match tempfile::NamedTempFile::new_in(dir) {
        Ok(t) => t,
        Err(_) => tempfile::NamedTempFile::new()?,
    };

    let mut file = tmp.as_file();
    file.write_all(data)?;
    file.sync_all()?;

    if let Some(perms) = perms {
        fs::set_permissions(tmp.path(), perms)?;
    }

    match tmp.persist(path) {
        Ok(_) => {}
        Err(e) => {
            // Different filesystem? Try copy fallback
            fs::copy(e.file.path(), path)?;
        }
    }

    // fsync parent dir to ensure durability on Unix
    #[cfg(unix)]
    {
        if let Ok(parent_file) = fs::File::open(dir) {
            let _ = parent_file.sync_all();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_atomic_replaces_content() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("router.ex");
        fs::write(&path, "old").unwrap();

        write_atomic(&path, b"new contents\n").unwrap();
        assert_eq!(read_source(&path).unwrap(), "new contents\n");

        // no stray temp files left next to the target
        let entries = fs::read_dir(tmp.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_read_source_rejects_invalid_utf8() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("bad.ex");
        fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();
        assert!(matches!(
            read_source(&path),
            Err(IntegrationError::Io { .. })
        ));
    }

    #[test]
    fn test_line_ending_detection() {
        assert_eq!(line_ending("a\r\nb\r\n"), "\r\n");
        assert_eq!(line_ending("a\nb"), "\n");
        assert_eq!(line_ending("single line"), "\n");
    }
}
