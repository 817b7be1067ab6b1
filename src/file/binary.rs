//! Cheap binary-file detection used by the file walker to skip non-text
//! content before it ever reaches the parser.

use std::io::Read;
use std::path::Path;

const SNIFF_BYTES: usize = 8192;

const KNOWN_BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "svg.gz", "pdf", "zip", "gz", "tar", "7z",
    "rar", "exe", "dll", "so", "dylib", "a", "o", "class", "jar", "wasm", "woff", "woff2", "ttf",
    "otf", "eot", "mp3", "mp4", "mov", "avi", "wav", "flac", "db", "sqlite", "sqlite3", "parquet",
    "onnx", "pyc", "pdb",
];

/// Heuristic: a known binary extension, or a NUL byte in the first 8 KiB.
pub fn is_binary_file(path: &Path) -> bool {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        if KNOWN_BINARY_EXTENSIONS.contains(&ext.to_lowercase().as_str()) {
            return true;
        }
    }

    let Ok(mut file) = std::fs::File::open(path) else {
        return false;
    };
    let mut buf = [0u8; SNIFF_BYTES];
    let Ok(n) = file.read(&mut buf) else {
        return false;
    };
    buf[..n].contains(&0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn detects_null_byte_content_as_binary() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[0x48, 0x00, 0x49]).unwrap();
        assert!(is_binary_file(file.path()));
    }

    #[test]
    fn plain_text_is_not_binary() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello world\n").unwrap();
        assert!(!is_binary_file(file.path()));
    }

    #[test]
    fn known_binary_extension_short_circuits_sniffing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.png");
        std::fs::write(&path, b"not really png bytes").unwrap();
        assert!(is_binary_file(&path));
    }
}
