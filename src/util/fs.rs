use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Sibling temp path used while writing `target`: `products.json` -> `products.json.tmp`.
pub fn temp_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    target.with_file_name(name)
}

/// Write to a sibling temp file, fsync, then rename over `target`. Readers see either the
/// old or the new contents, never a partial write.
pub fn write_atomic(target: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let temp = temp_path_for(target);
    if temp.exists() {
        let _ = fs::remove_file(&temp);
    }
    let result = (|| {
        let mut file = fs::File::create(&temp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&temp, target)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

/// Creates and removes a scratch file next to `target` so an unwritable location is reported
/// before any work starts.
pub fn ensure_writable(target: &Path) -> io::Result<()> {
    let scratch = temp_path_for(target).with_extension("writable");
    if let Some(parent) = scratch.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::File::create(&scratch)?;
    fs::remove_file(&scratch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_atomic_replaces_contents_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("products.json");
        write_atomic(&target, b"[1]").unwrap();
        write_atomic(&target, b"[1,2]").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"[1,2]");
        assert!(!temp_path_for(&target).exists());
    }

    #[test]
    fn temp_path_keeps_original_extension() {
        let p = temp_path_for(Path::new("/data/products.json"));
        assert_eq!(p, PathBuf::from("/data/products.json.tmp"));
    }
}
