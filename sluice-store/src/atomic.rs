//! Write-to-temp-then-rename discipline so a reader never observes a
//! partially written conf or data file.

use camino::Utf8Path;
use anyhow::{Context, Result};

pub fn write_atomic(path: impl AsRef<Utf8Path>, bytes: &[u8]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {parent}"))?;
    }
    let tmp = path.with_extension(format!("{}.tmp", path.extension().unwrap_or("")));
    std::fs::write(&tmp, bytes).with_context(|| format!("Failed to write: {tmp}"))?;
    std::fs::rename(&tmp, path).with_context(|| format!("Failed to rename {tmp} to {path}"))?;
    Ok(())
}

pub fn write_atomic_str(path: impl AsRef<Utf8Path>, contents: &str) -> Result<()> {
    write_atomic(path, contents.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;

    #[test]
    fn write_then_read_roundtrips() {
        let dir = std::env::temp_dir();
        let path = Utf8PathBuf::try_from(dir).unwrap().join("sluice-atomic-test.txt");
        write_atomic_str(&path, "hello").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
        let _ = std::fs::remove_file(&path);
    }
}
