//! Scans `data_dir` for slug-named artifacts that no longer correspond to
//! any node of the loaded flow(s), and optionally removes them.

use std::collections::HashSet;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use sluice_config::Flow;

#[derive(Debug)]
pub struct OrphanedArtifact {
    pub path: Utf8PathBuf,
    pub bytes: u64,
}

/// Walks `data_dir` (recursively, since nodes live under their scope's
/// `_path`) collecting every file whose name embeds a slug not produced by
/// any node in `flows`. With no flows given, every top-level directory
/// under `data_dir` is treated as a candidate base to scan.
pub fn find_orphans(data_dir: &Utf8Path, flows: &[&Flow]) -> Result<Vec<OrphanedArtifact>> {
    let known_slugs: HashSet<&str> = flows
        .iter()
        .flat_map(|f| f.scopes.values())
        .flat_map(|s| s.nodes.values())
        .map(|n| n.slug.as_str())
        .collect();

    let mut out = Vec::new();
    walk(data_dir, &known_slugs, &mut out)?;
    Ok(out)
}

fn walk(dir: &Utf8Path, known_slugs: &HashSet<&str>, out: &mut Vec<OrphanedArtifact>) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = Utf8PathBuf::try_from(entry.path())?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            if slug_of(&path).map(|s| !known_slugs.contains(s.as_str())).unwrap_or(false) && is_slug_like(&path) {
                out.push(OrphanedArtifact { bytes: dir_size(&path)?, path });
            } else {
                walk(&path, known_slugs, out)?;
            }
        } else if let Some(slug) = slug_of(&path) {
            if !known_slugs.contains(slug.as_str()) {
                out.push(OrphanedArtifact { bytes: meta.len(), path });
            }
        }
    }
    Ok(())
}

/// A slug is `<base>.<hash>`; this strips a trailing `.data`/`.json`/`.tmp`
/// extension (if any) before taking everything as the slug, since a work
/// directory has no such extension.
fn slug_of(path: &Utf8Path) -> Option<String> {
    let name = path.file_name()?;
    let stem = name.strip_suffix(".data").or_else(|| name.strip_suffix(".json")).unwrap_or(name);
    if is_slug_like(&Utf8PathBuf::from(stem)) {
        Some(stem.to_string())
    } else {
        None
    }
}

fn is_slug_like(path: &Utf8Path) -> bool {
    path.file_name().map(|n| n.rsplit_once('.').is_some()).unwrap_or(false)
}

fn dir_size(dir: &Utf8Path) -> Result<u64> {
    let mut total = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = Utf8PathBuf::try_from(entry.path())?;
        total += if entry.metadata()?.is_dir() { dir_size(&path)? } else { entry.metadata()?.len() };
    }
    Ok(total)
}

/// Human-readable size, `"4.2 KiB"` style, for the prune report.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[0])
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

pub fn remove(artifact: &OrphanedArtifact) -> Result<()> {
    if artifact.path.is_dir() {
        std::fs::remove_dir_all(&artifact.path)?;
    } else {
        std::fs::remove_file(&artifact.path)?;
    }
    Ok(())
}
