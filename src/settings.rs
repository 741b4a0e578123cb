//! A minimal INI reader for settings files (`.flowconfig` and friends):
//! `key = value` pairs, optional `[section]` headers folded into a
//! `section.key` lookup, `#`/`;` comments, blank lines ignored.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};

#[derive(Debug, Default, Clone)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    pub fn parse(text: &str) -> Settings {
        let mut values = BTreeMap::new();
        let mut section = String::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                section = name.trim().to_string();
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim().trim_matches('"');
                let full_key = if section.is_empty() { key.to_string() } else { format!("{section}.{key}") };
                values.insert(full_key, value.to_string());
            }
        }
        Settings { values }
    }

    pub fn load(path: &Utf8Path) -> Result<Settings> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading settings file {path}"))?;
        Ok(Settings::parse(&text))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// Searches, in order, an explicit path, `./.flowconfig`, and
/// `$HOME/.flowconfig`, returning the first that exists.
pub fn find_settings_file(explicit: Option<&Utf8Path>) -> Option<Utf8PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Some(path.to_owned());
        }
    }
    let candidates = [
        Utf8PathBuf::from(".flowconfig"),
        std::env::var("HOME").ok().map(|h| Utf8PathBuf::from(h).join(".flowconfig")).unwrap_or_default(),
    ];
    candidates.into_iter().find(|p| !p.as_str().is_empty() && p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_keys() {
        let s = Settings::parse("data_dir = /var/flow\n# comment\nsync_dir=/var/sync\n");
        assert_eq!(s.get("data_dir"), Some("/var/flow"));
        assert_eq!(s.get("sync_dir"), Some("/var/sync"));
    }

    #[test]
    fn sections_prefix_keys() {
        let s = Settings::parse("[agent]\nname = worker1\n");
        assert_eq!(s.get("agent.name"), Some("worker1"));
    }
}
