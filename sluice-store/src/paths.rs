//! On-disk path layout: `<data_dir>/<scope_path>/<slug>.{data,json}`, a
//! work directory per node, locks under `.lock/`, sync markers under
//! `.sync/`, job files under `.jobs/`.

use camino::{Utf8Path, Utf8PathBuf};

/// All the paths derived from a node's `scope_path` and `slug`, rooted at
/// either `data_dir` or `sync_dir`.
#[derive(Debug, Clone)]
pub struct NodePaths {
    root: Utf8PathBuf,
    scope_path: Utf8PathBuf,
    slug: String,
}

impl NodePaths {
    pub fn new(root: impl AsRef<Utf8Path>, scope_path: impl AsRef<Utf8Path>, slug: impl Into<String>) -> Self {
        NodePaths {
            root: root.as_ref().to_owned(),
            scope_path: scope_path.as_ref().to_owned(),
            slug: slug.into(),
        }
    }

    fn base_dir(&self) -> Utf8PathBuf {
        self.root.join(&self.scope_path)
    }

    pub fn work_dir(&self) -> Utf8PathBuf {
        self.base_dir().join(&self.slug)
    }

    pub fn data_file(&self) -> Utf8PathBuf {
        self.base_dir().join(format!("{}.data", self.slug))
    }

    pub fn conf_file(&self) -> Utf8PathBuf {
        self.base_dir().join(format!("{}.json", self.slug))
    }

    pub fn lock_file(&self) -> Utf8PathBuf {
        self.base_dir().join(".lock").join(format!("{}.lock", self.slug))
    }

    pub fn sync_file(&self) -> Utf8PathBuf {
        self.base_dir().join(".sync").join(format!("{}.sync", self.slug))
    }

    pub fn job_file(&self, agent: &str) -> Utf8PathBuf {
        self.base_dir()
            .join(".jobs")
            .join(format!("{}.{}.json", self.slug, agent))
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn scope_path(&self) -> &Utf8Path {
        &self.scope_path
    }
}

/// The flow snapshot path: `<data_dir>/<name>.<flow_hash>.json`, unless
/// `name` already ends with the hash.
pub fn flow_snapshot_path(data_dir: &Utf8Path, name: &str, flow_hash: &str) -> Utf8PathBuf {
    if name.ends_with(&format!(".{flow_hash}")) {
        data_dir.join(format!("{name}.json"))
    } else {
        data_dir.join(format!("{name}.{flow_hash}.json"))
    }
}
