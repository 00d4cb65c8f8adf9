//! `plugin.json` manifests of script plugins.
//!
//! Each script plugin lives in its own directory under the plugins dir:
//!
//! ```text
//! plugins/
//!   greeter/
//!     plugin.json   {"name": "greeter", "version": "0.1.0", "entry": "main.lua"}
//!     main.lua
//! ```

use std::path::{Path, PathBuf};

use {
    serde::{Deserialize, Serialize},
    tracing::{debug, warn},
};

use crate::{
    error::{Context, Error, Result},
    plugin::PluginInfo,
};

pub const MANIFEST_FILE: &str = "plugin.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Entry script, relative to the plugin directory.
    pub entry: String,
    /// Directory the manifest was read from.
    #[serde(skip)]
    pub dir: PathBuf,
}

impl ScriptManifest {
    pub fn info(&self) -> PluginInfo {
        PluginInfo {
            name: self.name.clone(),
            version: self.version.clone(),
            author: self.author.clone(),
            description: self.description.clone(),
        }
    }

    pub fn entry_path(&self) -> PathBuf {
        self.dir.join(&self.entry)
    }

    /// Extension of the entry script, which selects the backend.
    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.entry).extension().and_then(|e| e.to_str())
    }

    /// Read and validate `<dir>/plugin.json`.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut manifest: Self =
            serde_json::from_str(&raw).map_err(|e| Error::invalid_manifest(&path, e.to_string()))?;
        manifest.dir = dir.to_path_buf();
        manifest.check(&path)?;
        Ok(manifest)
    }

    fn check(&self, path: &Path) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid_manifest(path, "name is empty"));
        }
        if self.name.chars().any(char::is_whitespace) {
            return Err(Error::invalid_manifest(path, "name contains whitespace"));
        }
        if self.version.trim().is_empty() {
            return Err(Error::invalid_manifest(path, "version is empty"));
        }
        let entry = Path::new(&self.entry);
        if self.entry.trim().is_empty() || entry.is_absolute() {
            return Err(Error::invalid_manifest(path, "entry must be a relative file name"));
        }
        if entry.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
            return Err(Error::invalid_manifest(path, "entry must stay inside the plugin directory"));
        }
        if !self.entry_path().is_file() {
            return Err(Error::invalid_manifest(
                path,
                format!("entry '{}' does not exist", self.entry),
            ));
        }
        Ok(())
    }
}

/// Manifests found under a plugins directory, plus the ones that failed.
#[derive(Debug, Default)]
pub struct Discovered {
    pub manifests: Vec<ScriptManifest>,
    pub errors: Vec<Error>,
}

/// Scan the immediate subdirectories of `root` for manifests. A missing root
/// yields nothing; a directory without `plugin.json` is skipped silently.
pub fn discover(root: &Path) -> Discovered {
    let mut found = Discovered::default();
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %root.display(), "plugins directory absent");
            return found;
        },
        Err(e) => {
            found.errors.push(e.into());
            return found;
        },
    };

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir() && p.join(MANIFEST_FILE).is_file())
        .collect();
    dirs.sort();

    for dir in dirs {
        match ScriptManifest::load(&dir) {
            Ok(manifest) => found.manifests.push(manifest),
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "skipping plugin");
                found.errors.push(e);
            },
        }
    }
    found
}
