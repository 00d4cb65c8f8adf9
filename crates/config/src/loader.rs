use std::path::{Path, PathBuf};

use {
    anyhow::Context,
    tracing::{debug, warn},
};

use crate::{env_subst::substitute_env, schema::ValetConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["valet.toml", "valet.yaml", "valet.yml", "valet.json"];

/// Load config from the given path (any supported format).
///
/// Relative paths inside the file are taken relative to the file itself.
pub fn load_config(path: &Path) -> anyhow::Result<ValetConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let raw = substitute_env(&raw);
    let mut config = parse_config(&raw, path)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    if let Some(base) = path.parent() {
        resolve_relative_paths(&mut config, base);
    }
    Ok(config)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./valet.{toml,yaml,yml,json}`
/// 2. the user config dir, e.g. `~/.config/valet/`
///
/// Returns `ValetConfig::default()` if no file is found or it fails to load.
pub fn discover_and_load() -> ValetConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %format!("{e:#}"), "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    ValetConfig::default()
}

/// Load `explicit` if given, otherwise discover. An explicit path must load.
pub fn load_or_discover(explicit: Option<&Path>) -> anyhow::Result<ValetConfig> {
    match explicit {
        Some(path) => load_config(path),
        None => Ok(discover_and_load()),
    }
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    find_in(Path::new(".")).or_else(|| config_dir().and_then(|dir| find_in(&dir)))
}

fn find_in(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// The user config directory (`~/.config/valet/` on Linux).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "valet").map(|d| d.config_dir().to_path_buf())
}

/// The user data directory, home of the default identity database.
pub fn data_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "valet").map(|d| d.data_dir().to_path_buf())
}

fn resolve_relative_paths(config: &mut ValetConfig, base: &Path) {
    let rebase = |p: &mut PathBuf| {
        if p.is_relative() && !p.as_os_str().is_empty() {
            *p = base.join(&*p);
        }
    };
    rebase(&mut config.bot.plugins_dir);
    rebase(&mut config.protocol.session_file);
    if let Some(db) = config.peers.database.as_mut() {
        rebase(db);
    }
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<ValetConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

/// Render a config in the format implied by `ext` (default TOML).
pub fn render_config(config: &ValetConfig, ext: &str) -> anyhow::Result<String> {
    Ok(match ext {
        "json" => serde_json::to_string_pretty(config)?,
        "yaml" | "yml" => serde_yaml::to_string(config)?,
        _ => toml::to_string_pretty(config)?,
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, valet_common::StrategyKind};

    #[test]
    fn relative_paths_follow_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("valet.toml");
        std::fs::write(
            &path,
            "[bot]\nplugins_dir = \"my-plugins\"\n[peers]\ndatabase = \"/abs/peers.db\"\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.bot.plugins_dir, dir.path().join("my-plugins"));
        assert_eq!(config.protocol.session_file, dir.path().join("valet.session"));
        assert_eq!(config.peers.database.as_deref(), Some(Path::new("/abs/peers.db")));
    }

    #[test]
    fn json_and_yaml_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("valet.json");
        std::fs::write(&json, r#"{"bot": {"command_prefix": "!"}}"#).unwrap();
        assert_eq!(load_config(&json).unwrap().bot.command_prefix, "!");

        let yaml = dir.path().join("valet.yaml");
        std::fs::write(&yaml, "peers:\n  strategies: [contacts, direct]\n").unwrap();
        assert_eq!(load_config(&yaml).unwrap().peers.strategies, [
            StrategyKind::Contacts,
            StrategyKind::Direct
        ]);
    }

    #[test]
    fn explicit_path_errors_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("valet.toml");
        std::fs::write(&path, "[bot\n").unwrap();
        let err = load_or_discover(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse"));
    }

    #[test]
    fn find_in_respects_filename_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("valet.json"), "{}").unwrap();
        std::fs::write(dir.path().join("valet.toml"), "").unwrap();
        assert_eq!(find_in(dir.path()), Some(dir.path().join("valet.toml")));
    }

    #[test]
    fn rendered_toml_round_trips() {
        let rendered = render_config(&ValetConfig::default(), "toml").unwrap();
        let parsed: ValetConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.bot.command_prefix, ".");
    }
}
