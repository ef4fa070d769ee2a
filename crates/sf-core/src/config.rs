//! Top-level configuration (`config.toml`) and TOML file helpers.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::{HostConfig, RepoConfig};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config at {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to create config parent directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A name referenced by a workflow that the configuration does not define.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("Host '{name}' is not defined. Run 'sf host add {name}'.")]
    UnknownHost { name: String },
    #[error("Repository '{name}' is not defined. Run 'sf repo add {name}'.")]
    UnknownRepo { name: String },
}

/// Hosts and repositories known to Session Forge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SfConfig {
    #[serde(default)]
    pub hosts: BTreeMap<String, HostConfig>,
    #[serde(default)]
    pub repos: BTreeMap<String, RepoConfig>,
}

impl SfConfig {
    pub fn ensure_host(&mut self, host: HostConfig) {
        self.hosts.insert(host.name.clone(), host);
    }

    pub fn ensure_repo(&mut self, repo: RepoConfig) {
        self.repos.insert(repo.name.clone(), repo);
    }

    pub fn host(&self, name: &str) -> Result<&HostConfig, ResolveError> {
        self.hosts.get(name).ok_or_else(|| ResolveError::UnknownHost {
            name: name.to_string(),
        })
    }

    pub fn repo(&self, name: &str) -> Result<&RepoConfig, ResolveError> {
        self.repos.get(name).ok_or_else(|| ResolveError::UnknownRepo {
            name: name.to_string(),
        })
    }

    /// Merge `other` into `self`; entries in `other` win on name clashes.
    pub fn merge(&mut self, other: SfConfig) {
        self.hosts.extend(other.hosts);
        self.repos.extend(other.repos);
    }
}

pub fn parse_config(contents: &str) -> Result<SfConfig, toml::de::Error> {
    toml::from_str(contents)
}

/// Load `config.toml`; a missing file yields an empty configuration.
pub fn load_config(path: impl AsRef<Path>) -> Result<SfConfig, ConfigError> {
    let path_ref = path.as_ref();
    if !path_ref.exists() {
        return Ok(SfConfig::default());
    }
    load_toml(path_ref)
}

pub fn save_config(path: impl AsRef<Path>, config: &SfConfig) -> Result<(), ConfigError> {
    save_toml(path, config)
}

pub fn load_toml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path_ref = path.as_ref();
    let body = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
        path: path_ref.to_path_buf(),
        source,
    })?;
    toml::from_str(&body).map_err(|source| ConfigError::Parse {
        path: path_ref.to_path_buf(),
        source,
    })
}

pub fn save_toml<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<(), ConfigError> {
    let path_ref = path.as_ref();
    let parent = path_ref.parent().map(Path::to_path_buf);
    if let Some(parent_dir) = parent {
        fs::create_dir_all(&parent_dir).map_err(|source| ConfigError::CreateDir {
            path: parent_dir,
            source,
        })?;
    }

    let body = toml::to_string_pretty(value).map_err(|source| ConfigError::Serialize {
        path: path_ref.to_path_buf(),
        source,
    })?;
    fs::write(path_ref, body).map_err(|source| ConfigError::Write {
        path: path_ref.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> SfConfig {
        parse_config(
            r#"
[hosts.gpu-01]
name = "gpu-01"
target = "ubuntu@10.0.0.5"
tags = ["gpu"]

[hosts.gpu-01.env]
CUDA_VISIBLE_DEVICES = "0"

[repos.core]
name = "core"
url = "git@github.com:acme/core.git"

[repos.web]
name = "web"
url = "git@github.com:acme/web.git"
base = "develop"
anchor_subdir = "apps/web"
"#,
        )
        .expect("parse config")
    }

    #[test]
    fn parse_config_applies_defaults() {
        let config = sample_config();
        let host = config.host("gpu-01").expect("host");
        assert_eq!(host.env.get("CUDA_VISIBLE_DEVICES").map(String::as_str), Some("0"));
        assert_eq!(host.workspace_root, None);

        let core = config.repo("core").expect("core");
        assert_eq!(core.base, "main");
        assert_eq!(core.anchor_subdir, None);
        let web = config.repo("web").expect("web");
        assert_eq!(web.base, "develop");
        assert_eq!(web.anchor_subdir.as_deref(), Some("apps/web"));
    }

    #[test]
    fn unknown_names_produce_corrective_messages() {
        let config = sample_config();
        let err = config.host("nope").expect_err("unknown host");
        assert_eq!(
            err.to_string(),
            "Host 'nope' is not defined. Run 'sf host add nope'."
        );
        let err = config.repo("nope").expect_err("unknown repo");
        assert_eq!(
            err.to_string(),
            "Repository 'nope' is not defined. Run 'sf repo add nope'."
        );
    }

    #[test]
    fn load_config_treats_missing_file_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = load_config(dir.path().join("config.toml")).expect("load");
        assert_eq!(config, SfConfig::default());
    }

    #[test]
    fn save_and_load_config_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");
        let config = sample_config();
        save_config(&path, &config).expect("save");
        assert_eq!(load_config(&path).expect("load"), config);
    }

    #[test]
    fn load_config_classifies_parse_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "hosts = [").expect("write fixture");
        let err = load_config(&path).expect_err("invalid config should fail");
        assert!(matches!(err, ConfigError::Parse { path: p, .. } if p == path));
    }

    #[test]
    fn merge_prefers_incoming_entries() {
        let mut config = sample_config();
        let mut incoming = SfConfig::default();
        incoming.ensure_host(HostConfig::new("gpu-01", "root@10.0.0.9"));
        incoming.ensure_host(HostConfig::new("gpu-02", "root@10.0.0.10"));
        config.merge(incoming);
        assert_eq!(config.hosts.len(), 2);
        assert_eq!(config.host("gpu-01").expect("host").target, "root@10.0.0.9");
        assert_eq!(config.repos.len(), 2);
    }
}
