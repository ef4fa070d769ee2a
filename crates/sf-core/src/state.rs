//! On-disk State Store: `config.toml` plus one TOML file per feature.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{load_config, load_toml, save_config, save_toml, ConfigError, SfConfig};
use crate::types::FeatureConfig;
use crate::validation::{check_name, InvalidName};

pub const CONFIG_FILE: &str = "config.toml";
pub const FEATURES_DIR: &str = "features";

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    InvalidName(#[from] InvalidName),
    #[error("Feature '{name}' has not been created. Run 'sf feature new {name}'.")]
    FeatureNotFound { name: String },
    #[error("state already initialized at {path}; pass --force to overwrite")]
    AlreadyInitialized { path: PathBuf },
    #[error("failed to access state path {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read state snapshot {path}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Full state as exported to / imported from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub exported_at: DateTime<Utc>,
    pub config: SfConfig,
    #[serde(default)]
    pub features: Vec<FeatureConfig>,
}

#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn features_dir(&self) -> PathBuf {
        self.root.join(FEATURES_DIR)
    }

    fn feature_path(&self, name: &str) -> Result<PathBuf, StateError> {
        check_name("feature", name)?;
        Ok(self.features_dir().join(format!("{name}.toml")))
    }

    /// Create the state layout. Refuses to clobber an existing config unless `force`.
    pub fn init(&self, force: bool) -> Result<(), StateError> {
        let config_path = self.config_path();
        if config_path.exists() && !force {
            return Err(StateError::AlreadyInitialized { path: config_path });
        }
        let features_dir = self.features_dir();
        fs::create_dir_all(&features_dir).map_err(|source| StateError::Io {
            path: features_dir,
            source,
        })?;
        save_config(&config_path, &SfConfig::default())?;
        info!(root = %self.root.display(), "initialized state");
        Ok(())
    }

    pub fn load_config(&self) -> Result<SfConfig, StateError> {
        Ok(load_config(self.config_path())?)
    }

    pub fn save_config(&self, config: &SfConfig) -> Result<(), StateError> {
        Ok(save_config(self.config_path(), config)?)
    }

    pub fn load_feature(&self, name: &str) -> Result<FeatureConfig, StateError> {
        self.try_load_feature(name)?
            .ok_or_else(|| StateError::FeatureNotFound {
                name: name.to_string(),
            })
    }

    pub fn try_load_feature(&self, name: &str) -> Result<Option<FeatureConfig>, StateError> {
        let path = self.feature_path(name)?;
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(load_toml(&path)?))
    }

    pub fn save_feature(&self, feature: &FeatureConfig) -> Result<(), StateError> {
        let path = self.feature_path(&feature.name)?;
        debug!(feature = %feature.name, path = %path.display(), "saving feature");
        Ok(save_toml(path, feature)?)
    }

    /// Feature names, sorted.
    pub fn list_features(&self) -> Result<Vec<String>, StateError> {
        let dir = self.features_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&dir).map_err(|source| StateError::Io {
            path: dir.clone(),
            source,
        })?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StateError::Io {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove a feature record. Absence is not an error.
    pub fn delete_feature(&self, name: &str) -> Result<(), StateError> {
        let path = self.feature_path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StateError::Io { path, source }),
        }
    }

    pub fn dump_state(&self) -> Result<StateSnapshot, StateError> {
        let config = self.load_config()?;
        let mut features = Vec::new();
        for name in self.list_features()? {
            features.push(self.load_feature(&name)?);
        }
        Ok(StateSnapshot {
            exported_at: Utc::now(),
            config,
            features,
        })
    }

    pub fn export_state(&self, path: impl AsRef<Path>) -> Result<StateSnapshot, StateError> {
        let path_ref = path.as_ref();
        let snapshot = self.dump_state()?;
        let body = serde_json::to_string_pretty(&snapshot).map_err(|source| {
            StateError::Snapshot {
                path: path_ref.to_path_buf(),
                source,
            }
        })?;
        if let Some(parent) = path_ref.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StateError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path_ref, body).map_err(|source| StateError::Io {
            path: path_ref.to_path_buf(),
            source,
        })?;
        info!(path = %path_ref.display(), features = snapshot.features.len(), "exported state");
        Ok(snapshot)
    }

    /// Load a JSON snapshot. With `replace`, existing features are removed and
    /// the config is overwritten; otherwise hosts/repos merge and features upsert.
    pub fn import_state(
        &self,
        path: impl AsRef<Path>,
        replace: bool,
    ) -> Result<StateSnapshot, StateError> {
        let path_ref = path.as_ref();
        let body = fs::read_to_string(path_ref).map_err(|source| StateError::Io {
            path: path_ref.to_path_buf(),
            source,
        })?;
        let snapshot: StateSnapshot =
            serde_json::from_str(&body).map_err(|source| StateError::Snapshot {
                path: path_ref.to_path_buf(),
                source,
            })?;
        for feature in &snapshot.features {
            check_name("feature", &feature.name)?;
        }

        if replace {
            for name in self.list_features()? {
                self.delete_feature(&name)?;
            }
            self.save_config(&snapshot.config)?;
        } else {
            let mut config = self.load_config()?;
            config.merge(snapshot.config.clone());
            self.save_config(&config)?;
        }
        for feature in &snapshot.features {
            self.save_feature(feature)?;
        }
        info!(path = %path_ref.display(), replace, "imported state");
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FeatureRepoAttachment, HostConfig, RepoConfig};

    fn store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(dir.path().join("state"));
        store.init(false).expect("init");
        (dir, store)
    }

    fn feature(name: &str, repo: &str) -> FeatureConfig {
        let mut feature = FeatureConfig::new(name, None);
        feature.attach(
            FeatureRepoAttachment::new(repo, vec!["gpu-01".to_string()]).expect("attachment"),
        );
        feature
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let (_dir, store) = store();
        let err = store.init(false).expect_err("second init");
        assert!(matches!(err, StateError::AlreadyInitialized { .. }));
        store.init(true).expect("forced init");
    }

    #[test]
    fn missing_feature_reports_creation_hint() {
        let (_dir, store) = store();
        assert!(store.try_load_feature("ghost").expect("try load").is_none());
        let err = store.load_feature("ghost").expect_err("missing feature");
        assert_eq!(
            err.to_string(),
            "Feature 'ghost' has not been created. Run 'sf feature new ghost'."
        );
    }

    #[test]
    fn features_are_listed_sorted_and_deleted_idempotently() {
        let (_dir, store) = store();
        store.save_feature(&feature("zeta", "core")).expect("save");
        store.save_feature(&feature("alpha", "core")).expect("save");
        assert_eq!(store.list_features().expect("list"), vec!["alpha", "zeta"]);

        store.delete_feature("alpha").expect("delete");
        store.delete_feature("alpha").expect("delete again");
        assert_eq!(store.list_features().expect("list"), vec!["zeta"]);
    }

    #[test]
    fn feature_names_that_escape_the_store_are_rejected() {
        let (_dir, store) = store();
        let err = store
            .save_feature(&feature("../evil", "core"))
            .expect_err("path traversal");
        assert!(matches!(err, StateError::InvalidName(_)));
    }

    #[test]
    fn export_then_import_replace_restores_state() {
        let (dir, store) = store();
        let mut config = SfConfig::default();
        config.ensure_host(HostConfig::new("gpu-01", "ubuntu@gpu-01"));
        config.ensure_repo(RepoConfig::new("core", "git@example.com:core.git"));
        store.save_config(&config).expect("save config");
        store.save_feature(&feature("payments", "core")).expect("save");

        let export_path = dir.path().join("backup.json");
        let exported = store.export_state(&export_path).expect("export");
        assert_eq!(exported.features.len(), 1);

        store.save_feature(&feature("scratch", "core")).expect("save");
        store.save_config(&SfConfig::default()).expect("clear config");

        store.import_state(&export_path, true).expect("import");
        assert_eq!(store.list_features().expect("list"), vec!["payments"]);
        assert_eq!(store.load_config().expect("config"), config);
    }

    #[test]
    fn import_without_replace_merges() {
        let (dir, store) = store();
        let mut config = SfConfig::default();
        config.ensure_host(HostConfig::new("gpu-01", "ubuntu@gpu-01"));
        store.save_config(&config).expect("save config");
        store.save_feature(&feature("payments", "core")).expect("save");
        let export_path = dir.path().join("backup.json");
        store.export_state(&export_path).expect("export");

        let mut local = SfConfig::default();
        local.ensure_host(HostConfig::new("laptop", "localhost"));
        store.save_config(&local).expect("save local");
        store.save_feature(&feature("scratch", "core")).expect("save");

        store.import_state(&export_path, false).expect("import");
        let merged = store.load_config().expect("config");
        assert!(merged.hosts.contains_key("laptop"));
        assert!(merged.hosts.contains_key("gpu-01"));
        assert_eq!(
            store.list_features().expect("list"),
            vec!["payments", "scratch"]
        );
    }
}
