//! Validation for configuration records and path-bearing names.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::config::SfConfig;
use crate::types::{FeatureConfig, RuntimeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub level: ValidationLevel,
    pub code: &'static str,
    pub message: String,
}

impl ValidationIssue {
    fn error(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            level: ValidationLevel::Error,
            code,
            message: message.into(),
        }
    }

    fn warning(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            level: ValidationLevel::Warning,
            code,
            message: message.into(),
        }
    }
}

pub trait Validate {
    fn validate(&self) -> Vec<ValidationIssue>;
}

pub fn has_errors(issues: &[ValidationIssue]) -> bool {
    issues
        .iter()
        .any(|issue| issue.level == ValidationLevel::Error)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} name '{value}': {reason}")]
pub struct InvalidName {
    pub kind: &'static str,
    pub value: String,
    pub reason: &'static str,
}

/// Names end up in filesystem paths and branch names on every host.
pub fn check_name(kind: &'static str, value: &str) -> Result<(), InvalidName> {
    let reason = if value.is_empty() {
        Some("must not be empty")
    } else if value.contains('/') {
        Some("must not contain '/'")
    } else if value.starts_with('.') {
        Some("must not start with '.'")
    } else if value.chars().any(char::is_whitespace) {
        Some("must not contain whitespace")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(InvalidName {
            kind,
            value: value.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

impl Validate for SfConfig {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        for (key, host) in &self.hosts {
            if let Err(err) = check_name("host", key) {
                issues.push(ValidationIssue::error("host.name.invalid", err.to_string()));
            }
            if key != &host.name {
                issues.push(ValidationIssue::warning(
                    "host.name.mismatch",
                    format!("host entry '{key}' declares name '{}'", host.name),
                ));
            }
            if host.target.trim().is_empty() {
                issues.push(ValidationIssue::error(
                    "host.target.empty",
                    format!("host '{key}' has an empty target"),
                ));
            }
            if let Some(root) = &host.workspace_root {
                if !root.starts_with('/') {
                    issues.push(ValidationIssue::error(
                        "host.workspace_root.relative",
                        format!("host '{key}' workspace_root must be absolute, got '{root}'"),
                    ));
                }
            }
        }

        for (key, repo) in &self.repos {
            if let Err(err) = check_name("repo", key) {
                issues.push(ValidationIssue::error("repo.name.invalid", err.to_string()));
            }
            if key != &repo.name {
                issues.push(ValidationIssue::warning(
                    "repo.name.mismatch",
                    format!("repo entry '{key}' declares name '{}'", repo.name),
                ));
            }
            if repo.url.trim().is_empty() {
                issues.push(ValidationIssue::error(
                    "repo.url.empty",
                    format!("repo '{key}' has an empty url"),
                ));
            }
            if repo.base.trim().is_empty() {
                issues.push(ValidationIssue::error(
                    "repo.base.empty",
                    format!("repo '{key}' has an empty base branch"),
                ));
            }
        }

        issues
    }
}

impl Validate for FeatureConfig {
    fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if let Err(err) = check_name("feature", &self.name) {
            issues.push(ValidationIssue::error("feature.name.invalid", err.to_string()));
        }

        let mut seen = HashSet::new();
        for attachment in &self.repos {
            if !seen.insert(attachment.repo.as_str()) {
                issues.push(ValidationIssue::error(
                    "feature.attachment.duplicate",
                    format!(
                        "repo '{}' is attached more than once to feature '{}'",
                        attachment.repo, self.name
                    ),
                ));
            }
            let mut hosts = HashSet::new();
            for host in &attachment.hosts {
                if !hosts.insert(host.as_str()) {
                    issues.push(ValidationIssue::warning(
                        "feature.attachment.host_repeated",
                        format!("host '{host}' is listed twice for repo '{}'", attachment.repo),
                    ));
                }
            }
            if let Some(service) = &attachment.service {
                if service.runtime == RuntimeKind::Script {
                    let has_up = service
                        .commands
                        .as_ref()
                        .is_some_and(|commands| commands.contains_key("up"));
                    if !has_up {
                        issues.push(ValidationIssue::error(
                            "feature.service.script_missing_up",
                            format!(
                                "script runtime for repo '{}' has no 'up' command",
                                attachment.repo
                            ),
                        ));
                    }
                }
            }
        }

        issues
    }
}

/// Issues for `feature` in the context of the configuration it references.
pub fn validate_feature(config: &SfConfig, feature: &FeatureConfig) -> Vec<ValidationIssue> {
    let mut issues = feature.validate();
    for attachment in &feature.repos {
        if !config.repos.contains_key(&attachment.repo) {
            issues.push(ValidationIssue::error(
                "feature.attachment.unknown_repo",
                format!(
                    "Repository '{}' is not defined. Run 'sf repo add {}'.",
                    attachment.repo, attachment.repo
                ),
            ));
        }
        for host in &attachment.hosts {
            if !config.hosts.contains_key(host) {
                issues.push(ValidationIssue::error(
                    "feature.attachment.unknown_host",
                    format!("Host '{host}' is not defined. Run 'sf host add {host}'."),
                ));
            }
        }
    }
    issues
}
