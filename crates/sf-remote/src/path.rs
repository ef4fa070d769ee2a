use std::path::{Path, PathBuf};

use crate::quote::shell_quote;

/// A path on a target host: relative to the remote user's home, or absolute.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RemotePath {
    Home(String),
    Absolute(String),
}

impl RemotePath {
    pub fn home(relative: impl Into<String>) -> Self {
        RemotePath::Home(trim_segment(&relative.into()).to_string())
    }

    pub fn absolute(path: impl Into<String>) -> Self {
        let path = path.into();
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            RemotePath::Absolute("/".to_string())
        } else {
            RemotePath::Absolute(trimmed.to_string())
        }
    }

    /// `~`, `~/x` and bare relative paths are home-relative; `/x` is absolute.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value == "~" {
            RemotePath::home("")
        } else if let Some(rest) = value.strip_prefix("~/") {
            RemotePath::home(rest)
        } else if value.starts_with('/') {
            RemotePath::absolute(value)
        } else {
            RemotePath::home(value)
        }
    }

    pub fn join(&self, segment: &str) -> Self {
        let segment = trim_segment(segment);
        if segment.is_empty() {
            return self.clone();
        }
        match self {
            RemotePath::Home(base) if base.is_empty() => RemotePath::Home(segment.to_string()),
            RemotePath::Home(base) => RemotePath::Home(format!("{base}/{segment}")),
            RemotePath::Absolute(base) if base == "/" => {
                RemotePath::Absolute(format!("/{segment}"))
            }
            RemotePath::Absolute(base) => RemotePath::Absolute(format!("{base}/{segment}")),
        }
    }

    pub fn join_opt(&self, segment: Option<&str>) -> Self {
        match segment {
            Some(segment) => self.join(segment),
            None => self.clone(),
        }
    }

    pub fn parent(&self) -> Option<Self> {
        match self {
            RemotePath::Home(rel) if rel.is_empty() => None,
            RemotePath::Home(rel) => Some(match rel.rsplit_once('/') {
                Some((head, _)) => RemotePath::Home(head.to_string()),
                None => RemotePath::Home(String::new()),
            }),
            RemotePath::Absolute(path) if path == "/" => None,
            RemotePath::Absolute(path) => Some(match path.rsplit_once('/') {
                Some(("", _)) | None => RemotePath::Absolute("/".to_string()),
                Some((head, _)) => RemotePath::Absolute(head.to_string()),
            }),
        }
    }

    /// Shell word for this path. Home-relative paths expand `$HOME` on the target.
    pub fn render(&self) -> String {
        match self {
            RemotePath::Home(rel) if rel.is_empty() => "\"$HOME\"".to_string(),
            RemotePath::Home(rel) => format!("\"$HOME\"/{}", shell_quote(rel)),
            RemotePath::Absolute(path) => shell_quote(path),
        }
    }

    /// Resolve against a local home directory (loopback hosts).
    pub fn to_local(&self, home: &Path) -> PathBuf {
        match self {
            RemotePath::Home(rel) if rel.is_empty() => home.to_path_buf(),
            RemotePath::Home(rel) => home.join(rel),
            RemotePath::Absolute(path) => PathBuf::from(path),
        }
    }
}

impl std::fmt::Display for RemotePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemotePath::Home(rel) if rel.is_empty() => f.write_str("~"),
            RemotePath::Home(rel) => write!(f, "~/{rel}"),
            RemotePath::Absolute(path) => f.write_str(path),
        }
    }
}

fn trim_segment(segment: &str) -> &str {
    segment.trim_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_distinguishes_home_and_absolute() {
        assert_eq!(RemotePath::parse("~"), RemotePath::Home(String::new()));
        assert_eq!(RemotePath::parse("~/.sf"), RemotePath::Home(".sf".to_string()));
        assert_eq!(RemotePath::parse("work/x"), RemotePath::Home("work/x".to_string()));
        assert_eq!(RemotePath::parse("/srv/sf/"), RemotePath::Absolute("/srv/sf".to_string()));
    }

    #[test]
    fn join_keeps_kind_and_normalizes_slashes() {
        let root = RemotePath::home(".sf");
        let wt = root.join("worktrees").join("/payments/").join("core");
        assert_eq!(wt.to_string(), "~/.sf/worktrees/payments/core");
        assert_eq!(wt.join_opt(None), wt);
        assert_eq!(
            RemotePath::absolute("/").join("tmp").to_string(),
            "/tmp"
        );
    }

    #[test]
    fn render_expands_home_and_quotes_the_rest() {
        assert_eq!(RemotePath::home("").render(), "\"$HOME\"");
        assert_eq!(
            RemotePath::home(".sf/it's").render(),
            "\"$HOME\"/'.sf/it'\"'\"'s'"
        );
        assert_eq!(RemotePath::absolute("/tmp/a b").render(), "'/tmp/a b'");
    }

    #[test]
    fn parent_walks_up_to_root() {
        let path = RemotePath::home(".sf/worktrees/f");
        assert_eq!(path.parent(), Some(RemotePath::home(".sf/worktrees")));
        assert_eq!(RemotePath::home(".sf").parent(), Some(RemotePath::home("")));
        assert_eq!(RemotePath::home("").parent(), None);
        assert_eq!(
            RemotePath::absolute("/tmp").parent(),
            Some(RemotePath::absolute("/"))
        );
        assert_eq!(RemotePath::absolute("/").parent(), None);
    }

    #[test]
    fn to_local_resolves_against_home() {
        let home = Path::new("/home/dev");
        assert_eq!(
            RemotePath::home(".sf/anchors").to_local(home),
            PathBuf::from("/home/dev/.sf/anchors")
        );
        assert_eq!(
            RemotePath::absolute("/tmp/x").to_local(home),
            PathBuf::from("/tmp/x")
        );
    }
}
