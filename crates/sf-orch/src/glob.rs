//! Path globs for selecting worktree files.
//!
//! Patterns are matched segment by segment. `*` and `?` stay inside one
//! segment, and a segment that is exactly `**` spans any number of segments,
//! including none. A pattern starting with `/` must match the whole path; any
//! other pattern matches the trailing segments of a path.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl PathFilter {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty()
    }

    pub fn matches(&self, path: &str) -> bool {
        let path = normalize_path(path);
        if path.is_empty() {
            return false;
        }
        self.include
            .iter()
            .any(|pattern| pattern_matches(pattern, &path))
            && !self
                .exclude
                .iter()
                .any(|pattern| pattern_matches(pattern, &path))
    }

    /// Matching paths from a `find` listing, leading `./` stripped, sorted.
    pub fn select<'a, I>(&self, listing: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut selected: Vec<String> = listing
            .into_iter()
            .map(normalize_path)
            .filter(|path| self.matches(path))
            .collect();
        selected.sort();
        selected.dedup();
        selected
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches(['\r', '\n']);
    trimmed.strip_prefix("./").unwrap_or(trimmed).to_string()
}

pub fn pattern_matches(raw_pattern: &str, path: &str) -> bool {
    let raw_pattern = raw_pattern.trim();
    let anchored = raw_pattern.starts_with('/');
    let pattern = raw_pattern.trim_matches('/');
    if pattern.is_empty() {
        return false;
    }

    let pattern: Vec<&str> = pattern.split('/').collect();
    let segments: Vec<&str> = path.split('/').collect();
    if anchored {
        return segments_match(&pattern, &segments);
    }
    (0..segments.len()).any(|start| segments_match(&pattern, &segments[start..]))
}

/// A `**` segment absorbs zero or more path segments; any other pattern
/// segment consumes exactly one.
fn segments_match(pattern: &[&str], segments: &[&str]) -> bool {
    match pattern.split_first() {
        None => segments.is_empty(),
        Some((&"**", rest)) => {
            (0..=segments.len()).any(|skip| segments_match(rest, &segments[skip..]))
        }
        Some((head, rest)) => match segments.split_first() {
            Some((segment, remaining)) => {
                segment_match(head, segment) && segments_match(rest, remaining)
            }
            None => false,
        },
    }
}

/// Wildcard match of a single segment. On a mismatch the most recent `*`
/// takes one more character and matching resumes after it.
pub fn segment_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < text.len() {
        match pattern.get(pi).copied() {
            Some('*') => {
                backtrack = Some((pi, ti));
                pi += 1;
            }
            Some(token) if token == '?' || token == text[ti] => {
                pi += 1;
                ti += 1;
            }
            _ => match backtrack {
                Some((star, taken)) => {
                    backtrack = Some((star, taken + 1));
                    pi = star + 1;
                    ti = taken + 1;
                }
                None => return false,
            },
        }
    }
    pattern[pi..].iter().all(|token| *token == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(include: &[&str], exclude: &[&str]) -> PathFilter {
        PathFilter::new(
            include.iter().map(|s| s.to_string()).collect(),
            exclude.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn star_matches_within_segment_at_any_depth() {
        assert!(pattern_matches("*.md", "a.md"));
        assert!(pattern_matches("*.md", "sub/c.md"));
        assert!(!pattern_matches("*.md", "a.md.txt"));
        assert!(!pattern_matches("*.md", "sub.md/c.txt"));
    }

    #[test]
    fn multi_segment_patterns_match_trailing_segments() {
        assert!(pattern_matches("docs/*.md", "docs/a.md"));
        assert!(pattern_matches("docs/*.md", "x/docs/a.md"));
        assert!(!pattern_matches("docs/*.md", "docs/sub/a.md"));
        assert!(!pattern_matches("docs/*.md", "mydocs/a.md"));
    }

    #[test]
    fn anchored_patterns_match_from_root_only() {
        assert!(pattern_matches("/README.md", "README.md"));
        assert!(!pattern_matches("/README.md", "sub/README.md"));
        assert!(pattern_matches("README.md", "sub/README.md"));
    }

    #[test]
    fn double_star_spans_segments() {
        assert!(pattern_matches("src/**/*.rs", "src/main.rs"));
        assert!(pattern_matches("src/**/*.rs", "src/a/b/lib.rs"));
        assert!(pattern_matches("**/fixtures/*", "tests/fixtures/x.json"));
        assert!(pattern_matches("**/fixtures/*", "fixtures/x.json"));
        assert!(!pattern_matches("src/**/*.rs", "src/a/b/lib.py"));
    }

    #[test]
    fn segment_wildcards_backtrack() {
        assert!(segment_match("*.test.*", "a.test.rs"));
        assert!(segment_match("a*b*c", "aXbYbZc"));
        assert!(segment_match("**", "anything"));
        assert!(segment_match("", ""));
        assert!(!segment_match("a*b", "acd"));
        assert!(!segment_match("?", ""));
        assert!(pattern_matches("src/**", "src/a/b.rs"));
        assert!(!pattern_matches("src/**/x", "srcx"));
    }

    #[test]
    fn question_mark_does_not_cross_slash() {
        assert!(pattern_matches("a?c", "abc"));
        assert!(!pattern_matches("a?c", "a/c"));
    }

    #[test]
    fn select_strips_dot_slash_filters_and_sorts() {
        let listing = "./z.md\n./a.md\n./a.md.txt\n./sub/c.md\n./skip/d.md\n./src/x.rs\n";
        let selected = filter(&["*.md"], &["skip/*"]).select(listing.lines());
        assert_eq!(selected, vec!["a.md", "sub/c.md", "z.md"]);
    }

    #[test]
    fn empty_include_selects_nothing() {
        let f = filter(&[], &[]);
        assert!(f.is_empty());
        assert!(f.select(["./a.md"]).is_empty());
    }
}
