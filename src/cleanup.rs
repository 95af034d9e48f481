use log::warn;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::settings::Keys;
use crate::storage::SettingsStore;

/// A user-supplied pattern stripped from every sampled chat message.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CleanupPattern {
    pub pattern: String,
    #[serde(default)]
    pub enabled: bool,
}

impl CleanupPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            enabled: true,
        }
    }
}

// `<tag>...</tag>` with matching ASCII word-character names and no newline in between.
fn tag_pair_name(pattern: &str) -> Option<&str> {
    let rest = pattern.strip_prefix('<')?;
    let end = rest.find('>')?;
    let name = &rest[..end];
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    let closing = format!("</{name}>");
    let inner = rest[end + 1..].strip_suffix(closing.as_str())?;
    if inner.contains('\n') {
        return None;
    }
    Some(name)
}

/// Compile one pattern. A bare tag pair such as `<think></think>` expands to
/// "anything between those tags, lazily, across lines"; everything else is
/// used as a regular expression.
///
/// Patterns use the `regex` crate dialect: lookaround and backreferences are
/// rejected, so patterns relying on them fail here and get skipped.
pub fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    match tag_pair_name(pattern) {
        Some(tag) => Regex::new(&format!("(?s)<{tag}>.*?</{tag}>")),
        None => Regex::new(pattern),
    }
}

/// Compile the enabled patterns in list order, skipping invalid ones.
pub fn compile_enabled(patterns: &[CleanupPattern]) -> Vec<Regex> {
    patterns
        .iter()
        .filter(|p| p.enabled)
        .filter_map(|p| match compile_pattern(&p.pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!("Skipping invalid cleanup pattern {:?}: {}", p.pattern, e);
                None
            }
        })
        .collect()
}

pub fn apply_compiled(text: &str, compiled: &[Regex]) -> String {
    let mut text = text.to_string();
    for regex in compiled {
        text = regex.replace_all(&text, "").into_owned();
    }
    text.trim().to_string()
}

/// Remove every match of every enabled pattern, in order, then trim.
pub fn apply_cleanup(text: &str, patterns: &[CleanupPattern]) -> String {
    apply_compiled(text, &compile_enabled(patterns))
}

/// The persisted, ordered pattern list of one instance.
pub struct PatternList {
    store: SettingsStore,
    key: String,
    patterns: Vec<CleanupPattern>,
}

impl PatternList {
    pub fn load(store: SettingsStore, keys: &Keys) -> Self {
        let key = keys.regex_list();
        let patterns = store.get_or_default(&key);
        Self {
            store,
            key,
            patterns,
        }
    }

    pub fn patterns(&self) -> &[CleanupPattern] {
        &self.patterns
    }

    fn persist(&self) {
        self.store.set(&self.key, &self.patterns);
    }

    /// Append an enabled pattern. Blank input is ignored.
    pub fn add(&mut self, pattern: &str) -> bool {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return false;
        }
        self.patterns.push(CleanupPattern::new(pattern));
        self.persist();
        true
    }

    pub fn edit(&mut self, index: usize, pattern: &str) -> bool {
        match self.patterns.get_mut(index) {
            Some(existing) => {
                existing.pattern = pattern.to_string();
                self.persist();
                true
            }
            None => false,
        }
    }

    pub fn set_enabled(&mut self, index: usize, enabled: bool) -> bool {
        match self.patterns.get_mut(index) {
            Some(existing) => {
                existing.enabled = enabled;
                self.persist();
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, index: usize) -> Option<CleanupPattern> {
        if index >= self.patterns.len() {
            return None;
        }
        let removed = self.patterns.remove(index);
        self.persist();
        Some(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_pair_removes_content_between_tags() {
        let patterns = vec![CleanupPattern::new("<road></road>")];
        let cleaned = apply_cleanup("go <road>home</road> now", &patterns);
        assert!(!cleaned.contains("home"));
        assert!(!cleaned.contains("<road>"));
        assert_eq!(cleaned, "go  now");
    }

    #[test]
    fn tag_pair_spans_lines_and_is_lazy() {
        let patterns = vec![CleanupPattern::new("<think>x</think>")];
        let text = "<think>a\nb</think>keep<think>c</think> end";
        assert_eq!(apply_cleanup(text, &patterns), "keep end");
    }

    #[test]
    fn mismatched_tags_are_a_plain_regex() {
        assert_eq!(tag_pair_name("<a></b>"), None);
        assert_eq!(tag_pair_name("<a-b></a-b>"), None);
        assert_eq!(tag_pair_name("<status>x</status>"), Some("status"));
        // Used literally, so only the exact text is removed.
        let patterns = vec![CleanupPattern::new("<a></b>")];
        assert_eq!(apply_cleanup("x<a></b>y <a>z</a>", &patterns), "xy <a>z</a>");
    }

    #[test]
    fn lookaround_patterns_are_skipped() {
        assert!(compile_pattern(r"foo(?=bar)").is_err());
        assert!(compile_pattern(r"(a)\1").is_err());
        let patterns = vec![
            CleanupPattern::new(r"\[(?!keep)[^\]]*\]"),
            CleanupPattern::new(r"\s*tail"),
        ];
        assert_eq!(apply_cleanup("[x] tail", &patterns), "[x]");
    }

    #[test]
    fn patterns_apply_in_order_and_skip_disabled() {
        let patterns = vec![
            CleanupPattern::new("ab"),
            CleanupPattern {
                pattern: "c".into(),
                enabled: false,
            },
            CleanupPattern::new("a"),
        ];
        // "ab" first leaves "c a", then "a" removes the remaining a.
        assert_eq!(apply_cleanup("abc a", &patterns), "c");
    }

    #[test]
    fn invalid_patterns_are_skipped() {
        let patterns = vec![CleanupPattern::new("(unclosed"), CleanupPattern::new("x")];
        assert_eq!(compile_enabled(&patterns).len(), 1);
        assert_eq!(apply_cleanup(" xyx ", &patterns), "y");
    }

    #[test]
    fn cleanup_is_idempotent() {
        let patterns = vec![
            CleanupPattern::new("<think></think>"),
            CleanupPattern::new(r"\[OOC:[^\]]*\]"),
        ];
        let text = "  <think>plan</think> Hello [OOC: note] world  ";
        let once = apply_cleanup(text, &patterns);
        assert_eq!(apply_cleanup(&once, &patterns), once);
    }

    #[test]
    fn pattern_list_persists_changes() {
        let store = SettingsStore::in_memory();
        let keys = Keys::default();
        let mut list = PatternList::load(store.clone(), &keys);
        assert!(!list.add("   "));
        assert!(list.add(" <think></think> "));
        assert!(list.add("foo"));
        assert!(list.set_enabled(1, false));
        assert!(list.edit(0, "<status></status>"));
        assert!(!list.edit(5, "x"));

        let reloaded = PatternList::load(store.clone(), &keys);
        assert_eq!(
            reloaded.patterns(),
            &[
                CleanupPattern::new("<status></status>"),
                CleanupPattern {
                    pattern: "foo".into(),
                    enabled: false
                },
            ]
        );

        let mut list = reloaded;
        assert_eq!(list.remove(0).unwrap().pattern, "<status></status>");
        assert!(list.remove(3).is_none());
        assert_eq!(PatternList::load(store, &keys).patterns().len(), 1);
    }
}
