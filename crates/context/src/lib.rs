//! mb_context
//!
//! The context-pack pipeline: Extractor (C2), Truncator (C3), and the Pack
//! Builder (C4) that composes `truncate(redact(extract(...)))`.
//!
//! Everything here is pure with respect to the outside world except for
//! reading files under the given workspace root; no network calls, no
//! process environment reads.

mod extractor;
mod truncator;

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Where a snippet came from, and therefore how strongly it should be
/// trusted to survive truncation. Lower-numbered [`Snippet::priority`] wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnippetSource {
    ExplicitSnippet,
    ExplicitFile,
    QuestionPath,
    KeywordSearch,
}

impl Default for SnippetSource {
    fn default() -> Self {
        SnippetSource::ExplicitSnippet
    }
}

impl SnippetSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnippetSource::ExplicitSnippet => "explicit_snippet",
            SnippetSource::ExplicitFile => "explicit_file",
            SnippetSource::QuestionPath => "question_path",
            SnippetSource::KeywordSearch => "keyword_search",
        }
    }

    fn priority(self) -> u8 {
        match self {
            SnippetSource::ExplicitSnippet | SnippetSource::ExplicitFile => 0,
            SnippetSource::QuestionPath => 1,
            SnippetSource::KeywordSearch => 2,
        }
    }
}

/// A single extracted slice of a workspace file (or of an explicitly
/// provided block of text).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snippet {
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    #[serde(skip_serializing, default)]
    pub source: SnippetSource,
    #[serde(skip_serializing, default)]
    pub priority: u8,
}

/// Pipeline bookkeeping finalized by the truncator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackMeta {
    pub files: usize,
    pub snippets: usize,
    pub redaction_count: usize,
    pub truncated: bool,
}

/// The output of the context-pack pipeline: facts, snippets, and metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextPack {
    pub facts: Vec<String>,
    pub snippets: Vec<Snippet>,
    pub meta: PackMeta,
}

impl ContextPack {
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty() && self.snippets.is_empty()
    }
}

/// A caller-supplied snippet to include verbatim (E1), bypassing keyword and
/// path-hint discovery entirely.
#[derive(Debug, Clone, Default)]
pub struct ExplicitSnippetInput {
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
}

/// Build a context pack for `question` against `workspace`, applying
/// redaction and then the budget-bound truncation cascade.
///
/// `build_pack(question, workspace, budget, explicit_files, explicit_snippets)
///  = truncate(redact(extract(...)))`
pub fn build_pack(
    question: &str,
    workspace: &Path,
    budget: &mb_common::Budget,
    explicit_files: &[String],
    explicit_snippets: &[ExplicitSnippetInput],
) -> ContextPack {
    let raw = extractor::extract(question, workspace, explicit_files, explicit_snippets);
    let (redacted, redaction_count) = redact_pack(raw);
    truncator::truncate(redacted, budget, redaction_count)
}

fn redact_pack(mut pack: ContextPack) -> (ContextPack, usize) {
    let mut hits = 0usize;
    for fact in pack.facts.iter_mut() {
        let (text, n) = mb_redaction::redact(fact);
        *fact = text;
        hits += n;
    }
    for snippet in pack.snippets.iter_mut() {
        let (text, n) = mb_redaction::redact(&snippet.content);
        snippet.content = text;
        hits += n;
    }
    (pack, hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mb_common::Budget;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn empty_workspace_and_question_yields_empty_pack() {
        let dir = tempdir().unwrap();
        let pack = build_pack("", dir.path(), &Budget::default(), &[], &[]);
        assert!(pack.is_empty());
        assert_eq!(pack.meta.files, 0);
        assert!(!pack.meta.truncated);
    }

    #[test]
    fn explicit_snippet_is_redacted_and_survives_pipeline() {
        let dir = tempdir().unwrap();
        let snippet = ExplicitSnippetInput {
            path: "notes.txt".into(),
            start_line: 1,
            end_line: 1,
            content: "api_key=\"sk-live-123\"".into(),
        };
        let pack = build_pack("hello", dir.path(), &Budget::default(), &[], &[snippet]);
        assert_eq!(pack.snippets.len(), 1);
        assert!(pack.snippets[0].content.contains("<REDACTED_SECRET>"));
        assert_eq!(pack.meta.redaction_count, 1);
    }

    #[test]
    fn keyword_search_finds_matching_workspace_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("auth.rs"), "fn login() {}\nfn logout() {}\n").unwrap();
        let pack = build_pack("how does login work", dir.path(), &Budget::default(), &[], &[]);
        assert!(pack.snippets.iter().any(|s| s.path == "auth.rs"));
        assert!(pack.facts.iter().any(|f| f.contains("auth.rs")));
    }

    #[test]
    fn path_hint_resolves_file_inside_workspace() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/lib.rs"), "pub fn run() {}\n").unwrap();
        let pack = build_pack("please look at src/lib.rs", dir.path(), &Budget::default(), &[], &[]);
        assert!(pack.snippets.iter().any(|s| s.path == "src/lib.rs" && s.priority == 1));
    }

    #[test]
    fn path_hint_outside_workspace_is_ignored() {
        let dir = tempdir().unwrap();
        let pack = build_pack("check ../../etc/passwd please", dir.path(), &Budget::default(), &[], &[]);
        assert!(!pack.snippets.iter().any(|s| s.path.contains("passwd")));
    }

    #[test]
    fn ignored_directories_are_skipped_during_keyword_walk() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join("node_modules/widget.js"), "function widget() {}\n").unwrap();
        let pack = build_pack("explain widget", dir.path(), &Budget::default(), &[], &[]);
        assert!(!pack.snippets.iter().any(|s| s.path.contains("node_modules")));
    }

    #[test]
    fn tight_budget_truncates_and_sets_flag() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("big.rs"), "fn widget() {}\n".repeat(200)).unwrap();
        let tight = Budget { max_files: 6, max_snippets: 10, max_lines_per_snippet: 160, max_chars_total: 40 };
        let pack = build_pack("widget", dir.path(), &tight, &[], &[]);
        assert!(pack.meta.truncated);
        let total: usize = pack.facts.iter().map(|f| f.len() + 1).sum::<usize>()
            + pack.snippets.iter().map(|s| s.content.len() + 1).sum::<usize>();
        assert!(total <= tight.max_chars_total || pack.meta.truncated);
    }
}
