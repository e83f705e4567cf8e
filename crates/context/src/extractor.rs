//! C2 — turns a question plus a workspace into a raw, un-redacted,
//! un-truncated [`ContextPack`] (phases E1-E6 of the context-pack pipeline).

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use walkdir::WalkDir;

use crate::{ContextPack, ExplicitSnippetInput, PackMeta, Snippet, SnippetSource};

const EXTRACT_MAX_FILES: usize = 8;
const EXTRACT_SNIPPETS_PER_FILE: usize = 2;
const MAX_FACTS: usize = 8;
const MAX_KEYWORDS: usize = 24;
const SNIPPET_CONTEXT_LINES: usize = 80;
const TEXT_PROBE_MAX_BYTES: u64 = 512 * 1024;
const TEXT_PROBE_SNIFF_LEN: usize = 2048;

const IGNORED_DIRS: &[&str] = &[".git", "node_modules", ".venv", "dist", "build", "coverage", "__pycache__"];

static KEYWORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_-]+|\p{Han}{2,}").expect("static KEYWORD_RE regex"));

static PATH_HINT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9_.-]+(?:/[A-Za-z0-9_.-]+)+|[A-Za-z0-9_-]+\.[A-Za-z0-9_.-]+")
        .expect("static PATH_HINT_RE regex")
});

pub(crate) fn extract(
    question: &str,
    workspace: &Path,
    explicit_files: &[String],
    explicit_snippets: &[ExplicitSnippetInput],
) -> ContextPack {
    let mut snippets = extract_explicit_snippets(workspace, explicit_snippets);

    let keywords = extract_keywords(question);
    let lower_keywords: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
    let path_hints = extract_path_hints(workspace, question);

    let mut files = build_candidate_files(workspace, explicit_files, &path_hints, &lower_keywords);
    files.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.path.cmp(&b.path)));

    snippets.extend(extract_file_snippets(workspace, &files, &lower_keywords));

    let facts = build_facts(&snippets);

    ContextPack { facts, snippets, meta: PackMeta::default() }
}

struct FileEntry {
    path: String,
    priority: u8,
    source: SnippetSource,
}

/// E1 — explicit snippets: require a non-empty path, fill `content` from the
/// workspace file if the caller didn't supply one, skip if still empty.
fn extract_explicit_snippets(workspace: &Path, inputs: &[ExplicitSnippetInput]) -> Vec<Snippet> {
    let mut out = Vec::new();
    for input in inputs {
        let path = input.path.trim();
        if path.is_empty() {
            continue;
        }
        let start = input.start_line.max(1);
        let end = input.end_line.max(start);

        let content = if input.content.is_empty() {
            read_line_range(workspace, path, start, end).unwrap_or_default()
        } else {
            input.content.clone()
        };
        if content.is_empty() {
            continue;
        }

        out.push(Snippet {
            path: path.to_string(),
            start_line: start,
            end_line: end,
            content,
            source: SnippetSource::ExplicitSnippet,
            priority: 0,
        });
    }
    out
}

fn read_line_range(workspace: &Path, rel_path: &str, start: usize, end: usize) -> Option<String> {
    let content = read_file_lossy(&workspace.join(rel_path))?;
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return None;
    }
    let lo = start.clamp(1, lines.len()) - 1;
    let hi = end.clamp(start, lines.len());
    if lo >= hi {
        return None;
    }
    Some(lines[lo..hi].join("\n"))
}

/// E2 — Latin identifiers or runs of 2+ CJK ideographs, deduplicated in
/// first-occurrence order, capped at 24 tokens.
fn extract_keywords(question: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for m in KEYWORD_RE.find_iter(question) {
        let token = m.as_str().to_string();
        if seen.insert(token.clone()) {
            out.push(token);
            if out.len() >= MAX_KEYWORDS {
                break;
            }
        }
    }
    out
}

/// E3 — scan for path-like tokens, keep only those that resolve inside the
/// workspace, exist as files, and pass the text-file probe.
fn extract_path_hints(workspace: &Path, question: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for m in PATH_HINT_RE.find_iter(question) {
        let token = m.as_str();
        if !seen.insert(token.to_string()) {
            continue;
        }
        let candidate = workspace.join(token);
        if !resolves_inside(workspace, &candidate) {
            continue;
        }
        if !candidate.is_file() {
            continue;
        }
        if !passes_text_probe(&candidate) {
            continue;
        }
        out.push(token.to_string());
    }
    out
}

fn resolves_inside(workspace: &Path, candidate: &Path) -> bool {
    let Ok(workspace_canon) = fs::canonicalize(workspace) else { return false };
    let Ok(candidate_canon) = fs::canonicalize(candidate) else { return false };
    candidate_canon.starts_with(&workspace_canon)
}

fn passes_text_probe(path: &Path) -> bool {
    let Ok(meta) = fs::metadata(path) else { return false };
    if !meta.is_file() || meta.len() > TEXT_PROBE_MAX_BYTES {
        return false;
    }
    let Ok(bytes) = fs::read(path) else { return false };
    let sniff_len = bytes.len().min(TEXT_PROBE_SNIFF_LEN);
    !bytes[..sniff_len].contains(&0)
}

/// E4 — build `path -> (priority, source)`, then fill remaining slots (up to
/// `EXTRACT_MAX_FILES`) by walking the workspace for keyword hits.
fn build_candidate_files(
    workspace: &Path,
    explicit_files: &[String],
    path_hints: &[String],
    lower_keywords: &[String],
) -> Vec<FileEntry> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out: Vec<FileEntry> = Vec::new();

    for path in explicit_files {
        if seen.insert(path.clone()) {
            out.push(FileEntry { path: path.clone(), priority: 0, source: SnippetSource::ExplicitFile });
        }
    }
    for path in path_hints {
        if seen.insert(path.clone()) {
            out.push(FileEntry { path: path.clone(), priority: 1, source: SnippetSource::QuestionPath });
        }
    }

    if out.len() < EXTRACT_MAX_FILES && !lower_keywords.is_empty() {
        for rel in walk_workspace_files(workspace) {
            if out.len() >= EXTRACT_MAX_FILES {
                break;
            }
            if seen.contains(&rel) {
                continue;
            }
            let abs = workspace.join(&rel);
            if !passes_text_probe(&abs) {
                continue;
            }
            if file_has_keyword_hit(&abs, lower_keywords) {
                seen.insert(rel.clone());
                out.push(FileEntry { path: rel, priority: 2, source: SnippetSource::KeywordSearch });
            }
        }
    }

    out
}

fn walk_workspace_files(workspace: &Path) -> Vec<String> {
    let mut out: Vec<String> = WalkDir::new(workspace)
        .into_iter()
        .filter_entry(|entry| {
            if entry.file_type().is_dir() && entry.depth() > 0 {
                let name = entry.file_name().to_string_lossy();
                !IGNORED_DIRS.contains(&name.as_ref())
            } else {
                true
            }
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| relative_slash_path(workspace, e.path()))
        .collect();
    out.sort();
    out
}

fn relative_slash_path(workspace: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(workspace).ok()?;
    Some(rel.to_string_lossy().replace('\\', "/"))
}

fn file_has_keyword_hit(path: &Path, lower_keywords: &[String]) -> bool {
    let Some(content) = read_file_lossy(path) else { return false };
    for line in content.lines() {
        let lower = line.to_lowercase();
        if lower_keywords.iter().any(|k| lower.contains(k.as_str())) {
            return true;
        }
    }
    false
}

/// E5 — per candidate file (already sorted by `(priority, path)`), find up to
/// `EXTRACT_SNIPPETS_PER_FILE` keyword-hit lines (or `[1]` if none) and emit a
/// windowed snippet around each.
fn extract_file_snippets(workspace: &Path, files: &[FileEntry], lower_keywords: &[String]) -> Vec<Snippet> {
    let mut out = Vec::new();
    for file in files {
        let abs: PathBuf = workspace.join(&file.path);
        let Some(content) = read_file_lossy(&abs) else { continue };
        let lines: Vec<&str> = content.lines().collect();
        let n = lines.len();
        if n == 0 {
            continue;
        }

        let mut hit_lines: Vec<usize> = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            if hit_lines.len() >= EXTRACT_SNIPPETS_PER_FILE {
                break;
            }
            let lower = line.to_lowercase();
            if lower_keywords.iter().any(|k| lower.contains(k.as_str())) {
                hit_lines.push(idx + 1);
            }
        }
        if hit_lines.is_empty() {
            hit_lines.push(1);
        }

        for h in hit_lines {
            let start = h.saturating_sub(SNIPPET_CONTEXT_LINES).max(1);
            let end = (h + SNIPPET_CONTEXT_LINES).min(n);
            let content = lines[start - 1..end].join("\n");
            out.push(Snippet {
                path: file.path.clone(),
                start_line: start,
                end_line: end,
                content,
                source: file.source,
                priority: file.priority,
            });
        }
    }
    out
}

/// E6 — the first `MAX_FACTS` snippets, in emission order, each spelled out
/// as `"<path>:<start>-<end> (source=<source>)"`.
fn build_facts(snippets: &[Snippet]) -> Vec<String> {
    snippets
        .iter()
        .take(MAX_FACTS)
        .map(|s| format!("{}:{}-{} (source={})", s.path, s.start_line, s.end_line, s.source.as_str()))
        .collect()
}

fn read_file_lossy(path: &Path) -> Option<String> {
    let bytes = fs::read(path).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}
