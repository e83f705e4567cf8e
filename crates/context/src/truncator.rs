//! C3 — enforces file/snippet/line/character budgets, in priority order,
//! over an already-redacted [`ContextPack`].

use std::collections::HashSet;

use mb_common::Budget;

use crate::{ContextPack, PackMeta, Snippet};

pub(crate) fn truncate(mut pack: ContextPack, budget: &Budget, redaction_count: usize) -> ContextPack {
    let mut truncated = false;

    // 1. Sort snippets by (priority asc, path asc, start_line asc).
    pack.snippets.sort_by(|a, b| {
        a.priority.cmp(&b.priority).then_with(|| a.path.cmp(&b.path)).then_with(|| a.start_line.cmp(&b.start_line))
    });

    // 2. File cap.
    let mut distinct_paths: Vec<String> = Vec::new();
    for snippet in &pack.snippets {
        if !distinct_paths.contains(&snippet.path) {
            distinct_paths.push(snippet.path.clone());
        }
    }
    if distinct_paths.len() > budget.max_files {
        truncated = true;
    }
    let kept_paths: HashSet<String> = distinct_paths.into_iter().take(budget.max_files).collect();
    pack.snippets.retain(|s| kept_paths.contains(&s.path));

    // 3. Snippet cap.
    if pack.snippets.len() > budget.max_snippets {
        truncated = true;
        pack.snippets.truncate(budget.max_snippets);
    }

    // 4. Line cap.
    for snippet in pack.snippets.iter_mut() {
        let line_count = snippet.content.lines().count().max(1);
        if line_count > budget.max_lines_per_snippet {
            truncated = true;
            let kept: Vec<&str> = snippet.content.lines().take(budget.max_lines_per_snippet).collect();
            snippet.content = kept.join("\n");
            snippet.end_line = snippet.start_line + budget.max_lines_per_snippet - 1;
        }
    }

    // 5. Character cap.
    let mut remain = budget.max_chars_total as i64;
    let mut kept_facts: Vec<String> = Vec::new();
    for fact in pack.facts.iter() {
        let cost = char_len(fact) as i64 + 1;
        if cost <= remain {
            kept_facts.push(fact.clone());
            remain -= cost;
        } else {
            if remain > 1 {
                kept_facts.push(format!("{}…", take_chars(fact, (remain - 1) as usize)));
            }
            remain = 0;
            truncated = true;
            break;
        }
    }

    let mut kept_snippets: Vec<Snippet> = Vec::new();
    for snippet in pack.snippets.into_iter() {
        let cost = char_len(&snippet.content) as i64 + 1;
        if cost <= remain {
            remain -= cost;
            kept_snippets.push(snippet);
            continue;
        }
        if remain > 1 {
            let cut = take_chars(&snippet.content, (remain - 1) as usize);
            let lines_of_cut = cut.lines().count().max(1);
            let mut truncated_snippet = snippet;
            truncated_snippet.end_line = truncated_snippet.start_line + lines_of_cut - 1;
            truncated_snippet.content = format!("{cut}…");
            kept_snippets.push(truncated_snippet);
        }
        truncated = true;
        break;
    }

    pack.facts = kept_facts;
    pack.snippets = kept_snippets;

    let distinct_final: HashSet<&str> = pack.snippets.iter().map(|s| s.path.as_str()).collect();
    pack.meta = PackMeta {
        files: distinct_final.len(),
        snippets: pack.snippets.len(),
        redaction_count,
        truncated,
    };
    pack
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn take_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}
