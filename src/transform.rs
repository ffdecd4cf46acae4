//! Content rewriting for Z.AI's reasoning markup.
//!
//! The upstream model wraps its chain of thought in HTML `<details>`
//! blocks with a `<summary>` caption. Depending on configuration the proxy
//! either strips that content entirely or rewrites it to the `<think>`
//! tags downstream tooling expects.

use regex::Regex;
use std::sync::LazyLock;

static DETAILS_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<details[^>]*>.*?</details>").unwrap());
static DETAILS_OPEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<details[^>]*>").unwrap());
static SUMMARY_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<summary>.*?</summary>").unwrap());
static ANSWER_START: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*[A-Z0-9]").unwrap());

/// Remove thinking content from an aggregated completion.
///
/// Closed `<details>` blocks disappear wholesale. An unclosed block is cut
/// up to where the answer resumes (a capitalized or numeric line), or to
/// the end of the content when no answer follows.
pub fn strip_thinking(content: &str) -> String {
    let content = DETAILS_BLOCK.replace_all(content, "");
    let content = match content.find("<details") {
        Some(start) => match ANSWER_START.find(&content[start..]) {
            Some(answer) => {
                let resume = start + answer.start();
                format!("{}{}", &content[..start], &content[resume..])
            }
            None => content[..start].to_string(),
        },
        None => content.into_owned(),
    };
    content.trim().to_string()
}

/// Rewrite `<details>` markup to `<think>` tags, dropping `<summary>`
/// captions. Suitable for aggregated content; closes an unterminated
/// `<think>` at the boundary where the answer begins.
pub fn rewrite_think_tags(content: &str) -> String {
    let content = DETAILS_OPEN.replace_all(content, "<think>");
    let content = content.replace("</details>", "</think>");
    let mut content = SUMMARY_BLOCK.replace_all(&content, "").into_owned();

    if let Some(think_start) = content.find("<think>")
        && !content.contains("</think>")
    {
        match ANSWER_START.find(&content[think_start..]) {
            Some(answer) => {
                let insert_at = think_start + answer.start();
                content.insert_str(insert_at, "</think>\n");
            }
            None => content.push_str("</think>"),
        }
    }

    content.trim().to_string()
}

/// Per-delta rewrite for streaming: tag replacement only, no boundary
/// repair (a delta rarely contains the whole block).
pub fn rewrite_think_tags_streaming(delta: &str) -> String {
    let delta = DETAILS_OPEN.replace_all(delta, "<think>");
    delta.replace("</details>", "</think>")
}
