//! Body cleanup before analysis: quote stripping, disclaimer and
//! signature removal, whitespace collapse, link extraction.
//!
//! Pure string processing. Cleaning never fails; empty input stays empty.

use std::sync::LazyLock;

use regex::Regex;

/// Maximum number of links kept per message.
pub const MAX_LINKS: usize = 5;

/// Boilerplate removed from bodies. Each pattern is replaced with a blank line.
static BOILERPLATE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Institutional disclaimers
        r"(?is)Disclaimer:.*?without reading (them|it)\.",
        // Confidentiality notices run to the next blank line
        r"(?is)This (e-?mail|message) and any files transmitted with it are confidential.*?(\n\n|\z)",
        r"(?is)CONFIDENTIALITY NOTICE:.*?(\n\n|\z)",
        // Unsubscribe footers
        r"(?is)(click here )?to unsubscribe.*?(\n\n|\z)",
        // Mobile signatures
        r"(?i)Sent from my (iPhone|iPad|Android)[^\n]*",
        r"(?i)Get Outlook for[^\n]*",
        // Sign-off blocks: everything from the closing salutation down
        r"(?is)\b(best|kind|warm|with|thanks\s*&?\s*) regards,?\s*[\r\n]+.*\z",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static MANY_NEWLINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());
static MANY_SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]{2,}").unwrap());
static LEADING_SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^[ \t]+").unwrap());
static RULE_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n[-=_]{3,}\n").unwrap());

static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>"')\]]+"#).unwrap());
static UNINTERESTING_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(unsubscribe|privacy|terms|facebook\.com|twitter\.com|linkedin\.com|instagram\.com)",
    )
    .unwrap()
});

/// A body ready for the oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedBody {
    pub text: String,
    pub links: Vec<String>,
}

/// Extract links from the raw body, then clean it.
pub fn prepare_body(raw: &str) -> PreparedBody {
    PreparedBody {
        links: extract_links(raw),
        text: clean_body(raw),
    }
}

/// Remove quoted replies, boilerplate and excess whitespace.
pub fn clean_body(body: &str) -> String {
    if body.trim().is_empty() {
        return String::new();
    }

    let mut cleaned = strip_quoted_text(&body.replace("\r\n", "\n"));
    for pattern in BOILERPLATE.iter() {
        cleaned = pattern.replace_all(&cleaned, "\n\n").into_owned();
    }

    let cleaned = RULE_LINES.replace_all(&cleaned, "\n");
    let cleaned = LEADING_SPACES.replace_all(&cleaned, "");
    let cleaned = MANY_SPACES.replace_all(&cleaned, " ");
    let cleaned = MANY_NEWLINES.replace_all(&cleaned, "\n\n");
    cleaned.trim().to_string()
}

/// Up to [`MAX_LINKS`] distinct http(s) links, skipping unsubscribe,
/// legal and social-media links.
pub fn extract_links(body: &str) -> Vec<String> {
    let mut links: Vec<String> = Vec::new();
    for m in URL.find_iter(body) {
        let link = m.as_str().trim_end_matches(['.', ',', ';']);
        if UNINTERESTING_LINK.is_match(link) || links.iter().any(|l| l == link) {
            continue;
        }
        links.push(link.to_string());
        if links.len() == MAX_LINKS {
            break;
        }
    }
    links
}

/// Strip quoted text from an email body.
///
/// Removes lines starting with `>` and everything after an
/// "On ... wrote:" attribution or an "Original Message" separator.
pub fn strip_quoted_text(body: &str) -> String {
    let mut result = Vec::new();

    for line in body.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with('>') {
            continue;
        }

        if trimmed.starts_with("On ") && trimmed.ends_with("wrote:") {
            break;
        }

        if trimmed.starts_with("---") && trimmed.contains("Original Message") {
            break;
        }

        result.push(line);
    }

    while result.last().is_some_and(|l| l.trim().is_empty()) {
        result.pop();
    }

    result.join("\n")
}

/// Strip HTML tags from content (basic) and normalize whitespace.
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Single-line preview of a body, at most `max_chars` characters.
pub fn snippet(body: &str, max_chars: usize) -> String {
    let collapsed = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let mut out: String = collapsed.chars().take(max_chars).collect();
    out.push('…');
    out
}
