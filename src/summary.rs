//! Short-text summaries for length-constrained delivery channels.

use regex::Regex;
use std::sync::LazyLock;

pub const DEFAULT_SUMMARY_LENGTH: usize = 150;
pub const DEFAULT_CHUNK_LENGTH: usize = 160;
const KEY_CONTENT_WORDS: usize = 15;
const SHORT_BRANCH_LENGTH: usize = 20;

static COMPLETION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:done|completed|finished|created|added|updated|fixed)\b|\bsuccess").unwrap()
});

static CODE_BLOCK_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"```[\s\S]*?```").unwrap());

static SENTENCE_END_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?]+").unwrap());

/// What a coding request produced, as fed to [`SummaryGenerator::coding_summary`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CodingReport<'a> {
    pub repository: &'a str,
    pub response: &'a str,
    pub branch: Option<&'a str>,
    pub files_changed: usize,
    pub response_id: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct SummaryGenerator {
    max_length: usize,
    base_url: Option<String>,
}

impl Default for SummaryGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_SUMMARY_LENGTH, None)
    }
}

impl SummaryGenerator {
    pub fn new(max_length: usize, base_url: Option<String>) -> Self {
        Self {
            max_length,
            base_url: base_url.map(|url| url.trim_end_matches('/').to_string()),
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// One-line summary of a coding request. The repository name and branch
    /// lead so they survive truncation.
    pub fn coding_summary(&self, report: &CodingReport<'_>) -> String {
        let mut parts = vec![format!("[{}]", report.repository)];
        parts.push(if indicates_completion(report.response) {
            "✓ Done!".to_string()
        } else {
            "Response:".to_string()
        });

        let mut details = Vec::new();
        if report.files_changed > 0 {
            details.push(format!(
                "Modified {} file{}",
                report.files_changed,
                if report.files_changed == 1 { "" } else { "s" }
            ));
        }
        if let Some(branch) = report.branch {
            details.push(format!("Branch: {}", branch));
        }
        if !details.is_empty() {
            parts.push(format!("{}.", details.join(". ")));
        }

        let content = extract_key_content(report.response, KEY_CONTENT_WORDS);
        if !content.is_empty() {
            parts.push(content);
        }

        if let (Some(id), Some(base)) = (report.response_id, self.base_url.as_deref()) {
            parts.push(format!("Full: {}/response/{}", base, id));
        } else if let Some(id) = report.response_id {
            parts.push(format!("FULL {}", id));
        }

        truncate(&parts.join(" "), self.max_length)
    }

    pub fn status_summary(
        &self,
        current_branch: Option<&str>,
        session_active: bool,
        message_count: usize,
    ) -> String {
        let mut parts = vec![if session_active {
            format!("Session active ({} msgs)", message_count)
        } else {
            "No active session".to_string()
        }];
        if let Some(branch) = current_branch {
            parts.push(format!("Branch: {}", shorten_branch(branch)));
        }
        format!("{}.", parts.join(". "))
    }
}

pub fn indicates_completion(response: &str) -> bool {
    COMPLETION_REGEX.is_match(response)
}

/// First sentence longer than 20 characters, capped at `max_words`.
pub fn extract_key_content(response: &str, max_words: usize) -> String {
    let without_code = CODE_BLOCK_REGEX.replace_all(response, "[code]");

    for sentence in SENTENCE_END_REGEX.split(&without_code) {
        let words: Vec<&str> = sentence.split_whitespace().collect();
        if words.join(" ").chars().count() > 20 {
            let mut summary = words[..words.len().min(max_words)].join(" ");
            if words.len() >= max_words {
                summary.push_str("...");
            }
            return summary;
        }
    }

    let words: Vec<&str> = without_code.split_whitespace().collect();
    let mut summary = words[..words.len().min(max_words)].join(" ");
    if words.len() > max_words {
        summary.push_str("...");
    }
    summary
}

/// `sms/20240101_120000_123456` becomes `sms/0_123456`.
pub fn shorten_branch(branch: &str) -> String {
    if branch.chars().count() <= SHORT_BRANCH_LENGTH {
        return branch.to_string();
    }
    let parts: Vec<&str> = branch.split('/').collect();
    if let (Some(prefix), Some(suffix)) = (parts.first(), parts.last())
        && parts.len() > 1
    {
        let suffix_chars: Vec<char> = suffix.chars().collect();
        let suffix: String = if suffix_chars.len() > 10 {
            suffix_chars[suffix_chars.len() - 8..].iter().collect()
        } else {
            suffix.to_string()
        };
        return format!("{}/{}", prefix, suffix);
    }
    truncate(branch, SHORT_BRANCH_LENGTH)
}

/// Word-wrap `message` into chunks of at most `max_length` characters,
/// numbered `(i/n)` when more than one. A single word longer than the
/// limit gets a chunk of its own.
pub fn split_long_message(message: &str, max_length: usize) -> Vec<String> {
    if message.chars().count() <= max_length {
        return vec![message.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for word in message.split_whitespace() {
        let len = current.chars().count();
        if len + word.chars().count() + 1 <= max_length {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        } else {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    let total = chunks.len();
    if total > 1 {
        chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| format!("({}/{}) {}", i + 1, total, chunk))
            .collect()
    } else {
        chunks
    }
}

fn truncate(text: &str, max_length: usize) -> String {
    if text.chars().count() <= max_length {
        return text.to_string();
    }
    let keep = max_length.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}
