//! Transcript parser.
//!
//! Turns raw conversational text into an ordered list of [`ContentItem`]s.
//! Parsing is a pure function of the input: no I/O, no randomness, and
//! identical input always yields an identical [`ChatTranscript`].
//!
//! # Algorithm
//!
//! 1. Scan line by line for fenced regions (```` ``` ```` or `~~~`). An
//!    opening fence may carry a language hint; a fence left open at end of
//!    input runs to the end of the text.
//! 2. Each fenced region becomes a `Code` item. The language comes from the
//!    hint, or from weighted keyword signals when there is no hint.
//! 3. Prose between fences is split into paragraphs on blank lines.
//!    Paragraphs with a heading, a `topic:`-style marker, explanatory
//!    vocabulary, or that directly follow a code block become `Topic` items.
//! 4. Any other paragraph is folded into the preceding topic of the same
//!    prose run, or skipped if there is none.
//! 5. If fencing is unusable, or non-empty text yields nothing, the whole
//!    text becomes a single topic.
//!
//! # Example
//!
//! ```rust
//! use course_forge_core::parser::parse_transcript;
//!
//! let t = parse_transcript("## Loops\n\nA loop repeats work.\n\n```python\nfor i in range(3):\n    print(i)\n```\n");
//! assert_eq!(t.items.len(), 2);
//! assert_eq!(t.items[1].language.as_deref(), Some("python"));
//! ```

use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::models::{ChatTranscript, ContentItem, ContentKind, ParseWarning, TranscriptStats};

/// Longest generated title, in bytes.
const MAX_TITLE_LEN: usize = 80;

lazy_static! {
    static ref FENCE_OPEN: Regex = Regex::new(r"^[ \t]{0,3}(`{3,}|~{3,})[ \t]*([A-Za-z0-9_+#.\-]*)").unwrap();
    static ref HEADING: Regex = Regex::new(r"^#{1,6}[ \t]+(.+?)[ \t#]*$").unwrap();
    static ref BOLD_HEADING: Regex = Regex::new(r"^\*\*([^*]+)\*\*:?$").unwrap();
    static ref TOPIC_MARKER: Regex =
        Regex::new(r"(?i)^(?:topic|lesson|section|concept|chapter|module|step \d+)[ \t]*[:\-][ \t]*(.+)$").unwrap();
    static ref SPEAKER_LABEL: Regex =
        Regex::new(r"(?i)^(?:user|assistant|human|ai|system|bot|you|me|chatgpt|claude|gpt)[ \t]*:[ \t]*").unwrap();
    static ref TRIGGER_VOCABULARY: Regex = Regex::new(
        r"(?i)\b(?:explain\w*|concept|definition|overview|introduc\w+|example|tutorial|lesson|learn\w*|teach\w*|understand\w*|how to|how does|what is|refers to|in summary|note that|important|means)\b"
    )
    .unwrap();
    static ref LANGUAGE_SIGNALS: Vec<(&'static str, Regex, u32)> = {
        let raw: &[(&str, &str, u32)] = &[
            ("python", r"(?m)^\s*def \w+\(.*\)\s*:", 3),
            ("python", r"(?m)^\s*(?:from \w+ )?import \w+", 1),
            ("python", r"\bprint\(", 1),
            ("python", r"\bself\.", 1),
            ("python", r"(?m)^\s*elif\b", 2),
            ("javascript", r"\bfunction\s*\w*\s*\(", 3),
            ("javascript", r"\bconsole\.log\(", 3),
            ("javascript", r"=>", 1),
            ("javascript", r"\b(?:const|let)\s+\w+\s*=", 1),
            ("javascript", r"\brequire\(", 2),
            ("typescript", r"(?m)^\s*(?:export\s+)?interface\s+\w+", 2),
            ("typescript", r":\s*(?:string|number|boolean)\b", 2),
            ("rust", r"\bfn\s+\w+\s*[(<]", 3),
            ("rust", r"\blet\s+mut\b", 3),
            ("rust", r"(?m)^\s*impl\b", 2),
            ("rust", r"\bprintln!\(", 3),
            ("go", r"(?m)^package\s+\w+", 3),
            ("go", r"\bfunc\s+\w*\s*\(", 3),
            ("go", r"\bfmt\.\w+\(", 2),
            ("java", r"\bpublic\s+(?:static\s+)?class\b", 3),
            ("java", r"\bSystem\.out\.print", 4),
            ("java", r"\bpublic\s+static\s+void\s+main\b", 4),
            ("html", r"(?i)<!doctype html", 4),
            ("html", r"(?i)<html\b", 4),
            ("html", r"(?i)<(?:div|span|body|head|p|a)\b[^>]*>", 2),
            ("sql", r"(?i)\bselect\b.+\bfrom\b", 3),
            ("sql", r"(?i)\binsert\s+into\b", 3),
            ("sql", r"(?i)\bcreate\s+table\b", 3),
            ("sql", r"(?i)\bwhere\b", 1),
            ("bash", r"^#!/(?:usr/)?bin/(?:env )?(?:ba)?sh", 4),
            ("bash", r"(?m)^\s*(?:sudo|apt-get|apt|brew|pip|npm|cd|ls|export)\s", 2),
            ("bash", r"(?m)^\s*echo\s", 1),
        ];
        raw.iter()
            .map(|(lang, pattern, weight)| (*lang, Regex::new(pattern).unwrap(), *weight))
            .collect()
    };
}

/// Parse a raw transcript into typed content items.
///
/// Never fails: malformed input degrades to best-effort output with the
/// problems listed in [`ChatTranscript::warnings`].
pub fn parse_transcript(text: &str) -> ChatTranscript {
    let fingerprint = fingerprint(text);
    if text.trim().is_empty() {
        return ChatTranscript {
            fingerprint,
            ..ChatTranscript::default()
        };
    }

    let scan = scan_regions(text);
    let mut warnings = scan.warnings;

    if scan.stray_markers > 0 && scan.closed_fences == 0 {
        warnings.push(ParseWarning::MalformedFencing);
        return whole_text_topic(text, fingerprint, warnings);
    }

    let mut builder = ItemBuilder::default();
    let mut after_code = false;
    for region in scan.regions {
        match region {
            Region::Code { hint, body, offset, line } => {
                if body.trim().is_empty() {
                    warnings.push(ParseWarning::EmptyCodeBlock { line });
                    continue;
                }
                builder.push_code(hint.as_deref(), &body, offset);
                after_code = true;
            }
            Region::Prose { text: prose, offset } => {
                builder.push_prose(&prose, offset, after_code);
                after_code = false;
            }
        }
    }

    if builder.items.is_empty() {
        warnings.push(ParseWarning::NoStructure);
        return whole_text_topic(text, fingerprint, warnings);
    }

    let stats = TranscriptStats {
        total_chars: builder.items.iter().map(ContentItem::serialized_chars).sum(),
        code_items: builder.items.iter().filter(|i| i.is_code()).count(),
        topic_items: builder.items.iter().filter(|i| !i.is_code()).count(),
        merged_paragraphs: builder.merged,
        skipped_paragraphs: builder.skipped,
    };

    ChatTranscript {
        items: builder.items,
        stats,
        fingerprint,
        warnings,
    }
}

/// SHA-256 hex digest used to recognise a transcript across sessions.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Infer a code block's language from weighted keyword signals.
///
/// The winning language must hold a strict majority of the total matched
/// weight; otherwise `"text"` is returned.
pub fn detect_language(code: &str) -> String {
    let mut scores: Vec<(&'static str, u32)> = Vec::new();
    let mut total = 0u32;
    for (lang, re, weight) in LANGUAGE_SIGNALS.iter() {
        if re.is_match(code) {
            total += weight;
            match scores.iter_mut().find(|(l, _)| l == lang) {
                Some((_, score)) => *score += weight,
                None => scores.push((*lang, *weight)),
            }
        }
    }

    scores
        .into_iter()
        .max_by_key(|(_, score)| *score)
        .filter(|(_, score)| score * 2 > total)
        .map(|(lang, _)| lang.to_string())
        .unwrap_or_else(|| "text".to_string())
}

/// Map common fence hints onto canonical language names.
pub fn normalize_language_hint(hint: &str) -> Option<String> {
    let lower = hint.trim().to_ascii_lowercase();
    let canonical = match lower.as_str() {
        "" => return None,
        "py" | "python3" | "py3" => "python",
        "js" | "jsx" | "node" | "nodejs" | "mjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "sh" | "shell" | "zsh" | "console" | "shell-session" => "bash",
        "rs" => "rust",
        "golang" => "go",
        "htm" | "xhtml" => "html",
        "postgres" | "postgresql" | "mysql" | "sqlite" | "psql" => "sql",
        "yml" => "yaml",
        "c++" | "cc" | "hpp" | "cxx" => "cpp",
        "plain" | "plaintext" | "txt" => "text",
        other => other,
    };
    Some(canonical.to_string())
}

// ─── Region scanning ───

enum Region {
    Code {
        hint: Option<String>,
        body: String,
        offset: usize,
        line: usize,
    },
    Prose {
        text: String,
        offset: usize,
    },
}

struct OpenFence {
    marker: String,
    hint: Option<String>,
    body: String,
    offset: usize,
    line: usize,
}

#[derive(Default)]
struct Scan {
    regions: Vec<Region>,
    warnings: Vec<ParseWarning>,
    closed_fences: usize,
    stray_markers: usize,
}

fn scan_regions(text: &str) -> Scan {
    let mut scan = Scan::default();
    let mut open: Option<OpenFence> = None;
    let mut prose = String::new();
    let mut prose_offset = 0;
    let mut offset = 0;

    for (line_no, line) in text.split_inclusive('\n').enumerate() {
        let line_start = offset;
        offset += line.len();
        let content = line.trim_end_matches(['\n', '\r']);

        if let Some(fence) = open.as_mut() {
            if closes_fence(content, &fence.marker) {
                if let Some(fence) = open.take() {
                    scan.regions.push(Region::Code {
                        hint: fence.hint,
                        body: fence.body,
                        offset: fence.offset,
                        line: fence.line,
                    });
                }
                scan.closed_fences += 1;
            } else {
                fence.body.push_str(line);
            }
            continue;
        }

        if let Some(caps) = FENCE_OPEN.captures(content) {
            let marker = caps[1].to_string();
            let rest = &content[caps.get(0).map_or(0, |m| m.end())..];
            if !rest.contains(marker.as_str()) {
                if !prose.is_empty() {
                    scan.regions.push(Region::Prose {
                        text: std::mem::take(&mut prose),
                        offset: prose_offset,
                    });
                }
                open = Some(OpenFence {
                    hint: normalize_language_hint(&caps[2]),
                    marker,
                    body: String::new(),
                    offset: line_start,
                    line: line_no + 1,
                });
                continue;
            }
        }

        if content.contains("```") || content.contains("~~~") {
            scan.stray_markers += 1;
        }
        if prose.is_empty() {
            prose_offset = line_start;
        }
        prose.push_str(line);
    }

    if let Some(fence) = open {
        scan.warnings
            .push(ParseWarning::UnterminatedFence { line: fence.line });
        scan.regions.push(Region::Code {
            hint: fence.hint,
            body: fence.body,
            offset: fence.offset,
            line: fence.line,
        });
    }
    if !prose.is_empty() {
        scan.regions.push(Region::Prose {
            text: prose,
            offset: prose_offset,
        });
    }
    scan
}

/// A closing fence is a line made only of the opening marker's character,
/// at least as long as the opener.
fn closes_fence(line: &str, marker: &str) -> bool {
    let trimmed = line.trim();
    let Some(fence_char) = marker.chars().next() else {
        return false;
    };
    trimmed.len() >= marker.len() && trimmed.chars().all(|c| c == fence_char)
}

// ─── Item building ───

#[derive(Default)]
struct ItemBuilder {
    items: Vec<ContentItem>,
    merged: usize,
    skipped: usize,
}

impl ItemBuilder {
    fn push_code(&mut self, hint: Option<&str>, body: &str, offset: usize) {
        let body = body.trim_start_matches(['\n', '\r']).trim_end();
        let language = match hint {
            Some(lang) => lang.to_string(),
            None => detect_language(body),
        };
        let title = if language == "text" {
            "Code snippet".to_string()
        } else {
            format!("{} example", language)
        };
        self.items.push(ContentItem {
            kind: ContentKind::Code,
            title,
            body: body.to_string(),
            language: Some(language),
            word_count: body.split_whitespace().count(),
            origin_offset: offset,
        });
    }

    fn push_prose(&mut self, prose: &str, offset: usize, after_code: bool) {
        // Index of the topic that later plain paragraphs in this run fold into.
        let mut open_topic: Option<usize> = None;

        for (i, (para, para_offset)) in paragraphs(prose, offset).into_iter().enumerate() {
            let para = strip_speaker_label(&para);
            if para.is_empty() {
                continue;
            }
            let first_line = para.lines().next().unwrap_or_default().trim();
            let rest = para
                .split_once('\n')
                .map(|(_, r)| r.trim())
                .unwrap_or_default();

            let topic = if let Some(heading) = heading_text(first_line) {
                Some((heading, rest.to_string()))
            } else if let Some(caps) = TOPIC_MARKER.captures(first_line) {
                Some((caps[1].trim().to_string(), non_empty_or(rest, &para)))
            } else if (i == 0 && after_code) || TRIGGER_VOCABULARY.is_match(&para) {
                Some((sentence_title(&para), para.clone()))
            } else {
                None
            };

            match (topic, open_topic) {
                (Some((title, body)), _) => {
                    self.items.push(ContentItem {
                        kind: ContentKind::Topic,
                        word_count: body.split_whitespace().count(),
                        title: truncate_title(&title),
                        body,
                        language: None,
                        origin_offset: para_offset,
                    });
                    open_topic = Some(self.items.len() - 1);
                }
                (None, Some(idx)) => {
                    let item = &mut self.items[idx];
                    if !item.body.is_empty() {
                        item.body.push_str("\n\n");
                    }
                    item.body.push_str(&para);
                    item.word_count = item.body.split_whitespace().count();
                    self.merged += 1;
                }
                (None, None) => self.skipped += 1,
            }
        }
    }
}

/// Split prose into blank-line separated paragraphs with their byte offsets.
fn paragraphs(prose: &str, base_offset: usize) -> Vec<(String, usize)> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut start = base_offset;
    let mut offset = base_offset;

    for line in prose.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        if line.trim().is_empty() {
            if !current.trim().is_empty() {
                out.push((current.trim().to_string(), start));
            }
            current.clear();
            continue;
        }
        if current.is_empty() {
            start = line_start;
        }
        current.push_str(line);
    }
    if !current.trim().is_empty() {
        out.push((current.trim().to_string(), start));
    }
    out
}

fn strip_speaker_label(para: &str) -> String {
    SPEAKER_LABEL.replace(para, "").trim().to_string()
}

fn heading_text(line: &str) -> Option<String> {
    if let Some(caps) = HEADING.captures(line) {
        return Some(caps[1].trim().to_string());
    }
    if let Some(caps) = BOLD_HEADING.captures(line) {
        return Some(caps[1].trim().to_string());
    }
    // Short label lines such as "Recursion basics:".
    if line.ends_with(':') && line.len() <= 60 && line.split_whitespace().count() <= 6 {
        return Some(line.trim_end_matches(':').trim().to_string());
    }
    None
}

fn sentence_title(para: &str) -> String {
    let end = para
        .find(|c: char| matches!(c, '.' | '?' | '!' | '\n'))
        .unwrap_or(para.len());
    para[..end].trim().to_string()
}

fn non_empty_or(body: &str, fallback: &str) -> String {
    if body.is_empty() {
        fallback.to_string()
    } else {
        body.to_string()
    }
}

fn truncate_title(title: &str) -> String {
    if title.len() <= MAX_TITLE_LEN {
        return title.to_string();
    }
    let mut cut = MAX_TITLE_LEN;
    while cut > 0 && !title.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", title[..cut].trim_end())
}

fn whole_text_topic(text: &str, fingerprint: String, warnings: Vec<ParseWarning>) -> ChatTranscript {
    let body = text.trim().to_string();
    let first_line = body.lines().next().unwrap_or_default();
    let item = ContentItem {
        kind: ContentKind::Topic,
        title: truncate_title(strip_speaker_label(first_line).as_str()),
        word_count: body.split_whitespace().count(),
        origin_offset: text.len() - text.trim_start().len(),
        language: None,
        body,
    };
    let stats = TranscriptStats {
        total_chars: item.serialized_chars(),
        topic_items: 1,
        ..TranscriptStats::default()
    };
    ChatTranscript {
        items: vec![item],
        stats,
        fingerprint,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_transcript_has_no_items() {
        let t = parse_transcript("");
        assert!(t.is_empty());
        assert_eq!(t.stats, TranscriptStats::default());
        assert!(t.warnings.is_empty());

        let t = parse_transcript("   \n\n  ");
        assert!(t.is_empty());
    }

    #[test]
    fn test_code_block_with_hint() {
        let text = "Here is an example of a loop.\n\n```py\nfor i in range(3):\n    print(i)\n```\n";
        let t = parse_transcript(text);
        assert_eq!(t.items.len(), 2);
        assert_eq!(t.items[0].kind, ContentKind::Topic);
        assert_eq!(t.items[1].kind, ContentKind::Code);
        assert_eq!(t.items[1].language.as_deref(), Some("python"));
        assert_eq!(t.items[1].body, "for i in range(3):\n    print(i)");
        assert_eq!(&text[t.items[1].origin_offset..t.items[1].origin_offset + 5], "```py");
    }

    #[test]
    fn test_unterminated_fence_runs_to_end() {
        let text = "## Setup\n\nInstall it.\n\n```bash\nsudo apt-get install jq\necho done\n";
        let t = parse_transcript(text);
        assert_eq!(t.items.len(), 2);
        assert_eq!(t.items[1].body, "sudo apt-get install jq\necho done");
        assert_eq!(t.warnings, vec![ParseWarning::UnterminatedFence { line: 5 }]);
    }

    #[test]
    fn test_language_detection_signals() {
        assert_eq!(detect_language("def add(a, b):\n    return a + b"), "python");
        assert_eq!(detect_language("function add(a, b) {\n  return a + b;\n}"), "javascript");
        assert_eq!(detect_language("<html><body><div>hi</div></body></html>"), "html");
        assert_eq!(detect_language("SELECT id, name FROM users WHERE id = 1;"), "sql");
        assert_eq!(detect_language("fn main() {\n    let mut x = 1;\n    println!(\"{}\", x);\n}"), "rust");
    }

    #[test]
    fn test_language_defaults_to_text_without_majority() {
        assert_eq!(detect_language("just some words"), "text");
        // python (print) and javascript (=>) tie; neither holds a majority.
        assert_eq!(detect_language("print(x)\nf = y => y"), "text");
    }

    #[test]
    fn test_first_paragraph_after_code_is_topic() {
        let text = "```js\nconsole.log(1)\n```\n\nThat prints one to the console.\n\nAnd nothing else happens.";
        let t = parse_transcript(text);
        assert_eq!(t.items.len(), 2);
        assert_eq!(t.items[1].kind, ContentKind::Topic);
        assert_eq!(t.items[1].title, "That prints one to the console");
        assert!(t.items[1].body.contains("nothing else happens"));
        assert_eq!(t.stats.merged_paragraphs, 1);
    }

    #[test]
    fn test_plain_leading_paragraph_is_skipped() {
        let text = "Hey there, thanks.\n\n# Closures\n\nThey capture variables.";
        let t = parse_transcript(text);
        assert_eq!(t.items.len(), 1);
        assert_eq!(t.items[0].title, "Closures");
        assert_eq!(t.items[0].body, "They capture variables.");
        assert_eq!(t.stats.skipped_paragraphs, 1);
        assert_eq!(t.stats.merged_paragraphs, 1);
    }

    #[test]
    fn test_topic_marker_and_speaker_label() {
        let text = "Assistant: Topic: Ownership\nEach value has a single owner.";
        let t = parse_transcript(text);
        assert_eq!(t.items.len(), 1);
        assert_eq!(t.items[0].title, "Ownership");
        assert_eq!(t.items[0].body, "Each value has a single owner.");
    }

    #[test]
    fn test_malformed_fencing_falls_back_to_single_topic() {
        let text = "so the code is ```x = 1``` and then ```y = 2 and it never closes";
        let t = parse_transcript(text);
        assert_eq!(t.items.len(), 1);
        assert_eq!(t.items[0].kind, ContentKind::Topic);
        assert_eq!(t.items[0].body, text);
        assert!(t.warnings.contains(&ParseWarning::MalformedFencing));
    }

    #[test]
    fn test_unstructured_text_becomes_single_topic() {
        let t = parse_transcript("ok\n\nsure\n\nthanks");
        assert_eq!(t.items.len(), 1);
        assert_eq!(t.items[0].title, "ok");
        assert!(t.warnings.contains(&ParseWarning::NoStructure));
    }

    #[test]
    fn test_empty_code_block_dropped() {
        let text = "# Intro\n\nSome words.\n\n```\n\n```\n";
        let t = parse_transcript(text);
        assert_eq!(t.items.len(), 1);
        assert_eq!(t.warnings, vec![ParseWarning::EmptyCodeBlock { line: 5 }]);
    }

    #[test]
    fn test_stats_and_fingerprint() {
        let text = "# A\n\nalpha\n\n```sql\nSELECT 1 FROM t\n```\n\nExplained: it selects.";
        let t = parse_transcript(text);
        assert_eq!(t.stats.code_items, 1);
        assert_eq!(t.stats.topic_items, 2);
        assert_eq!(
            t.stats.total_chars,
            t.items.iter().map(ContentItem::serialized_chars).sum::<usize>()
        );
        assert_eq!(t.fingerprint.len(), 64);
        assert_eq!(t.fingerprint, fingerprint(text));
    }

    #[test]
    fn test_deterministic() {
        let text = "# One\n\nfirst\n\n```\nfunction f() {}\n```\n\nthen more";
        assert_eq!(parse_transcript(text), parse_transcript(text));
    }

    #[test]
    fn test_long_titles_truncated_on_char_boundary() {
        let heading = format!("# {}", "é".repeat(60));
        let t = parse_transcript(&heading);
        assert!(t.items[0].title.ends_with("..."));
        assert!(t.items[0].title.len() <= MAX_TITLE_LEN + 3);
    }
}
