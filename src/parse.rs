//! Defensive parsing of model output
//!
//! Model replies are free text. These helpers pull out the few structured
//! pieces the analysis handlers rely on and ignore everything else.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static CITATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:pages?|pg\.?|p\.)\s*(\d{1,5})(?:\s*(?:-|–|to|and|,)\s*(\d{1,5}))?").unwrap()
});

static QUOTE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""([^"\n]{12,})"|“([^”\n]{12,})”"#).unwrap());

static STATUTE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        \b(?:FDCPA|TCPA|FCRA|CFPB|Regulation\s+F|Reg\.\s*F)\b
        | \b\d{1,2}\s+U\.?\s?S\.?\s?C\.?\s*(?:§+\s*)?\d+[a-z]*(?:\([a-z0-9]+\))*
        | \b\d{1,2}\s+C\.?\s?F\.?\s?R\.?\s*(?:§+\s*)?\d+(?:\.\d+)*
        ",
    )
    .unwrap()
});

static SEVERITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        (?:severity|risk\s+level|rating|priority)\W{0,6}(high|medium|moderate|low)\b
        | [\[(](high|medium|moderate|low)(?:\s+risk)?[\])]
        | ^[\s\-*\d.)\#]*(high|medium|moderate|low)(?:\s+risk)?\W{0,4}[:\-–]
        ",
    )
    .unwrap()
});

static MARKDOWN_HEADING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6}\s+(.+?)\s*#*\s*$").unwrap());

static BOLD_HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\d{1,2}[.)]\s*)?\*\*([^*]{2,100})\*\*:?\s*$").unwrap());

static NUMBERED_HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,2}[.)]\s+([A-Z][^.:!?]{1,80}):?\s*$").unwrap());

/// Find the JSON object in a reply that may wrap it in prose or code fences
pub fn extract_json_object(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let json_start = start + 7;
        if let Some(end) = text[json_start..].find("```") {
            return Some(text[json_start..json_start + end].trim());
        }
    }

    if let Some(start) = text.find("```") {
        let block_start = start + 3;
        let content_start = text[block_start..]
            .find('\n')
            .map(|i| block_start + i + 1)
            .unwrap_or(block_start);
        if let Some(end) = text[content_start..].find("```") {
            let block = text[content_start..content_start + end].trim();
            if block.starts_with('{') {
                return Some(block);
            }
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

/// Page numbers cited in the text, in order of first appearance
///
/// Recognizes `page 4`, `pages 2-3`, `p. 7` and `pg 5`, and page marker
/// lines echoed back from the document.
pub fn citations(text: &str) -> Vec<u32> {
    let mut pages = Vec::new();
    for caps in CITATION_RE.captures_iter(text) {
        let Some(first) = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) else {
            continue;
        };
        let last = caps
            .get(2)
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .filter(|last| *last >= first && last - first <= 50)
            .unwrap_or(first);

        let is_range = caps
            .get(0)
            .map_or(false, |m| m.as_str().contains('-') || m.as_str().contains('–') || m.as_str().contains("to"));
        let cited: Vec<u32> = if is_range {
            (first..=last).collect()
        } else if last != first {
            vec![first, last]
        } else {
            vec![first]
        };

        for page in cited {
            if !pages.contains(&page) {
                pages.push(page);
            }
        }
    }
    pages
}

/// A verbatim quotation and the page cited alongside it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quotation {
    pub text: String,
    pub page: Option<u32>,
}

/// Quoted passages of at least 12 characters, straight or curly quotes
pub fn quotations(text: &str) -> Vec<Quotation> {
    let mut quotes = Vec::new();
    for line in text.lines() {
        let page = citations(line).first().copied();
        for caps in QUOTE_RE.captures_iter(line) {
            let Some(quoted) = caps.get(1).or_else(|| caps.get(2)) else {
                continue;
            };
            let quoted = quoted.as_str().trim();
            if quoted.chars().count() >= 12 {
                quotes.push(Quotation {
                    text: quoted.to_string(),
                    page,
                });
            }
        }
    }
    quotes
}

/// Statute references on one line of text, normalized for whitespace
pub fn statute_references(line: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for m in STATUTE_RE.find_iter(line) {
        let normalized = m.as_str().split_whitespace().collect::<Vec<_>>().join(" ");
        if !found.contains(&normalized) {
            found.push(normalized);
        }
    }
    found
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    fn from_word(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "high" => Some(Severity::High),
            "medium" | "moderate" => Some(Severity::Medium),
            "low" => Some(Severity::Low),
            _ => None,
        }
    }
}

/// The severity rating carried by one line, if any
///
/// Accepts `Severity: High`, `(Medium)`, `[Low risk]` and lines that open
/// with the rating, such as `- High: ...`.
pub fn severity(line: &str) -> Option<Severity> {
    let caps = SEVERITY_RE.captures(line)?;
    let word = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3))?;
    Severity::from_word(word.as_str())
}

/// A headed section of a reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    pub title: String,
    pub body: String,
}

fn heading_title(line: &str) -> Option<String> {
    let line = line.trim();
    [&*MARKDOWN_HEADING_RE, &*BOLD_HEADING_RE, &*NUMBERED_HEADING_RE]
        .iter()
        .find_map(|re| re.captures(line))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim_matches(|c: char| c == '*' || c.is_whitespace()).to_string())
        .filter(|title| !title.is_empty())
}

fn close_section(sections: &mut [Section], body: &mut Vec<&str>) {
    if let Some(last) = sections.last_mut() {
        last.body = body.join("\n").trim().to_string();
    }
    body.clear();
}

/// Split a reply into headed sections
///
/// Headings are markdown headings, lines that are entirely bold, or short
/// numbered title lines. Text before the first heading is dropped.
pub fn sections(text: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    let mut body: Vec<&str> = Vec::new();

    for line in text.lines() {
        if let Some(title) = heading_title(line) {
            close_section(&mut sections, &mut body);
            sections.push(Section {
                title,
                body: String::new(),
            });
        } else if !sections.is_empty() {
            body.push(line);
        }
    }
    close_section(&mut sections, &mut body);

    sections
}
