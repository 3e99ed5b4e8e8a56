//! Specialized analysis handlers
//!
//! Five strategies behind [`AnalysisHandler`]. They share the request
//! framing and the fail-closed validation of the reply; they differ in the
//! prompt, the size of the document excerpt, and what they pull out of the
//! reply as findings.

use crate::document::Document;
use crate::model::{LanguageModel, ModelError, ModelRequest, TaskKind};
use crate::parse::{self, Quotation, Section, Severity};
use crate::prompts;
use crate::query::{Query, QueryCategory};
use serde::Serialize;
use std::fmt;

/// Default document excerpt budget, in characters
pub const DEFAULT_EXCERPT_CHARS: usize = 8000;
pub const SUMMARY_EXCERPT_CHARS: usize = 10_000;
pub const GENERAL_EXCERPT_CHARS: usize = 5000;

/// The handler strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    ClauseExtractor,
    ComplianceChecker,
    Summarizer,
    RiskAssessor,
    GeneralAssistant,
}

impl HandlerKind {
    /// The handler responsible for a category
    pub fn for_category(category: QueryCategory) -> Self {
        match category {
            QueryCategory::ClauseSearch => HandlerKind::ClauseExtractor,
            QueryCategory::ComplianceCheck => HandlerKind::ComplianceChecker,
            QueryCategory::Summary => HandlerKind::Summarizer,
            QueryCategory::RiskAssessment => HandlerKind::RiskAssessor,
            QueryCategory::General => HandlerKind::GeneralAssistant,
        }
    }

    pub fn category(self) -> QueryCategory {
        match self {
            HandlerKind::ClauseExtractor => QueryCategory::ClauseSearch,
            HandlerKind::ComplianceChecker => QueryCategory::ComplianceCheck,
            HandlerKind::Summarizer => QueryCategory::Summary,
            HandlerKind::RiskAssessor => QueryCategory::RiskAssessment,
            HandlerKind::GeneralAssistant => QueryCategory::General,
        }
    }

    pub fn handler(self) -> &'static dyn AnalysisHandler {
        match self {
            HandlerKind::ClauseExtractor => &ClauseExtractor,
            HandlerKind::ComplianceChecker => &ComplianceChecker,
            HandlerKind::Summarizer => &Summarizer,
            HandlerKind::RiskAssessor => &RiskAssessor,
            HandlerKind::GeneralAssistant => &GeneralAssistant,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HandlerKind::ClauseExtractor => "clause_extractor",
            HandlerKind::ComplianceChecker => "compliance_checker",
            HandlerKind::Summarizer => "summarizer",
            HandlerKind::RiskAssessor => "risk_assessor",
            HandlerKind::GeneralAssistant => "general_assistant",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A statute flagged by the compliance review
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComplianceFlag {
    pub statutes: Vec<String>,
    /// The reply line that raised the flag
    pub finding: String,
    pub page: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskItem {
    pub severity: Severity,
    pub description: String,
    pub page: Option<u32>,
}

/// Handler-specific structured content of a response
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "items", rename_all = "snake_case")]
pub enum Findings {
    Clauses(Vec<Quotation>),
    Compliance(Vec<ComplianceFlag>),
    Summary(Vec<Section>),
    Risks(Vec<RiskItem>),
    None,
}

/// The answer to one query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub category: QueryCategory,
    pub handler: HandlerKind,
    pub body: String,
    /// Cited page numbers in order of first appearance
    pub citations: Vec<u32>,
    pub findings: Findings,
}

/// One analysis strategy
pub trait AnalysisHandler: Sync {
    fn kind(&self) -> HandlerKind;

    fn handle(
        &self,
        model: &dyn LanguageModel,
        document: &Document,
        query: &Query,
    ) -> Result<Response, ModelError>;
}

/// Cut text to a character budget, marking the cut with an ellipsis
pub fn excerpt(text: &str, budget: usize) -> String {
    match text.char_indices().nth(budget) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

struct Framing {
    task: TaskKind,
    system: &'static str,
    instructions: &'static str,
    budget: usize,
}

/// Build the request, call the model once, and validate the reply
fn consult(
    kind: HandlerKind,
    framing: Framing,
    model: &dyn LanguageModel,
    document: &Document,
    query: &Query,
) -> Result<(String, Vec<u32>), ModelError> {
    let text = document.assembled_text();
    let document_text = (!text.trim().is_empty()).then(|| excerpt(text, framing.budget));

    let mut prompt = format!("{}\n\n{}\n\n", prompts::LEGAL_CONTEXT, framing.instructions);
    prompt.push_str(&format!(
        "DOCUMENT: {}\nPAGES: {}\n",
        document.file_name().unwrap_or("Unknown"),
        document.page_count()
    ));
    if kind == HandlerKind::Summarizer {
        prompt.push_str(&format!("SIZE: {} words\n", document.metadata().word_count));
    }
    if let Some(content) = &document_text {
        prompt.push_str(&format!("\nDOCUMENT CONTENT:\n{}\n", content));
    }
    prompt.push_str(&format!("\nUSER QUERY: {}", query));

    let request = ModelRequest {
        task: framing.task,
        system: framing.system.to_string(),
        prompt,
        query: query.as_str().to_string(),
        document_text,
    };

    let reply = model.complete(&request)?;
    let body = reply.trim().to_string();
    if body.is_empty() {
        return Err(ModelError::Malformed(format!("{} received an empty reply", kind)));
    }

    let citations = parse::citations(&body);
    if let Some(bad) = citations
        .iter()
        .find(|page| **page == 0 || **page > document.page_count())
    {
        return Err(ModelError::Malformed(format!(
            "{} reply cites page {} of a {}-page document",
            kind,
            bad,
            document.page_count()
        )));
    }

    Ok((body, citations))
}

fn respond(kind: HandlerKind, body: String, citations: Vec<u32>, findings: Findings) -> Response {
    Response {
        category: kind.category(),
        handler: kind,
        body,
        citations,
        findings,
    }
}

/// Strip list bullets and emphasis from a reply line
fn clean_line(line: &str) -> String {
    line.trim()
        .trim_start_matches(|c: char| c == '-' || c == '*' || c == '•' || c.is_whitespace())
        .replace("**", "")
        .trim()
        .to_string()
}

/// Finds and quotes the clauses a query asks about
pub struct ClauseExtractor;

impl AnalysisHandler for ClauseExtractor {
    fn kind(&self) -> HandlerKind {
        HandlerKind::ClauseExtractor
    }

    fn handle(
        &self,
        model: &dyn LanguageModel,
        document: &Document,
        query: &Query,
    ) -> Result<Response, ModelError> {
        let framing = Framing {
            task: TaskKind::ClauseSearch,
            system: prompts::CLAUSE_SYSTEM,
            instructions: prompts::CLAUSE_TASK,
            budget: DEFAULT_EXCERPT_CHARS,
        };
        let (body, citations) = consult(self.kind(), framing, model, document, query)?;
        let quoted = parse::quotations(&body);
        let total = quoted.len();
        let quotes: Vec<Quotation> = quoted
            .into_iter()
            .filter(|quote| {
                let found = quote_in_document(quote, document);
                if !found {
                    log::warn!("Dropping quote not found in document: {:?}", quote.text);
                }
                found
            })
            .collect();
        if total > 0 && quotes.is_empty() {
            return Err(ModelError::Malformed(format!(
                "{} reply quotes {} passage(s), none found in the document",
                self.kind(),
                total
            )));
        }
        Ok(respond(self.kind(), body, citations, Findings::Clauses(quotes)))
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether a quote appears verbatim (up to whitespace) on its cited page,
/// or anywhere in the document when it cites none
fn quote_in_document(quote: &Quotation, document: &Document) -> bool {
    let needle = collapse_whitespace(&quote.text);
    match quote.page {
        Some(page) => document
            .page(page)
            .is_some_and(|record| collapse_whitespace(&record.raw_text).contains(&needle)),
        None => collapse_whitespace(document.assembled_text()).contains(&needle),
    }
}

/// Reviews a document against collection statutes
pub struct ComplianceChecker;

impl AnalysisHandler for ComplianceChecker {
    fn kind(&self) -> HandlerKind {
        HandlerKind::ComplianceChecker
    }

    fn handle(
        &self,
        model: &dyn LanguageModel,
        document: &Document,
        query: &Query,
    ) -> Result<Response, ModelError> {
        let framing = Framing {
            task: TaskKind::ComplianceCheck,
            system: prompts::COMPLIANCE_SYSTEM,
            instructions: prompts::COMPLIANCE_TASK,
            budget: DEFAULT_EXCERPT_CHARS,
        };
        let (body, citations) = consult(self.kind(), framing, model, document, query)?;

        let flags = body
            .lines()
            .filter_map(|line| {
                let statutes = parse::statute_references(line);
                (!statutes.is_empty()).then(|| ComplianceFlag {
                    statutes,
                    finding: clean_line(line),
                    page: parse::citations(line).first().copied(),
                })
            })
            .collect();

        Ok(respond(self.kind(), body, citations, Findings::Compliance(flags)))
    }
}

/// Produces a sectioned summary of the whole document
pub struct Summarizer;

impl AnalysisHandler for Summarizer {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Summarizer
    }

    fn handle(
        &self,
        model: &dyn LanguageModel,
        document: &Document,
        query: &Query,
    ) -> Result<Response, ModelError> {
        let framing = Framing {
            task: TaskKind::Summary,
            system: prompts::SUMMARY_SYSTEM,
            instructions: prompts::SUMMARY_TASK,
            budget: SUMMARY_EXCERPT_CHARS,
        };
        let (body, citations) = consult(self.kind(), framing, model, document, query)?;

        let sections = parse::sections(&body);
        if sections.is_empty() {
            return Err(ModelError::Malformed(
                "summary reply has no headed sections".to_string(),
            ));
        }
        Ok(respond(self.kind(), body, citations, Findings::Summary(sections)))
    }
}

/// Rates the legal risks a document carries
pub struct RiskAssessor;

impl AnalysisHandler for RiskAssessor {
    fn kind(&self) -> HandlerKind {
        HandlerKind::RiskAssessor
    }

    fn handle(
        &self,
        model: &dyn LanguageModel,
        document: &Document,
        query: &Query,
    ) -> Result<Response, ModelError> {
        let framing = Framing {
            task: TaskKind::RiskAssessment,
            system: prompts::RISK_SYSTEM,
            instructions: prompts::RISK_TASK,
            budget: DEFAULT_EXCERPT_CHARS,
        };
        let (body, citations) = consult(self.kind(), framing, model, document, query)?;

        let risks = body
            .lines()
            .filter_map(|line| {
                parse::severity(line).map(|severity| RiskItem {
                    severity,
                    description: clean_line(line),
                    page: parse::citations(line).first().copied(),
                })
            })
            .collect();

        Ok(respond(self.kind(), body, citations, Findings::Risks(risks)))
    }
}

/// Answers anything the other handlers do not cover
pub struct GeneralAssistant;

impl AnalysisHandler for GeneralAssistant {
    fn kind(&self) -> HandlerKind {
        HandlerKind::GeneralAssistant
    }

    fn handle(
        &self,
        model: &dyn LanguageModel,
        document: &Document,
        query: &Query,
    ) -> Result<Response, ModelError> {
        let framing = Framing {
            task: TaskKind::General,
            system: prompts::GENERAL_SYSTEM,
            instructions: prompts::GENERAL_TASK,
            budget: GENERAL_EXCERPT_CHARS,
        };
        let (body, citations) = consult(self.kind(), framing, model, document, query)?;
        Ok(respond(self.kind(), body, citations, Findings::None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::PageRecord;
    use crate::rasterizer::DocumentKind;
    use crate::testing::ScriptedModel;

    fn document(pages: &[&str]) -> Document {
        let records = pages
            .iter()
            .enumerate()
            .map(|(i, text)| PageRecord::native(i as u32, text.to_string()))
            .collect();
        Document::assemble(DocumentKind::Pdf, 2048, records, 300)
            .unwrap()
            .with_file_name("agreement.pdf")
    }

    fn query(text: &str) -> Query {
        Query::new(text).unwrap()
    }

    fn replying(reply: &'static str) -> ScriptedModel<impl Fn(&ModelRequest) -> Result<String, ModelError>> {
        ScriptedModel::new(move |_: &ModelRequest| Ok(reply.to_string()))
    }

    #[test]
    fn test_every_category_has_a_handler() {
        for category in QueryCategory::ALL {
            let kind = HandlerKind::for_category(category);
            assert_eq!(kind.category(), category);
            assert_eq!(kind.handler().kind(), kind);
        }
    }

    #[test]
    fn test_excerpt_budget() {
        assert_eq!(excerpt("short", 10), "short");
        assert_eq!(excerpt("abcdef", 3), "abc...");
        assert_eq!(excerpt("§§§§", 2), "§§...");
    }

    #[test]
    fn test_clause_extractor_quotes_with_pages() {
        let doc = document(&["Recitals", "The Debtor may dispute the debt within thirty days."]);
        let model = replying(
            "## Dispute Clause\n\"The Debtor may dispute the debt within thirty days\" (page 2)",
        );
        let response = ClauseExtractor
            .handle(&model, &doc, &query("Where is the dispute clause?"))
            .unwrap();

        assert_eq!(response.category, QueryCategory::ClauseSearch);
        assert_eq!(response.citations, vec![2]);
        match &response.findings {
            Findings::Clauses(quotes) => {
                assert_eq!(quotes.len(), 1);
                assert_eq!(quotes[0].page, Some(2));
            }
            other => panic!("unexpected findings {:?}", other),
        }

        let requests = model.requests.lock().unwrap();
        let request = &requests[0];
        assert_eq!(request.task, TaskKind::ClauseSearch);
        assert!(request.prompt.contains("DOCUMENT: agreement.pdf"));
        assert!(request.prompt.contains("--- Page 2 ---"));
        assert!(request.prompt.ends_with("USER QUERY: Where is the dispute clause?"));
    }

    #[test]
    fn test_clause_extractor_drops_unverified_quotes() {
        let doc = document(&[
            "Recitals",
            "The Debtor may dispute the debt\nwithin thirty days.",
        ]);
        let model = replying(
            "\"The Debtor may dispute the debt within thirty days\" (page 2)\n\
             \"Interest accrues at eighteen percent annually\" (page 2)\n\
             \"The Debtor may dispute the debt within thirty days\" (page 1)",
        );
        let response = ClauseExtractor
            .handle(&model, &doc, &query("Where is the dispute clause?"))
            .unwrap();

        match &response.findings {
            Findings::Clauses(quotes) => {
                assert_eq!(quotes.len(), 1);
                assert_eq!(quotes[0].page, Some(2));
                assert_eq!(quotes[0].text, "The Debtor may dispute the debt within thirty days");
            }
            other => panic!("unexpected findings {:?}", other),
        }
    }

    #[test]
    fn test_clause_extractor_rejects_fabricated_quotes() {
        let doc = document(&["The Debtor may dispute the debt within thirty days."]);
        let model = replying("The clause says \"Interest accrues at eighteen percent annually\".");
        let result = ClauseExtractor.handle(&model, &doc, &query("What is the interest rate?"));
        assert!(matches!(result, Err(ModelError::Malformed(_))));
    }

    #[test]
    fn test_clause_extractor_without_quotes() {
        let doc = document(&["The Debtor may dispute the debt within thirty days."]);
        let model = replying("No arbitration clause appears in this document.");
        let response = ClauseExtractor
            .handle(&model, &doc, &query("Is there an arbitration clause?"))
            .unwrap();
        assert_eq!(response.findings, Findings::Clauses(Vec::new()));
    }

    #[test]
    fn test_compliance_flags() {
        let doc = document(&["Calls may be placed at any hour."]);
        let model = replying(
            "- Calling at any hour conflicts with FDCPA 15 U.S.C. 1692c(a)(1) (page 1)\n\
             - No other concerns.",
        );
        let response = ComplianceChecker
            .handle(&model, &doc, &query("Is the calling policy compliant?"))
            .unwrap();

        match &response.findings {
            Findings::Compliance(flags) => {
                assert_eq!(flags.len(), 1);
                assert_eq!(flags[0].statutes, vec!["FDCPA", "15 U.S.C. 1692c(a)(1)"]);
                assert_eq!(flags[0].page, Some(1));
                assert!(flags[0].finding.starts_with("Calling at any hour"));
            }
            other => panic!("unexpected findings {:?}", other),
        }
    }

    #[test]
    fn test_summarizer_requires_sections() {
        let doc = document(&["Agreement text"]);
        let model = replying("This is a collection agreement.");
        let result = Summarizer.handle(&model, &doc, &query("Summarize"));
        assert!(matches!(result, Err(ModelError::Malformed(_))));
    }

    #[test]
    fn test_summarizer_budget_is_larger() {
        let long_page = "x".repeat(12_000);
        let doc = document(&[long_page.as_str()]);
        let model = replying("## Purpose\nDebt settlement (page 1)");
        let response = Summarizer.handle(&model, &doc, &query("Summarize")).unwrap();
        assert!(matches!(&response.findings, Findings::Summary(s) if s[0].title == "Purpose"));

        let requests = model.requests.lock().unwrap();
        let excerpt = requests[0].document_text.as_ref().unwrap();
        assert_eq!(excerpt.chars().count(), SUMMARY_EXCERPT_CHARS + 3);
        assert!(excerpt.ends_with("..."));
        assert!(requests[0].prompt.contains("SIZE: 1 words"));
    }

    #[test]
    fn test_risk_items() {
        let doc = document(&["One", "Two"]);
        let model = replying(
            "1. High: arbitration clause may be unenforceable (page 2)\n\
             Likelihood: moderate\n\
             2. Late fee wording (Low)",
        );
        let response = RiskAssessor.handle(&model, &doc, &query("What are the risks?")).unwrap();
        match &response.findings {
            Findings::Risks(items) => {
                let severities: Vec<Severity> = items.iter().map(|i| i.severity).collect();
                assert_eq!(severities, vec![Severity::High, Severity::Low]);
                assert_eq!(items[0].page, Some(2));
            }
            other => panic!("unexpected findings {:?}", other),
        }
    }

    #[test]
    fn test_out_of_range_citation_fails_closed() {
        let doc = document(&["Only page"]);
        let model = replying("The clause is on page 7.");
        let result = GeneralAssistant.handle(&model, &doc, &query("Where is it?"));
        assert!(matches!(result, Err(ModelError::Malformed(m)) if m.contains("page 7")));
    }

    #[test]
    fn test_empty_reply_fails_closed() {
        let doc = document(&["Only page"]);
        let model = replying("  \n ");
        let result = GeneralAssistant.handle(&model, &doc, &query("Anything?"));
        assert!(matches!(result, Err(ModelError::Malformed(_))));
    }

    #[test]
    fn test_general_assistant_budget() {
        let long_page = "y".repeat(6_000);
        let doc = document(&[long_page.as_str()]);
        let model = replying("Collection agencies must validate debts on request.");
        let response = GeneralAssistant.handle(&model, &doc, &query("What is debt validation?")).unwrap();
        assert_eq!(response.findings, Findings::None);
        assert!(response.citations.is_empty());

        let requests = model.requests.lock().unwrap();
        let excerpt = requests[0].document_text.as_ref().unwrap();
        assert_eq!(excerpt.chars().count(), GENERAL_EXCERPT_CHARS + 3);
    }
}
