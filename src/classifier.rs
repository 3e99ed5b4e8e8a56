//! Query classification
//!
//! The model is asked for a JSON verdict. Anything it says is treated as
//! untrusted: a fenced or embedded JSON object is tried first, then a scan
//! for exactly one known label. Every path ends in one of the five
//! categories; failures resolve to `General`.

use crate::model::{LanguageModel, ModelRequest, RetryPolicy, TaskKind};
use crate::parse::extract_json_object;
use crate::prompts;
use crate::query::{Classification, FallbackReason, QueryCategory};
use serde::Deserialize;

/// Configuration for query classification
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Verdicts reporting less confidence than this resolve to `General`
    pub min_confidence: f32,
    pub retry: RetryPolicy,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.4,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    query_type: String,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    key_terms: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct QueryClassifier {
    config: ClassifierConfig,
}

impl QueryClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Classify a query; never fails
    ///
    /// The document plays no part in classification.
    pub fn classify<M: LanguageModel + ?Sized>(&self, model: &M, query: &str) -> Classification {
        let query = query.trim();
        if query.is_empty() {
            return Classification::fallback(FallbackReason::EmptyQuery);
        }

        let request = ModelRequest {
            task: TaskKind::Classify,
            system: prompts::CLASSIFIER_SYSTEM.to_string(),
            prompt: format!(
                "{}\n\n{}\n\nQuery: {}",
                prompts::LEGAL_CONTEXT,
                prompts::CLASSIFIER_TASK,
                query
            ),
            query: query.to_string(),
            document_text: None,
        };

        let classification = match self.config.retry.complete(model, &request) {
            Ok(reply) => self.interpret(&reply),
            Err(e) => {
                log::warn!("Classification failed, using general_inquiry: {}", e);
                Classification::fallback(FallbackReason::Upstream)
            }
        };

        log::info!(
            "Query classified as {} (confidence {:?}, fallback {:?})",
            classification.category,
            classification.confidence,
            classification.fallback
        );
        classification
    }

    /// Turn a model reply into a classification
    fn interpret(&self, reply: &str) -> Classification {
        let parsed = extract_json_object(reply)
            .and_then(|json| serde_json::from_str::<RawClassification>(json).ok());

        let Some(raw) = parsed else {
            return match scan_for_label(reply) {
                Some(category) => Classification {
                    category,
                    confidence: None,
                    key_terms: Vec::new(),
                    fallback: None,
                },
                None => {
                    log::warn!("Classifier reply has no recognizable label");
                    Classification::fallback(FallbackReason::UnrecognizedLabel)
                }
            };
        };

        let confidence = raw.confidence.map(|c| c.clamp(0.0, 1.0));
        let key_terms: Vec<String> = raw
            .key_terms
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        let Some(category) = QueryCategory::from_label(&raw.query_type) else {
            log::warn!("Classifier returned unknown label {:?}", raw.query_type);
            return Classification {
                confidence,
                key_terms,
                ..Classification::fallback(FallbackReason::UnrecognizedLabel)
            };
        };

        if confidence.is_some_and(|c| c < self.config.min_confidence) {
            return Classification {
                confidence,
                key_terms,
                ..Classification::fallback(FallbackReason::LowConfidence)
            };
        }

        Classification {
            category,
            confidence,
            key_terms,
            fallback: None,
        }
    }
}

/// The category whose label appears in the text, if exactly one does
fn scan_for_label(text: &str) -> Option<QueryCategory> {
    let lowered = text.to_ascii_lowercase();
    let mut found = QueryCategory::ALL
        .into_iter()
        .filter(|category| lowered.contains(category.label()));

    match (found.next(), found.next()) {
        (Some(category), None) => Some(category),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelError;
    use crate::testing::ScriptedModel;
    use std::time::Duration;

    fn classifier() -> QueryClassifier {
        QueryClassifier::new(ClassifierConfig {
            retry: RetryPolicy {
                max_retries: 1,
                backoff: Duration::ZERO,
            },
            ..ClassifierConfig::default()
        })
    }

    fn replying(reply: &'static str) -> ScriptedModel<impl Fn(&ModelRequest) -> Result<String, ModelError>> {
        ScriptedModel::new(move |_: &ModelRequest| Ok(reply.to_string()))
    }

    #[test]
    fn test_json_verdict() {
        let model = replying(
            r#"```json
{"query_type": "compliance_check", "confidence": 0.92, "key_terms": ["TCPA", " autodialer "]}
```"#,
        );
        let result = classifier().classify(&model, "Does the calling schedule comply with the TCPA?");
        assert_eq!(result.category, QueryCategory::ComplianceCheck);
        assert_eq!(result.confidence, Some(0.92));
        assert_eq!(result.key_terms, vec!["TCPA", "autodialer"]);
        assert!(!result.is_fallback());

        let requests = model.requests.lock().unwrap();
        assert_eq!(requests[0].task, TaskKind::Classify);
        assert!(requests[0].document_text.is_none());
        assert!(requests[0].prompt.contains("FDCPA compliance"));
    }

    #[test]
    fn test_bare_label_reply() {
        let model = replying("risk_assessment");
        let result = classifier().classify(&model, "What could go wrong with this settlement?");
        assert_eq!(result.category, QueryCategory::RiskAssessment);
        assert_eq!(result.confidence, None);
    }

    #[test]
    fn test_ambiguous_label_reply() {
        let model = replying("either clause_search or risk_assessment");
        let result = classifier().classify(&model, "hmm");
        assert_eq!(result.category, QueryCategory::General);
        assert_eq!(result.fallback, Some(FallbackReason::UnrecognizedLabel));
    }

    #[test]
    fn test_out_of_set_label() {
        let model = replying(r#"{"query_type": "tax_advice", "confidence": 0.9}"#);
        let result = classifier().classify(&model, "How are settlements taxed?");
        assert_eq!(result.category, QueryCategory::General);
        assert_eq!(result.fallback, Some(FallbackReason::UnrecognizedLabel));
    }

    #[test]
    fn test_low_confidence() {
        let model = replying(r#"{"query_type": "document_summary", "confidence": 0.2}"#);
        let result = classifier().classify(&model, "thoughts?");
        assert_eq!(result.category, QueryCategory::General);
        assert_eq!(result.fallback, Some(FallbackReason::LowConfidence));
        assert_eq!(result.confidence, Some(0.2));
    }

    #[test]
    fn test_empty_query_skips_model() {
        let model = replying("clause_search");
        let result = classifier().classify(&model, "   ");
        assert_eq!(result.category, QueryCategory::General);
        assert_eq!(result.fallback, Some(FallbackReason::EmptyQuery));
        assert_eq!(model.call_count(), 0);
    }

    #[test]
    fn test_timeout_resolves_to_general_after_retry() {
        let model = ScriptedModel::new(|_: &ModelRequest| Err(ModelError::Timeout));
        let result = classifier().classify(&model, "Find the arbitration clause");
        assert_eq!(result.category, QueryCategory::General);
        assert_eq!(result.fallback, Some(FallbackReason::Upstream));
        assert_eq!(model.call_count(), 2);
    }

    #[test]
    fn test_gibberish_is_total() {
        for reply in ["", "{", "{\"query_type\": 7}", "¯\\_(ツ)_/¯", "null"] {
            let model = ScriptedModel::new(move |_: &ModelRequest| Ok(reply.to_string()));
            let result = classifier().classify(&model, "asdf qwer");
            assert!(QueryCategory::ALL.contains(&result.category));
        }
    }
}
