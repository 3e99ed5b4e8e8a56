//! Query workflow: classify, dispatch to one handler, respond
//!
//! Each query runs through `Received -> Classified -> Dispatched ->
//! Completed`. Classification cannot fail (it falls back to `General`), so
//! the only way into `Failed` is a handler whose model call fails after
//! retries or whose reply does not validate.

use crate::classifier::QueryClassifier;
use crate::document::Document;
use crate::handlers::{HandlerKind, Response};
use crate::model::{LanguageModel, ModelError, ModelRequest, RetryPolicy};
use crate::query::{Classification, Query, QueryError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Received,
    Classified,
    Dispatched,
    Completed,
    Failed,
}

impl Stage {
    pub fn can_advance_to(self, next: Stage) -> bool {
        matches!(
            (self, next),
            (Stage::Received, Stage::Classified)
                | (Stage::Classified, Stage::Dispatched)
                | (Stage::Dispatched, Stage::Completed)
                | (Stage::Received | Stage::Classified | Stage::Dispatched, Stage::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkflowError {
    #[error("invalid query: {0}")]
    Query(#[from] QueryError),
    /// The handler's model call failed or its reply did not validate
    #[error("analysis could not be completed by {handler}: {source}")]
    Upstream {
        handler: HandlerKind,
        #[source]
        source: ModelError,
    },
}

/// Everything known about one query while it is being answered
#[derive(Debug)]
pub struct WorkflowState<'d> {
    document: &'d Document,
    query: Query,
    stage: Stage,
    history: Vec<Stage>,
    classification: Option<Classification>,
    handler: Option<HandlerKind>,
    response: Option<Response>,
    failure: Option<WorkflowError>,
}

impl<'d> WorkflowState<'d> {
    fn new(document: &'d Document, query: Query) -> Self {
        Self {
            document,
            query,
            stage: Stage::Received,
            history: vec![Stage::Received],
            classification: None,
            handler: None,
            response: None,
            failure: None,
        }
    }

    fn advance(&mut self, next: Stage) {
        debug_assert!(
            self.stage.can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.stage,
            next
        );
        log::debug!("Workflow {:?} -> {:?}", self.stage, next);
        self.stage = next;
        self.history.push(next);
    }

    pub fn document(&self) -> &'d Document {
        self.document
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Every stage visited, in order
    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    pub fn classification(&self) -> Option<&Classification> {
        self.classification.as_ref()
    }

    pub fn handler(&self) -> Option<HandlerKind> {
        self.handler
    }

    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    pub fn failure(&self) -> Option<&WorkflowError> {
        self.failure.as_ref()
    }

    /// The response of a completed run, or the reason it failed
    pub fn into_result(self) -> Result<Response, WorkflowError> {
        match (self.response, self.failure) {
            (Some(response), _) => Ok(response),
            (None, Some(failure)) => Err(failure),
            (None, None) => Err(WorkflowError::Upstream {
                handler: self.handler.unwrap_or(HandlerKind::GeneralAssistant),
                source: ModelError::Malformed("workflow did not complete".to_string()),
            }),
        }
    }
}

/// Applies a retry policy to every call a handler makes
struct Retrying<'a, M: ?Sized> {
    model: &'a M,
    policy: &'a RetryPolicy,
}

impl<M: LanguageModel + ?Sized> LanguageModel for Retrying<'_, M> {
    fn complete(&self, request: &ModelRequest) -> Result<String, ModelError> {
        self.policy.complete(self.model, request)
    }
}

/// Answers queries about a document with a language model
pub struct Router<M> {
    model: M,
    classifier: QueryClassifier,
    retry: RetryPolicy,
}

impl<M: LanguageModel> Router<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            classifier: QueryClassifier::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_classifier(mut self, classifier: QueryClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Retry policy for handler calls
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Run one query through the workflow and return the final state
    pub fn run<'d>(&self, document: &'d Document, query: Query) -> WorkflowState<'d> {
        let mut state = WorkflowState::new(document, query);

        let classification = self.classifier.classify(&self.model, state.query.as_str());
        let kind = HandlerKind::for_category(classification.category);
        state.classification = Some(classification);
        state.advance(Stage::Classified);

        state.handler = Some(kind);
        state.advance(Stage::Dispatched);
        log::info!("Dispatching query to {}", kind);

        let model = Retrying {
            model: &self.model,
            policy: &self.retry,
        };
        match kind.handler().handle(&model, document, &state.query) {
            Ok(response) => {
                state.response = Some(response);
                state.advance(Stage::Completed);
            }
            Err(source) => {
                log::warn!("{} failed: {}", kind, source);
                state.failure = Some(WorkflowError::Upstream {
                    handler: kind,
                    source,
                });
                state.advance(Stage::Failed);
            }
        }

        state
    }

    /// Validate a query and answer it
    pub fn answer(&self, document: &Document, query: &str) -> Result<Response, WorkflowError> {
        let query = Query::new(query)?;
        self.run(document, query).into_result()
    }
}
