//! Query engine
//!
//! Runs one question against one document end to end:
//! load → navigate → synthesize → verify → record.
//!
//! A query owns its audit record and its chunk tree, so concurrent queries
//! on one engine share nothing but the injected backends. Document load
//! failures abort before anything is recorded; any later hard failure still
//! persists the partial record before the error is returned.

use crate::audit::AuditRecorder;
use crate::filter::RelevanceFilter;
use crate::input_parser::InputParser;
use crate::navigator::Navigator;
use crate::synthesizer::Synthesizer;
use crate::verifier::Verifier;
use chrono::Utc;
use docnav_common::errors::{AppError, Result};
use docnav_common::metrics;
use docnav_common::models::{
    Answer, Chunk, Document, QaRecord, RecordOutcome, Stage, StopReason, VerificationResult,
};
use docnav_common::{AppConfig, CompletionBackends};
use docnav_ingestion::{BoundaryRules, DocumentSource, FsDocumentSource, Segmenter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Result of a query that did not fail
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    Answered {
        answer: Answer,
        verification: VerificationResult,
        /// Chunks the answer cites, in citation order
        cited_fragments: Vec<Chunk>,
        record_location: PathBuf,
    },
    NoRelevantContent {
        record_location: PathBuf,
    },
}

impl QueryOutcome {
    pub fn record_location(&self) -> &Path {
        match self {
            QueryOutcome::Answered { record_location, .. } => record_location,
            QueryOutcome::NoRelevantContent { record_location } => record_location,
        }
    }
}

/// End-to-end question answering over local documents
pub struct QueryEngine {
    source: Arc<dyn DocumentSource>,
    navigator: Navigator,
    synthesizer: Synthesizer,
    verifier: Verifier,
    input_parser: InputParser,
    recorder: AuditRecorder,
}

impl QueryEngine {
    /// Assemble an engine from explicit backends and document source
    pub fn new(config: &AppConfig, backends: CompletionBackends, source: Arc<dyn DocumentSource>) -> Self {
        let nav = &config.navigation;
        let segmenter = Segmenter::new(BoundaryRules {
            newline_is_paragraph: nav.newline_is_paragraph,
            ..BoundaryRules::default()
        });
        let filter = RelevanceFilter::new(
            backends.router.clone(),
            nav.batch_token_budget,
            nav.max_concurrent_batches,
        );

        Self {
            source,
            navigator: Navigator::new(segmenter, filter, nav.clone()),
            synthesizer: Synthesizer::new(backends.reasoning.clone()),
            verifier: Verifier::new(backends.verification.clone()),
            input_parser: InputParser::new(backends.reasoning),
            recorder: AuditRecorder::new(&config.audit.dir),
        }
    }

    /// Validate `config` and build OpenAI-compatible backends and a filesystem source
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        config.validate()?;
        let backends = CompletionBackends::from_config(&config.models)?;
        Ok(Self::new(config, backends, Arc::new(FsDocumentSource::default())))
    }

    /// Answer `question` from the document at `document_path`
    #[instrument(skip(self))]
    pub async fn answer(&self, question: &str, document_path: &str) -> Result<QueryOutcome> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AppError::InvalidInput {
                message: "question is empty".to_string(),
            });
        }
        if document_path.trim().is_empty() {
            return Err(AppError::MissingField {
                field: "document_path".to_string(),
            });
        }

        let record = QaRecord::begin(question, document_path.trim());
        self.run(record).await
    }

    /// Parse free-form input into question and path, then answer it
    #[instrument(skip_all)]
    pub async fn ask(&self, raw_input: &str) -> Result<QueryOutcome> {
        let started_at = Utc::now();
        let parsed = self.input_parser.parse(raw_input).await?;

        let mut record = QaRecord::begin(parsed.question.clone(), parsed.document_path.clone());
        record.started_at = started_at;
        record.raw_input = Some(raw_input.to_string());
        record.parsed_input = Some(parsed);
        record.stage_finished(Stage::ParseInput, started_at);

        self.run(record).await
    }

    async fn run(&self, mut record: QaRecord) -> Result<QueryOutcome> {
        let started_at = Utc::now();
        let document = self.source.read(Path::new(&record.document_path)).await?;
        record.document = Some((&document).into());
        record.stage_finished(Stage::LoadDocument, started_at);

        match self.process(&document, &mut record).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                error!(query_id = %record.query_id, error = %err, code = err.code().as_code(), "Query failed");
                record.fail(&err);
                metrics::record_query("failed", record.passes.len().saturating_sub(1));
                if let Err(write_err) = self.recorder.record(record).await {
                    warn!(error = %write_err, "Could not persist the record of a failed query");
                }
                Err(err)
            }
        }
    }

    async fn process(
        &self,
        document: &Document,
        record: &mut QaRecord,
    ) -> Result<QueryOutcome> {
        let question = record.question.clone();

        let started_at = Utc::now();
        let navigation = self.navigator.navigate(&question, document, record).await?;
        record.stage_finished(Stage::Navigate, started_at);

        if navigation.stop_reason == StopReason::NoRelevantContent {
            record.finish(RecordOutcome::NoRelevantContent);
            metrics::record_query("no_relevant_content", 0);
            let record_location = self.recorder.record(record.clone()).await?;
            info!(path = %record_location.display(), "No relevant content found");
            return Ok(QueryOutcome::NoRelevantContent { record_location });
        }

        let fragments = navigation.fragment_chunks();

        let started_at = Utc::now();
        let synthesis = self.synthesizer.synthesize(&question, &fragments).await?;
        record.answer = Some(synthesis.answer.clone());
        record.citation_violations = synthesis.violations;
        record.stage_finished(Stage::Synthesize, started_at);

        let started_at = Utc::now();
        let verification = self
            .verifier
            .verify(&question, &synthesis.answer, &fragments)
            .await?;
        record.verification = Some(verification.clone());
        record.stage_finished(Stage::Verify, started_at);

        record.finish(RecordOutcome::Answered);
        metrics::record_query("answered", navigation.fine_passes);

        let cited_fragments: Vec<Chunk> = navigation
            .tree
            .resolve(&synthesis.answer.cited_fragment_ids)
            .cloned()
            .collect();
        let record_location = self.recorder.record(record.clone()).await?;

        info!(
            path = %record_location.display(),
            is_correct = verification.is_correct,
            cited = cited_fragments.len(),
            "Query answered"
        );

        Ok(QueryOutcome::Answered {
            answer: synthesis.answer,
            verification,
            cited_fragments,
            record_location,
        })
    }
}
