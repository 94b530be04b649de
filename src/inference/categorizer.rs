//! Hierarchical entity categorization over an [`LlmProvider`].

use serde::{Deserialize, Serialize};

use super::merge_extractions;
use crate::categories::{Hierarchy, Level};
use crate::error::LlmError;
use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::ner::{NerRecord, NerRecords};
use crate::utils::collapse_whitespace;

/// System prompt sent with every request.
pub const SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Builds the question asked at one level of the descent.
pub fn category_prompt(entity: &str, sentence: &str, level: Level, options: &[String]) -> String {
    let names = options
        .iter()
        .map(|name| name.to_lowercase())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "The ##{}## in the sentence: \"{}\" belong to which entity in the {} list: {}",
        entity.to_lowercase(),
        sentence,
        level.ordinal(),
        names
    )
}

/// Settings of a categorization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategorizerConfig {
    /// Model that marks entities. Empty selects the provider default.
    pub extraction_model: String,
    /// Model that picks categories. Empty selects the provider default.
    pub categorization_model: String,
    /// Extraction responses sampled per sentence.
    pub repeat: usize,
    /// Stop after this many sentences.
    pub limit: Option<usize>,
    pub temperature: Option<f64>,
    pub max_tokens: u32,
}

impl Default for CategorizerConfig {
    fn default() -> Self {
        Self {
            extraction_model: String::new(),
            categorization_model: String::new(),
            repeat: 3,
            limit: None,
            temperature: None,
            max_tokens: 512,
        }
    }
}

/// Counters of a categorization run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceReport {
    /// Sentences sent to the extraction model.
    pub processed: usize,
    /// Sentences written to the output.
    pub categorized: usize,
    /// Sentences with no extracted entity.
    pub no_entities: usize,
    /// Sentences dropped because an answer did not resolve.
    pub unresolved: usize,
    /// Sentences dropped because a request failed.
    pub failed: usize,
}

/// Extracts entities from sentences and assigns each one a category by
/// descending the hierarchy one level per request.
pub struct HierarchicalCategorizer<'a> {
    provider: &'a dyn LlmProvider,
    hierarchy: &'a Hierarchy,
    config: CategorizerConfig,
}

impl<'a> HierarchicalCategorizer<'a> {
    pub fn new(
        provider: &'a dyn LlmProvider,
        hierarchy: &'a Hierarchy,
        config: CategorizerConfig,
    ) -> Self {
        Self {
            provider,
            hierarchy,
            config,
        }
    }

    pub fn config(&self) -> &CategorizerConfig {
        &self.config
    }

    async fn ask(&self, model: &str, query: String) -> Result<String, LlmError> {
        let mut request = GenerationRequest::new(
            model,
            vec![Message::system(SYSTEM_PROMPT), Message::user(query)],
        )
        .with_max_tokens(self.config.max_tokens);
        if let Some(temperature) = self.config.temperature {
            request = request.with_temperature(temperature);
        }

        let response = self.provider.generate(request).await?;
        response
            .first_content()
            .map(str::to_string)
            .ok_or(LlmError::EmptyResponse)
    }

    /// Samples the extraction model `repeat` times and merges the spans.
    pub async fn extract_entities(&self, sentence: &str) -> Result<Vec<String>, LlmError> {
        let mut responses = Vec::with_capacity(self.config.repeat.max(1));
        for _ in 0..self.config.repeat.max(1) {
            responses.push(
                self.ask(&self.config.extraction_model, sentence.to_string())
                    .await?,
            );
        }
        Ok(merge_extractions(&responses))
    }

    /// Maps a free-text answer onto one of the offered names.
    fn resolve_choice(&self, answer: &str, options: &[String]) -> Option<&'a str> {
        let cleaned = collapse_whitespace(
            answer
                .trim()
                .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '.')),
        );
        let hierarchy: &'a Hierarchy = self.hierarchy;
        hierarchy
            .resolve(&cleaned)
            .filter(|name| options.iter().any(|option| option == name))
    }

    /// Walks one entity down the hierarchy. Returns `None` when an answer
    /// does not resolve to an offered category.
    ///
    /// The descent stops at the third level or at a category without
    /// children.
    pub async fn categorize_entity(
        &self,
        sentence: &str,
        entity: &str,
    ) -> Result<Option<String>, LlmError> {
        let hierarchy: &'a Hierarchy = self.hierarchy;
        let mut level = Level::First;
        let mut options: &'a [String] = hierarchy.first_level();

        loop {
            let query = category_prompt(entity, sentence, level, options);
            let answer = self.ask(&self.config.categorization_model, query).await?;
            let Some(category) = self.resolve_choice(&answer, options) else {
                tracing::debug!(
                    entity = %entity,
                    level = level.ordinal(),
                    answer = %answer.trim(),
                    "Answer does not name an offered category"
                );
                return Ok(None);
            };

            let children = hierarchy.children_of(category);
            match level.deeper() {
                Some(next) if !children.is_empty() => {
                    level = next;
                    options = children;
                }
                _ => return Ok(Some(category.to_string())),
            }
        }
    }

    /// Categorizes already extracted entities. Returns `None` as soon as one
    /// entity fails to resolve.
    async fn categorize_entities(
        &self,
        sentence: &str,
        entities: Vec<String>,
    ) -> Result<Option<NerRecord>, LlmError> {
        let mut record = NerRecord::new(sentence);
        for entity in entities {
            match self.categorize_entity(sentence, &entity).await? {
                Some(category) => record.push(entity, category),
                None => return Ok(None),
            }
        }
        Ok(Some(record))
    }

    /// Extracts and categorizes one sentence.
    ///
    /// Returns `None` if no entity was found or any entity failed to
    /// resolve.
    pub async fn categorize_sentence(&self, sentence: &str) -> Result<Option<NerRecord>, LlmError> {
        let entities = self.extract_entities(sentence).await?;
        if entities.is_empty() {
            return Ok(None);
        }
        self.categorize_entities(sentence, entities).await
    }

    /// Categorizes every record's sentence, keeping input keys.
    ///
    /// Failed requests and unresolved answers drop the sentence and are
    /// counted in the report; they never abort the run.
    pub async fn categorize_records(
        &self,
        records: &[(String, NerRecord)],
    ) -> (NerRecords, InferenceReport) {
        let mut output = Vec::new();
        let mut report = InferenceReport::default();
        let limit = self.config.limit.unwrap_or(usize::MAX);

        for (key, input) in records.iter().take(limit) {
            let sentence = input.sentence.as_str();
            if sentence.trim().is_empty() {
                continue;
            }
            report.processed += 1;

            let categorized = match self.extract_entities(sentence).await {
                Ok(entities) if entities.is_empty() => {
                    report.no_entities += 1;
                    continue;
                }
                Ok(entities) => self.categorize_entities(sentence, entities).await,
                Err(e) => Err(e),
            };

            match categorized {
                Ok(Some(record)) => {
                    report.categorized += 1;
                    output.push((key.clone(), record));
                }
                Ok(None) => report.unresolved += 1,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Request failed, dropping sentence");
                    report.failed += 1;
                }
            }

            tracing::info!(
                key = %key,
                processed = report.processed,
                total = records.len().min(limit),
                "Processed sentence"
            );
        }

        tracing::info!(
            processed = report.processed,
            categorized = report.categorized,
            no_entities = report.no_entities,
            unresolved = report.unresolved,
            failed = report.failed,
            "Categorization complete"
        );
        (output, report)
    }
}
