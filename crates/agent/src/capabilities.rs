//! Model-backed collaborators: summarizer, researcher, SQL translator, responder.

use std::sync::Arc;

use async_trait::async_trait;
use shopper_core::collaborators::{
    Researcher, SqlTranslator, Summarizer, SummaryDraft, TextGenerator,
};
use shopper_core::errors::CollaboratorError;

use crate::classifier::parse_json_reply;
use crate::llm::LlmClient;
use crate::prompts;

pub const RESEARCH_QUERY_COUNT: usize = 5;

pub struct LlmSummarizer {
    client: Arc<dyn LlmClient>,
}

impl LlmSummarizer {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, review_texts: &[String]) -> Result<SummaryDraft, CollaboratorError> {
        let reply = self
            .client
            .complete(prompts::SUMMARIZER_SYSTEM, &prompts::summary_prompt(review_texts))
            .await?;
        // Plain prose is still a usable summary.
        Ok(parse_json_reply::<SummaryDraft>(&reply)
            .unwrap_or_else(|_| SummaryDraft { overall: reply.trim().to_string(), ..SummaryDraft::default() }))
    }
}

pub struct LlmResearcher {
    client: Arc<dyn LlmClient>,
    query_count: usize,
}

impl LlmResearcher {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client, query_count: RESEARCH_QUERY_COUNT }
    }
}

#[async_trait]
impl Researcher for LlmResearcher {
    async fn research(&self, intent: &str) -> Result<Vec<String>, CollaboratorError> {
        let reply = self
            .client
            .complete(prompts::RESEARCHER_SYSTEM, &prompts::research_prompt(intent, self.query_count))
            .await?;
        let raw = parse_json_reply::<Vec<String>>(&reply).unwrap_or_else(|_| listed_lines(&reply));

        let mut queries: Vec<String> = Vec::with_capacity(self.query_count);
        for query in raw.into_iter().map(|query| query.trim().to_string()) {
            if !query.is_empty()
                && !queries.iter().any(|seen| seen.eq_ignore_ascii_case(&query))
            {
                queries.push(query);
            }
        }
        queries.truncate(self.query_count);

        if queries.is_empty() {
            return Err(CollaboratorError::Malformed("research produced no queries".to_string()));
        }
        Ok(queries)
    }
}

/// Bullet or numbered lines from a prose reply.
fn listed_lines(reply: &str) -> Vec<String> {
    reply
        .lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '.' | ')' | '-' | '*'))
                .trim()
                .trim_matches('"')
                .to_string()
        })
        .filter(|line| !line.is_empty() && !line.ends_with(':'))
        .collect()
}

pub struct LlmSqlTranslator {
    client: Arc<dyn LlmClient>,
    row_limit: u32,
}

impl LlmSqlTranslator {
    pub fn new(client: Arc<dyn LlmClient>, row_limit: u32) -> Self {
        Self { client, row_limit }
    }
}

#[async_trait]
impl SqlTranslator for LlmSqlTranslator {
    async fn translate(&self, question: &str, schema: &str) -> Result<String, CollaboratorError> {
        let reply = self
            .client
            .complete(prompts::SQL_SYSTEM, &prompts::sql_prompt(question, schema, self.row_limit))
            .await?;
        let sql = reply.trim();
        if sql.is_empty() {
            return Err(CollaboratorError::Malformed("translator returned no SQL".to_string()));
        }
        Ok(sql.to_string())
    }
}

pub struct LlmTextGenerator {
    client: Arc<dyn LlmClient>,
}

impl LlmTextGenerator {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TextGenerator for LlmTextGenerator {
    async fn generate_text(&self, prompt: &str) -> Result<String, CollaboratorError> {
        Ok(self.client.complete(prompts::RESPONDER_SYSTEM, prompt).await?)
    }
}
