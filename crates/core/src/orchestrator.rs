use crate::error::{AnswerError, RetrievalError};
use crate::models::{Answer, DocumentType, GenerationMessage, RetrievedDocument, Role};
use crate::providers::process_text;
use crate::stores::collection_name;
use crate::templates::TemplateParser;
use crate::traits::{
    EmbeddingCapability, GenerationCapability, LlmProvider, VectorStoreCapability,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Embeds a question and searches the project's collection.
#[derive(Clone)]
pub struct RetrievalOrchestrator {
    embedder: Arc<dyn LlmProvider>,
    vector_store: Arc<dyn VectorStoreCapability>,
}

impl RetrievalOrchestrator {
    pub fn new(embedder: Arc<dyn LlmProvider>, vector_store: Arc<dyn VectorStoreCapability>) -> Self {
        Self {
            embedder,
            vector_store,
        }
    }

    /// Returns at most `limit` documents in backend order, best first. A
    /// project that was never indexed yields no documents.
    pub async fn retrieve(
        &self,
        project_id: &str,
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<RetrievedDocument>, RetrievalError> {
        if limit == 0 {
            return Err(RetrievalError::Invalid("limit must be positive".to_string()));
        }
        if query_text.trim().is_empty() {
            return Err(RetrievalError::Invalid("query is empty".to_string()));
        }

        let collection = collection_name(project_id);
        if !self.vector_store.collection_exists(&collection).await? {
            debug!(project_id, collection = %collection, "collection absent");
            return Ok(Vec::new());
        }

        let vector = self
            .embedder
            .embed_text(query_text, DocumentType::Query)
            .await?;
        let mut documents = self
            .vector_store
            .search(&collection, &vector, limit)
            .await?
            .unwrap_or_default();
        documents.truncate(limit);

        debug!(project_id, hits = documents.len(), "retrieval finished");
        Ok(documents)
    }
}

/// Answers questions from retrieved evidence.
pub struct AnswerOrchestrator {
    retrieval: RetrievalOrchestrator,
    generator: Arc<dyn LlmProvider>,
    templates: TemplateParser,
}

impl AnswerOrchestrator {
    pub fn new(
        retrieval: RetrievalOrchestrator,
        generator: Arc<dyn LlmProvider>,
        templates: TemplateParser,
    ) -> Self {
        Self {
            retrieval,
            generator,
            templates,
        }
    }

    /// Characters a document block adds besides its text, separator included.
    fn document_frame(&self, doc_num: usize) -> usize {
        self.templates.document(doc_num, "").chars().count() + 1
    }

    /// Builds the user prompt within the generator's input budget. The footer
    /// holding the question is always kept whole; documents share what is left,
    /// best first, and the lowest-ranked ones are dropped when even an empty
    /// block would not fit.
    fn build_prompt(&self, question: &str, evidence: &[RetrievedDocument]) -> String {
        let footer = self.templates.footer(question);
        let budget = self.generator.max_input_characters();
        let mut remaining = budget.saturating_sub(footer.chars().count() + 2);

        let mut count = evidence.len();
        while count > 0 && remaining / count <= self.document_frame(count) {
            count -= 1;
        }

        let mut blocks = Vec::with_capacity(count);
        for (index, document) in evidence.iter().take(count).enumerate() {
            let share = remaining / (count - index);
            let limit = share.saturating_sub(self.document_frame(index + 1));
            let text = process_text(&document.text, limit);
            let block = self.templates.document(index + 1, &text);
            remaining = remaining.saturating_sub(block.chars().count() + 1);
            blocks.push(block);
        }

        if blocks.len() < evidence.len() {
            debug!(
                kept = blocks.len(),
                retrieved = evidence.len(),
                budget,
                "evidence trimmed to the input budget"
            );
        }

        let documents = if blocks.is_empty() {
            self.templates.no_documents().to_string()
        } else {
            blocks.join("\n")
        };
        format!("{documents}\n\n{footer}")
    }

    pub async fn answer(
        &self,
        project_id: &str,
        question: &str,
        limit: usize,
    ) -> Result<Answer, AnswerError> {
        let evidence = self.retrieval.retrieve(project_id, question, limit).await?;
        let full_prompt = self.build_prompt(question, &evidence);
        let chat_history = vec![GenerationMessage::new(
            Role::System,
            self.templates.system_prompt(),
        )];

        let answer_text = self
            .generator
            .generate_text(&full_prompt, &chat_history, None, None)
            .await?;
        info!(
            project_id,
            evidence = evidence.len(),
            generator = self.generator.name(),
            "answer generated"
        );

        Ok(Answer {
            answer_text,
            evidence,
            full_prompt,
            chat_history,
        })
    }
}
