//! Chat about a stored contract.
//!
//! The stored OCR data is flattened the same way as for extraction and sent
//! as context in the system prompt; the model then answers the user's
//! question with negotiation-oriented advice.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::flatten::flatten_text;
use crate::pipeline::llm::{complete_with_retry, ChatRole, ChatTurn, LanguageModel, ReplyFormat};
use crate::prompts::chat_system_prompt;
use crate::store::{run_blocking, SharedStore};
use tracing::{debug, info};

/// Answer `message` about document `doc_id`, given the prior conversation.
///
/// Only user and assistant turns with content are taken from `history`;
/// system turns are dropped, since the document context is always supplied
/// fresh.
pub async fn chat_with_document(
    store: &SharedStore,
    model: &dyn LanguageModel,
    config: &PipelineConfig,
    doc_id: i64,
    message: &str,
    history: &[ChatTurn],
) -> Result<ChatTurn, PipelineError> {
    let record = run_blocking(store, move |s| s.get(doc_id))
        .await?
        .ok_or(PipelineError::DocumentNotFound { id: doc_id })?;

    let text = flatten_text(&record.ocr_data);
    if text.trim().is_empty() {
        return Err(PipelineError::NoDocumentText { id: doc_id });
    }

    let mut turns = Vec::with_capacity(history.len() + 2);
    turns.push(ChatTurn::system(chat_system_prompt(&text)));
    turns.extend(
        history
            .iter()
            .filter(|t| t.role != ChatRole::System && !t.content.trim().is_empty())
            .cloned(),
    );
    turns.push(ChatTurn::user(message));
    debug!(
        "Chat on document {} ({}): {} prior turns",
        doc_id,
        record.filename,
        turns.len() - 2
    );

    let reply = complete_with_retry(model, &turns, ReplyFormat::Text, config).await?;
    info!("Chat reply for document {}: {} chars", doc_id, reply.content.len());
    Ok(ChatTurn::assistant(reply.content))
}
