//! Structured extraction: flattened contract text → [`ExtractedFields`].
//!
//! The model is told to answer with one bare JSON object, and the call asks
//! the provider for JSON mode ([`ReplyFormat::Json`]). Small local models
//! still wrap it in a markdown fence now and then, so [`parse_model_response`]
//! strips surrounding whitespace and a single outer fence before parsing.
//! Anything else that is not a JSON object is an [`ExtractionError`]; this
//! module never guesses at a salvageable object inside prose.
//!
//! Whether missing mandatory keys are a problem is up to consumers:
//! [`ExtractedFields`] reads an absent key the same as `"Not Found"`.

use crate::config::PipelineConfig;
use crate::error::ExtractionError;
use crate::fields::ExtractedFields;
use crate::pipeline::llm::{
    complete_with_retry, ChatTurn, LanguageModel, ModelReply, ReplyFormat,
};
use crate::prompts::{extraction_user_message, missing_schema_keys, EXTRACTION_SYSTEM_PROMPT};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

/// A whole-response code fence: ```` ```json\n{...}\n``` ````.
static OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*[ \t]*\r?\n?(.*?)\r?\n?```$").unwrap());

/// Extraction result plus token usage for stats.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub fields: ExtractedFields,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

/// Build the message list for an extraction call.
pub fn extraction_turns(document_text: &str, config: &PipelineConfig) -> Vec<ChatTurn> {
    let system = match config.system_prompt.as_deref() {
        Some(custom) => {
            let missing = missing_schema_keys(custom);
            if !missing.is_empty() {
                warn!("Custom extraction prompt does not mention {:?}", missing);
            }
            custom
        }
        None => EXTRACTION_SYSTEM_PROMPT,
    };
    vec![
        ChatTurn::system(system),
        ChatTurn::user(extraction_user_message(document_text)),
    ]
}

/// Ask the model for the contract fields and parse its answer.
pub async fn extract_fields(
    model: &dyn LanguageModel,
    document_text: &str,
    config: &PipelineConfig,
) -> Result<Extraction, ExtractionError> {
    let turns = extraction_turns(document_text, config);
    debug!("Extracting from {} chars of text", document_text.len());

    let ModelReply {
        content,
        prompt_tokens,
        completion_tokens,
    } = complete_with_retry(model, &turns, ReplyFormat::Json, config).await?;

    let fields = parse_model_response(&content)?;
    let found = fields.mandatory().iter().filter(|(_, v)| v.is_found()).count();
    info!(
        "Extraction complete: {}/{} mandatory fields found{}",
        found,
        fields.mandatory().len(),
        if fields.has_analysis() { ", with fairness analysis" } else { "" }
    );

    Ok(Extraction {
        fields,
        prompt_tokens,
        completion_tokens,
    })
}

/// Parse a model reply into [`ExtractedFields`].
pub fn parse_model_response(raw: &str) -> Result<ExtractedFields, ExtractionError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ExtractionError::EmptyResponse);
    }

    let body = OUTER_FENCE
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map_or(trimmed, |m| m.as_str().trim());

    let value: Value =
        serde_json::from_str(body).map_err(|e| ExtractionError::InvalidJson(e.to_string()))?;

    match value {
        Value::Object(map) => Ok(ExtractedFields::from_json_map(map)),
        Value::Array(_) => Err(ExtractionError::NotAnObject("array")),
        Value::String(_) => Err(ExtractionError::NotAnObject("string")),
        Value::Number(_) => Err(ExtractionError::NotAnObject("number")),
        Value::Bool(_) => Err(ExtractionError::NotAnObject("boolean")),
        Value::Null => Err(ExtractionError::NotAnObject("null")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{FieldValue, NOT_FOUND};
    use async_trait::async_trait;

    struct Canned(&'static str);

    #[async_trait]
    impl LanguageModel for Canned {
        fn name(&self) -> String {
            "canned".into()
        }

        async fn complete(
            &self,
            _turns: &[ChatTurn],
            format: ReplyFormat,
        ) -> Result<ModelReply, ExtractionError> {
            assert_eq!(format, ReplyFormat::Json, "extraction must request JSON mode");
            Ok(ModelReply {
                content: self.0.to_string(),
                prompt_tokens: 120,
                completion_tokens: 40,
            })
        }
    }

    #[test]
    fn bare_object_parses() {
        let f = parse_model_response(r#"{"APR": "5.9%", "VIN": "Not Found"}"#).unwrap();
        assert_eq!(f.apr, FieldValue::Found("5.9%".into()));
        assert_eq!(f.vin, FieldValue::NotFound);
        assert_eq!(f.finance_charge, FieldValue::Absent);
    }

    #[test]
    fn outer_fence_and_whitespace_are_tolerated() {
        let raw = "\n  ```json\n{\"APR\": \"4.5%\"}\n```  \n";
        assert_eq!(parse_model_response(raw).unwrap().apr.as_str(), "4.5%");
        let bare_fence = "```\n{\"APR\": \"4.5%\"}\n```";
        assert!(parse_model_response(bare_fence).is_ok());
    }

    #[test]
    fn prose_around_json_is_rejected() {
        let err = parse_model_response("Here you go: {\"APR\": \"1%\"}").unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidJson(_)));
    }

    #[test]
    fn non_object_json_is_rejected() {
        assert_eq!(
            parse_model_response("[1, 2]").unwrap_err(),
            ExtractionError::NotAnObject("array")
        );
        assert_eq!(
            parse_model_response("   ").unwrap_err(),
            ExtractionError::EmptyResponse
        );
    }

    #[test]
    fn custom_prompt_replaces_default() {
        let config = PipelineConfig::builder()
            .system_prompt("Only APR please")
            .build()
            .unwrap();
        let turns = extraction_turns("APR 3%", &config);
        assert_eq!(turns[0].content, "Only APR please");
        assert_eq!(turns[1].content, "Document Text:\nAPR 3%");
    }

    #[tokio::test]
    async fn extract_reports_tokens_and_fields() {
        let model = Canned(r#"{"APR": "5.9%", "fairness_score": "72", "red_flags": []}"#);
        let out = extract_fields(&model, "APR 5.9% ", &PipelineConfig::default())
            .await
            .unwrap();
        assert_eq!(out.prompt_tokens, 120);
        assert_eq!(out.fields.fairness_score(), 72.0);
        let json = serde_json::to_value(&out.fields).unwrap();
        assert_eq!(json["Monthly_Payment"], NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_reply_is_an_error() {
        let model = Canned("I could not find anything.");
        let err = extract_fields(&model, "", &PipelineConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidJson(_)));
    }
}
