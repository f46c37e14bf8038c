//! Prompts for structured extraction and document chat.
//!
//! Kept in one place so a prompt change is a one-file diff and unit tests can
//! inspect prompts without a model. Callers can override the extraction
//! instructions via [`crate::config::PipelineConfig::system_prompt`]; the
//! document text is always sent as a separate user message.

use crate::fields::{MANDATORY_FIELDS, NOT_FOUND};

/// Default extraction instructions.
pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are an expert document extraction assistant. You receive the OCR text of a vehicle purchase or financing contract and extract specific financial and vehicle details from it.

Extract these fields:
1. APR — the Annual Percentage Rate. Look for "Annual Percentage Rate" or similar wording.
2. Finance_Charge — the dollar amount of the finance charge.
3. Amount_Financed — the amount financed.
4. Total_Sale_Price — the total sale price.
5. VIN — the 17-character Vehicle Identification Number.
6. Monthly_Payment — the monthly payment or installment amount.
7. Graduation_Date — the expected graduation date, if the contract has one.
8. Fair_Price — the fair price you would suggest for the vehicle given everything extracted.

Then assess the FAIRNESS of the contract terms for the consumer:
9. fairness_score — a number from 0 to 100, where 100 is most fair to the consumer.
10. red_flags — a list of strings describing unfair, predatory or suspicious terms. Quote the concrete values found in the text (for example "Late charge of 5%", not "Late charge of %"). Never use placeholders.
11. green_flags — a list of strings describing consumer-friendly terms (low APR, no prepayment penalty, clear disclosures).
12. summary — one or two sentences summarising how fair the contract is.

Search the whole document before giving up on a field: values are often split across lines or pages by the OCR.

OUTPUT FORMAT
Return ONLY a single valid JSON object. No markdown, no code fences, no commentary.
Keys: "APR", "Finance_Charge", "Amount_Financed", "Total_Sale_Price", "VIN", "Monthly_Payment", "Graduation_Date", "Fair_Price", "fairness_score", "red_flags", "green_flags", "summary".
If a value cannot be found, set it to "Not Found"."#;

/// Wrap the flattened document text as the user turn of an extraction request.
pub fn extraction_user_message(document_text: &str) -> String {
    format!("Document Text:\n{document_text}")
}

/// Check a custom extraction prompt names every mandatory key and the sentinel.
///
/// Returns the keys the prompt forgets; an empty list means it is complete.
pub fn missing_schema_keys(prompt: &str) -> Vec<&'static str> {
    let mut missing: Vec<&'static str> = MANDATORY_FIELDS
        .into_iter()
        .filter(|key| !prompt.contains(key))
        .collect();
    if !prompt.contains(NOT_FOUND) {
        missing.push(NOT_FOUND);
    }
    missing
}

/// System prompt for chatting about one stored contract.
pub fn chat_system_prompt(document_text: &str) -> String {
    format!(
        r#"You are an expert contract negotiation assistant. A user is asking questions about the following contract.

Contract Text:
{document_text}

Instructions:
1. Answer the user's question based strictly on the contract text above.
2. If the answer is not in the contract, say so.
3. Give negotiation advice where relevant, for example whether a term is standard or unusual.
4. Keep answers concise but informative.
5. You are speaking to the person reviewing this contract."#
    )
}
