//! VIN enrichment: decode the extracted VIN and attach vehicle attributes.
//!
//! Enrichment is best effort. A VIN that is missing, marked "Not Found", or
//! not exactly 17 characters is skipped without a network call; decoder
//! failures of any kind are logged and the record is returned unenriched.

use crate::config::PipelineConfig;
use crate::error::{EnrichmentError, PipelineError};
use crate::fields::{ExtractedFields, VinDetails};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Length of a modern (post-1981) VIN.
pub const VIN_LENGTH: usize = 17;

/// Decodes a VIN into vehicle attributes.
#[async_trait]
pub trait VinDecoder: Send + Sync {
    async fn decode(&self, vin: &str) -> Result<VinDetails, EnrichmentError>;
}

/// Trim and check a VIN: 17 characters, letters and digits only, never
/// I, O or Q. The result is safe to put in a URL path.
pub fn validate_vin(raw: &str) -> Result<&str, EnrichmentError> {
    let vin = raw.trim();
    let len = vin.chars().count();
    if len != VIN_LENGTH {
        return Err(EnrichmentError::InvalidVin {
            vin: vin.to_string(),
            len,
        });
    }
    if !vin.chars().all(is_vin_char) {
        return Err(EnrichmentError::MalformedVin {
            vin: vin.to_string(),
        });
    }
    Ok(vin)
}

fn is_vin_char(c: char) -> bool {
    c.is_ascii_alphanumeric() && !matches!(c.to_ascii_uppercase(), 'I' | 'O' | 'Q')
}

/// NHTSA vPIC `decodevin` client.
#[derive(Debug, Clone)]
pub struct NhtsaDecoder {
    client: reqwest::Client,
    base_url: String,
}

impl NhtsaDecoder {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PipelineError::Internal(format!("VIN decoder client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        Self::new(&config.vin_decoder_url, config.vin_timeout_secs)
    }

    fn url_for(&self, vin: &str) -> String {
        format!("{}/{}?format=json", self.base_url.trim_end_matches('/'), vin)
    }
}

#[async_trait]
impl VinDecoder for NhtsaDecoder {
    async fn decode(&self, vin: &str) -> Result<VinDetails, EnrichmentError> {
        let vin = validate_vin(vin)?;
        let resp = self
            .client
            .get(self.url_for(vin))
            .send()
            .await
            .map_err(|e| EnrichmentError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(EnrichmentError::Status(status.as_u16()));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| EnrichmentError::UnexpectedPayload(e.to_string()))?;
        parse_decode_response(&body)
    }
}

/// Pick the attributes we keep out of a vPIC `{"Results": [{Variable, Value}]}`
/// payload. Variables that are missing or empty stay `None`.
pub fn parse_decode_response(body: &Value) -> Result<VinDetails, EnrichmentError> {
    let results = body
        .get("Results")
        .and_then(Value::as_array)
        .ok_or_else(|| EnrichmentError::UnexpectedPayload("missing \"Results\" array".into()))?;

    let mut details = VinDetails::default();
    for item in results {
        let (Some(variable), Some(value)) = (
            item.get("Variable").and_then(Value::as_str),
            item.get("Value").and_then(Value::as_str),
        ) else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let slot = match variable {
            "Make" => &mut details.make,
            "Model" => &mut details.model,
            "Model Year" => &mut details.year,
            "Vehicle Type" => &mut details.vehicle_type,
            "Manufacturer Name" => &mut details.manufacturer,
            _ => continue,
        };
        *slot = Some(value.to_string());
    }
    Ok(details)
}

/// Enrich `fields` in place. Returns true when `vin_details` was attached.
pub async fn enrich(decoder: &dyn VinDecoder, fields: &mut ExtractedFields) -> bool {
    let Some(raw) = fields.vin.as_found() else {
        debug!("No VIN extracted; skipping enrichment");
        return false;
    };

    let vin = match validate_vin(raw) {
        Ok(vin) => vin.to_string(),
        Err(e) => {
            warn!("Skipping enrichment: {}", e);
            return false;
        }
    };

    match decoder.decode(&vin).await {
        Ok(details) => {
            info!(
                "VIN {} decoded: {} {} {}",
                vin,
                details.year.as_deref().unwrap_or("?"),
                details.make.as_deref().unwrap_or("?"),
                details.model.as_deref().unwrap_or("?")
            );
            fields.vin_details = Some(details);
            true
        }
        Err(e) => {
            warn!("VIN enrichment failed for {}: {}", vin, e);
            false
        }
    }
}
