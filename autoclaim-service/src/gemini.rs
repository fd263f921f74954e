//! Gemini vision client.
//!
//! Sends the accident photo with a fixed adjuster instruction and a strict
//! response schema, and parses the model's reply as a [`DamageReport`]. Any
//! parse failure is surfaced, never silently defaulted.

use async_trait::async_trait;
use claim_flow::{ClaimError, DamageReport, ImagePayload, Result, VisionClient};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, error};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

const SYSTEM_INSTRUCTION: &str = r#"You are an expert Nigerian Motor Insurance Adjuster AI.
Your task is to analyze photos of vehicle accidents in Nigeria.

STEP 1: IMAGE ANALYSIS
- Identify the vehicle type (Make, Model, Year) and the specific area of impact.
- Determine if the damage is "Structural" (chassis/engine) or "Cosmetic" (bumpers/fenders).

STEP 2: DAMAGE ASSESSMENT
- List specific damaged parts (e.g., "Front Nearside Headlight", "Bumper Clip").
- Categorize severity: Minor, Moderate, Structural, or Totaled.

STEP 3: FRAUD DETECTION
- Check if the damage is "consistent" (e.g., if the bumper is smashed, is the headlight also cracked as expected?).

OUTPUT FORMAT:
You must return a JSON object matching the requested schema."#;

const USER_PROMPT: &str = "Analyze this vehicle accident image for an insurance claim.";

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "systemInstruction")]
    system_instruction: Content,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Serialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseMimeType")]
    response_mime_type: String,
    #[serde(rename = "responseSchema")]
    response_schema: Value,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: String,
}

/// Schema the model output is constrained to; mirrors [`DamageReport`]
/// field for field.
fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "vehicle_info": {
                "type": "OBJECT",
                "properties": {
                    "make": { "type": "STRING" },
                    "model": { "type": "STRING" },
                    "year": { "type": "STRING" },
                    "plate": { "type": "STRING", "description": "License plate if visible" }
                },
                "required": ["make", "model"]
            },
            "damage_summary": {
                "type": "ARRAY",
                "items": { "type": "STRING" }
            },
            "severity": {
                "type": "STRING",
                "enum": ["Minor", "Moderate", "Structural", "Totaled"]
            },
            "confidence_score": { "type": "NUMBER" },
            "is_consistent": { "type": "BOOLEAN" }
        },
        "required": ["vehicle_info", "damage_summary", "severity", "confidence_score", "is_consistent"]
    })
}

pub struct GeminiVisionClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiVisionClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model,
        }
    }

    fn build_request(image: &ImagePayload) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text {
                        text: USER_PROMPT.to_string(),
                    },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: image.mime_type.clone(),
                            data: image.base64_data.clone(),
                        },
                    },
                ],
            }],
            system_instruction: Content {
                parts: vec![Part::Text {
                    text: SYSTEM_INSTRUCTION.to_string(),
                }],
            },
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
                response_schema: response_schema(),
            },
        }
    }

    fn parse_report(text: &str) -> Result<DamageReport> {
        serde_json::from_str(text.trim())
            .map_err(|e| ClaimError::Parse(format!("damage report did not match schema: {e}")))
    }
}

#[async_trait]
impl VisionClient for GeminiVisionClient {
    async fn analyze(&self, image: &ImagePayload) -> Result<DamageReport> {
        let url = format!(
            "{GEMINI_API_BASE}/{}:generateContent?key={}",
            self.model, self.api_key
        );
        let request = Self::build_request(image);

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ClaimError::Upstream(format!("vision model request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, "vision model returned an error");
            return Err(ClaimError::Upstream(format!(
                "vision model returned {status}: {body}"
            )));
        }

        let payload: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ClaimError::Upstream(format!("vision model response unreadable: {e}")))?;

        let text = payload
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
            .ok_or_else(|| ClaimError::Upstream("vision model returned no text".to_string()))?;

        debug!(response_length = text.len(), "vision model responded");
        Self::parse_report(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claim_flow::Severity;

    #[test]
    fn request_serializes_camel_case_wire_names() {
        let image = ImagePayload {
            mime_type: "image/jpeg".to_string(),
            base64_data: "base64data".to_string(),
        };
        let request = GeminiVisionClient::build_request(&image);
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"systemInstruction\""));
        assert!(json.contains("\"generationConfig\""));
        assert!(json.contains("\"responseMimeType\":\"application/json\""));
        assert!(json.contains("\"responseSchema\""));
        assert!(json.contains("\"inlineData\""));
        assert!(json.contains("\"mimeType\":\"image/jpeg\""));
        assert!(json.contains("\"data\":\"base64data\""));
    }

    #[test]
    fn request_schema_constrains_severity_enum() {
        let schema = response_schema();
        assert_eq!(
            schema["properties"]["severity"]["enum"],
            json!(["Minor", "Moderate", "Structural", "Totaled"])
        );
        assert_eq!(
            schema["required"],
            json!([
                "vehicle_info",
                "damage_summary",
                "severity",
                "confidence_score",
                "is_consistent"
            ])
        );
    }

    #[test]
    fn parse_report_accepts_schema_conforming_text() {
        let text = r#"{
            "vehicle_info": {"make": "Toyota", "model": "Camry", "year": "2018"},
            "damage_summary": ["Front bumper crack"],
            "severity": "Moderate",
            "confidence_score": 0.87,
            "is_consistent": true
        }"#;
        let report = GeminiVisionClient::parse_report(text).unwrap();
        assert_eq!(report.vehicle_info.make, "Toyota");
        assert_eq!(report.severity, Severity::Moderate);
    }

    #[test]
    fn parse_report_rejects_non_json_text() {
        let err = GeminiVisionClient::parse_report("I could not analyze the image").unwrap_err();
        assert!(matches!(err, ClaimError::Parse(_)));
    }

    #[test]
    fn parse_report_rejects_missing_required_fields() {
        let text = r#"{"vehicle_info": {"make": "Toyota", "model": "Camry"}}"#;
        let err = GeminiVisionClient::parse_report(text).unwrap_err();
        assert!(matches!(err, ClaimError::Parse(_)));
    }

    #[test]
    fn response_text_extraction_walks_candidate_chain() {
        let json = r#"{
            "candidates": [{
                "content": {
                    "parts": [{ "text": "{\"severity\": \"Minor\"}" }]
                }
            }]
        }"#;
        let response: GenerateContentResponse = serde_json::from_str(json).unwrap();
        let text = response
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone());
        assert_eq!(text.as_deref(), Some("{\"severity\": \"Minor\"}"));
    }

    #[test]
    fn empty_candidates_deserialize_to_empty_list() {
        let response: GenerateContentResponse = serde_json::from_str("{}").unwrap();
        assert!(response.candidates.is_empty());
    }
}
