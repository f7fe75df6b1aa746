//! Mapping from raw backend results to the versioned response shape.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::backend::{AnalysisError, RawAnalyzeResult};

pub const NO_DOCUMENT_CONTENT: &str = "Model did not found any document.";
pub const REQUEST_FAILED_CONTENT: &str =
    "Error while sending request to Azure Document Intelligence";

/// One extracted field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlipField {
    pub content: String,
    pub confidence: Option<f32>,
}

/// Normalized analysis outcome returned to callers.  `success = false`
/// marks a domain failure that still completed as a call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResult {
    pub success: bool,
    pub api_version: String,
    pub model_id: String,
    pub content: String,
    pub fields: BTreeMap<String, SlipField>,
}

impl AnalyzeResult {
    /// A failed result with only the model id and a message set.
    pub fn failed(model_id: &str, content: impl Into<String>) -> Self {
        Self {
            success: false,
            model_id: model_id.to_string(),
            content: content.into(),
            ..Self::default()
        }
    }
}

/// Map a completed backend call.  Empty document collections yield a
/// failed result that still carries the backend's version and model id.
pub fn map_result(raw: RawAnalyzeResult) -> AnalyzeResult {
    let documents = match raw.documents {
        Some(documents) if !documents.is_empty() => documents,
        _ => {
            return AnalyzeResult {
                success: false,
                api_version: raw.api_version,
                model_id: raw.model_id,
                content: NO_DOCUMENT_CONTENT.to_string(),
                fields: BTreeMap::new(),
            }
        }
    };

    let mut fields = BTreeMap::new();
    for document in documents {
        for (key, field) in document.fields {
            fields.insert(
                to_camel_case(&key),
                SlipField {
                    content: field.content.unwrap_or_default(),
                    confidence: field.confidence,
                },
            );
        }
    }

    AnalyzeResult {
        success: true,
        api_version: raw.api_version,
        model_id: raw.model_id,
        content: raw.content,
        fields,
    }
}

/// Map the outcome of a backend call.  A rejected request or a backend that
/// could not be reached becomes a failed result keyed by the requested
/// model id; a malformed backend response is returned to the caller.
pub fn map_outcome(
    outcome: Result<RawAnalyzeResult, AnalysisError>,
    model_id: &str,
) -> Result<AnalyzeResult, AnalysisError> {
    match outcome {
        Ok(raw) => Ok(map_result(raw)),
        Err(AnalysisError::RequestFailed { status, inner }) => {
            tracing::warn!(
                status,
                model_id,
                inner_code = inner.as_ref().map(|i| i.code.as_str()),
                "analysis request rejected by backend"
            );
            let content = match inner {
                Some(inner) => format!("{}: {}", inner.code, inner.message),
                None => REQUEST_FAILED_CONTENT.to_string(),
            };
            Ok(AnalyzeResult::failed(model_id, content))
        }
        Err(AnalysisError::Unreachable(err)) => {
            tracing::warn!(model_id, error = %err, "analysis backend unreachable");
            Ok(AnalyzeResult::failed(model_id, REQUEST_FAILED_CONTENT))
        }
        Err(other) => Err(other),
    }
}

/// Lower-case the leading run of upper-case characters, keeping the last
/// one upper-case when it starts the next word (`IDNumber` -> `idNumber`).
pub fn to_camel_case(name: &str) -> String {
    let mut chars: Vec<char> = name.chars().collect();
    if chars.first().map_or(true, |c| !c.is_uppercase()) {
        return name.to_string();
    }
    for i in 0..chars.len() {
        if i == 1 && !chars[i].is_uppercase() {
            break;
        }
        let has_next = i + 1 < chars.len();
        if i > 0 && has_next && !chars[i + 1].is_uppercase() {
            if chars[i + 1] == ' ' {
                chars[i] = lower(chars[i]);
            }
            break;
        }
        chars[i] = lower(chars[i]);
    }
    chars.into_iter().collect()
}

fn lower(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}
