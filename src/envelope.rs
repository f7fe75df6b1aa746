//! Uniform response envelope and the business error catalog.
//!
//! Every successful or domain-failed call is wrapped in a
//! [`ResponseEnvelope`].  The envelope status reflects whether the call
//! itself completed: any [`Payload::Ok`] value is coded `1000`, even when
//! the carried result reports `success = false`.  Only a
//! [`Payload::DomainError`] selects a business error code.

use std::collections::BTreeMap;

use serde::Serialize;

/// Call completed.
pub const STATUS_SUCCESS: u32 = 1000;
/// Business error carrying zero or one metadata entries.
pub const STATUS_BUSINESS_ERROR: u32 = 4001;
/// Business error carrying more than one metadata entry.
pub const STATUS_BUSINESS_ERRORS: u32 = 4002;

/// Closed catalog of business error codes.  `ErrorEntry::sub_code` is the
/// code prefixed with `E`.
pub mod codes {
    pub const MISSING_PARAMETER: u32 = 1101;
    pub const INVALID_PARAMETER: u32 = 1102;
    pub const EMPTY_STRING: u32 = 1103;
    pub const ENTITY_NOT_FOUND: u32 = 1104;
    pub const UNRECOGNIZED_FIELD: u32 = 1105;
    pub const DUPLICATE_ENTRY: u32 = 1111;
    pub const MISSING_CREDENTIALS: u32 = 9102;
}

/// Base description for a catalog code.  Unknown codes have no description;
/// callers render them as an empty string.
pub fn describe(code: u32) -> Option<&'static str> {
    let text = match code {
        codes::MISSING_PARAMETER => "Missing required parameters.",
        codes::INVALID_PARAMETER => "Invalid parameters entered.",
        codes::EMPTY_STRING => "Empty string input not supported.",
        codes::ENTITY_NOT_FOUND => "Requested entity record does not exist.",
        codes::UNRECOGNIZED_FIELD => {
            "Unrecognized field name was entered - Please check spelling and/or refer to the API docs for correct name."
        }
        codes::DUPLICATE_ENTRY => {
            "ข้อมูลซ้ำกับที่มีอยู่แล้ว ไม่สามารถ Insert หรือ Update ได้\r\nData entry duplicated with existing."
        }
        codes::MISSING_CREDENTIALS => "Missing required authorization credentials.",
        _ => return None,
    };
    Some(text)
}

/// A single business error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEntry {
    pub sub_code: String,
    pub description: String,
    #[serde(rename = "metaData")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ErrorEntry {
    pub fn new(code: u32) -> Self {
        Self::with_message(code, "")
    }

    /// The custom message is appended directly to the catalog text, with
    /// no separator.  Unknown codes drop the message as well.
    pub fn with_message(code: u32, message: &str) -> Self {
        let description = describe(code)
            .map(|base| format!("{}{}", base, message))
            .unwrap_or_default();
        Self {
            sub_code: format!("E{}", code),
            description,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Either the domain value of a completed call or a business error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload<T> {
    Ok(T),
    DomainError(ErrorEntry),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvelopeStatus {
    pub code: u32,
    pub description: String,
}

impl EnvelopeStatus {
    pub fn new(code: u32, custom_message: &str) -> Self {
        let base = match code {
            STATUS_SUCCESS => "Success.",
            STATUS_BUSINESS_ERROR => "Business error with 1 errors.",
            STATUS_BUSINESS_ERRORS => "Business error with more than 1 errors.",
            _ => "",
        };
        Self {
            code,
            description: format!("{}{}", base, custom_message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseEnvelope<T> {
    pub status: EnvelopeStatus,
    pub data: Payload<T>,
}

impl<T> ResponseEnvelope<T> {
    pub fn new(data: Payload<T>) -> Self {
        let code = match &data {
            Payload::Ok(_) => STATUS_SUCCESS,
            Payload::DomainError(entry) if entry.metadata.len() > 1 => STATUS_BUSINESS_ERRORS,
            Payload::DomainError(_) => STATUS_BUSINESS_ERROR,
        };
        Self {
            status: EnvelopeStatus::new(code, ""),
            data,
        }
    }

    pub fn ok(value: T) -> Self {
        Self::new(Payload::Ok(value))
    }

    pub fn domain_error(entry: ErrorEntry) -> Self {
        Self::new(Payload::DomainError(entry))
    }

    pub fn code(&self) -> u32 {
        self.status.code
    }
}
