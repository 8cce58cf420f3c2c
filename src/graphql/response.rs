use serde::Deserialize;
use serde_json::Value;

use crate::utils::NetworkError;

/// JSON envelope of a GraphQL response: `data`, an `errors` array, or a
/// singular `error` field
#[derive(Debug, Deserialize)]
pub struct GraphQlEnvelope {
    pub data: Option<Value>,
    pub errors: Option<Value>,
    pub error: Option<Value>,
}

impl GraphQlEnvelope {
    /// Collapse the envelope into data or a GraphQL application error.
    /// The raw error payload is kept on the error for inspection, along
    /// with any status carried in error extensions.
    pub fn into_result(self) -> Result<Value, NetworkError> {
        if let Some(errors) = self.errors {
            let has_errors = match &errors {
                Value::Array(list) => !list.is_empty(),
                Value::Null => false,
                _ => true,
            };
            if has_errors {
                return Err(NetworkError::GraphQl {
                    status: extension_status(&errors),
                    errors,
                });
            }
        }
        if let Some(error) = self.error {
            if !error.is_null() {
                return Err(NetworkError::GraphQl {
                    status: extension_status(&error),
                    errors: error,
                });
            }
        }
        match self.data {
            Some(data) => Ok(data),
            None => Err(NetworkError::Serialization(
                "GraphQL response contained neither data nor errors".to_string(),
            )),
        }
    }
}

/// First status found in `extensions.status` of an error payload
pub fn extension_status(errors: &Value) -> Option<u16> {
    let status_of = |err: &Value| -> Option<u16> {
        err.get("extensions")?
            .get("status")?
            .as_u64()
            .and_then(|s| u16::try_from(s).ok())
    };
    match errors {
        Value::Array(list) => list.iter().find_map(status_of),
        other => status_of(other),
    }
}
