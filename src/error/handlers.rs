//! Standardized error handling for registry HTTP responses

use crate::error::PackageError;
use reqwest::StatusCode;
use serde::Deserialize;

/// Error body returned by OCI distribution endpoints
#[derive(Debug, Deserialize)]
struct RegistryErrorBody {
    #[serde(default)]
    errors: Vec<RegistryErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct RegistryErrorEntry {
    code: String,
    #[serde(default)]
    message: String,
}

/// Standard error handler for HTTP responses
pub struct HttpErrorHandler;

impl HttpErrorHandler {
    /// Map a failed registry response to a transfer error
    pub fn handle_registry_error(status: StatusCode, body: &str, operation: &str) -> PackageError {
        let detail = Self::describe_body(body);
        let error_msg = match status.as_u16() {
            401 => format!("Unauthorized to perform {}: {}", operation, detail),
            403 => format!("Forbidden: insufficient permissions for {}: {}", operation, detail),
            404 => format!("Resource not found for {}: {}", operation, detail),
            429 => format!("Rate limited during {}: {}", operation, detail),
            500 => format!("Registry server error during {}: {}", operation, detail),
            502 | 503 => format!("Registry unavailable for {}: {}", operation, detail),
            _ => format!("{} failed (status {}): {}", operation, status, detail),
        };

        PackageError::Transfer(error_msg)
    }

    /// Map a failed token endpoint response
    pub fn handle_auth_error(status: StatusCode, body: &str) -> PackageError {
        let error_msg = match status.as_u16() {
            400 => "Invalid token request parameters".to_string(),
            401 => "Invalid credentials provided".to_string(),
            403 => "Access denied - insufficient permissions".to_string(),
            404 => "Authentication endpoint not found".to_string(),
            _ => format!(
                "Authentication failed (status {}): {}",
                status,
                Self::describe_body(body)
            ),
        };

        PackageError::Transfer(error_msg)
    }

    /// Render `{"errors":[...]}` bodies as `CODE: message`, anything else verbatim
    fn describe_body(body: &str) -> String {
        match serde_json::from_str::<RegistryErrorBody>(body) {
            Ok(parsed) if !parsed.errors.is_empty() => parsed
                .errors
                .iter()
                .map(|e| {
                    if e.message.is_empty() {
                        e.code.clone()
                    } else {
                        format!("{}: {}", e.code, e.message)
                    }
                })
                .collect::<Vec<_>>()
                .join("; "),
            _ if body.trim().is_empty() => "no response body".to_string(),
            _ => body.trim().to_string(),
        }
    }
}

/// Network error categorization and handling
pub struct NetworkErrorHandler;

impl NetworkErrorHandler {
    /// Categorize and format network errors with helpful context
    pub fn handle_network_error(error: &reqwest::Error, context: &str) -> PackageError {
        if error.is_timeout() {
            PackageError::Transfer(format!("{} timeout: {}", context, error))
        } else if error.is_connect() {
            PackageError::Transfer(format!("Connection error during {}: {}", context, error))
        } else if error.to_string().contains("certificate") {
            PackageError::Transfer(format!(
                "TLS certificate error during {}: {}",
                context, error
            ))
        } else {
            PackageError::Transfer(format!("{} network error: {}", context, error))
        }
    }
}
