//! Error types for the sidecar injector
//!
//! Errors carry the subject they relate to (an app id, an annotation key, a
//! lookup source) so a rejected admission explains itself in the API server
//! response and in the injector logs.

use thiserror::Error;

/// Main error type for injector operations
#[derive(Debug, Error)]
pub enum Error {
    /// Input failed validation (e.g. an app id that is not a DNS label)
    #[error("validation error for {subject}: {message}")]
    Validation {
        /// What was being validated (usually the app id)
        subject: String,
        /// Description of what's invalid
        message: String,
        /// The annotation or field that carried the value
        field: Option<String>,
    },

    /// The admitted object could not be decoded
    #[error("could not unmarshal raw object: {message}")]
    Deserialization {
        /// Description of what failed
        message: String,
        /// The resource kind being decoded (if known)
        kind: Option<String>,
    },

    /// A sidecar resource quantity annotation could not be parsed
    #[error("error parsing sidecar {resource}: {message}")]
    Resource {
        /// Which quantity failed (e.g. "cpu limit")
        resource: String,
        /// Description of what failed
        message: String,
    },

    /// Trust material could not be looked up and the injector fails closed
    #[error("trust material unavailable from {source_name}: {message}")]
    TrustUnavailable {
        /// Which lookup failed (e.g. "mtls policy", "trust bundle")
        source_name: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization error while building patch values
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Invalid injector configuration
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
        /// The flag or setting at fault
        field: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g. "webhook", "server")
        context: String,
    },
}

impl Error {
    /// Create a validation error for a named subject and field
    pub fn validation_for_field(
        subject: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            subject: subject.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a deserialization error with resource kind context
    pub fn deserialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Deserialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a resource quantity error
    pub fn resource(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Resource {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a trust material error for a failed lookup
    pub fn trust_unavailable(source_name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::TrustUnavailable {
            source_name: source_name.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a configuration error for a specific flag
    pub fn config_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether the error is caused by the admitted object itself
    ///
    /// Rejections need a change to the workload (fix the annotation, the app
    /// id, the manifest). Everything else is an injector-side failure.
    pub fn is_rejection(&self) -> bool {
        match self {
            Error::Validation { .. } => true,
            Error::Deserialization { .. } => true,
            Error::Resource { .. } => true,
            Error::TrustUnavailable { .. } => false,
            Error::Serialization { .. } => false,
            Error::Config { .. } => false,
            Error::Internal { .. } => false,
        }
    }

    /// Get the subject if this error is associated with one
    pub fn subject(&self) -> Option<&str> {
        match self {
            Error::Validation { subject, .. } => Some(subject),
            Error::Resource { resource, .. } => Some(resource),
            Error::TrustUnavailable { source_name, .. } => Some(source_name),
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}
