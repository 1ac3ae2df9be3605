use strata_core_types::{TraceId, UnitOfWorkId};
use thiserror::Error;

/// Result type alias using StrataError
pub type Result<T> = std::result::Result<T, StrataError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Each kind maps to a stable error code that can be used for programmatic
/// error handling, log assertions and external API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExErrorKind {
    // Configuration (schema resolution)
    Configuration,
    MetadataNotFound,
    InvalidRelation,
    InvalidTree,

    // Validation
    InvalidInput,
    UnknownProperty,
    MissingIdentity,
    EmptyCriteria,
    CycleDetected,

    // Lookup
    NotFound,

    // Transaction lifecycle
    TransactionState,

    // Tree
    NotSupported,

    // Integration/IO
    Persistence,
    Serialization,
    Timeout,

    // Internal
    Internal,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::Configuration => "ERR_CONFIGURATION",
            ExErrorKind::MetadataNotFound => "ERR_METADATA_NOT_FOUND",
            ExErrorKind::InvalidRelation => "ERR_INVALID_RELATION",
            ExErrorKind::InvalidTree => "ERR_INVALID_TREE",
            ExErrorKind::InvalidInput => "ERR_INVALID_INPUT",
            ExErrorKind::UnknownProperty => "ERR_UNKNOWN_PROPERTY",
            ExErrorKind::MissingIdentity => "ERR_MISSING_IDENTITY",
            ExErrorKind::EmptyCriteria => "ERR_EMPTY_CRITERIA",
            ExErrorKind::CycleDetected => "ERR_CYCLE_DETECTED",
            ExErrorKind::NotFound => "ERR_NOT_FOUND",
            ExErrorKind::TransactionState => "ERR_TRANSACTION_STATE",
            ExErrorKind::NotSupported => "ERR_NOT_SUPPORTED",
            ExErrorKind::Persistence => "ERR_PERSISTENCE",
            ExErrorKind::Serialization => "ERR_SERIALIZATION",
            ExErrorKind::Timeout => "ERR_TIMEOUT",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }
}

/// Canonical structured error type
///
/// Carries classification fields for programmatic handling plus the
/// correlation ids of the unit of work that produced it.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    target: Option<String>,
    identity: Option<String>,
    unit_of_work: Option<UnitOfWorkId>,
    trace_id: Option<TraceId>,
    message: String,
    source: Option<Box<ExError>>,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            target: None,
            identity: None,
            unit_of_work: None,
            trace_id: None,
            message: String::new(),
            source: None,
        }
    }

    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_unit_of_work(mut self, unit_of_work: UnitOfWorkId) -> Self {
        self.unit_of_work = Some(unit_of_work);
        self
    }

    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_source(mut self, source: ExError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn unit_of_work(&self) -> Option<&UnitOfWorkId> {
        self.unit_of_work.as_ref()
    }

    pub fn trace_id(&self) -> Option<&TraceId> {
        self.trace_id.as_ref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn source_error(&self) -> Option<&ExError> {
        self.source.as_deref()
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(target) = &self.target {
            write!(f, " (target: {})", target)?;
        }
        if let Some(identity) = &self.identity {
            write!(f, " (identity: {})", identity)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

// ========== End Error Facility ==========

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StrataError {
    // ===== Configuration Errors =====
    #[error("No metadata registered for entity \"{target}\"")]
    EntityMetadataNotFound { target: String },

    #[error("Entity \"{target}\" does not declare a primary column")]
    MissingPrimaryColumn { target: String },

    #[error("Relation {target}.{property} is a to-many relation initialized with values while persistence is enabled")]
    InitializedRelationArray { target: String, property: String },

    #[error("Invalid cascade on {target}.{property}: {reason}")]
    InvalidCascadeDeclaration {
        target: String,
        property: String,
        reason: String,
    },

    #[error("Owning relation {target}.{property} has no join definition")]
    MissingJoinDefinition { target: String, property: String },

    #[error("Invalid tree declaration on \"{target}\": {reason}")]
    InvalidTreeDeclaration { target: String, reason: String },

    // ===== Validation Errors =====
    #[error("Entity \"{target}\" has no property \"{property}\"")]
    UnknownProperty { target: String, property: String },

    #[error("Cannot {op} \"{target}\": entity has no primary key value")]
    MissingIdentity { target: String, op: String },

    #[error("Foreign key {target}.{property} is not nullable but the referenced entity is not persisted")]
    NullForeignKey { target: String, property: String },

    #[error("Entity \"{target}\" has no delete-date column")]
    MissingDeleteDateColumn { target: String },

    #[error("Node {node} is not a \"{target}\" entity of this graph")]
    UnknownNode { target: String, node: usize },

    #[error("Cyclic dependency between non-nullable relations of: {targets:?}")]
    CyclicDependency { targets: Vec<String> },

    #[error("Empty criteria are not allowed for {op}")]
    EmptyCriteria { op: String },

    // ===== Lookup Errors =====
    #[error("Could not find any entity of type \"{target}\" matching: {criteria}")]
    EntityNotFound { target: String, criteria: String },

    // ===== Transaction Errors =====
    #[error("Transaction already started for the given connection, commit current transaction before starting a new one")]
    TransactionAlreadyStarted,

    #[error("Transaction is not started yet, start transaction before committing or rolling it back")]
    TransactionNotStarted,

    #[error("Query runner already released, cannot run queries anymore")]
    RunnerReleased,

    // ===== Tree Errors =====
    #[error("Tree operations are not supported outside tree entities (\"{target}\")")]
    NotTreeEntity { target: String },

    #[error("Not supported on \"{target}\": {reason}")]
    NotSupported { target: String, reason: String },

    // ===== Generic Errors =====
    #[error("Persistence error in {op}: {message}")]
    Persistence { op: String, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl StrataError {
    /// Shorthand for a storage-level failure
    pub fn persistence(op: impl Into<String>, message: impl Into<String>) -> Self {
        StrataError::Persistence {
            op: op.into(),
            message: message.into(),
        }
    }
}

/// Conversion from StrataError to ExError
impl From<StrataError> for ExError {
    fn from(err: StrataError) -> Self {
        let message = err.to_string();
        match err {
            StrataError::EntityMetadataNotFound { target } => {
                ExError::new(ExErrorKind::MetadataNotFound)
                    .with_target(target)
                    .with_message(message)
            }

            StrataError::MissingPrimaryColumn { target } => {
                ExError::new(ExErrorKind::Configuration)
                    .with_target(target)
                    .with_message(message)
            }

            StrataError::InitializedRelationArray { target, .. }
            | StrataError::InvalidCascadeDeclaration { target, .. }
            | StrataError::MissingJoinDefinition { target, .. } => {
                ExError::new(ExErrorKind::InvalidRelation)
                    .with_target(target)
                    .with_message(message)
            }

            StrataError::InvalidTreeDeclaration { target, .. } => {
                ExError::new(ExErrorKind::InvalidTree)
                    .with_target(target)
                    .with_message(message)
            }

            StrataError::UnknownProperty { target, .. } => {
                ExError::new(ExErrorKind::UnknownProperty)
                    .with_target(target)
                    .with_message(message)
            }

            StrataError::MissingIdentity { target, op } => {
                ExError::new(ExErrorKind::MissingIdentity)
                    .with_target(target)
                    .with_op(op)
                    .with_message(message)
            }

            StrataError::NullForeignKey { target, .. }
            | StrataError::MissingDeleteDateColumn { target }
            | StrataError::UnknownNode { target, .. } => {
                ExError::new(ExErrorKind::InvalidInput)
                    .with_target(target)
                    .with_message(message)
            }

            StrataError::CyclicDependency { .. } => {
                ExError::new(ExErrorKind::CycleDetected).with_message(message)
            }

            StrataError::EmptyCriteria { op } => ExError::new(ExErrorKind::EmptyCriteria)
                .with_op(op)
                .with_message(message),

            StrataError::EntityNotFound { target, .. } => ExError::new(ExErrorKind::NotFound)
                .with_target(target)
                .with_message(message),

            StrataError::TransactionAlreadyStarted
            | StrataError::TransactionNotStarted
            | StrataError::RunnerReleased => {
                ExError::new(ExErrorKind::TransactionState).with_message(message)
            }

            StrataError::NotTreeEntity { target } | StrataError::NotSupported { target, .. } => {
                ExError::new(ExErrorKind::NotSupported)
                    .with_target(target)
                    .with_message(message)
            }

            StrataError::Persistence { op, .. } => ExError::new(ExErrorKind::Persistence)
                .with_op(op)
                .with_message(message),

            StrataError::Config { .. } => {
                ExError::new(ExErrorKind::Configuration).with_message(message)
            }

            StrataError::Serialization { .. } => {
                ExError::new(ExErrorKind::Serialization).with_message(message)
            }

            StrataError::Internal { .. } => {
                ExError::new(ExErrorKind::Internal).with_message(message)
            }
        }
    }
}

impl From<serde_json::Error> for StrataError {
    fn from(err: serde_json::Error) -> Self {
        StrataError::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_codes_are_stable() {
        let cases = [
            (ExErrorKind::MetadataNotFound, "ERR_METADATA_NOT_FOUND"),
            (ExErrorKind::EmptyCriteria, "ERR_EMPTY_CRITERIA"),
            (ExErrorKind::TransactionState, "ERR_TRANSACTION_STATE"),
            (ExErrorKind::NotSupported, "ERR_NOT_SUPPORTED"),
        ];
        for (kind, expected_code) in cases {
            assert_eq!(kind.code(), expected_code, "Wrong code for {:?}", kind);
        }
    }

    #[test]
    fn test_entity_not_found_carries_target_and_criteria() {
        let err = StrataError::EntityNotFound {
            target: "Post".to_string(),
            criteria: "{\"title\":\"How to buy a pig\"}".to_string(),
        };
        assert!(err.to_string().contains("Post"));
        assert!(err.to_string().contains("How to buy a pig"));

        let ex: ExError = err.into();
        assert_eq!(ex.kind(), ExErrorKind::NotFound);
        assert_eq!(ex.target(), Some("Post"));
    }

    #[test]
    fn test_transaction_errors_map_to_transaction_state() {
        let ex: ExError = StrataError::TransactionAlreadyStarted.into();
        assert_eq!(ex.code(), "ERR_TRANSACTION_STATE");
    }

    #[test]
    fn test_ex_error_display_includes_op() {
        let ex = ExError::new(ExErrorKind::Persistence)
            .with_op("insert")
            .with_message("disk full");
        assert_eq!(ex.to_string(), "[ERR_PERSISTENCE] in operation 'insert': disk full");
    }
}
