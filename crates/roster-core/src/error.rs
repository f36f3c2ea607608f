//! Error types for Roster.
//!
//! Every failure surfaced by the engine is one of five kinds, so callers can
//! decide between fixing the request, reporting a missing row, handling a
//! constraint violation, retrying against the store, or aborting startup.

use std::fmt;

/// The primary error type for all Roster operations.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Malformed request; never retried.
    Validation(ValidationError),
    /// A lookup that had to find exactly one row found none.
    NotFound(NotFoundError),
    /// Unique, referential or delete-policy violation.
    Constraint(ConstraintError),
    /// Connectivity, timeout or isolation failure reported by the backing store.
    Store(StoreError),
    /// Invalid schema definition, fatal at startup.
    Schema(SchemaError),
}

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether a caller may reasonably retry the whole operation.
    ///
    /// Only store-level failures qualify; the engine itself never retries
    /// except for the single upsert race retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Store(e) if e.kind.is_transient())
    }

    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    #[must_use]
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Error::Constraint(_))
    }

    /// Whether this is a unique-constraint violation.
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            Error::Constraint(ConstraintError {
                kind: ConstraintErrorKind::Unique,
                ..
            })
        )
    }

    /// Short, stable name of the error category.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Error::Validation(_) => "ValidationError",
            Error::NotFound(_) => "NotFoundError",
            Error::Constraint(_) => "ConstraintViolationError",
            Error::Store(_) => "TransientStoreError",
            Error::Schema(_) => "SchemaError",
        }
    }

    /// Build a store error with the `Internal` kind.
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Store(StoreError::new(StoreErrorKind::Internal, message))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(e) => write!(f, "validation error: {e}"),
            Error::NotFound(e) => write!(f, "not found: {e}"),
            Error::Constraint(e) => write!(f, "constraint violation: {e}"),
            Error::Store(e) => write!(f, "store error: {e}"),
            Error::Schema(e) => write!(f, "schema error: {e}"),
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Validation
// ============================================================================

/// Category of a malformed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    UnknownEntity,
    UnknownField,
    UnknownRelation,
    /// A value does not fit the declared field type.
    TypeMismatch,
    /// A required field was not provided and has no default.
    MissingRequired,
    /// Filter operator not applicable to the field.
    InvalidFilter,
    /// Generic argument misuse (bad take/skip, aggregate on non-numeric field, ...).
    InvalidArgs,
    /// `select` combined with `include` or `omit`.
    ConflictingSelection,
    /// A unique lookup that does not pin down a unique constraint.
    InvalidUniqueWhere,
    /// `groupBy` cross-field rule violation.
    InvalidGroupBy,
    /// Nested selection deeper than the configured maximum.
    DepthExceeded,
    /// A value violates an enum, pattern or arithmetic rule.
    InvalidValue,
    /// Nested relation write not valid for the relation or operation.
    InvalidRelationWrite,
}

/// A caller-fixable request error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub entity: Option<String>,
    pub field: Option<String>,
    pub message: String,
}

impl ValidationError {
    pub fn new(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            entity: None,
            field: None,
            message: message.into(),
        }
    }

    /// Attach the entity the error refers to.
    #[must_use]
    pub fn entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    /// Attach the field the error refers to.
    #[must_use]
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.entity, &self.field) {
            (Some(entity), Some(field)) => write!(f, "{entity}.{field}: {}", self.message),
            (Some(entity), None) => write!(f, "{entity}: {}", self.message),
            (None, Some(field)) => write!(f, "{field}: {}", self.message),
            (None, None) => f.write_str(&self.message),
        }
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err)
    }
}

// ============================================================================
// Not found
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotFoundError {
    pub entity: String,
    pub message: String,
}

impl NotFoundError {
    pub fn new(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.entity, self.message)
    }
}

impl From<NotFoundError> for Error {
    fn from(err: NotFoundError) -> Self {
        Error::NotFound(err)
    }
}

// ============================================================================
// Constraint violations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintErrorKind {
    /// Two rows share the values of a unique constraint.
    Unique,
    /// A foreign key points at a row that does not exist.
    ForeignKey,
    /// A delete or key change was rejected by the relation's delete policy.
    Restrict,
    /// A required relation would be left without a target.
    RequiredRelation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintError {
    pub kind: ConstraintErrorKind,
    pub entity: String,
    /// Fields participating in the violated constraint.
    pub fields: Vec<String>,
    pub message: String,
}

impl ConstraintError {
    pub fn new(
        kind: ConstraintErrorKind,
        entity: impl Into<String>,
        fields: Vec<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            entity: entity.into(),
            fields,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConstraintError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ConstraintErrorKind::Unique => "unique constraint",
            ConstraintErrorKind::ForeignKey => "foreign key constraint",
            ConstraintErrorKind::Restrict => "delete restriction",
            ConstraintErrorKind::RequiredRelation => "required relation",
        };
        write!(
            f,
            "{kind} on {}({}): {}",
            self.entity,
            self.fields.join(", "),
            self.message
        )
    }
}

impl From<ConstraintError> for Error {
    fn from(err: ConstraintError) -> Self {
        Error::Constraint(err)
    }
}

// ============================================================================
// Store errors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// The store could not be reached.
    Unavailable,
    /// The transaction or a wait exceeded its time budget.
    Timeout,
    /// A serializable transaction observed a concurrent change.
    SerializationFailure,
    /// A row touched by the transaction was changed or removed concurrently.
    WriteConflict,
    /// Invariant breakage inside the engine or store.
    Internal,
}

impl StoreErrorKind {
    /// Whether retrying the whole operation can succeed.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        !matches!(self, StoreErrorKind::Internal)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::Store(err)
    }
}

// ============================================================================
// Schema errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaError {
    pub entity: Option<String>,
    pub message: String,
}

impl SchemaError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            entity: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.entity {
            Some(entity) => write!(f, "{entity}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl From<SchemaError> for Error {
    fn from(err: SchemaError) -> Self {
        Error::Schema(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_store_errors_are_retryable() {
        let timeout: Error = StoreError::new(StoreErrorKind::Timeout, "slow").into();
        let internal = Error::internal("broken");
        let unique: Error = ConstraintError::new(
            ConstraintErrorKind::Unique,
            "User",
            vec!["email".into()],
            "duplicate",
        )
        .into();

        assert!(timeout.is_retryable());
        assert!(!internal.is_retryable());
        assert!(!unique.is_retryable());
        assert!(unique.is_unique_violation());
    }

    #[test]
    fn test_validation_display_includes_location() {
        let err = ValidationError::new(ValidationErrorKind::UnknownField, "no such field")
            .entity("Student")
            .field("age");
        assert_eq!(err.to_string(), "Student.age: no such field");
        assert_eq!(Error::from(err).kind_name(), "ValidationError");
    }

    #[test]
    fn test_constraint_display() {
        let err = ConstraintError::new(
            ConstraintErrorKind::Unique,
            "Class",
            vec!["schoolId".into(), "name".into()],
            "already exists",
        );
        assert_eq!(
            err.to_string(),
            "unique constraint on Class(schoolId, name): already exists"
        );
    }
}
