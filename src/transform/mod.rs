//! Rule-gated transformation steps and their configurations.
//!
//! A [`TransformationConfiguration`] is an ordered list of
//! [`TransformationStep`]s registered for one or more message types in one
//! [`Direction`]. The [`ConfigurationResolver`] picks the configuration for a
//! message and falls back to a pass-through configuration when none matches.

pub mod configuration;
pub mod step;
pub mod supplier;

pub use configuration::{
    ConfigurationResolver, ConfigurationResolverBuilder, Direction, StepOrdering,
    TransformationConfiguration, TransformationConfigurationBuilder,
};
pub use step::{
    AddSegment, FieldAssignment, RemoveSegment, RepetitionSelector, RequiredSegmentsOnly,
    SegmentRef, StepKind, StepOutcome, StepReport, TransformationStep, UpdateSegment,
};
pub use supplier::{
    Clear, Constant, CopyField, FnFactory, FnSupplier, SegmentFactory, SegmentTemplate, Timestamp,
    ValueSupplier, HL7_TIMESTAMP_FORMAT,
};

/// Failure of a single step. The step leaves the message untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
    #[error("'{name}' is a group in {structure}, not a segment")]
    StructuralMismatch { name: String, structure: String },

    #[error("value supplier '{supplier}' failed: {reason}")]
    Supplier { supplier: String, reason: String },

    #[error("segment factory '{factory}' failed: {reason}")]
    Factory { factory: String, reason: String },

    #[error("'{code}' is the message header and cannot be removed")]
    HeaderRemoval { code: String },

    #[error("transformed message could not be re-parsed: {reason}")]
    Unencodable { reason: String },
}
