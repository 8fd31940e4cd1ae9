//! # hl7-transform: Rule-Gated HL7v2 Transformation Pipeline
//!
//! Decides, per message type and direction, which structural edits to apply
//! to an HL7v2 message and whether the message may pass a processing phase.
//!
//! ## Features
//!
//! - **Catalog resolution**: exact message type, then `XXX_*` group wildcard, then pass-through
//! - **Rule-gated steps**: update, remove, add and required-only pruning
//! - **Phase filters**: accept/deny before and after transformation
//! - **FHIR conversion**: HL7v2 to FHIR bundles and back through the same catalogs
//! - **Declarative catalogs**: YAML configuration with named components from a registry
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use hl7_transform::transform::{Constant, ConfigurationResolver, TransformationConfiguration, UpdateSegment};
//! use hl7_transform::{Catalogs, Direction, FieldPath, Message, MessageTypePattern, TransformationEngine};
//!
//! let configuration = TransformationConfiguration::builder("rename", Direction::Ingress)
//!     .message_type(MessageTypePattern::parse("ADT_*").unwrap())
//!     .step(UpdateSegment::new("PID").set(FieldPath::component(5, 2), Arc::new(Constant::new("Peter"))))
//!     .build();
//!
//! let mut resolver = ConfigurationResolver::builder();
//! resolver.register(configuration).unwrap();
//! let engine = TransformationEngine::new(Catalogs {
//!     transformations: resolver.build(),
//!     ..Catalogs::default()
//! });
//!
//! let message = Message::parse("MSH|^~\\&|A|B|||20240101||ADT^A08|1|P|2.5\rEVN|A08\rPID|1||123||Doe^ADAM").unwrap();
//! let outcome = engine.transform(message, Direction::Ingress);
//! assert!(outcome.message.encode().ends_with("Doe^Peter"));
//! ```

pub mod catalog;
pub mod config;
pub mod convert;
pub mod engine;
pub mod filter;
pub mod message;
pub mod registry;
pub mod rule;
pub mod transform;

pub use catalog::{Catalog, CatalogError, CatalogHandle, MessageTypePattern};
pub use config::{CatalogConfig, ConfigError};
pub use convert::{ConversionError, Converter};
pub use engine::{Catalogs, FailurePolicy, TransformOutcome, TransformationEngine};
pub use filter::{FilterPhase, MessageFilter};
pub use message::{FieldPath, Message, MessageError, Segment, SegmentField};
pub use registry::ComponentRegistry;
pub use rule::{Rule, RuleError};
pub use transform::{Direction, StepError, StepOrdering, TransformationConfiguration, TransformationStep};
