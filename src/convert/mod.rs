//! HL7v2 to FHIR and FHIR to HL7v2 conversion.
//!
//! Conversions reuse the transformation catalog: each direction keeps one
//! catalog of configurations keyed by message type with the same exact then
//! wildcard resolution. A configuration is an ordered list of creators that
//! always run; there are no rules on this path.
//!
//! FHIR resources are handled as plain JSON values.

pub mod creators;

use std::fmt;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::catalog::{Catalog, CatalogBuilder, CatalogError, MessageTypePattern};
use crate::message::{EncodingCharacters, Message, MessageError, Segment};

pub use creators::{
    EncounterCreator, EvnSegmentCreator, MessageHeaderCreator, MshSegmentCreator, PatientCreator,
    PidSegmentCreator,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
    #[error("creator '{creator}' failed: {reason}")]
    Creator { creator: String, reason: String },

    #[error("input is not a FHIR Bundle")]
    NotABundle,

    #[error("no segments were produced for {0}")]
    NoSegments(String),

    #[error("converted message is invalid: {0}")]
    Message(#[from] MessageError),
}

/// Builds one FHIR resource from a parsed message.
pub trait ResourceCreator: Send + Sync {
    fn name(&self) -> &str;

    /// `None` when the message has nothing for this resource.
    fn create(&self, message: &Message) -> Result<Option<Value>, ConversionError>;
}

impl fmt::Debug for dyn ResourceCreator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceCreator({})", self.name())
    }
}

/// What a segment creator knows about the message being assembled.
#[derive(Debug, Clone)]
pub struct SegmentContext {
    pub message_type: String,
    pub encoding: EncodingCharacters,
}

impl SegmentContext {
    /// `ADT_A01` as `("ADT", "A01")`.
    pub fn code_and_trigger(&self) -> (&str, &str) {
        self.message_type
            .split_once('_')
            .unwrap_or((self.message_type.as_str(), ""))
    }
}

/// Builds one HL7 segment from a FHIR bundle.
pub trait SegmentCreator: Send + Sync {
    fn name(&self) -> &str;

    fn create(&self, bundle: &Value, context: &SegmentContext) -> Result<Option<Segment>, ConversionError>;
}

impl fmt::Debug for dyn SegmentCreator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SegmentCreator({})", self.name())
    }
}

#[derive(Debug, Clone)]
pub struct Hl7ToFhirConfiguration {
    pub name: String,
    pub message_types: Vec<MessageTypePattern>,
    pub creators: Vec<Arc<dyn ResourceCreator>>,
}

impl Hl7ToFhirConfiguration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message_types: Vec::new(),
            creators: Vec::new(),
        }
    }

    pub fn message_type(mut self, pattern: MessageTypePattern) -> Self {
        self.message_types.push(pattern);
        self
    }

    pub fn creator(mut self, creator: Arc<dyn ResourceCreator>) -> Self {
        self.creators.push(creator);
        self
    }
}

#[derive(Debug, Clone)]
pub struct FhirToHl7Configuration {
    pub name: String,
    pub message_types: Vec<MessageTypePattern>,
    pub creators: Vec<Arc<dyn SegmentCreator>>,
}

impl FhirToHl7Configuration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message_types: Vec::new(),
            creators: Vec::new(),
        }
    }

    pub fn message_type(mut self, pattern: MessageTypePattern) -> Self {
        self.message_types.push(pattern);
        self
    }

    pub fn creator(mut self, creator: Arc<dyn SegmentCreator>) -> Self {
        self.creators.push(creator);
        self
    }
}

/// Runs the conversion configuration resolved for a message type.
#[derive(Debug, Default)]
pub struct Converter {
    to_fhir: Catalog<(), Hl7ToFhirConfiguration>,
    to_hl7: Catalog<(), FhirToHl7Configuration>,
}

impl Converter {
    pub fn builder() -> ConverterBuilder {
        ConverterBuilder {
            to_fhir: Catalog::builder(),
            to_hl7: Catalog::builder(),
        }
    }

    /// Convert `message` into a FHIR message Bundle.
    ///
    /// Without a configuration for the message type the bundle has no entries.
    pub fn to_fhir(&self, message: &Message) -> Result<Value, ConversionError> {
        let message_type = message.message_type();
        let configuration = self.to_fhir.resolve(&message_type, ());
        let creators = configuration
            .as_deref()
            .map(|configuration| configuration.creators.as_slice())
            .unwrap_or_default();

        let mut entries = Vec::new();
        for creator in creators {
            let Some(resource) = creator.create(message)? else {
                debug!(creator = creator.name(), %message_type, "creator produced no resource");
                continue;
            };
            entries.push(entry(creator.name(), resource)?);
        }

        debug!(%message_type, entries = entries.len(), "converted message to FHIR");
        Ok(json!({
            "resourceType": "Bundle",
            "id": Uuid::new_v4().to_string(),
            "type": "message",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "entry": entries,
        }))
    }

    /// Build an HL7 message of `message_type` from a FHIR Bundle.
    ///
    /// Segments are produced in creator order, joined and parsed as a whole
    /// message, so the first creator must produce MSH.
    pub fn to_hl7(&self, bundle: &Value, message_type: &str) -> Result<Message, ConversionError> {
        if bundle.get("resourceType").and_then(Value::as_str) != Some("Bundle") {
            return Err(ConversionError::NotABundle);
        }

        let configuration = self.to_hl7.resolve(message_type, ());
        let creators = configuration
            .as_deref()
            .map(|configuration| configuration.creators.as_slice())
            .unwrap_or_default();

        let context = SegmentContext {
            message_type: message_type.to_string(),
            encoding: EncodingCharacters::default(),
        };

        let mut lines = Vec::new();
        for creator in creators {
            if let Some(segment) = creator.create(bundle, &context)? {
                lines.push(segment.encode());
            }
        }

        if lines.is_empty() {
            return Err(ConversionError::NoSegments(message_type.to_string()));
        }

        debug!(message_type, segments = lines.len(), "converted FHIR bundle to HL7");
        Ok(Message::parse(&lines.join("\r"))?)
    }

    pub fn to_fhir_catalog(&self) -> &Catalog<(), Hl7ToFhirConfiguration> {
        &self.to_fhir
    }

    pub fn to_hl7_catalog(&self) -> &Catalog<(), FhirToHl7Configuration> {
        &self.to_hl7
    }
}

fn entry(creator: &str, resource: Value) -> Result<Value, ConversionError> {
    let Value::Object(mut resource) = resource else {
        return Err(ConversionError::Creator {
            creator: creator.to_string(),
            reason: "resource is not a JSON object".to_string(),
        });
    };

    let id = match resource.get("id").and_then(Value::as_str) {
        Some(id) => id.to_string(),
        None => {
            let id = Uuid::new_v4().to_string();
            resource.insert("id".to_string(), Value::String(id.clone()));
            id
        }
    };

    let mut entry = Map::new();
    entry.insert("fullUrl".to_string(), Value::String(format!("urn:uuid:{id}")));
    entry.insert("resource".to_string(), Value::Object(resource));
    Ok(Value::Object(entry))
}

/// Resources of `resource_type` in a bundle, in entry order.
pub fn resources<'a>(bundle: &'a Value, resource_type: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
    bundle
        .get("entry")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|entry| entry.get("resource"))
        .filter(move |resource| resource.get("resourceType").and_then(Value::as_str) == Some(resource_type))
}

pub struct ConverterBuilder {
    to_fhir: CatalogBuilder<(), Hl7ToFhirConfiguration>,
    to_hl7: CatalogBuilder<(), FhirToHl7Configuration>,
}

impl ConverterBuilder {
    pub fn register_to_fhir(&mut self, configuration: Hl7ToFhirConfiguration) -> Result<&mut Self, CatalogError> {
        let patterns = configuration.message_types.clone();
        let name = configuration.name.clone();
        self.to_fhir.register(&patterns, (), name, Arc::new(configuration))?;
        Ok(self)
    }

    pub fn register_to_hl7(&mut self, configuration: FhirToHl7Configuration) -> Result<&mut Self, CatalogError> {
        let patterns = configuration.message_types.clone();
        let name = configuration.name.clone();
        self.to_hl7.register(&patterns, (), name, Arc::new(configuration))?;
        Ok(self)
    }

    pub fn build(self) -> Converter {
        Converter {
            to_fhir: self.to_fhir.build(),
            to_hl7: self.to_hl7.build(),
        }
    }
}
