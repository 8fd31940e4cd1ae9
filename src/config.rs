//! Declarative catalog configuration.
//!
//! A catalog file lists transformations, filters and conversions in YAML.
//! Components that cannot be expressed declaratively are referenced by name
//! and looked up in a [`ComponentRegistry`] while the catalogs are built.
//!
//! ```yaml
//! transformations:
//!   - name: adt-ingress
//!     message_types: [ADT_*]
//!     direction: ingress
//!     steps:
//!       - type: update
//!         segment: PID
//!         when: { type: field_equals, field: PID-5.2, value: ADAM }
//!         fields:
//!           - path: "5.2"
//!             value: { type: constant, value: Peter }
//!       - type: remove
//!         segment: OBR
//!         selector: all
//! filters:
//!   - message_types: [MDM_T02]
//!     phase: pre
//!     condition: { type: segment_exists, segment: EVN }
//! conversions:
//!   to_fhir:
//!     - name: adt-to-fhir
//!       message_types: [ADT_*]
//!       creators: [message_header, patient, encounter]
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::catalog::{CatalogError, MessageTypePattern};
use crate::convert::{Converter, FhirToHl7Configuration, Hl7ToFhirConfiguration};
use crate::engine::Catalogs;
use crate::filter::{FilterPhase, MessageFilter};
use crate::message::{is_segment_code, FieldPath, MessageError, SegmentField};
use crate::registry::{ComponentRegistry, RegistryError};
use crate::rule::{
    AllOf, AlwaysFalse, AlwaysTrue, AnyOf, FieldEquals, FieldMatches, Not, Rule, SegmentAbsent,
    SegmentExists,
};
use crate::transform::{
    AddSegment, Clear, ConfigurationResolver, Constant, CopyField, Direction, RemoveSegment,
    RepetitionSelector, RequiredSegmentsOnly, SegmentFactory, SegmentTemplate, StepOrdering,
    Timestamp, TransformationConfiguration, TransformationStep, UpdateSegment, ValueSupplier,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("unresolved reference in '{context}': {source}")]
    UnresolvedReference {
        context: String,
        #[source]
        source: RegistryError,
    },

    #[error("invalid configuration '{context}': {reason}")]
    Invalid { context: String, reason: String },
}

impl ConfigError {
    fn invalid(context: &str, reason: impl ToString) -> Self {
        ConfigError::Invalid {
            context: context.to_string(),
            reason: reason.to_string(),
        }
    }

    fn unresolved(context: &str) -> impl FnOnce(RegistryError) -> Self + '_ {
        move |source| ConfigError::UnresolvedReference {
            context: context.to_string(),
            source,
        }
    }
}

/// Root of a catalog file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogConfig {
    #[serde(default)]
    pub transformations: Vec<TransformationDef>,

    #[serde(default)]
    pub filters: Vec<FilterDef>,

    #[serde(default)]
    pub conversions: ConversionsDef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformationDef {
    pub name: String,
    pub message_types: Vec<MessageTypePattern>,
    pub direction: Direction,

    #[serde(default)]
    pub ordering: StepOrdering,

    #[serde(default)]
    pub steps: Vec<StepDef>,
}

/// One step. `when` defaults to a rule that always passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepDef {
    Update {
        segment: String,
        #[serde(default)]
        selector: RepetitionSelector,
        #[serde(default)]
        when: Option<RuleDef>,
        fields: Vec<FieldDef>,
    },
    Remove {
        segment: String,
        #[serde(default)]
        selector: RepetitionSelector,
        #[serde(default)]
        when: Option<RuleDef>,
    },
    Add {
        factory: FactoryDef,
        #[serde(default)]
        when: Option<RuleDef>,
    },
    RequiredOnly {
        prefixes: Vec<String>,
        #[serde(default)]
        when: Option<RuleDef>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub path: FieldPath,
    pub value: SupplierDef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleDef {
    Always,
    Never,
    SegmentExists { segment: String },
    SegmentAbsent { segment: String },
    FieldEquals { field: SegmentField, value: String },
    FieldMatches { field: SegmentField, pattern: String },
    All { rules: Vec<RuleDef> },
    Any { rules: Vec<RuleDef> },
    Not { rule: Box<RuleDef> },
    Named { name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupplierDef {
    Constant {
        value: String,
    },
    Copy {
        from: SegmentField,
    },
    Clear,
    Timestamp {
        #[serde(default)]
        format: Option<String>,
    },
    Named {
        name: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FactoryDef {
    /// ER7 lines with `${SEG-f.c}` placeholders
    Template {
        #[serde(default)]
        name: Option<String>,
        lines: Vec<String>,
    },
    Named {
        name: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterDef {
    pub message_types: Vec<MessageTypePattern>,
    pub phase: FilterPhase,
    pub condition: RuleDef,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionsDef {
    #[serde(default)]
    pub to_fhir: Vec<ConversionDef>,

    #[serde(default)]
    pub to_hl7: Vec<ConversionDef>,
}

/// A conversion configuration: creators run in the listed order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionDef {
    pub name: String,
    pub message_types: Vec<MessageTypePattern>,
    pub creators: Vec<String>,
}

impl CatalogConfig {
    /// Load a catalog file.
    ///
    /// # Arguments
    /// * `path` - Path to the catalog YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not a valid catalog
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Build validated catalogs, resolving named components in `registry`.
    ///
    /// Fails on the first unknown reference, malformed rule or duplicate
    /// registration.
    pub fn build(&self, registry: &ComponentRegistry) -> Result<Catalogs, ConfigError> {
        let mut transformations = ConfigurationResolver::builder();
        for definition in &self.transformations {
            transformations.register(definition.build(registry)?)?;
        }

        let mut filters = MessageFilter::builder();
        for definition in &self.filters {
            let condition = definition.condition.build(registry, "filter")?;
            filters.register(&definition.message_types, definition.phase, condition)?;
        }

        let mut conversions = Converter::builder();
        for definition in &self.conversions.to_fhir {
            let mut configuration = Hl7ToFhirConfiguration::new(&definition.name);
            configuration.message_types = definition.message_types.clone();
            for creator in &definition.creators {
                let creator = registry
                    .resource_creator(creator)
                    .map_err(ConfigError::unresolved(&definition.name))?;
                configuration = configuration.creator(creator);
            }
            conversions.register_to_fhir(configuration)?;
        }
        for definition in &self.conversions.to_hl7 {
            let mut configuration = FhirToHl7Configuration::new(&definition.name);
            configuration.message_types = definition.message_types.clone();
            for creator in &definition.creators {
                let creator = registry
                    .segment_creator(creator)
                    .map_err(ConfigError::unresolved(&definition.name))?;
                configuration = configuration.creator(creator);
            }
            conversions.register_to_hl7(configuration)?;
        }

        info!(
            transformations = self.transformations.len(),
            filters = self.filters.len(),
            to_fhir = self.conversions.to_fhir.len(),
            to_hl7 = self.conversions.to_hl7.len(),
            "catalogs built"
        );

        Ok(Catalogs {
            transformations: transformations.build(),
            filters: filters.build(),
            conversions: conversions.build(),
        })
    }
}

impl TransformationDef {
    fn build(&self, registry: &ComponentRegistry) -> Result<TransformationConfiguration, ConfigError> {
        let mut builder = TransformationConfiguration::builder(&self.name, self.direction).ordering(self.ordering);
        for pattern in &self.message_types {
            builder = builder.message_type(pattern.clone());
        }
        for step in &self.steps {
            builder = builder.step(step.build(registry, &self.name)?);
        }
        Ok(builder.build())
    }
}

fn segment_code(code: &str, context: &str) -> Result<String, ConfigError> {
    if is_segment_code(code) {
        Ok(code.to_string())
    } else {
        Err(ConfigError::invalid(context, MessageError::InvalidSegmentCode(code.to_string())))
    }
}

fn gate(when: &Option<RuleDef>, registry: &ComponentRegistry, context: &str) -> Result<Arc<dyn Rule>, ConfigError> {
    match when {
        Some(rule) => rule.build(registry, context),
        None => Ok(Arc::new(AlwaysTrue)),
    }
}

impl StepDef {
    fn build(&self, registry: &ComponentRegistry, context: &str) -> Result<TransformationStep, ConfigError> {
        let step: TransformationStep = match self {
            StepDef::Update {
                segment,
                selector,
                when,
                fields,
            } => {
                let mut update = UpdateSegment::new(segment_code(segment, context)?)
                    .selector(*selector)
                    .when(gate(when, registry, context)?);
                for field in fields {
                    update = update.set(field.path, field.value.build(registry, context)?);
                }
                update.into()
            }
            StepDef::Remove { segment, .. } if segment == "MSH" => {
                return Err(ConfigError::invalid(context, "the MSH header cannot be removed"));
            }
            StepDef::Remove {
                segment,
                selector,
                when,
            } => RemoveSegment::new(segment_code(segment, context)?)
                .selector(*selector)
                .when(gate(when, registry, context)?)
                .into(),
            StepDef::Add { factory, when } => AddSegment::new(factory.build(registry, context)?)
                .when(gate(when, registry, context)?)
                .into(),
            StepDef::RequiredOnly { prefixes, when } => {
                if prefixes.iter().any(|prefix| prefix.is_empty()) {
                    return Err(ConfigError::invalid(context, "required_only prefixes must not be empty"));
                }
                RequiredSegmentsOnly::new(prefixes.iter().cloned())
                    .when(gate(when, registry, context)?)
                    .into()
            }
        };
        Ok(step)
    }
}

impl RuleDef {
    pub fn build(&self, registry: &ComponentRegistry, context: &str) -> Result<Arc<dyn Rule>, ConfigError> {
        let rule: Arc<dyn Rule> = match self {
            RuleDef::Always => Arc::new(AlwaysTrue),
            RuleDef::Never => Arc::new(AlwaysFalse),
            RuleDef::SegmentExists { segment } => Arc::new(SegmentExists::new(segment_code(segment, context)?)),
            RuleDef::SegmentAbsent { segment } => Arc::new(SegmentAbsent::new(segment_code(segment, context)?)),
            RuleDef::FieldEquals { field, value } => Arc::new(FieldEquals::new(field.clone(), value)),
            RuleDef::FieldMatches { field, pattern } => Arc::new(
                FieldMatches::new(field.clone(), pattern).map_err(|e| ConfigError::invalid(context, e))?,
            ),
            RuleDef::All { rules } => Arc::new(AllOf::new(
                rules
                    .iter()
                    .map(|rule| rule.build(registry, context))
                    .collect::<Result<_, _>>()?,
            )),
            RuleDef::Any { rules } => Arc::new(AnyOf::new(
                rules
                    .iter()
                    .map(|rule| rule.build(registry, context))
                    .collect::<Result<_, _>>()?,
            )),
            RuleDef::Not { rule } => Arc::new(Not::new(rule.build(registry, context)?)),
            RuleDef::Named { name } => registry.rule(name).map_err(ConfigError::unresolved(context))?,
        };
        Ok(rule)
    }
}

impl SupplierDef {
    fn build(&self, registry: &ComponentRegistry, context: &str) -> Result<Arc<dyn ValueSupplier>, ConfigError> {
        let supplier: Arc<dyn ValueSupplier> = match self {
            SupplierDef::Constant { value } => Arc::new(Constant::new(value)),
            SupplierDef::Copy { from } => Arc::new(CopyField::new(from.clone())),
            SupplierDef::Clear => Arc::new(Clear),
            SupplierDef::Timestamp { format } => Arc::new(match format {
                Some(format) => Timestamp::try_new(format).map_err(|e| ConfigError::invalid(context, e))?,
                None => Timestamp::default(),
            }),
            SupplierDef::Named { name } => registry.supplier(name).map_err(ConfigError::unresolved(context))?,
        };
        Ok(supplier)
    }
}

impl FactoryDef {
    fn build(&self, registry: &ComponentRegistry, context: &str) -> Result<Arc<dyn SegmentFactory>, ConfigError> {
        match self {
            FactoryDef::Template { name, lines } => {
                let name = name.clone().unwrap_or_else(|| format!("{context} template"));
                let template = SegmentTemplate::new(name, lines.iter().cloned())
                    .map_err(|e| ConfigError::invalid(context, e))?;
                Ok(Arc::new(template))
            }
            FactoryDef::Named { name } => registry.factory(name).map_err(ConfigError::unresolved(context)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    const CATALOG: &str = r#"
transformations:
  - name: adt-ingress
    message_types: [ADT_*]
    direction: ingress
    steps:
      - type: remove
        segment: EVN
      - type: update
        segment: PID
        when: { type: field_equals, field: PID-5.2, value: ADAM }
        fields:
          - path: "5.2"
            value: { type: constant, value: Peter }
          - path: 2
            value: { type: copy, from: PID-3.1 }
filters:
  - message_types: [MDM_T02]
    phase: pre
    condition: { type: segment_exists, segment: EVN }
conversions:
  to_fhir:
    - name: adt-to-fhir
      message_types: [ADT_*]
      creators: [patient]
"#;

    #[test]
    fn test_parse_and_build() {
        let config = CatalogConfig::from_yaml_str(CATALOG).unwrap();
        assert_eq!(config.transformations.len(), 1);
        assert_eq!(config.transformations[0].ordering, StepOrdering::UpdatesFirst);

        let catalogs = config.build(&ComponentRegistry::with_builtins()).unwrap();
        let configuration = catalogs.transformations.resolve("ADT_A04", Direction::Ingress);

        assert_eq!(configuration.name(), "adt-ingress");
        assert_eq!(configuration.steps()[0].to_string(), "update PID[first]");
        assert_eq!(configuration.steps()[1].to_string(), "remove EVN[first]");
    }

    #[test]
    fn test_built_catalog_transforms() {
        let catalogs = CatalogConfig::from_yaml_str(CATALOG)
            .unwrap()
            .build(&ComponentRegistry::with_builtins())
            .unwrap();
        let mut message =
            Message::parse("MSH|^~\\&|A|B|||20240101||ADT^A01|1|P|2.5\rEVN|A01\rPID|1||4711||Doe^ADAM").unwrap();

        let configuration = catalogs.transformations.resolve(&message.message_type(), Direction::Ingress);
        configuration.apply(&mut message);

        assert_eq!(
            message.encode(),
            "MSH|^~\\&|A|B|||20240101||ADT^A01|1|P|2.5\rPID|1|4711|4711||Doe^Peter"
        );
    }

    #[test]
    fn test_unknown_named_rule() {
        let yaml = r#"
filters:
  - message_types: [ADT_*]
    phase: post
    condition: { type: named, name: is_vip }
"#;
        let error = CatalogConfig::from_yaml_str(yaml)
            .unwrap()
            .build(&ComponentRegistry::new())
            .unwrap_err();

        assert!(matches!(error, ConfigError::UnresolvedReference { .. }));
    }

    #[test]
    fn test_invalid_definitions() {
        let bad_pattern = "transformations:\n  - name: x\n    message_types: [ADT*]\n    direction: ingress\n";
        assert!(matches!(
            CatalogConfig::from_yaml_str(bad_pattern),
            Err(ConfigError::Yaml(_))
        ));

        let bad_regex = r#"
filters:
  - message_types: [ADT_*]
    phase: pre
    condition: { type: field_matches, field: PID-3.1, pattern: "(" }
"#;
        let error = CatalogConfig::from_yaml_str(bad_regex)
            .unwrap()
            .build(&ComponentRegistry::new())
            .unwrap_err();
        assert!(matches!(error, ConfigError::Invalid { .. }));

        let bad_timestamp = r#"
transformations:
  - name: adt
    message_types: [ADT_*]
    direction: ingress
    steps:
      - type: update
        segment: EVN
        fields:
          - path: 2
            value: { type: timestamp, format: "%Y%!" }
"#;
        let error = CatalogConfig::from_yaml_str(bad_timestamp)
            .unwrap()
            .build(&ComponentRegistry::new())
            .unwrap_err();
        assert!(matches!(error, ConfigError::Invalid { .. }));

        let header_removal = r#"
transformations:
  - name: adt
    message_types: [ADT_*]
    direction: ingress
    steps:
      - type: remove
        segment: MSH
"#;
        let error = CatalogConfig::from_yaml_str(header_removal)
            .unwrap()
            .build(&ComponentRegistry::new())
            .unwrap_err();
        assert!(matches!(error, ConfigError::Invalid { .. }));

        let bad_segment = r#"
transformations:
  - name: oru
    message_types: [ORU_R01]
    direction: egress
    steps:
      - type: remove
        segment: ORDER_OBSERVATION
"#;
        let error = CatalogConfig::from_yaml_str(bad_segment)
            .unwrap()
            .build(&ComponentRegistry::new())
            .unwrap_err();
        assert!(matches!(error, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_duplicate_registration_is_fatal() {
        let yaml = r#"
transformations:
  - name: first
    message_types: [ADT_*]
    direction: ingress
  - name: second
    message_types: [ADT_*]
    direction: ingress
"#;
        let error = CatalogConfig::from_yaml_str(yaml)
            .unwrap()
            .build(&ComponentRegistry::new())
            .unwrap_err();

        assert!(matches!(error, ConfigError::Catalog(CatalogError::Ambiguous { .. })));
    }
}
