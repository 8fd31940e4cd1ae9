//! Transformation configurations and the resolver that picks one per message.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::step::{StepReport, TransformationStep};
use crate::catalog::{Catalog, CatalogBuilder, CatalogError, Match, MessageTypePattern};
use crate::message::Message;

/// Which way a message travels through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Ingress,
    Egress,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Ingress => write!(f, "ingress"),
            Direction::Egress => write!(f, "egress"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ingress" | "in" => Ok(Direction::Ingress),
            "egress" | "out" => Ok(Direction::Egress),
            other => Err(format!("unknown direction '{other}', expected ingress or egress")),
        }
    }
}

/// Order in which a configuration's steps run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOrdering {
    /// Updates, then removals, then additions, then required-only filtering.
    /// Declaration order is kept within each kind.
    #[default]
    UpdatesFirst,
    /// Exactly the order the steps were declared in.
    Declared,
}

/// The ordered steps applied to one message type in one direction.
#[derive(Debug, Clone)]
pub struct TransformationConfiguration {
    name: String,
    message_types: Vec<MessageTypePattern>,
    direction: Direction,
    ordering: StepOrdering,
    steps: Vec<TransformationStep>,
}

impl TransformationConfiguration {
    pub fn builder(name: impl Into<String>, direction: Direction) -> TransformationConfigurationBuilder {
        TransformationConfigurationBuilder {
            configuration: Self {
                name: name.into(),
                message_types: Vec::new(),
                direction,
                ordering: StepOrdering::default(),
                steps: Vec::new(),
            },
        }
    }

    /// The configuration used when nothing is registered for a message.
    pub fn pass_through(direction: Direction) -> Self {
        Self::builder("default", direction).build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message_types(&self) -> &[MessageTypePattern] {
        &self.message_types
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn ordering(&self) -> StepOrdering {
        self.ordering
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[TransformationStep] {
        &self.steps
    }

    pub fn is_pass_through(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step against `message`.
    ///
    /// A failing step is reported and the remaining steps still run.
    pub fn apply(&self, message: &mut Message) -> Vec<StepReport> {
        self.steps
            .iter()
            .map(|step| {
                let result = step.apply(message);
                if let Err(error) = &result {
                    warn!(
                        configuration = %self.name,
                        step = %step,
                        %error,
                        "transformation step failed"
                    );
                }
                StepReport {
                    step: step.to_string(),
                    result,
                }
            })
            .collect()
    }
}

pub struct TransformationConfigurationBuilder {
    configuration: TransformationConfiguration,
}

impl TransformationConfigurationBuilder {
    pub fn message_type(mut self, pattern: MessageTypePattern) -> Self {
        self.configuration.message_types.push(pattern);
        self
    }

    pub fn ordering(mut self, ordering: StepOrdering) -> Self {
        self.configuration.ordering = ordering;
        self
    }

    pub fn step(mut self, step: impl Into<TransformationStep>) -> Self {
        self.configuration.steps.push(step.into());
        self
    }

    pub fn build(self) -> TransformationConfiguration {
        let mut configuration = self.configuration;
        if configuration.ordering == StepOrdering::UpdatesFirst {
            // stable: declaration order survives within each kind
            configuration.steps.sort_by_key(TransformationStep::kind);
        }
        configuration
    }
}

/// Picks the configuration for a message type and direction.
///
/// Lookup order is exact type, then `XXX_*` for the message group, then a
/// pass-through configuration with no steps.
#[derive(Debug)]
pub struct ConfigurationResolver {
    catalog: Catalog<Direction, TransformationConfiguration>,
    ingress_default: Arc<TransformationConfiguration>,
    egress_default: Arc<TransformationConfiguration>,
}

impl Default for ConfigurationResolver {
    fn default() -> Self {
        Self::new(Catalog::default())
    }
}

impl ConfigurationResolver {
    pub fn new(catalog: Catalog<Direction, TransformationConfiguration>) -> Self {
        Self {
            catalog,
            ingress_default: Arc::new(TransformationConfiguration::pass_through(Direction::Ingress)),
            egress_default: Arc::new(TransformationConfiguration::pass_through(Direction::Egress)),
        }
    }

    pub fn builder() -> ConfigurationResolverBuilder {
        ConfigurationResolverBuilder {
            catalog: Catalog::builder(),
        }
    }

    pub fn resolve(&self, message_type: &str, direction: Direction) -> Arc<TransformationConfiguration> {
        match self.catalog.resolve_entry(message_type, direction) {
            Some(resolved) => {
                debug!(
                    message_type,
                    %direction,
                    configuration = %resolved.name,
                    wildcard = resolved.matched == Match::Wildcard,
                    "resolved transformation configuration"
                );
                resolved.value
            }
            None => {
                debug!(message_type, %direction, "no transformation configuration, passing through");
                match direction {
                    Direction::Ingress => Arc::clone(&self.ingress_default),
                    Direction::Egress => Arc::clone(&self.egress_default),
                }
            }
        }
    }

    pub fn catalog(&self) -> &Catalog<Direction, TransformationConfiguration> {
        &self.catalog
    }
}

pub struct ConfigurationResolverBuilder {
    catalog: CatalogBuilder<Direction, TransformationConfiguration>,
}

impl ConfigurationResolverBuilder {
    /// Register a configuration under its own message types and direction.
    pub fn register(&mut self, configuration: TransformationConfiguration) -> Result<&mut Self, CatalogError> {
        if configuration.message_types.is_empty() {
            warn!(configuration = %configuration.name, "configuration declares no message types and will never be used");
        }

        let patterns = configuration.message_types.clone();
        let direction = configuration.direction;
        let name = configuration.name.clone();
        self.catalog
            .register(&patterns, direction, name, Arc::new(configuration))?;
        Ok(self)
    }

    pub fn build(self) -> ConfigurationResolver {
        ConfigurationResolver::new(self.catalog.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::step::{AddSegment, RemoveSegment, RequiredSegmentsOnly, StepKind, UpdateSegment};
    use crate::transform::supplier::SegmentTemplate;

    fn pattern(raw: &str) -> MessageTypePattern {
        MessageTypePattern::parse(raw).unwrap()
    }

    fn kinds(configuration: &TransformationConfiguration) -> Vec<StepKind> {
        configuration.steps().iter().map(TransformationStep::kind).collect()
    }

    #[test]
    fn test_updates_run_first_by_default() {
        let template = Arc::new(SegmentTemplate::new("zpi", ["ZPI|1"]).unwrap());
        let configuration = TransformationConfiguration::builder("adt", Direction::Ingress)
            .step(RequiredSegmentsOnly::new(["PID"]))
            .step(AddSegment::new(template))
            .step(RemoveSegment::new("EVN"))
            .step(UpdateSegment::new("PID"))
            .step(RemoveSegment::new("PV1"))
            .build();

        assert_eq!(
            kinds(&configuration),
            vec![
                StepKind::Update,
                StepKind::Remove,
                StepKind::Remove,
                StepKind::Add,
                StepKind::RequiredOnly
            ]
        );
        assert_eq!(configuration.steps()[1].to_string(), "remove EVN[first]");
        assert_eq!(configuration.steps()[2].to_string(), "remove PV1[first]");
    }

    #[test]
    fn test_declared_ordering_is_kept() {
        let configuration = TransformationConfiguration::builder("adt", Direction::Ingress)
            .ordering(StepOrdering::Declared)
            .step(RemoveSegment::new("EVN"))
            .step(UpdateSegment::new("PID"))
            .build();

        assert_eq!(kinds(&configuration), vec![StepKind::Remove, StepKind::Update]);
    }

    #[test]
    fn test_resolver_falls_back_to_pass_through() {
        let mut builder = ConfigurationResolver::builder();
        builder
            .register(
                TransformationConfiguration::builder("adt-group", Direction::Ingress)
                    .message_type(pattern("ADT_*"))
                    .step(RemoveSegment::new("EVN"))
                    .build(),
            )
            .unwrap()
            .register(
                TransformationConfiguration::builder("adt-a08", Direction::Ingress)
                    .message_type(pattern("ADT_A08"))
                    .build(),
            )
            .unwrap();
        let resolver = builder.build();

        assert_eq!(resolver.resolve("ADT_A08", Direction::Ingress).name(), "adt-a08");
        assert_eq!(resolver.resolve("ADT_A01", Direction::Ingress).name(), "adt-group");

        let fallback = resolver.resolve("ADT_A01", Direction::Egress);
        assert_eq!(fallback.name(), "default");
        assert!(fallback.is_pass_through());
        assert_eq!(fallback.direction(), Direction::Egress);
    }

    #[test]
    fn test_resolver_rejects_duplicates() {
        let configuration = || {
            TransformationConfiguration::builder("oru", Direction::Egress)
                .message_type(pattern("ORU_R01"))
                .build()
        };

        let mut builder = ConfigurationResolver::builder();
        builder.register(configuration()).unwrap();

        assert!(matches!(
            builder.register(configuration()),
            Err(CatalogError::Ambiguous { .. })
        ));
    }

    #[test]
    fn test_direction_parsing() {
        assert_eq!("Ingress".parse::<Direction>().unwrap(), Direction::Ingress);
        assert_eq!("out".parse::<Direction>().unwrap(), Direction::Egress);
        assert!("sideways".parse::<Direction>().is_err());
    }
}
