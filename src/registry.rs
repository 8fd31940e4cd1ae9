//! Named components that configuration files refer to.
//!
//! Catalog files describe steps declaratively, but some rules, value
//! suppliers, segment factories and conversion creators can only be written
//! in Rust. They are registered here under a name and resolved when the
//! configuration is built.

use std::collections::HashMap;
use std::sync::Arc;

use crate::convert::{
    EncounterCreator, EvnSegmentCreator, MessageHeaderCreator, MshSegmentCreator, PatientCreator,
    PidSegmentCreator, ResourceCreator, SegmentCreator,
};
use crate::rule::{AlwaysFalse, AlwaysTrue, Rule};
use crate::transform::{Clear, SegmentFactory, Timestamp, ValueSupplier};

/// Kind of a registered component, used in lookup errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Rule,
    Supplier,
    Factory,
    ResourceCreator,
    SegmentCreator,
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            ComponentKind::Rule => "rule",
            ComponentKind::Supplier => "value supplier",
            ComponentKind::Factory => "segment factory",
            ComponentKind::ResourceCreator => "resource creator",
            ComponentKind::SegmentCreator => "segment creator",
        };
        write!(f, "{kind}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} not registered: '{name}'")]
pub struct RegistryError {
    pub kind: ComponentKind,
    pub name: String,
}

/// Registry of named components.
#[derive(Default)]
pub struct ComponentRegistry {
    rules: HashMap<String, Arc<dyn Rule>>,
    suppliers: HashMap<String, Arc<dyn ValueSupplier>>,
    factories: HashMap<String, Arc<dyn SegmentFactory>>,
    resource_creators: HashMap<String, Arc<dyn ResourceCreator>>,
    segment_creators: HashMap<String, Arc<dyn SegmentCreator>>,
}

impl ComponentRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in components, each under its own name.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register_rule(Arc::new(AlwaysTrue));
        registry.register_rule(Arc::new(AlwaysFalse));

        registry.register_supplier(Arc::new(Clear));
        registry.register_supplier(Arc::new(Timestamp::default()));

        registry.register_resource_creator(Arc::new(MessageHeaderCreator));
        registry.register_resource_creator(Arc::new(PatientCreator));
        registry.register_resource_creator(Arc::new(EncounterCreator));

        registry.register_segment_creator(Arc::new(MshSegmentCreator::default()));
        registry.register_segment_creator(Arc::new(EvnSegmentCreator));
        registry.register_segment_creator(Arc::new(PidSegmentCreator));

        registry
    }

    /// Register a rule under its own name, replacing any previous one.
    ///
    /// # Example
    ///
    /// ```
    /// use std::sync::Arc;
    /// use hl7_transform::rule::{FnRule, Rule};
    /// use hl7_transform::{ComponentRegistry, Message};
    ///
    /// let mut registry = ComponentRegistry::new();
    /// registry.register_rule(Arc::new(FnRule::new("is_inpatient", |message: &Message, _| {
    ///     Ok(message.segment("PV1").is_some_and(|pv1| pv1.value(&"2".parse().unwrap()) == "I"))
    /// })));
    ///
    /// assert!(registry.rule("is_inpatient").is_ok());
    /// ```
    pub fn register_rule(&mut self, rule: Arc<dyn Rule>) {
        self.rules.insert(rule.name().to_string(), rule);
    }

    pub fn register_supplier(&mut self, supplier: Arc<dyn ValueSupplier>) {
        self.suppliers.insert(supplier.name().to_string(), supplier);
    }

    pub fn register_factory(&mut self, factory: Arc<dyn SegmentFactory>) {
        self.factories.insert(factory.name().to_string(), factory);
    }

    pub fn register_resource_creator(&mut self, creator: Arc<dyn ResourceCreator>) {
        self.resource_creators.insert(creator.name().to_string(), creator);
    }

    pub fn register_segment_creator(&mut self, creator: Arc<dyn SegmentCreator>) {
        self.segment_creators.insert(creator.name().to_string(), creator);
    }

    pub fn rule(&self, name: &str) -> Result<Arc<dyn Rule>, RegistryError> {
        lookup(&self.rules, ComponentKind::Rule, name)
    }

    pub fn supplier(&self, name: &str) -> Result<Arc<dyn ValueSupplier>, RegistryError> {
        lookup(&self.suppliers, ComponentKind::Supplier, name)
    }

    pub fn factory(&self, name: &str) -> Result<Arc<dyn SegmentFactory>, RegistryError> {
        lookup(&self.factories, ComponentKind::Factory, name)
    }

    pub fn resource_creator(&self, name: &str) -> Result<Arc<dyn ResourceCreator>, RegistryError> {
        lookup(&self.resource_creators, ComponentKind::ResourceCreator, name)
    }

    pub fn segment_creator(&self, name: &str) -> Result<Arc<dyn SegmentCreator>, RegistryError> {
        lookup(&self.segment_creators, ComponentKind::SegmentCreator, name)
    }

    /// Names of every registered component of `kind`, sorted.
    pub fn names(&self, kind: ComponentKind) -> Vec<&str> {
        let mut names: Vec<&str> = match kind {
            ComponentKind::Rule => self.rules.keys().map(String::as_str).collect(),
            ComponentKind::Supplier => self.suppliers.keys().map(String::as_str).collect(),
            ComponentKind::Factory => self.factories.keys().map(String::as_str).collect(),
            ComponentKind::ResourceCreator => self.resource_creators.keys().map(String::as_str).collect(),
            ComponentKind::SegmentCreator => self.segment_creators.keys().map(String::as_str).collect(),
        };
        names.sort_unstable();
        names
    }
}

fn lookup<T: ?Sized>(
    components: &HashMap<String, Arc<T>>,
    kind: ComponentKind,
    name: &str,
) -> Result<Arc<T>, RegistryError> {
    components.get(name).cloned().ok_or_else(|| RegistryError {
        kind,
        name: name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::rule::FnRule;
    use crate::transform::FnSupplier;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = ComponentRegistry::new();
        registry.register_rule(Arc::new(FnRule::new("has_pid", |message: &Message, _| {
            Ok(message.has_segment("PID"))
        })));
        registry.register_supplier(Arc::new(FnSupplier::new("facility", |_: &Message| Ok("NORTH".to_string()))));

        let message = Message::parse("MSH|^~\\&|A|B|||20240101||ADT^A01|1|P|2.5\rEVN|A01\rPID|1").unwrap();
        assert!(registry.rule("has_pid").unwrap().evaluate(&message).unwrap());
        assert_eq!(registry.supplier("facility").unwrap().supply(&message).unwrap(), "NORTH");
    }

    #[test]
    fn test_unknown_component() {
        let registry = ComponentRegistry::new();

        let error = registry.factory("zpi").unwrap_err();
        assert_eq!(error.kind, ComponentKind::Factory);
        assert_eq!(error.to_string(), "segment factory not registered: 'zpi'");
    }

    #[test]
    fn test_builtins() {
        let registry = ComponentRegistry::with_builtins();

        assert_eq!(registry.names(ComponentKind::Rule), vec!["always", "never"]);
        assert_eq!(
            registry.names(ComponentKind::ResourceCreator),
            vec!["encounter", "message_header", "patient"]
        );
        assert_eq!(registry.names(ComponentKind::SegmentCreator), vec!["evn", "msh", "pid"]);
        assert!(registry.supplier("timestamp").is_ok());
    }
}
