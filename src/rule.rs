//! Rules gate every transformation step and filter decision.
//!
//! A rule is a named predicate over a read-only [`Message`]. Rules used by
//! step selectors can additionally be asked about a single repetition of the
//! target segment through [`Rule::evaluate_repetition`].

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use regex::Regex;

use crate::message::{Message, SegmentField};

/// Error raised while a rule inspects a message.
///
/// Callers never propagate it: the step or filter that owns the rule treats
/// a failed evaluation as `false`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("rule '{rule}' failed: {reason}")]
pub struct RuleError {
    pub rule: String,
    pub reason: String,
}

impl RuleError {
    pub fn new(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            reason: reason.into(),
        }
    }
}

/// Predicate deciding whether a step runs or a message passes a filter.
pub trait Rule: Send + Sync {
    fn name(&self) -> &str;

    fn evaluate(&self, message: &Message) -> Result<bool, RuleError>;

    /// Evaluate against the `repetition`-th occurrence of the step's target.
    ///
    /// Rules that do not look at individual segments answer for the whole
    /// message.
    fn evaluate_repetition(&self, message: &Message, repetition: usize) -> Result<bool, RuleError> {
        let _ = repetition;
        self.evaluate(message)
    }
}

impl fmt::Debug for dyn Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rule({})", self.name())
    }
}

/// Evaluate `rule`, turning an evaluation error or a panic into `false`.
pub fn passes(rule: &dyn Rule, message: &Message, repetition: Option<usize>) -> bool {
    let evaluated = panic::catch_unwind(AssertUnwindSafe(|| match repetition {
        Some(index) => rule.evaluate_repetition(message, index),
        None => rule.evaluate(message),
    }));

    match evaluated {
        Ok(Ok(passed)) => passed,
        Ok(Err(error)) => {
            tracing::warn!(rule = rule.name(), %error, "rule evaluation failed, treating as false");
            false
        }
        Err(_) => {
            tracing::warn!(rule = rule.name(), "rule panicked, treating as false");
            false
        }
    }
}

/// Shared handle to the rule that always passes.
pub fn always() -> Arc<dyn Rule> {
    Arc::new(AlwaysTrue)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysTrue;

impl Rule for AlwaysTrue {
    fn name(&self) -> &str {
        "always"
    }

    fn evaluate(&self, _message: &Message) -> Result<bool, RuleError> {
        Ok(true)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysFalse;

impl Rule for AlwaysFalse {
    fn name(&self) -> &str {
        "never"
    }

    fn evaluate(&self, _message: &Message) -> Result<bool, RuleError> {
        Ok(false)
    }
}

/// True when at least one segment with the code exists.
#[derive(Debug, Clone)]
pub struct SegmentExists {
    name: String,
    code: String,
}

impl SegmentExists {
    pub fn new(code: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            name: format!("{code} exists"),
            code,
        }
    }
}

impl Rule for SegmentExists {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, message: &Message) -> Result<bool, RuleError> {
        Ok(message.has_segment(&self.code))
    }
}

#[derive(Debug, Clone)]
pub struct SegmentAbsent {
    name: String,
    code: String,
}

impl SegmentAbsent {
    pub fn new(code: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            name: format!("{code} absent"),
            code,
        }
    }
}

impl Rule for SegmentAbsent {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, message: &Message) -> Result<bool, RuleError> {
        Ok(!message.has_segment(&self.code))
    }
}

/// Compares a field with a literal. A missing field reads as empty.
#[derive(Debug, Clone)]
pub struct FieldEquals {
    name: String,
    field: SegmentField,
    value: String,
}

impl FieldEquals {
    pub fn new(field: SegmentField, value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            name: format!("{field} == '{value}'"),
            field,
            value,
        }
    }
}

impl Rule for FieldEquals {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, message: &Message) -> Result<bool, RuleError> {
        Ok(message.field(&self.field).unwrap_or_default() == self.value)
    }

    fn evaluate_repetition(&self, message: &Message, repetition: usize) -> Result<bool, RuleError> {
        Ok(message.field_at(&self.field, repetition).unwrap_or_default() == self.value)
    }
}

/// Matches a field against a regular expression.
#[derive(Debug, Clone)]
pub struct FieldMatches {
    name: String,
    field: SegmentField,
    pattern: Regex,
}

impl FieldMatches {
    pub fn new(field: SegmentField, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name: format!("{field} =~ /{pattern}/"),
            field,
            pattern: Regex::new(pattern)?,
        })
    }
}

impl Rule for FieldMatches {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, message: &Message) -> Result<bool, RuleError> {
        Ok(self
            .pattern
            .is_match(message.field(&self.field).unwrap_or_default()))
    }

    fn evaluate_repetition(&self, message: &Message, repetition: usize) -> Result<bool, RuleError> {
        Ok(self
            .pattern
            .is_match(message.field_at(&self.field, repetition).unwrap_or_default()))
    }
}

/// Passes when every inner rule passes. An empty list passes.
#[derive(Debug, Clone)]
pub struct AllOf {
    name: String,
    rules: Vec<Arc<dyn Rule>>,
}

impl AllOf {
    pub fn new(rules: Vec<Arc<dyn Rule>>) -> Self {
        Self {
            name: combined_name("all", &rules),
            rules,
        }
    }
}

impl Rule for AllOf {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, message: &Message) -> Result<bool, RuleError> {
        for rule in &self.rules {
            if !rule.evaluate(message)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn evaluate_repetition(&self, message: &Message, repetition: usize) -> Result<bool, RuleError> {
        for rule in &self.rules {
            if !rule.evaluate_repetition(message, repetition)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Passes when any inner rule passes. An empty list fails.
#[derive(Debug, Clone)]
pub struct AnyOf {
    name: String,
    rules: Vec<Arc<dyn Rule>>,
}

impl AnyOf {
    pub fn new(rules: Vec<Arc<dyn Rule>>) -> Self {
        Self {
            name: combined_name("any", &rules),
            rules,
        }
    }
}

impl Rule for AnyOf {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, message: &Message) -> Result<bool, RuleError> {
        for rule in &self.rules {
            if rule.evaluate(message)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn evaluate_repetition(&self, message: &Message, repetition: usize) -> Result<bool, RuleError> {
        for rule in &self.rules {
            if rule.evaluate_repetition(message, repetition)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[derive(Debug, Clone)]
pub struct Not {
    name: String,
    rule: Arc<dyn Rule>,
}

impl Not {
    pub fn new(rule: Arc<dyn Rule>) -> Self {
        Self {
            name: format!("not({})", rule.name()),
            rule,
        }
    }
}

impl Rule for Not {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, message: &Message) -> Result<bool, RuleError> {
        Ok(!self.rule.evaluate(message)?)
    }

    fn evaluate_repetition(&self, message: &Message, repetition: usize) -> Result<bool, RuleError> {
        Ok(!self.rule.evaluate_repetition(message, repetition)?)
    }
}

fn combined_name(op: &str, rules: &[Arc<dyn Rule>]) -> String {
    let inner: Vec<&str> = rules.iter().map(|rule| rule.name()).collect();
    format!("{op}({})", inner.join(", "))
}

type RuleFunction = dyn Fn(&Message, Option<usize>) -> Result<bool, RuleError> + Send + Sync;

/// Adapts a closure into a named [`Rule`].
///
/// The closure receives the repetition index when the rule is evaluated per
/// repetition, `None` otherwise.
///
/// # Example
///
/// ```
/// use hl7_transform::rule::{FnRule, Rule};
/// use hl7_transform::Message;
///
/// let has_visit = FnRule::new("has visit", |message: &Message, _| Ok(message.has_segment("PV1")));
/// assert_eq!(has_visit.name(), "has visit");
/// ```
pub struct FnRule {
    name: String,
    function: Box<RuleFunction>,
}

impl FnRule {
    pub fn new<F>(name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&Message, Option<usize>) -> Result<bool, RuleError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            function: Box::new(function),
        }
    }
}

impl fmt::Debug for FnRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnRule").field("name", &self.name).finish()
    }
}

impl Rule for FnRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, message: &Message) -> Result<bool, RuleError> {
        (self.function)(message, None)
    }

    fn evaluate_repetition(&self, message: &Message, repetition: usize) -> Result<bool, RuleError> {
        (self.function)(message, Some(repetition))
    }
}
