//! The four step kinds and how each one mutates a message.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::supplier::{SegmentFactory, ValueSupplier};
use super::StepError;
use crate::message::{FieldPath, Message};
use crate::rule::{self, Rule};

/// Which repetitions of the target segment a step acts on.
///
/// Written as `first`, `all` or a 0-based index in configuration files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SelectorRepr", into = "String")]
pub enum RepetitionSelector {
    #[default]
    First,
    All,
    /// 0-based position in document order
    Index(usize),
}

impl RepetitionSelector {
    fn indices(self, count: usize) -> Vec<usize> {
        match self {
            RepetitionSelector::First => (0..count.min(1)).collect(),
            RepetitionSelector::All => (0..count).collect(),
            RepetitionSelector::Index(index) if index < count => vec![index],
            RepetitionSelector::Index(_) => Vec::new(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SelectorRepr {
    Index(usize),
    Name(String),
}

impl TryFrom<SelectorRepr> for RepetitionSelector {
    type Error = String;

    fn try_from(repr: SelectorRepr) -> Result<Self, Self::Error> {
        match repr {
            SelectorRepr::Index(index) => Ok(RepetitionSelector::Index(index)),
            SelectorRepr::Name(name) => match name.as_str() {
                "first" => Ok(RepetitionSelector::First),
                "all" => Ok(RepetitionSelector::All),
                other => other
                    .parse()
                    .map(RepetitionSelector::Index)
                    .map_err(|_| format!("invalid repetition selector '{other}'")),
            },
        }
    }
}

impl From<RepetitionSelector> for String {
    fn from(selector: RepetitionSelector) -> Self {
        selector.to_string()
    }
}

impl fmt::Display for RepetitionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepetitionSelector::First => write!(f, "first"),
            RepetitionSelector::All => write!(f, "all"),
            RepetitionSelector::Index(index) => write!(f, "{index}"),
        }
    }
}

/// A segment code plus the repetitions selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRef {
    pub code: String,
    pub selector: RepetitionSelector,
}

impl SegmentRef {
    pub fn new(code: impl Into<String>, selector: RepetitionSelector) -> Self {
        Self {
            code: code.into(),
            selector,
        }
    }

    /// Indices of the selected repetitions present in `message`.
    ///
    /// Fails when the code names a group of the message structure.
    fn resolve(&self, message: &Message) -> Result<Vec<usize>, StepError> {
        if message.declares_group(&self.code) {
            return Err(StepError::StructuralMismatch {
                name: self.code.clone(),
                structure: message.structure_name().to_string(),
            });
        }
        Ok(self.selector.indices(message.segments(&self.code).len()))
    }
}

impl fmt::Display for SegmentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.code, self.selector)
    }
}

#[derive(Debug, Clone)]
pub struct FieldAssignment {
    pub path: FieldPath,
    pub supplier: Arc<dyn ValueSupplier>,
}

/// Rewrites fields of the selected repetitions.
#[derive(Debug, Clone)]
pub struct UpdateSegment {
    pub target: SegmentRef,
    pub rule: Arc<dyn Rule>,
    pub assignments: Vec<FieldAssignment>,
}

impl UpdateSegment {
    /// Update the first `code` segment, unconditionally, with no assignments yet.
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            target: SegmentRef::new(code, RepetitionSelector::First),
            rule: rule::always(),
            assignments: Vec::new(),
        }
    }

    pub fn selector(mut self, selector: RepetitionSelector) -> Self {
        self.target.selector = selector;
        self
    }

    pub fn when(mut self, rule: Arc<dyn Rule>) -> Self {
        self.rule = rule;
        self
    }

    pub fn set(mut self, path: FieldPath, supplier: Arc<dyn ValueSupplier>) -> Self {
        self.assignments.push(FieldAssignment { path, supplier });
        self
    }

    fn apply(&self, message: &mut Message) -> Result<StepOutcome, StepError> {
        let indices = self.target.resolve(message)?;
        if indices.is_empty() {
            return Ok(StepOutcome::TargetMissing);
        }
        if !rule::passes(self.rule.as_ref(), message, None) {
            return Ok(StepOutcome::RuleDeclined);
        }

        // Values are computed against the message as it was before this step.
        let values = self
            .assignments
            .iter()
            .map(|assignment| {
                assignment
                    .supplier
                    .supply(message)
                    .map(|value| (assignment.path, value))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut segments = message.segments_mut(&self.target.code);
        for index in &indices {
            if let Some(segment) = segments.get_mut(*index) {
                for (path, value) in &values {
                    segment.set(path, value);
                }
            }
        }

        Ok(StepOutcome::Applied {
            affected: indices.len(),
        })
    }
}

/// Deletes the selected repetitions for which the rule holds.
#[derive(Debug, Clone)]
pub struct RemoveSegment {
    pub target: SegmentRef,
    pub rule: Arc<dyn Rule>,
}

impl RemoveSegment {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            target: SegmentRef::new(code, RepetitionSelector::First),
            rule: rule::always(),
        }
    }

    pub fn selector(mut self, selector: RepetitionSelector) -> Self {
        self.target.selector = selector;
        self
    }

    pub fn when(mut self, rule: Arc<dyn Rule>) -> Self {
        self.rule = rule;
        self
    }

    fn apply(&self, message: &mut Message) -> Result<StepOutcome, StepError> {
        if self.target.code == "MSH" {
            return Err(StepError::HeaderRemoval {
                code: self.target.code.clone(),
            });
        }
        let indices = self.target.resolve(message)?;
        if indices.is_empty() {
            return Ok(StepOutcome::TargetMissing);
        }

        // Every repetition is judged on the unmodified message so removals
        // cannot shift the indices later candidates are evaluated at.
        let doomed: BTreeSet<usize> = indices
            .into_iter()
            .filter(|index| rule::passes(self.rule.as_ref(), message, Some(*index)))
            .collect();
        if doomed.is_empty() {
            return Ok(StepOutcome::RuleDeclined);
        }

        let removed = message.remove_segments_where(&self.target.code, |index| doomed.contains(&index));
        Ok(StepOutcome::Applied { affected: removed })
    }
}

/// Inserts factory-made segments at their grammar positions.
#[derive(Debug, Clone)]
pub struct AddSegment {
    pub rule: Arc<dyn Rule>,
    pub factory: Arc<dyn SegmentFactory>,
}

impl AddSegment {
    pub fn new(factory: Arc<dyn SegmentFactory>) -> Self {
        Self {
            rule: rule::always(),
            factory,
        }
    }

    pub fn when(mut self, rule: Arc<dyn Rule>) -> Self {
        self.rule = rule;
        self
    }

    fn apply(&self, message: &mut Message) -> Result<StepOutcome, StepError> {
        if !rule::passes(self.rule.as_ref(), message, None) {
            return Ok(StepOutcome::RuleDeclined);
        }

        let segments = self.factory.create(message)?;
        let affected = segments.len();
        for segment in segments {
            message.insert_segment(segment);
        }

        Ok(StepOutcome::Applied { affected })
    }
}

/// Keeps only segments whose code starts with an allowed prefix.
///
/// `MSH` is always kept so the result is still a message.
#[derive(Debug, Clone)]
pub struct RequiredSegmentsOnly {
    pub prefixes: Vec<String>,
    pub rule: Arc<dyn Rule>,
}

impl RequiredSegmentsOnly {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
            rule: rule::always(),
        }
    }

    pub fn when(mut self, rule: Arc<dyn Rule>) -> Self {
        self.rule = rule;
        self
    }

    fn allows(&self, code: &str) -> bool {
        code == "MSH" || self.prefixes.iter().any(|prefix| code.starts_with(prefix.as_str()))
    }

    fn apply(&self, message: &mut Message) -> Result<StepOutcome, StepError> {
        if !rule::passes(self.rule.as_ref(), message, None) {
            return Ok(StepOutcome::RuleDeclined);
        }

        let mut removed = 0;
        message.retain_segments(|segment| {
            let keep = self.allows(segment.code());
            if !keep {
                removed += 1;
            }
            keep
        });

        Ok(StepOutcome::Applied { affected: removed })
    }
}

/// Step kinds, in the order the default ordering runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StepKind {
    Update,
    Remove,
    Add,
    RequiredOnly,
}

#[derive(Debug, Clone)]
pub enum TransformationStep {
    Update(UpdateSegment),
    Remove(RemoveSegment),
    Add(AddSegment),
    RequiredOnly(RequiredSegmentsOnly),
}

impl TransformationStep {
    pub fn kind(&self) -> StepKind {
        match self {
            TransformationStep::Update(_) => StepKind::Update,
            TransformationStep::Remove(_) => StepKind::Remove,
            TransformationStep::Add(_) => StepKind::Add,
            TransformationStep::RequiredOnly(_) => StepKind::RequiredOnly,
        }
    }

    pub fn rule(&self) -> &dyn Rule {
        match self {
            TransformationStep::Update(step) => step.rule.as_ref(),
            TransformationStep::Remove(step) => step.rule.as_ref(),
            TransformationStep::Add(step) => step.rule.as_ref(),
            TransformationStep::RequiredOnly(step) => step.rule.as_ref(),
        }
    }

    /// Apply the step to `message`.
    ///
    /// A step whose rule declines, or whose target segment is absent, leaves
    /// the message untouched and reports why.
    pub fn apply(&self, message: &mut Message) -> Result<StepOutcome, StepError> {
        let outcome = match self {
            TransformationStep::Update(step) => step.apply(message),
            TransformationStep::Remove(step) => step.apply(message),
            TransformationStep::Add(step) => step.apply(message),
            TransformationStep::RequiredOnly(step) => step.apply(message),
        }?;

        debug!(step = %self, rule = self.rule().name(), ?outcome, "step evaluated");
        Ok(outcome)
    }
}

impl fmt::Display for TransformationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformationStep::Update(step) => write!(f, "update {}", step.target),
            TransformationStep::Remove(step) => write!(f, "remove {}", step.target),
            TransformationStep::Add(step) => write!(f, "add {}", step.factory.name()),
            TransformationStep::RequiredOnly(step) => {
                write!(f, "required-only [{}]", step.prefixes.join(", "))
            }
        }
    }
}

impl From<UpdateSegment> for TransformationStep {
    fn from(step: UpdateSegment) -> Self {
        TransformationStep::Update(step)
    }
}

impl From<RemoveSegment> for TransformationStep {
    fn from(step: RemoveSegment) -> Self {
        TransformationStep::Remove(step)
    }
}

impl From<AddSegment> for TransformationStep {
    fn from(step: AddSegment) -> Self {
        TransformationStep::Add(step)
    }
}

impl From<RequiredSegmentsOnly> for TransformationStep {
    fn from(step: RequiredSegmentsOnly) -> Self {
        TransformationStep::RequiredOnly(step)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step ran; `affected` counts segments updated, removed or added.
    Applied { affected: usize },
    RuleDeclined,
    TargetMissing,
}

/// What happened to one step during a transformation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub step: String,
    pub result: Result<StepOutcome, StepError>,
}

impl StepReport {
    pub fn applied(&self) -> bool {
        matches!(self.result, Ok(StepOutcome::Applied { .. }))
    }

    pub fn error(&self) -> Option<&StepError> {
        self.result.as_ref().err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SegmentField;
    use crate::rule::{AlwaysFalse, FieldEquals, FnRule, RuleError};
    use crate::transform::supplier::{Constant, FnSupplier, SegmentTemplate};

    fn oru(observation_requests: usize) -> Message {
        let mut text = String::from("MSH|^~\\&|LAB|FAC|||20240101||ORU^R01|2|P|2.5\rPID|1||999");
        for n in 1..=observation_requests {
            text.push_str(&format!("\rOBR|{n}||ORD{n}\rOBX|1|NM|GLU||{n}"));
        }
        Message::parse(&text).unwrap()
    }

    fn adt() -> Message {
        Message::parse("MSH|^~\\&|A|B|||20240101||ADT^A01|1|P|2.5\rEVN|A01\rPID|1||123||Doe^ADAM\rPV1|1|I").unwrap()
    }

    fn obr_ids(message: &Message) -> Vec<String> {
        message
            .segments("OBR")
            .iter()
            .map(|segment| segment.value(&FieldPath::field(1)))
            .collect()
    }

    #[test]
    fn test_update_replaces_component() {
        let mut message = adt();
        let step = TransformationStep::from(
            UpdateSegment::new("PID").set(FieldPath::component(5, 2), Arc::new(Constant::new("Peter"))),
        );

        let outcome = step.apply(&mut message).unwrap();

        assert_eq!(outcome, StepOutcome::Applied { affected: 1 });
        assert_eq!(message.field(&SegmentField::parse("PID-5").unwrap()), Some("Doe^Peter"));
    }

    #[test]
    fn test_update_all_repetitions() {
        let mut message = oru(3);
        let step = TransformationStep::from(
            UpdateSegment::new("OBR")
                .selector(RepetitionSelector::All)
                .set(FieldPath::field(2), Arc::new(Constant::new("X"))),
        );

        step.apply(&mut message).unwrap();

        let placers: Vec<String> = message
            .segments("OBR")
            .iter()
            .map(|segment| segment.value(&FieldPath::field(2)))
            .collect();
        assert_eq!(placers, vec!["X", "X", "X"]);
    }

    #[test]
    fn test_declined_rule_is_no_op() {
        let mut message = adt();
        let before = message.clone();
        let step = TransformationStep::from(
            UpdateSegment::new("PID")
                .when(Arc::new(AlwaysFalse))
                .set(FieldPath::component(5, 2), Arc::new(Constant::new("Peter"))),
        );

        assert_eq!(step.apply(&mut message).unwrap(), StepOutcome::RuleDeclined);
        assert_eq!(message, before);
    }

    #[test]
    fn test_missing_target_is_no_op() {
        let mut message = adt();
        let before = message.clone();
        let step = TransformationStep::from(UpdateSegment::new("NK1").set(FieldPath::field(2), Arc::new(Constant::new("x"))));

        assert_eq!(step.apply(&mut message).unwrap(), StepOutcome::TargetMissing);
        assert_eq!(message, before);
    }

    #[test]
    fn test_group_target_is_structural_mismatch() {
        let mut message = oru(1);
        let step = TransformationStep::from(RemoveSegment::new("ORDER_OBSERVATION"));

        assert!(matches!(
            step.apply(&mut message),
            Err(StepError::StructuralMismatch { .. })
        ));
    }

    #[test]
    fn test_supplier_failure_leaves_message_untouched() {
        let mut message = adt();
        let before = message.clone();
        let failing = FnSupplier::new("lookup", |_: &Message| {
            Err(StepError::Supplier {
                supplier: "lookup".to_string(),
                reason: "unavailable".to_string(),
            })
        });
        let step = TransformationStep::from(
            UpdateSegment::new("PID")
                .set(FieldPath::field(2), Arc::new(Constant::new("ok")))
                .set(FieldPath::field(3), Arc::new(failing)),
        );

        assert!(matches!(step.apply(&mut message), Err(StepError::Supplier { .. })));
        assert_eq!(message, before);
    }

    #[test]
    fn test_remove_all_repetitions() {
        let mut message = oru(4);
        let step = TransformationStep::from(RemoveSegment::new("OBR").selector(RepetitionSelector::All));

        assert_eq!(step.apply(&mut message).unwrap(), StepOutcome::Applied { affected: 4 });
        assert!(message.segments("OBR").is_empty());
    }

    #[test]
    fn test_remove_first_repetition() {
        let mut message = oru(4);
        let step = TransformationStep::from(RemoveSegment::new("OBR"));

        step.apply(&mut message).unwrap();

        assert_eq!(obr_ids(&message), vec!["2", "3", "4"]);
    }

    #[test]
    fn test_remove_indexed_repetition() {
        let mut message = oru(4);
        let step = TransformationStep::from(RemoveSegment::new("OBR").selector(RepetitionSelector::Index(2)));

        assert_eq!(step.apply(&mut message).unwrap(), StepOutcome::Applied { affected: 1 });
        assert_eq!(obr_ids(&message), vec!["1", "2", "4"]);
    }

    #[test]
    fn test_remove_index_out_of_range() {
        let mut message = oru(4);
        let before = message.clone();
        let step = TransformationStep::from(RemoveSegment::new("OBR").selector(RepetitionSelector::Index(4)));

        assert_eq!(step.apply(&mut message).unwrap(), StepOutcome::TargetMissing);
        assert_eq!(message, before);
    }

    #[test]
    fn test_remove_header_is_refused() {
        let mut message = adt();
        let before = message.clone();
        let step = TransformationStep::from(RemoveSegment::new("MSH"));

        assert!(matches!(
            step.apply(&mut message),
            Err(StepError::HeaderRemoval { .. })
        ));
        assert_eq!(message, before);
    }

    #[test]
    fn test_remove_evaluates_each_repetition() {
        let mut message = oru(4);
        let even = FnRule::new("even", |_: &Message, repetition: Option<usize>| {
            repetition
                .map(|index| index % 2 == 1)
                .ok_or_else(|| RuleError::new("even", "needs a repetition"))
        });
        let step = TransformationStep::from(
            RemoveSegment::new("OBR")
                .selector(RepetitionSelector::All)
                .when(Arc::new(even)),
        );

        assert_eq!(step.apply(&mut message).unwrap(), StepOutcome::Applied { affected: 2 });
        assert_eq!(obr_ids(&message), vec!["1", "3"]);
    }

    #[test]
    fn test_remove_by_field_value() {
        let mut message = oru(3);
        let step = TransformationStep::from(
            RemoveSegment::new("OBR")
                .selector(RepetitionSelector::All)
                .when(Arc::new(FieldEquals::new(SegmentField::parse("OBR-3").unwrap(), "ORD2"))),
        );

        step.apply(&mut message).unwrap();

        assert_eq!(obr_ids(&message), vec!["1", "3"]);
    }

    #[test]
    fn test_add_inserts_at_grammar_position() {
        let mut message = adt();
        let template = SegmentTemplate::new("nk1", ["NK1|1|${PID-5.1}^Jane"]).unwrap();
        let step = TransformationStep::from(AddSegment::new(Arc::new(template)));

        step.apply(&mut message).unwrap();

        assert_eq!(
            message.encode(),
            "MSH|^~\\&|A|B|||20240101||ADT^A01|1|P|2.5\rEVN|A01\rPID|1||123||Doe^ADAM\rNK1|1|Doe^Jane\rPV1|1|I"
        );
    }

    #[test]
    fn test_add_appends_order_group() {
        let mut message = oru(2);
        let template = SegmentTemplate::new("obr", ["OBR|3||ORD3"]).unwrap();
        let step = TransformationStep::from(AddSegment::new(Arc::new(template)));

        assert_eq!(step.apply(&mut message).unwrap(), StepOutcome::Applied { affected: 1 });
        assert_eq!(obr_ids(&message), vec!["1", "2", "3"]);
        assert_eq!(message.all_repetitions("ORDER_OBSERVATION").len(), 3);
    }

    #[test]
    fn test_add_appends_procedure_group() {
        let mut message = Message::parse(
            "MSH|^~\\&|A|B|||20240101||ADT^A01|1|P|2.5\rEVN|A01\rPID|1\rPV1|1\rPR1|1||P1\rROL|1|AD",
        )
        .unwrap();
        let template = SegmentTemplate::new("pr1", ["PR1|2||P2"]).unwrap();
        let step = TransformationStep::from(AddSegment::new(Arc::new(template)));

        step.apply(&mut message).unwrap();

        assert_eq!(
            message.encode(),
            "MSH|^~\\&|A|B|||20240101||ADT^A01|1|P|2.5\rEVN|A01\rPID|1\rPV1|1\rPR1|1||P1\rROL|1|AD\rPR1|2||P2"
        );
    }

    #[test]
    fn test_required_only_prunes_nested_groups() {
        let mut message = Message::parse(
            "MSH|^~\\&|LAB|FAC|||20240101||ORU^R01|2|P|2.5\rPID|1||999\rOBR|1||ORD1\rNTE|1||order note\r\
OBX|1|NM|GLU||1\rNTE|1||result note\rOBR|2||ORD2\rOBX|1|NM|GLU||2",
        )
        .unwrap();
        let step = TransformationStep::from(RequiredSegmentsOnly::new(["PID", "OBR", "OBX"]));

        assert_eq!(step.apply(&mut message).unwrap(), StepOutcome::Applied { affected: 2 });
        assert!(message.segments("NTE").is_empty());
        assert_eq!(message.all_repetitions("OBSERVATION").len(), 2);
        assert_eq!(
            message.encode(),
            "MSH|^~\\&|LAB|FAC|||20240101||ORU^R01|2|P|2.5\rPID|1||999\rOBR|1||ORD1\rOBX|1|NM|GLU||1\rOBR|2||ORD2\rOBX|1|NM|GLU||2"
        );
    }

    #[test]
    fn test_required_only_keeps_header() {
        let mut message = adt();
        let step = TransformationStep::from(RequiredSegmentsOnly::new(["PID"]));

        assert_eq!(step.apply(&mut message).unwrap(), StepOutcome::Applied { affected: 2 });
        assert_eq!(message.encode(), "MSH|^~\\&|A|B|||20240101||ADT^A01|1|P|2.5\rPID|1||123||Doe^ADAM");
    }

    #[test]
    fn test_required_only_prefix_match() {
        let mut message = Message::parse(
            "MSH|^~\\&|A|B|||20240101||ADT^A01|1|P|2.5\rEVN|A01\rPID|1\rPV1|1\rPV2|1\rZPV|1",
        )
        .unwrap();
        let step = TransformationStep::from(RequiredSegmentsOnly::new(["PV", "EVN"]));

        step.apply(&mut message).unwrap();

        let codes: Vec<String> = message
            .encode()
            .split('\r')
            .map(|line| line[..3].to_string())
            .collect();
        assert_eq!(codes, vec!["MSH", "EVN", "PV1", "PV2"]);
    }

    #[test]
    fn test_display() {
        let update = TransformationStep::from(UpdateSegment::new("PID"));
        let remove = TransformationStep::from(RemoveSegment::new("OBR").selector(RepetitionSelector::Index(2)));
        let insert = TransformationStep::from(AddSegment::new(Arc::new(
            SegmentTemplate::new("zpi", ["ZPI|1"]).unwrap(),
        )));

        assert_eq!(update.to_string(), "update PID[first]");
        assert_eq!(remove.to_string(), "remove OBR[2]");
        assert_eq!(insert.to_string(), "add zpi");
    }

    #[test]
    fn test_selector_from_yaml() {
        let selectors: Vec<RepetitionSelector> = serde_yaml::from_str("[first, all, 2]").unwrap();

        assert_eq!(
            selectors,
            vec![
                RepetitionSelector::First,
                RepetitionSelector::All,
                RepetitionSelector::Index(2)
            ]
        );
        assert!(serde_yaml::from_str::<RepetitionSelector>("last").is_err());
    }
}
