//! Accept/deny decisions before and after transformation.
//!
//! Filters resolve exactly like transformations: exact type, then the group
//! wildcard. A message with no condition for a phase passes; a condition that
//! fails to evaluate denies.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::catalog::{Catalog, CatalogBuilder, CatalogError, MessageTypePattern};
use crate::message::Message;
use crate::rule::{self, Rule};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterPhase {
    #[serde(alias = "pre")]
    PreTransformation,
    #[serde(alias = "post")]
    PostTransformation,
}

impl fmt::Display for FilterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterPhase::PreTransformation => write!(f, "pre"),
            FilterPhase::PostTransformation => write!(f, "post"),
        }
    }
}

impl FromStr for FilterPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pre" | "pre_transformation" => Ok(FilterPhase::PreTransformation),
            "post" | "post_transformation" => Ok(FilterPhase::PostTransformation),
            other => Err(format!("unknown filter phase '{other}', expected pre or post")),
        }
    }
}

/// Filter conditions keyed by message type and phase.
#[derive(Debug, Default)]
pub struct MessageFilter {
    conditions: Catalog<FilterPhase, dyn Rule>,
}

impl MessageFilter {
    /// A filter with no conditions, allowing every message.
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn builder() -> MessageFilterBuilder {
        MessageFilterBuilder {
            conditions: Catalog::builder(),
        }
    }

    pub fn condition_for(&self, message_type: &str, phase: FilterPhase) -> Option<Arc<dyn Rule>> {
        self.conditions.resolve(message_type, phase)
    }

    /// Whether `message` may continue past `phase`.
    pub fn allows(&self, message: &Message, phase: FilterPhase) -> bool {
        let message_type = message.message_type();
        let Some(condition) = self.condition_for(&message_type, phase) else {
            debug!(%message_type, %phase, "no filter condition, allowing");
            return true;
        };

        // Errors and panics inside the condition deny the message.
        if rule::passes(condition.as_ref(), message, None) {
            debug!(%message_type, %phase, condition = condition.name(), "filter allowed message");
            true
        } else {
            info!(%message_type, %phase, condition = condition.name(), "filter denied message");
            false
        }
    }

    pub fn conditions(&self) -> &Catalog<FilterPhase, dyn Rule> {
        &self.conditions
    }
}

pub struct MessageFilterBuilder {
    conditions: CatalogBuilder<FilterPhase, dyn Rule>,
}

impl MessageFilterBuilder {
    pub fn register(
        &mut self,
        patterns: &[MessageTypePattern],
        phase: FilterPhase,
        condition: Arc<dyn Rule>,
    ) -> Result<&mut Self, CatalogError> {
        let name = condition.name().to_string();
        self.conditions.register(patterns, phase, name, condition)?;
        Ok(self)
    }

    pub fn build(self) -> MessageFilter {
        MessageFilter {
            conditions: self.conditions.build(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{FnRule, RuleError, SegmentExists};

    fn pattern(raw: &str) -> Vec<MessageTypePattern> {
        vec![MessageTypePattern::parse(raw).unwrap()]
    }

    fn filter() -> MessageFilter {
        let mut builder = MessageFilter::builder();
        builder
            .register(&pattern("ADT_*"), FilterPhase::PreTransformation, Arc::new(SegmentExists::new("PID")))
            .unwrap()
            .register(&pattern("MDM_T02"), FilterPhase::PreTransformation, Arc::new(SegmentExists::new("EVN")))
            .unwrap();
        builder.build()
    }

    #[test]
    fn test_group_wildcard_condition() {
        let message = Message::parse("MSH|^~\\&|A|B|||20240101||ADT^A04|1|P|2.5\rEVN|A04\rPID|1\rPV1|1").unwrap();

        assert!(filter().allows(&message, FilterPhase::PreTransformation));
    }

    #[test]
    fn test_exact_condition_denies() {
        let message = Message::parse("MSH|^~\\&|A|B|||20240101||MDM^T02|1|P|2.5\rPID|1\rPV1|1\rTXA|1").unwrap();

        assert!(!filter().allows(&message, FilterPhase::PreTransformation));
    }

    #[test]
    fn test_missing_condition_allows() {
        let message = Message::parse("MSH|^~\\&|A|B|||20240101||MDM^T02|1|P|2.5\rPID|1\rPV1|1\rTXA|1").unwrap();

        assert!(filter().allows(&message, FilterPhase::PostTransformation));
        assert!(MessageFilter::allow_all().allows(&message, FilterPhase::PreTransformation));
    }

    #[test]
    fn test_failing_condition_denies() {
        let mut builder = MessageFilter::builder();
        builder
            .register(
                &pattern("ORU_*"),
                FilterPhase::PostTransformation,
                Arc::new(FnRule::new("lookup", |_: &Message, _| Err(RuleError::new("lookup", "timeout")))),
            )
            .unwrap();
        let filter = builder.build();
        let message = Message::parse("MSH|^~\\&|LAB|FAC|||20240101||ORU^R01|2|P|2.5\rPID|1\rOBR|1").unwrap();

        assert!(!filter.allows(&message, FilterPhase::PostTransformation));
    }

    #[test]
    fn test_panicking_condition_denies() {
        let mut builder = MessageFilter::builder();
        builder
            .register(
                &pattern("ORU_R01"),
                FilterPhase::PreTransformation,
                Arc::new(FnRule::new("first_obx", |message: &Message, _| {
                    Ok(message.segments("OBX")[0].code() == "OBX")
                })),
            )
            .unwrap();
        let filter = builder.build();
        let message = Message::parse("MSH|^~\\&|LAB|FAC|||20240101||ORU^R01|2|P|2.5\rPID|1\rOBR|1").unwrap();

        assert!(!filter.allows(&message, FilterPhase::PreTransformation));
    }

    #[test]
    fn test_phase_parsing() {
        assert_eq!("pre".parse::<FilterPhase>().unwrap(), FilterPhase::PreTransformation);
        assert_eq!(
            serde_yaml::from_str::<FilterPhase>("post_transformation").unwrap(),
            FilterPhase::PostTransformation
        );
        assert_eq!(serde_yaml::from_str::<FilterPhase>("pre").unwrap(), FilterPhase::PreTransformation);
    }
}
