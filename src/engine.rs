//! The transformation pipeline.
//!
//! For every message the engine runs the pre-transformation filter, applies
//! the configuration resolved for the message type and direction, and runs
//! the post-transformation filter on the result. Failed steps never stop the
//! pipeline; they are logged and reported in the [`TransformOutcome`].
//!
//! Catalogs are read through a [`CatalogHandle`]: each message works against
//! one snapshot, and [`TransformationEngine::reload`] swaps in a new set
//! without blocking messages already in flight.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::catalog::CatalogHandle;
use crate::convert::Converter;
use crate::filter::{FilterPhase, MessageFilter};
use crate::message::Message;
use crate::transform::{ConfigurationResolver, Direction, StepError, StepReport};

/// Everything the engine resolves against.
#[derive(Debug, Default)]
pub struct Catalogs {
    pub transformations: ConfigurationResolver,
    pub filters: MessageFilter,
    pub conversions: Converter,
}

/// What to forward when a step fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Forward the message with every step that did succeed applied.
    #[default]
    ForwardPartial,
    /// Forward the message exactly as received.
    ForwardOriginal,
}

#[derive(Debug, Clone)]
pub struct TransformOutcome {
    pub message: Message,
    /// False when a filter suppressed the message.
    pub forwarded: bool,
    pub denied_at: Option<FilterPhase>,
    /// Name of the configuration that ran; empty when the pre filter denied.
    pub configuration: String,
    pub reports: Vec<StepReport>,
}

impl TransformOutcome {
    pub fn failures(&self) -> impl Iterator<Item = &StepReport> {
        self.reports.iter().filter(|report| report.error().is_some())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }
}

pub struct TransformationEngine {
    catalogs: CatalogHandle<Catalogs>,
}

impl TransformationEngine {
    pub fn new(catalogs: Catalogs) -> Self {
        Self {
            catalogs: CatalogHandle::new(catalogs),
        }
    }

    /// Replace the active catalogs. Messages already being transformed finish
    /// with the catalogs they started with.
    pub fn reload(&self, catalogs: Catalogs) {
        info!(
            transformations = catalogs.transformations.catalog().len(),
            filters = catalogs.filters.conditions().len(),
            "reloading catalogs"
        );
        self.catalogs.publish(catalogs);
    }

    pub fn catalogs(&self) -> Arc<Catalogs> {
        self.catalogs.current()
    }

    /// Whether `message` passes the filter for `phase`.
    pub fn filter(&self, message: &Message, phase: FilterPhase) -> bool {
        self.catalogs.current().filters.allows(message, phase)
    }

    pub fn transform(&self, message: Message, direction: Direction) -> TransformOutcome {
        self.transform_with_policy(message, direction, FailurePolicy::default())
    }

    /// Run the whole pipeline for one message.
    pub fn transform_with_policy(
        &self,
        mut message: Message,
        direction: Direction,
        policy: FailurePolicy,
    ) -> TransformOutcome {
        let catalogs = self.catalogs.current();
        let message_type = message.message_type();

        if !catalogs.filters.allows(&message, FilterPhase::PreTransformation) {
            info!(%message_type, %direction, "message suppressed before transformation");
            return TransformOutcome {
                message,
                forwarded: false,
                denied_at: Some(FilterPhase::PreTransformation),
                configuration: String::new(),
                reports: Vec::new(),
            };
        }

        let configuration = catalogs.transformations.resolve(&message_type, direction);
        let original = (!configuration.is_pass_through()).then(|| message.clone());

        let mut reports = configuration.apply(&mut message);

        if let Some(original) = &original {
            // A message that no longer parses is never forwarded.
            if let Err(error) = message.renormalize() {
                warn!(%message_type, %error, "could not re-parse transformed message, restoring original");
                reports.push(StepReport {
                    step: "renormalize".to_string(),
                    result: Err(StepError::Unencodable {
                        reason: error.to_string(),
                    }),
                });
                message = original.clone();
            }
        }

        let failed = reports.iter().filter(|report| report.error().is_some()).count();
        if failed > 0 {
            warn!(
                %message_type,
                configuration = configuration.name(),
                failed,
                ?policy,
                "transformation finished with failed steps"
            );
            if let (FailurePolicy::ForwardOriginal, Some(original)) = (policy, original) {
                message = original;
            }
        }

        debug!(
            %message_type,
            %direction,
            configuration = configuration.name(),
            steps = reports.len(),
            "transformation finished"
        );

        let forwarded = catalogs.filters.allows(&message, FilterPhase::PostTransformation);
        if !forwarded {
            info!(%message_type, %direction, "message suppressed after transformation");
        }

        TransformOutcome {
            message,
            forwarded,
            denied_at: (!forwarded).then_some(FilterPhase::PostTransformation),
            configuration: configuration.name().to_string(),
            reports,
        }
    }
}
