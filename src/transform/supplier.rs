//! Value suppliers for updates and segment factories for additions.

use std::fmt;

use chrono::format::{Item, StrftimeItems};
use regex::{Captures, Regex};

use super::StepError;
use crate::message::{EncodingCharacters, Message, MessageError, Segment, SegmentField};

/// Default layout of HL7 `TS`/`DTM` values.
pub const HL7_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Computes the value an update step writes into a field.
pub trait ValueSupplier: Send + Sync {
    fn name(&self) -> &str;

    fn supply(&self, message: &Message) -> Result<String, StepError>;
}

impl fmt::Debug for dyn ValueSupplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueSupplier({})", self.name())
    }
}

/// Produces the segments an add step inserts.
pub trait SegmentFactory: Send + Sync {
    fn name(&self) -> &str;

    fn create(&self, message: &Message) -> Result<Vec<Segment>, StepError>;
}

impl fmt::Debug for dyn SegmentFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SegmentFactory({})", self.name())
    }
}

#[derive(Debug, Clone)]
pub struct Constant {
    name: String,
    value: String,
}

impl Constant {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            name: format!("constant '{value}'"),
            value,
        }
    }
}

impl ValueSupplier for Constant {
    fn name(&self) -> &str {
        &self.name
    }

    fn supply(&self, _message: &Message) -> Result<String, StepError> {
        Ok(self.value.clone())
    }
}

/// Copies another field of the message; empty when that field is absent.
#[derive(Debug, Clone)]
pub struct CopyField {
    name: String,
    source: SegmentField,
}

impl CopyField {
    pub fn new(source: SegmentField) -> Self {
        Self {
            name: format!("copy {source}"),
            source,
        }
    }
}

impl ValueSupplier for CopyField {
    fn name(&self) -> &str {
        &self.name
    }

    fn supply(&self, message: &Message) -> Result<String, StepError> {
        Ok(message.field(&self.source).unwrap_or_default().to_string())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Clear;

impl ValueSupplier for Clear {
    fn name(&self) -> &str {
        "clear"
    }

    fn supply(&self, _message: &Message) -> Result<String, StepError> {
        Ok(String::new())
    }
}

/// Current local time, formatted with a chrono format string.
#[derive(Debug, Clone)]
pub struct Timestamp {
    format: String,
}

impl Timestamp {
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
        }
    }

    /// Like [`Timestamp::new`], but rejects format strings chrono cannot render.
    pub fn try_new(format: impl Into<String>) -> Result<Self, StepError> {
        let timestamp = Self::new(format);
        let invalid = StrftimeItems::new(&timestamp.format).any(|item| matches!(item, Item::Error));
        if invalid {
            return Err(StepError::Supplier {
                supplier: "timestamp".to_string(),
                reason: format!("invalid timestamp format '{}'", timestamp.format),
            });
        }
        Ok(timestamp)
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::new(HL7_TIMESTAMP_FORMAT)
    }
}

impl ValueSupplier for Timestamp {
    fn name(&self) -> &str {
        "timestamp"
    }

    fn supply(&self, _message: &Message) -> Result<String, StepError> {
        use std::fmt::Write;

        let mut value = String::new();
        write!(value, "{}", chrono::Local::now().format(&self.format)).map_err(|_| {
            StepError::Supplier {
                supplier: self.name().to_string(),
                reason: format!("invalid timestamp format '{}'", self.format),
            }
        })?;
        Ok(value)
    }
}

type SupplierFunction = dyn Fn(&Message) -> Result<String, StepError> + Send + Sync;

/// Adapts a closure into a named [`ValueSupplier`].
pub struct FnSupplier {
    name: String,
    function: Box<SupplierFunction>,
}

impl FnSupplier {
    pub fn new<F>(name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&Message) -> Result<String, StepError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            function: Box::new(function),
        }
    }
}

impl fmt::Debug for FnSupplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSupplier").field("name", &self.name).finish()
    }
}

impl ValueSupplier for FnSupplier {
    fn name(&self) -> &str {
        &self.name
    }

    fn supply(&self, message: &Message) -> Result<String, StepError> {
        (self.function)(message)
    }
}

/// Segments written as ER7 lines, with `${SEG-f.c}` placeholders filled
/// from the message being transformed.
///
/// # Example
///
/// ```
/// use hl7_transform::transform::SegmentTemplate;
///
/// let template = SegmentTemplate::new("zpi", ["ZPI|1|${PID-3.1}"]).unwrap();
/// assert_eq!(template.lines().len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct SegmentTemplate {
    name: String,
    lines: Vec<String>,
    placeholder: Regex,
}

impl SegmentTemplate {
    /// Build a template, validating every line with placeholders blanked out.
    pub fn new<I, S>(name: impl Into<String>, lines: I) -> Result<Self, MessageError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let placeholder = Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| MessageError::InvalidFieldPath(e.to_string()))?;
        let lines: Vec<String> = lines.into_iter().map(Into::into).collect();

        for line in &lines {
            for captures in placeholder.captures_iter(line) {
                SegmentField::parse(&captures[1])?;
            }
            let blank = placeholder.replace_all(line, "");
            Segment::parse(&blank, EncodingCharacters::default())?;
        }

        Ok(Self {
            name: name.into(),
            lines,
            placeholder,
        })
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    fn render(&self, line: &str, message: &Message) -> String {
        self.placeholder
            .replace_all(line, |captures: &Captures<'_>| {
                SegmentField::parse(&captures[1])
                    .ok()
                    .and_then(|reference| message.field(&reference).map(str::to_string))
                    .unwrap_or_default()
            })
            .into_owned()
    }
}

impl SegmentFactory for SegmentTemplate {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, message: &Message) -> Result<Vec<Segment>, StepError> {
        self.lines
            .iter()
            .map(|line| {
                let rendered = self.render(line, message);
                Segment::parse(&rendered, message.encoding()).map_err(|e| StepError::Factory {
                    factory: self.name.clone(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}

type FactoryFunction = dyn Fn(&Message) -> Result<Vec<Segment>, StepError> + Send + Sync;

/// Adapts a closure into a named [`SegmentFactory`].
pub struct FnFactory {
    name: String,
    function: Box<FactoryFunction>,
}

impl FnFactory {
    pub fn new<F>(name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&Message) -> Result<Vec<Segment>, StepError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            function: Box::new(function),
        }
    }
}

impl fmt::Debug for FnFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnFactory").field("name", &self.name).finish()
    }
}

impl SegmentFactory for FnFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, message: &Message) -> Result<Vec<Segment>, StepError> {
        (self.function)(message)
    }
}
