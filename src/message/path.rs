//! Field addressing within HL7v2 segments.
//!
//! Paths use the conventional HL7 dotted notation, 1-based:
//!
//! - `5` - the whole first repetition of field 5
//! - `5.2` - component 2 of field 5
//! - `5.2.1` - subcomponent 1 of component 2 of field 5
//! - `3[1].1` - component 1 of the second repetition (0-based) of field 3
//!
//! A [`SegmentField`] prefixes a path with a segment code: `PID-5.2`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::MessageError;

/// Location of a value inside a segment.
///
/// Deserializes from a path string, or from a bare field number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPath", into = "String")]
pub struct FieldPath {
    /// 1-based field number
    pub field: usize,
    /// 0-based field repetition
    pub repetition: usize,
    /// 1-based component, `None` for the whole repetition
    pub component: Option<usize>,
    /// 1-based subcomponent, only meaningful with a component
    pub subcomponent: Option<usize>,
}

impl FieldPath {
    /// Whole first repetition of `field`.
    pub fn field(field: usize) -> Self {
        Self {
            field,
            repetition: 0,
            component: None,
            subcomponent: None,
        }
    }

    /// One component of the first repetition of `field`.
    pub fn component(field: usize, component: usize) -> Self {
        Self {
            field,
            repetition: 0,
            component: Some(component),
            subcomponent: None,
        }
    }

    pub fn with_repetition(mut self, repetition: usize) -> Self {
        self.repetition = repetition;
        self
    }

    pub fn with_subcomponent(mut self, subcomponent: usize) -> Self {
        self.subcomponent = Some(subcomponent);
        self
    }

    /// Parse a path such as `5.2` or `3[1].1`.
    ///
    /// # Example
    ///
    /// ```
    /// use hl7_transform::FieldPath;
    ///
    /// let path = FieldPath::parse("5.2").unwrap();
    /// assert_eq!(path.field, 5);
    /// assert_eq!(path.component, Some(2));
    /// ```
    pub fn parse(path: &str) -> Result<Self, MessageError> {
        let invalid = || MessageError::InvalidFieldPath(path.to_string());

        let mut parts = path.trim().split('.');
        let head = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;

        let (field, repetition) = match head.split_once('[') {
            Some((field, rest)) => {
                let index = rest.strip_suffix(']').ok_or_else(invalid)?;
                (field, index.parse::<usize>().map_err(|_| invalid())?)
            }
            None => (head, 0),
        };

        let field = parse_position(field).ok_or_else(invalid)?;
        let component = parts.next().map(|s| parse_position(s).ok_or_else(invalid)).transpose()?;
        let subcomponent = parts.next().map(|s| parse_position(s).ok_or_else(invalid)).transpose()?;

        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self {
            field,
            repetition,
            component,
            subcomponent,
        })
    }
}

// Positions are 1-based; zero is never a valid field or component.
fn parse_position(s: &str) -> Option<usize> {
    s.parse::<usize>().ok().filter(|n| *n > 0)
}

impl FromStr for FieldPath {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = MessageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPath {
    Field(usize),
    Text(String),
}

impl TryFrom<RawPath> for FieldPath {
    type Error = MessageError;

    fn try_from(raw: RawPath) -> Result<Self, Self::Error> {
        match raw {
            RawPath::Field(0) => Err(MessageError::InvalidFieldPath("0".to_string())),
            RawPath::Field(field) => Ok(Self::field(field)),
            RawPath::Text(text) => Self::parse(&text),
        }
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.to_string()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.field)?;
        if self.repetition > 0 {
            write!(f, "[{}]", self.repetition)?;
        }
        if let Some(component) = self.component {
            write!(f, ".{}", component)?;
            if let Some(subcomponent) = self.subcomponent {
                write!(f, ".{}", subcomponent)?;
            }
        }
        Ok(())
    }
}

/// A field path qualified by its segment code, e.g. `PID-5.2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SegmentField {
    pub segment: String,
    pub path: FieldPath,
}

impl SegmentField {
    pub fn new(segment: impl Into<String>, path: FieldPath) -> Self {
        Self {
            segment: segment.into(),
            path,
        }
    }

    pub fn parse(reference: &str) -> Result<Self, MessageError> {
        let (segment, path) = reference
            .trim()
            .split_once('-')
            .ok_or_else(|| MessageError::InvalidFieldPath(reference.to_string()))?;

        if !super::is_segment_code(segment) {
            return Err(MessageError::InvalidSegmentCode(segment.to_string()));
        }

        Ok(Self {
            segment: segment.to_string(),
            path: FieldPath::parse(path)?,
        })
    }
}

impl FromStr for SegmentField {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SegmentField {
    type Error = MessageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SegmentField> for String {
    fn from(reference: SegmentField) -> Self {
        reference.to_string()
    }
}

impl fmt::Display for SegmentField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.segment, self.path)
    }
}
