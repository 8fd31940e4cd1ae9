//! Segments and the encoding characters used to split their fields.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{is_segment_code, FieldPath, MessageError};

/// Delimiters declared in MSH-1 and MSH-2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingCharacters {
    pub field: char,
    pub component: char,
    pub repetition: char,
    pub escape: char,
    pub subcomponent: char,
}

impl Default for EncodingCharacters {
    fn default() -> Self {
        Self {
            field: '|',
            component: '^',
            repetition: '~',
            escape: '\\',
            subcomponent: '&',
        }
    }
}

impl EncodingCharacters {
    /// Read the delimiters from a raw MSH line.
    ///
    /// Missing encoding characters fall back to the HL7 defaults.
    pub fn from_header(line: &str) -> Result<Self, MessageError> {
        let mut chars = line.chars().skip(3);
        let field = chars.next().ok_or(MessageError::HeaderTooShort)?;

        let declared: Vec<char> = chars.take_while(|c| *c != field).take(4).collect();
        if declared.is_empty() {
            return Err(MessageError::HeaderTooShort);
        }

        let defaults = Self::default();
        Ok(Self {
            field,
            component: declared.first().copied().unwrap_or(defaults.component),
            repetition: declared.get(1).copied().unwrap_or(defaults.repetition),
            escape: declared.get(2).copied().unwrap_or(defaults.escape),
            subcomponent: declared.get(3).copied().unwrap_or(defaults.subcomponent),
        })
    }

    /// MSH-2 as written on the wire.
    pub fn declaration(&self) -> String {
        [self.component, self.repetition, self.escape, self.subcomponent]
            .iter()
            .collect()
    }
}

/// A single segment: a three character code followed by 1-based fields.
///
/// For `MSH`, field 1 is the field separator and field 2 the encoding
/// characters, matching HL7 numbering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    code: String,
    fields: Vec<String>,
    encoding: EncodingCharacters,
}

impl Segment {
    pub fn new(code: impl Into<String>, encoding: EncodingCharacters) -> Self {
        let code = code.into();
        let fields = if code == "MSH" {
            vec![encoding.field.to_string(), encoding.declaration()]
        } else {
            Vec::new()
        };

        Self {
            code,
            fields,
            encoding,
        }
    }

    /// Parse one ER7 segment line.
    pub fn parse(line: &str, encoding: EncodingCharacters) -> Result<Self, MessageError> {
        let code = line
            .get(0..3)
            .filter(|code| is_segment_code(code))
            .ok_or_else(|| MessageError::InvalidSegmentCode(line.chars().take(3).collect()))?;

        let rest = &line[3..];
        let Some(body) = rest.strip_prefix(encoding.field) else {
            if rest.is_empty() && code != "MSH" {
                return Ok(Self::new(code, encoding));
            }
            return Err(MessageError::InvalidSegmentCode(
                line.chars().take(4).collect(),
            ));
        };

        let mut fields = Vec::new();
        if code == "MSH" {
            fields.push(encoding.field.to_string());
        }
        fields.extend(body.split(encoding.field).map(str::to_string));

        Ok(Self {
            code: code.to_string(),
            fields,
            encoding,
        })
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn encoding(&self) -> EncodingCharacters {
        self.encoding
    }

    /// Number of fields present (trailing empty fields included).
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Raw text of a whole field, all repetitions included.
    pub fn raw_field(&self, field: usize) -> Option<&str> {
        field
            .checked_sub(1)
            .and_then(|index| self.fields.get(index))
            .map(String::as_str)
    }

    fn is_header(&self) -> bool {
        self.code == "MSH"
    }

    /// Value at `path`, or `None` when the segment does not reach that far.
    pub fn get(&self, path: &FieldPath) -> Option<&str> {
        let raw = self.raw_field(path.field)?;

        // MSH-1 and MSH-2 contain the delimiters themselves.
        if self.is_header() && path.field <= 2 {
            return Some(raw);
        }

        let repetition = raw.split(self.encoding.repetition).nth(path.repetition)?;
        let Some(component) = path.component else {
            return Some(repetition);
        };

        let component = repetition
            .split(self.encoding.component)
            .nth(component.checked_sub(1)?)?;
        match path.subcomponent {
            Some(subcomponent) => component
                .split(self.encoding.subcomponent)
                .nth(subcomponent.checked_sub(1)?),
            None => Some(component),
        }
    }

    /// Value at `path`, empty when absent.
    pub fn value(&self, path: &FieldPath) -> String {
        self.get(path).unwrap_or_default().to_string()
    }

    /// Assign `value` at `path`, padding missing fields, repetitions,
    /// components and subcomponents with empty values.
    pub fn set(&mut self, path: &FieldPath, value: &str) {
        let Some(index) = path.field.checked_sub(1) else {
            return;
        };
        if self.fields.len() <= index {
            self.fields.resize(index + 1, String::new());
        }

        if self.is_header() && path.field <= 2 {
            self.fields[index] = value.to_string();
            return;
        }

        let enc = self.encoding;
        let mut repetitions = split_owned(&self.fields[index], enc.repetition);
        pad(&mut repetitions, path.repetition + 1);

        let repetition = &mut repetitions[path.repetition];
        match path.component {
            None => *repetition = value.to_string(),
            Some(component) => {
                let component = component.max(1);
                let mut components = split_owned(repetition, enc.component);
                pad(&mut components, component);

                match path.subcomponent {
                    None => components[component - 1] = value.to_string(),
                    Some(subcomponent) => {
                        let subcomponent = subcomponent.max(1);
                        let mut subcomponents = split_owned(&components[component - 1], enc.subcomponent);
                        pad(&mut subcomponents, subcomponent);
                        subcomponents[subcomponent - 1] = value.to_string();
                        components[component - 1] = join(&subcomponents, enc.subcomponent);
                    }
                }

                *repetition = join(&components, enc.component);
            }
        }

        self.fields[index] = join(&repetitions, enc.repetition);
    }

    /// Serialize to a single ER7 line.
    pub fn encode(&self) -> String {
        let sep = self.encoding.field;
        if self.is_header() {
            let mut line = String::from("MSH");
            line.push(sep);
            if let Some(rest) = self.fields.get(1..) {
                line.push_str(&join(rest, sep));
            }
            return line;
        }

        if self.fields.is_empty() {
            return self.code.clone();
        }

        format!("{}{}{}", self.code, sep, join(&self.fields, sep))
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

fn split_owned(raw: &str, separator: char) -> Vec<String> {
    raw.split(separator).map(str::to_string).collect()
}

fn pad(parts: &mut Vec<String>, len: usize) {
    if parts.len() < len {
        parts.resize(len, String::new());
    }
}

fn join(parts: &[String], separator: char) -> String {
    let mut buf = [0u8; 4];
    let separator: &str = separator.encode_utf8(&mut buf);
    parts.join(separator)
}
