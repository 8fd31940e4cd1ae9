//! Parsed HL7v2 message tree.
//!
//! A [`Message`] is a root [`Group`] whose slots follow the grammar of the
//! message structure (see [`structure`]). Every slot holds zero or more
//! repetitions, each either a [`Segment`] or a nested [`Group`]. Slots the
//! grammar declares are always present, possibly empty, so positions for
//! inserted segments are known without consulting the grammar again.
//!
//! Wire handling is deliberately thin: ER7 text is split on segment and field
//! delimiters and no escape sequences are interpreted.

pub mod path;
pub mod segment;
pub mod structure;

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;

pub use path::{FieldPath, SegmentField};
pub use segment::{EncodingCharacters, Segment};
pub use structure::{ChildDef, ChildKind, GroupDef};

/// Errors raised while parsing messages or addressing fields.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("message is empty")]
    Empty,

    #[error("message must start with an MSH segment")]
    MissingHeader,

    #[error("MSH segment too short to declare encoding characters")]
    HeaderTooShort,

    #[error("invalid segment code: '{0}'")]
    InvalidSegmentCode(String),

    #[error("invalid field path: '{0}'")]
    InvalidFieldPath(String),
}

/// Three upper-case letters or digits.
pub fn is_segment_code(code: &str) -> bool {
    code.len() == 3
        && code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// One repetition inside a group slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Structure {
    Segment(Segment),
    Group(Group),
}

impl Structure {
    pub fn as_segment(&self) -> Option<&Segment> {
        match self {
            Structure::Segment(segment) => Some(segment),
            Structure::Group(_) => None,
        }
    }

    pub fn as_group(&self) -> Option<&Group> {
        match self {
            Structure::Group(group) => Some(group),
            Structure::Segment(_) => None,
        }
    }
}

/// A named container of slots.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    name: String,
    definition: Option<&'static GroupDef>,
    children: IndexMap<String, Vec<Structure>>,
}

impl Group {
    /// Empty group with every declared slot present.
    pub fn from_definition(definition: &'static GroupDef) -> Self {
        let children = definition
            .children
            .iter()
            .map(|child| (child.name().to_string(), Vec::new()))
            .collect();

        Self {
            name: definition.name.to_string(),
            definition: Some(definition),
            children,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definition(&self) -> Option<&'static GroupDef> {
        self.definition
    }

    /// Slots in document order.
    pub fn children(&self) -> impl Iterator<Item = (&str, &[Structure])> {
        self.children
            .iter()
            .map(|(name, repetitions)| (name.as_str(), repetitions.as_slice()))
    }

    /// Repetitions held by the slot `name` of this group (not nested ones).
    pub fn slot(&self, name: &str) -> &[Structure] {
        self.children.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// True when no segment exists anywhere below this group.
    pub fn is_empty(&self) -> bool {
        self.children.values().flatten().all(|structure| match structure {
            Structure::Segment(_) => false,
            Structure::Group(group) => group.is_empty(),
        })
    }

    fn is_declared_slot(&self, name: &str) -> bool {
        self.definition
            .is_some_and(|definition| definition.child(name).is_some())
    }

    /// First structure stored under `name`, searching depth-first in document order.
    pub fn get_structure(&self, name: &str) -> Option<&Structure> {
        for (slot, repetitions) in &self.children {
            for structure in repetitions {
                if slot == name {
                    return Some(structure);
                }
                if let Structure::Group(group) = structure {
                    if let Some(found) = group.get_structure(name) {
                        return Some(found);
                    }
                }
            }
        }
        None
    }

    /// Every structure stored under `name`, in document order.
    pub fn all_repetitions(&self, name: &str) -> Vec<&Structure> {
        let mut found = Vec::new();
        self.collect_repetitions(name, &mut found);
        found
    }

    fn collect_repetitions<'a>(&'a self, name: &str, found: &mut Vec<&'a Structure>) {
        for (slot, repetitions) in &self.children {
            for structure in repetitions {
                if slot == name {
                    found.push(structure);
                }
                if let Structure::Group(group) = structure {
                    group.collect_repetitions(name, found);
                }
            }
        }
    }

    /// Every segment with `code` below this group, in document order.
    pub fn segments(&self, code: &str) -> Vec<&Segment> {
        let mut found = Vec::new();
        self.collect_segments(code, &mut found);
        found
    }

    fn collect_segments<'a>(&'a self, code: &str, found: &mut Vec<&'a Segment>) {
        for structure in self.children.values().flatten() {
            match structure {
                Structure::Segment(segment) if segment.code() == code => found.push(segment),
                Structure::Segment(_) => {}
                Structure::Group(group) => group.collect_segments(code, found),
            }
        }
    }

    pub fn segments_mut(&mut self, code: &str) -> Vec<&mut Segment> {
        let mut found = Vec::new();
        self.collect_segments_mut(code, &mut found);
        found
    }

    fn collect_segments_mut<'a>(&'a mut self, code: &str, found: &mut Vec<&'a mut Segment>) {
        for structure in self.children.values_mut().flatten() {
            match structure {
                Structure::Segment(segment) => {
                    if segment.code() == code {
                        found.push(segment);
                    }
                }
                Structure::Group(group) => group.collect_segments_mut(code, found),
            }
        }
    }

    /// Remove the `index`-th repetition of the slot `name` of this group.
    pub fn remove_repetition(&mut self, name: &str, index: usize) -> Option<Structure> {
        let repetitions = self.children.get_mut(name)?;
        (index < repetitions.len()).then(|| repetitions.remove(index))
    }

    /// Keep only the segments for which `keep` returns true, visiting every
    /// segment below this group in document order.
    pub fn retain_segments<F>(&mut self, keep: &mut F)
    where
        F: FnMut(&Segment) -> bool,
    {
        for repetitions in self.children.values_mut() {
            repetitions.retain_mut(|structure| match structure {
                Structure::Segment(segment) => keep(segment),
                Structure::Group(group) => {
                    group.retain_segments(&mut *keep);
                    true
                }
            });
        }
    }

    /// Place `segment` at the slot the grammar reserves for it.
    ///
    /// A declared segment slot of this group wins. Otherwise the segment goes
    /// into the last repetition of the first nested group able to hold it;
    /// when that repetition already has the segment's non-repeating slot
    /// filled, a repeating group gets a new repetition instead. An occupied
    /// non-repeating slot is overwritten only when no enclosing group
    /// repeats, as with `EVN` at the root. The segment is handed back when
    /// the grammar has no place for it.
    pub fn insert_segment(&mut self, segment: Segment) -> Result<(), Segment> {
        self.place(segment, true)
    }

    fn place(&mut self, segment: Segment, may_replace: bool) -> Result<(), Segment> {
        let Some(definition) = self.definition else {
            return Err(segment);
        };

        let code = segment.code().to_string();
        if let Some(child) = definition.child(&code).filter(|child| !child.is_group()) {
            let repetitions = self.children.entry(code).or_default();
            match repetitions.first_mut() {
                Some(existing) if !child.repeating => {
                    if !may_replace {
                        return Err(segment);
                    }
                    *existing = Structure::Segment(segment);
                }
                _ => repetitions.push(Structure::Segment(segment)),
            }
            return Ok(());
        }

        let mut segment = segment;
        for child in definition.children.iter().filter(|child| child.contains(&code)) {
            let ChildKind::Group(nested) = &child.kind else {
                continue;
            };

            let repetitions = self.children.entry(child.name().to_string()).or_default();
            if let Some(Structure::Group(existing)) = repetitions.last_mut() {
                match existing.place(segment, may_replace && !child.repeating) {
                    Ok(()) => return Ok(()),
                    Err(back) => segment = back,
                }
                if !child.repeating {
                    continue;
                }
            }

            let mut fresh = Group::from_definition(nested);
            match fresh.place(segment, false) {
                Ok(()) => {
                    repetitions.push(Structure::Group(fresh));
                    return Ok(());
                }
                Err(back) => segment = back,
            }
        }

        Err(segment)
    }

    /// Store a segment the grammar does not place, directly after the slot
    /// `after` (or at the end). Consecutive segments with the same code share
    /// a slot; a later run of the same code gets a numbered slot (`ZPI2`).
    fn insert_nonstandard(&mut self, segment: Segment, after: Option<&str>) -> String {
        let code = segment.code().to_string();

        if let Some(anchor) = after.filter(|anchor| !self.is_declared_slot(anchor)) {
            if let Some(repetitions) = self.children.get_mut(anchor) {
                let same_run = matches!(
                    repetitions.last(),
                    Some(Structure::Segment(last)) if last.code() == code
                );
                if same_run {
                    repetitions.push(Structure::Segment(segment));
                    return anchor.to_string();
                }
            }
        }

        let name = self.unique_slot_name(&code);
        let position = after
            .and_then(|anchor| self.children.get_index_of(anchor))
            .map_or(self.children.len(), |index| index + 1);
        self.children
            .shift_insert(position, name.clone(), vec![Structure::Segment(segment)]);
        name
    }

    fn unique_slot_name(&self, code: &str) -> String {
        if !self.children.contains_key(code) {
            return code.to_string();
        }
        (2..)
            .map(|n| format!("{code}{n}"))
            .find(|name| !self.children.contains_key(name))
            .unwrap_or_else(|| code.to_string())
    }

    fn push(&mut self, name: &str, structure: Structure) {
        self.children
            .entry(name.to_string())
            .or_default()
            .push(structure);
    }

    fn next_slot(&self, definition: &GroupDef, cursor: usize, code: &str) -> Option<usize> {
        definition
            .children
            .iter()
            .enumerate()
            .skip(cursor)
            .find(|(_, child)| {
                child.starts_with(code) && (child.repeating || self.slot(child.name()).is_empty())
            })
            .map(|(index, _)| index)
    }

    fn collect_lines(&self, lines: &mut Vec<String>) {
        for structure in self.children.values().flatten() {
            match structure {
                Structure::Segment(segment) => lines.push(segment.encode()),
                Structure::Group(group) => group.collect_lines(lines),
            }
        }
    }
}

/// Place queued segments into `group` following its grammar.
///
/// Nested groups return as soon as they meet a segment they cannot place, so
/// the parent can start a new repetition or move on. Only the root keeps
/// unplaceable segments, as non-standard slots.
fn fill(group: &mut Group, queue: &mut VecDeque<Segment>, is_root: bool) {
    let definition = group.definition.unwrap_or(&structure::GENERIC);
    let mut cursor = 0;
    let mut anchor: Option<String> = None;

    while let Some(code) = queue.front().map(|segment| segment.code().to_string()) {
        if let Some(index) = group.next_slot(definition, cursor, &code) {
            let child = &definition.children[index];
            let placed = match &child.kind {
                ChildKind::Segment(_) => match queue.pop_front() {
                    Some(segment) => {
                        group.push(child.name(), Structure::Segment(segment));
                        true
                    }
                    None => false,
                },
                ChildKind::Group(nested) => {
                    let before = queue.len();
                    let mut repetition = Group::from_definition(nested);
                    fill(&mut repetition, queue, false);
                    let consumed = queue.len() < before;
                    if consumed {
                        group.push(child.name(), Structure::Group(repetition));
                    }
                    consumed
                }
            };

            if placed {
                cursor = index;
                anchor = Some(child.name().to_string());
                continue;
            }
        }

        if !is_root {
            return;
        }

        let Some(segment) = queue.pop_front() else {
            break;
        };
        anchor = Some(group.insert_nonstandard(segment, anchor.as_deref()));
    }
}

fn declares_group(definition: &GroupDef, name: &str) -> bool {
    definition.children.iter().any(|child| match &child.kind {
        ChildKind::Group(group) => group.name == name || declares_group(group, name),
        ChildKind::Segment(_) => false,
    })
}

fn type_from_header(header: &Segment) -> String {
    let code = header.get(&FieldPath::component(9, 1)).unwrap_or_default();
    let trigger = header.get(&FieldPath::component(9, 2)).unwrap_or_default();

    if trigger.is_empty() {
        code.to_string()
    } else {
        format!("{code}_{trigger}")
    }
}

/// A parsed HL7v2 message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    encoding: EncodingCharacters,
    root: Group,
}

impl Message {
    /// Parse ER7 text. Segments may be separated by `\r`, `\n` or `\r\n`.
    ///
    /// # Example
    ///
    /// ```
    /// use hl7_transform::Message;
    ///
    /// let message = Message::parse("MSH|^~\\&|APP|FAC|||20240101||ADT^A01|1|P|2.5\rEVN|A01\rPID|1||123").unwrap();
    /// assert_eq!(message.message_type(), "ADT_A01");
    /// assert_eq!(message.segments("PID").len(), 1);
    /// ```
    pub fn parse(text: &str) -> Result<Self, MessageError> {
        let lines: Vec<&str> = text
            .split(|c| c == '\r' || c == '\n')
            .filter(|line| !line.trim().is_empty())
            .collect();

        let first = lines.first().ok_or(MessageError::Empty)?;
        if !first.starts_with("MSH") {
            return Err(MessageError::MissingHeader);
        }

        let encoding = EncodingCharacters::from_header(first)?;
        let segments = lines
            .iter()
            .map(|line| Segment::parse(line, encoding))
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_segments(segments)
    }

    /// Build a message from already parsed segments; the first must be MSH.
    pub fn from_segments(segments: Vec<Segment>) -> Result<Self, MessageError> {
        let header = segments
            .first()
            .filter(|segment| segment.code() == "MSH")
            .ok_or(MessageError::MissingHeader)?;

        let encoding = header.encoding();
        let message_type = type_from_header(header);
        let declared = header
            .get(&FieldPath::component(9, 3))
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        let definition = structure::structure_for(&message_type, declared.as_deref());
        let mut root = Group::from_definition(definition);
        fill(&mut root, &mut VecDeque::from(segments), true);

        Ok(Self { encoding, root })
    }

    /// Serialize to ER7, segments joined by `\r`.
    pub fn encode(&self) -> String {
        let mut lines = Vec::new();
        self.root.collect_lines(&mut lines);
        lines.join("\r")
    }

    /// Re-parse from the message's own encoding so group membership and
    /// repetition indices reflect the current content.
    pub fn renormalize(&mut self) -> Result<(), MessageError> {
        *self = Self::parse(&self.encode())?;
        Ok(())
    }

    pub fn encoding(&self) -> EncodingCharacters {
        self.encoding
    }

    pub fn root(&self) -> &Group {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Group {
        &mut self.root
    }

    /// Name of the grammar the message was parsed with, e.g. `ADT_A01`.
    pub fn structure_name(&self) -> &str {
        self.root.name()
    }

    pub fn header(&self) -> Option<&Segment> {
        self.root.slot("MSH").first().and_then(Structure::as_segment)
    }

    /// `MSH-9.1` and `MSH-9.2` joined by `_`, e.g. `ADT_A01`.
    pub fn message_type(&self) -> String {
        self.header().map(type_from_header).unwrap_or_default()
    }

    /// Message group: the first three characters of the type.
    pub fn message_group(&self) -> String {
        self.message_type().chars().take(3).collect()
    }

    pub fn get_structure(&self, name: &str) -> Option<&Structure> {
        self.root.get_structure(name)
    }

    pub fn all_repetitions(&self, name: &str) -> Vec<&Structure> {
        self.root.all_repetitions(name)
    }

    /// First segment with `code`, anywhere in the tree.
    pub fn segment(&self, code: &str) -> Option<&Segment> {
        self.segments(code).into_iter().next()
    }

    pub fn segments(&self, code: &str) -> Vec<&Segment> {
        self.root.segments(code)
    }

    pub fn segments_mut(&mut self, code: &str) -> Vec<&mut Segment> {
        self.root.segments_mut(code)
    }

    pub fn has_segment(&self, code: &str) -> bool {
        self.segment(code).is_some()
    }

    /// Value of `reference` in the first matching segment.
    pub fn field(&self, reference: &SegmentField) -> Option<&str> {
        self.segment(&reference.segment)?.get(&reference.path)
    }

    /// Value of `reference` in the `repetition`-th segment with that code.
    pub fn field_at(&self, reference: &SegmentField, repetition: usize) -> Option<&str> {
        self.segments(&reference.segment)
            .get(repetition)?
            .get(&reference.path)
    }

    /// Whether the grammar declares a group called `name`.
    pub fn declares_group(&self, name: &str) -> bool {
        self.root
            .definition()
            .is_some_and(|definition| declares_group(definition, name))
    }

    /// Remove segments with `code` whose document-order index satisfies
    /// `remove`. Returns how many were removed.
    pub fn remove_segments_where<F>(&mut self, code: &str, mut remove: F) -> usize
    where
        F: FnMut(usize) -> bool,
    {
        let mut index = 0;
        let mut removed = 0;
        self.root.retain_segments(&mut |segment: &Segment| {
            if segment.code() != code {
                return true;
            }
            let current = index;
            index += 1;
            if remove(current) {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// Remove the `index`-th segment with `code` in document order.
    pub fn remove_repetition(&mut self, code: &str, index: usize) -> bool {
        self.remove_segments_where(code, |current| current == index) > 0
    }

    /// Keep only segments accepted by `keep`, across all groups.
    pub fn retain_segments<F>(&mut self, mut keep: F)
    where
        F: FnMut(&Segment) -> bool,
    {
        self.root.retain_segments(&mut keep);
    }

    /// Insert `segment` at its grammar position, or append it to the root as
    /// a non-standard segment.
    pub fn insert_segment(&mut self, segment: Segment) {
        if let Err(segment) = self.root.insert_segment(segment) {
            self.root.insert_nonstandard(segment, None);
        }
    }
}

impl FromStr for Message {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADT_A01_TEXT: &str = "MSH|^~\\&|SENDER|FAC|RECV|FAC|20240101120000||ADT^A01|MSG1|P|2.5\r\
EVN|A01|20240101120000\r\
PID|1||12345^^^MRN||Doe^ADAM||19800101|M\r\
PV1|1|I|WARD^101^A\r\
PR1|1||P1\r\
ROL|1|AD|PP\r\
PR1|2||P2\r\
IN1|1|PLAN\r\
ZPI|custom";

    fn oru(observation_requests: usize) -> String {
        let mut text = String::from("MSH|^~\\&|LAB|FAC|||20240101||ORU^R01|2|P|2.5\rPID|1||999");
        for n in 1..=observation_requests {
            text.push_str(&format!("\rOBR|{n}||ORD{n}\rOBX|1|NM|GLU||{n}"));
        }
        text
    }

    #[test]
    fn test_parse_places_segments_into_groups() {
        let message = Message::parse(ADT_A01_TEXT).unwrap();

        assert_eq!(message.message_type(), "ADT_A01");
        assert_eq!(message.structure_name(), "ADT_A01");
        assert_eq!(message.all_repetitions("PROCEDURE").len(), 2);
        assert_eq!(message.all_repetitions("INSURANCE").len(), 1);
        assert_eq!(message.segments("PR1").len(), 2);

        let first_procedure = message
            .get_structure("PROCEDURE")
            .and_then(Structure::as_group)
            .unwrap();
        assert_eq!(first_procedure.slot("ROL").len(), 1);
    }

    #[test]
    fn test_encode_round_trip() {
        let message = Message::parse(ADT_A01_TEXT).unwrap();
        assert_eq!(message.encode(), ADT_A01_TEXT);

        let reparsed = Message::parse(&message.encode()).unwrap();
        assert_eq!(reparsed, message);
    }

    #[test]
    fn test_accepts_newline_separators() {
        let text = ADT_A01_TEXT.replace('\r', "\r\n");
        let message = Message::parse(&text).unwrap();

        assert_eq!(message.encode(), ADT_A01_TEXT);
    }

    #[test]
    fn test_nonstandard_segments_keep_position() {
        let text = "MSH|^~\\&|A|B|||20240101||ADT^A04|3|P|2.5\rEVN|A04\rZPD|x\rPID|1\rZPD|y\rPV1|1";
        let message = Message::parse(text).unwrap();

        assert_eq!(message.structure_name(), "ADT_A01");
        assert_eq!(message.encode(), text);
        assert_eq!(message.segments("ZPD").len(), 2);
        assert_eq!(message.root().slot("ZPD").len(), 1);
        assert_eq!(message.root().slot("ZPD2").len(), 1);
    }

    #[test]
    fn test_generic_structure_preserves_order() {
        let text = "MSH|^~\\&|A|B|||20240101||ZZZ^Z01|3|P|2.5\rAAA|1\rBBB|1\rAAA|2";
        let message = Message::parse(text).unwrap();

        assert_eq!(message.structure_name(), "GENERIC");
        assert_eq!(message.encode(), text);
        assert_eq!(message.segments("AAA").len(), 2);
    }

    #[test]
    fn test_nested_repeating_groups() {
        let message = Message::parse(&oru(4)).unwrap();

        assert_eq!(message.all_repetitions("ORDER_OBSERVATION").len(), 4);
        assert_eq!(message.segments("OBR").len(), 4);
        assert_eq!(message.segments("OBX").len(), 4);
        assert!(message.declares_group("ORDER_OBSERVATION"));
        assert!(!message.declares_group("OBR"));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Message::parse(""), Err(MessageError::Empty));
        assert_eq!(Message::parse("PID|1"), Err(MessageError::MissingHeader));
        assert!(matches!(
            Message::parse("MSH|^~\\&|A\rpid|1"),
            Err(MessageError::InvalidSegmentCode(_))
        ));
    }

    #[test]
    fn test_remove_repetition_by_document_order() {
        let mut message = Message::parse(&oru(3)).unwrap();

        assert!(message.remove_repetition("OBR", 1));
        assert!(!message.remove_repetition("OBR", 5));

        let remaining: Vec<_> = message
            .segments("OBR")
            .iter()
            .map(|segment| segment.value(&FieldPath::field(1)))
            .collect();
        assert_eq!(remaining, vec!["1", "3"]);
    }

    #[test]
    fn test_insert_segment_at_grammar_position() {
        let mut message = Message::parse(
            "MSH|^~\\&|A|B|||20240101||ADT^A01|1|P|2.5\rEVN|A01\rPID|1\rPV1|1\rIN1|1",
        )
        .unwrap();

        message.insert_segment(Segment::parse("PV2|||x", message.encoding()).unwrap());
        message.insert_segment(Segment::parse("PR1|1||P1", message.encoding()).unwrap());
        message.insert_segment(Segment::parse("ZXY|1", message.encoding()).unwrap());

        assert_eq!(
            message.encode(),
            "MSH|^~\\&|A|B|||20240101||ADT^A01|1|P|2.5\rEVN|A01\rPID|1\rPV1|1\rPV2|||x\rPR1|1||P1\rIN1|1\rZXY|1"
        );
    }

    #[test]
    fn test_insert_replaces_non_repeating_segment() {
        let mut message = Message::parse("MSH|^~\\&|A|B|||20240101||ADT^A01|1|P|2.5\rEVN|A01\rPID|1").unwrap();
        message.insert_segment(Segment::parse("EVN|A08", message.encoding()).unwrap());

        assert_eq!(message.segments("EVN").len(), 1);
        assert_eq!(message.segment("EVN").unwrap().value(&FieldPath::field(1)), "A08");
    }

    #[test]
    fn test_insert_starts_new_group_repetition() {
        let mut message = Message::parse(&oru(2)).unwrap();
        message.insert_segment(Segment::parse("OBR|3||ORD3", message.encoding()).unwrap());

        let ids: Vec<String> = message
            .segments("OBR")
            .iter()
            .map(|segment| segment.value(&FieldPath::field(1)))
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(message.all_repetitions("ORDER_OBSERVATION").len(), 3);
        assert_eq!(message.segments("OBX").len(), 2);
    }

    #[test]
    fn test_insert_keeps_existing_procedure() {
        let mut message = Message::parse(
            "MSH|^~\\&|A|B|||20240101||ADT^A01|1|P|2.5\rEVN|A01\rPID|1\rPV1|1\rPR1|1||P1",
        )
        .unwrap();
        message.insert_segment(Segment::parse("PR1|2||P2", message.encoding()).unwrap());

        assert_eq!(
            message.encode(),
            "MSH|^~\\&|A|B|||20240101||ADT^A01|1|P|2.5\rEVN|A01\rPID|1\rPV1|1\rPR1|1||P1\rPR1|2||P2"
        );
        assert_eq!(message.all_repetitions("PROCEDURE").len(), 2);
    }

    #[test]
    fn test_insert_observation_into_last_order() {
        let mut message = Message::parse(&oru(2)).unwrap();
        message.insert_segment(Segment::parse("OBX|2|NM|HGB||14", message.encoding()).unwrap());

        assert!(message.encode().ends_with("OBR|2||ORD2\rOBX|1|NM|GLU||2\rOBX|2|NM|HGB||14"));
        assert_eq!(message.all_repetitions("ORDER_OBSERVATION").len(), 2);
    }

    #[test]
    fn test_renormalize_after_bulk_removal() {
        let mut message = Message::parse(&oru(2)).unwrap();
        message.retain_segments(|segment| segment.code() != "OBR");
        message.renormalize().unwrap();

        assert!(message.segments("OBR").is_empty());
        assert_eq!(message.segments("OBX").len(), 2);
        assert!(message.all_repetitions("ORDER_OBSERVATION").is_empty());
    }

    #[test]
    fn test_field_lookup() {
        let message = Message::parse(ADT_A01_TEXT).unwrap();
        let given = SegmentField::parse("PID-5.2").unwrap();

        assert_eq!(message.field(&given), Some("ADAM"));
        assert_eq!(message.field_at(&SegmentField::parse("PR1-3").unwrap(), 1), Some("P2"));
        assert_eq!(message.message_group(), "ADT");
    }
}
