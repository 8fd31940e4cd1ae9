//! Static message structure grammars.
//!
//! A grammar is a tree of group and segment slots. Parsing places segments into
//! the slots in order, and added segments are inserted at the slot the grammar
//! reserves for their code. Only the structures this pipeline routinely sees are
//! modelled; every other message type falls back to [`GENERIC`], which places
//! everything after MSH as non-standard segments in arrival order.

/// A named group of slots.
#[derive(Debug, PartialEq, Eq)]
pub struct GroupDef {
    pub name: &'static str,
    pub children: &'static [ChildDef],
}

/// One slot of a group.
#[derive(Debug, PartialEq, Eq)]
pub struct ChildDef {
    pub kind: ChildKind,
    pub required: bool,
    pub repeating: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ChildKind {
    Segment(&'static str),
    Group(GroupDef),
}

impl ChildDef {
    /// Slot name: the segment code, or the group name.
    pub fn name(&self) -> &'static str {
        match &self.kind {
            ChildKind::Segment(code) => *code,
            ChildKind::Group(group) => group.name,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, ChildKind::Group(_))
    }

    /// Whether a segment with `code` can start a new occurrence of this slot.
    pub fn starts_with(&self, code: &str) -> bool {
        match &self.kind {
            ChildKind::Segment(own) => *own == code,
            ChildKind::Group(group) => group.starts_with(code),
        }
    }

    /// Whether a segment with `code` can live anywhere below this slot.
    pub fn contains(&self, code: &str) -> bool {
        match &self.kind {
            ChildKind::Segment(own) => *own == code,
            ChildKind::Group(group) => group.contains(code),
        }
    }
}

impl GroupDef {
    pub fn child(&self, name: &str) -> Option<&ChildDef> {
        self.children.iter().find(|child| child.name() == name)
    }

    /// A group can start with any segment that may precede its first required slot.
    pub fn starts_with(&self, code: &str) -> bool {
        for child in self.children {
            if child.starts_with(code) {
                return true;
            }
            if child.required {
                return false;
            }
        }
        false
    }

    pub fn contains(&self, code: &str) -> bool {
        self.children.iter().any(|child| child.contains(code))
    }
}

const fn seg(code: &'static str, required: bool, repeating: bool) -> ChildDef {
    ChildDef {
        kind: ChildKind::Segment(code),
        required,
        repeating,
    }
}

const fn group(
    name: &'static str,
    required: bool,
    repeating: bool,
    children: &'static [ChildDef],
) -> ChildDef {
    ChildDef {
        kind: ChildKind::Group(GroupDef { name, children }),
        required,
        repeating,
    }
}

const R: bool = true;
const O: bool = false;
const REP: bool = true;
const ONE: bool = false;

pub static GENERIC: GroupDef = GroupDef {
    name: "GENERIC",
    children: &[seg("MSH", R, ONE)],
};

pub static ACK: GroupDef = GroupDef {
    name: "ACK",
    children: &[
        seg("MSH", R, ONE),
        seg("SFT", O, REP),
        seg("MSA", R, ONE),
        seg("ERR", O, REP),
    ],
};

/// Shared by A01, A04, A08 and A13.
pub static ADT_A01: GroupDef = GroupDef {
    name: "ADT_A01",
    children: &[
        seg("MSH", R, ONE),
        seg("SFT", O, REP),
        seg("EVN", R, ONE),
        seg("PID", R, ONE),
        seg("PD1", O, ONE),
        seg("ROL", O, REP),
        seg("NK1", O, REP),
        seg("PV1", R, ONE),
        seg("PV2", O, ONE),
        seg("DB1", O, REP),
        seg("OBX", O, REP),
        seg("AL1", O, REP),
        seg("DG1", O, REP),
        seg("DRG", O, ONE),
        group("PROCEDURE", O, REP, &[seg("PR1", R, ONE), seg("ROL", O, REP)]),
        seg("GT1", O, REP),
        group(
            "INSURANCE",
            O,
            REP,
            &[
                seg("IN1", R, ONE),
                seg("IN2", O, ONE),
                seg("IN3", O, REP),
                seg("ROL", O, REP),
            ],
        ),
        seg("ACC", O, ONE),
        seg("UB1", O, ONE),
        seg("UB2", O, ONE),
        seg("PDA", O, ONE),
    ],
};

pub static ADT_A03: GroupDef = GroupDef {
    name: "ADT_A03",
    children: &[
        seg("MSH", R, ONE),
        seg("SFT", O, REP),
        seg("EVN", R, ONE),
        seg("PID", R, ONE),
        seg("PD1", O, ONE),
        seg("ROL", O, REP),
        seg("NK1", O, REP),
        seg("PV1", R, ONE),
        seg("PV2", O, ONE),
        seg("DB1", O, REP),
        seg("AL1", O, REP),
        seg("DG1", O, REP),
        seg("DRG", O, ONE),
        group("PROCEDURE", O, REP, &[seg("PR1", R, ONE), seg("ROL", O, REP)]),
        seg("OBX", O, REP),
        seg("GT1", O, REP),
        group(
            "INSURANCE",
            O,
            REP,
            &[
                seg("IN1", R, ONE),
                seg("IN2", O, ONE),
                seg("IN3", O, REP),
                seg("ROL", O, REP),
            ],
        ),
        seg("ACC", O, ONE),
        seg("PDA", O, ONE),
    ],
};

pub static ORU_R01: GroupDef = GroupDef {
    name: "ORU_R01",
    children: &[
        seg("MSH", R, ONE),
        seg("SFT", O, REP),
        group(
            "PATIENT_RESULT",
            R,
            REP,
            &[
                group(
                    "PATIENT",
                    O,
                    ONE,
                    &[
                        seg("PID", R, ONE),
                        seg("PD1", O, ONE),
                        seg("NTE", O, REP),
                        seg("NK1", O, REP),
                        group("VISIT", O, ONE, &[seg("PV1", R, ONE), seg("PV2", O, ONE)]),
                    ],
                ),
                group(
                    "ORDER_OBSERVATION",
                    R,
                    REP,
                    &[
                        seg("ORC", O, ONE),
                        seg("OBR", R, ONE),
                        seg("NTE", O, REP),
                        group("TIMING_QTY", O, REP, &[seg("TQ1", R, ONE), seg("TQ2", O, REP)]),
                        seg("CTD", O, ONE),
                        group("OBSERVATION", O, REP, &[seg("OBX", R, ONE), seg("NTE", O, REP)]),
                        seg("FT1", O, REP),
                        seg("CTI", O, REP),
                        group("SPECIMEN", O, REP, &[seg("SPM", R, ONE), seg("OBX", O, REP)]),
                    ],
                ),
            ],
        ),
        seg("DSC", O, ONE),
    ],
};

pub static ORM_O01: GroupDef = GroupDef {
    name: "ORM_O01",
    children: &[
        seg("MSH", R, ONE),
        seg("NTE", O, REP),
        group(
            "PATIENT",
            O,
            ONE,
            &[
                seg("PID", R, ONE),
                seg("PD1", O, ONE),
                seg("NTE", O, REP),
                group("PATIENT_VISIT", O, ONE, &[seg("PV1", R, ONE), seg("PV2", O, ONE)]),
                group(
                    "INSURANCE",
                    O,
                    REP,
                    &[seg("IN1", R, ONE), seg("IN2", O, ONE), seg("IN3", O, ONE)],
                ),
                seg("GT1", O, ONE),
                seg("AL1", O, REP),
            ],
        ),
        group(
            "ORDER",
            R,
            REP,
            &[
                seg("ORC", R, ONE),
                group(
                    "ORDER_DETAIL",
                    O,
                    ONE,
                    &[
                        seg("OBR", R, ONE),
                        seg("NTE", O, REP),
                        seg("DG1", O, REP),
                        group("OBSERVATION", O, REP, &[seg("OBX", R, ONE), seg("NTE", O, REP)]),
                    ],
                ),
                seg("FT1", O, REP),
                seg("CTI", O, REP),
                seg("BLG", O, ONE),
            ],
        ),
    ],
};

pub static MDM_T02: GroupDef = GroupDef {
    name: "MDM_T02",
    children: &[
        seg("MSH", R, ONE),
        seg("SFT", O, REP),
        seg("EVN", R, ONE),
        seg("PID", R, ONE),
        seg("PV1", R, ONE),
        group(
            "COMMON_ORDER",
            O,
            REP,
            &[
                seg("ORC", R, ONE),
                group("TIMING", O, REP, &[seg("TQ1", R, ONE), seg("TQ2", O, REP)]),
                seg("OBR", R, ONE),
                seg("NTE", O, REP),
            ],
        ),
        seg("TXA", R, ONE),
        seg("CON", O, REP),
        group("OBXNTE", R, REP, &[seg("OBX", R, ONE), seg("NTE", O, REP)]),
    ],
};

pub static SIU_S12: GroupDef = GroupDef {
    name: "SIU_S12",
    children: &[
        seg("MSH", R, ONE),
        seg("SCH", R, ONE),
        seg("TQ1", O, REP),
        seg("NTE", O, REP),
        group(
            "PATIENT",
            O,
            REP,
            &[
                seg("PID", R, ONE),
                seg("PD1", O, ONE),
                seg("PV1", O, ONE),
                seg("PV2", O, ONE),
                seg("OBX", O, REP),
                seg("DG1", O, REP),
            ],
        ),
        group(
            "RESOURCES",
            R,
            REP,
            &[
                seg("RGS", R, ONE),
                group("SERVICE", O, REP, &[seg("AIS", R, ONE), seg("NTE", O, REP)]),
                group("GENERAL_RESOURCE", O, REP, &[seg("AIG", R, ONE), seg("NTE", O, REP)]),
                group("LOCATION_RESOURCE", O, REP, &[seg("AIL", R, ONE), seg("NTE", O, REP)]),
                group("PERSONNEL_RESOURCE", O, REP, &[seg("AIP", R, ONE), seg("NTE", O, REP)]),
            ],
        ),
    ],
};

/// Grammar for a message.
///
/// `declared` is MSH-9.3 when the sender filled it in; it wins over the
/// type table when it names a known structure.
pub fn structure_for(message_type: &str, declared: Option<&str>) -> &'static GroupDef {
    declared
        .and_then(by_structure_name)
        .or_else(|| by_message_type(message_type))
        .unwrap_or(&GENERIC)
}

fn by_structure_name(name: &str) -> Option<&'static GroupDef> {
    match name {
        "ADT_A01" => Some(&ADT_A01),
        "ADT_A03" => Some(&ADT_A03),
        "ORU_R01" => Some(&ORU_R01),
        "ORM_O01" => Some(&ORM_O01),
        "MDM_T02" => Some(&MDM_T02),
        "SIU_S12" => Some(&SIU_S12),
        "ACK" => Some(&ACK),
        _ => None,
    }
}

fn by_message_type(message_type: &str) -> Option<&'static GroupDef> {
    match message_type {
        "ADT_A01" | "ADT_A04" | "ADT_A08" | "ADT_A13" => Some(&ADT_A01),
        "ADT_A03" => Some(&ADT_A03),
        "ORU_R01" => Some(&ORU_R01),
        "ORM_O01" => Some(&ORM_O01),
        "MDM_T02" | "MDM_T04" | "MDM_T06" | "MDM_T08" | "MDM_T10" => Some(&MDM_T02),
        "SIU_S12" | "SIU_S13" | "SIU_S14" | "SIU_S15" | "SIU_S17" | "SIU_S26" => Some(&SIU_S12),
        t if t == "ACK" || t.starts_with("ACK_") => Some(&ACK),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structure_lookup() {
        assert_eq!(structure_for("ADT_A04", None).name, "ADT_A01");
        assert_eq!(structure_for("ADT_A04", Some("ADT_A03")).name, "ADT_A03");
        assert_eq!(structure_for("ADT_A04", Some("BOGUS")).name, "ADT_A01");
        assert_eq!(structure_for("ACK_A01", None).name, "ACK");
        assert_eq!(structure_for("ZZZ_Z01", None).name, "GENERIC");
    }

    #[test]
    fn test_group_start_codes() {
        let ChildKind::Group(patient_result) = &ORU_R01.children[2].kind else {
            panic!("expected PATIENT_RESULT group");
        };

        // PATIENT is optional, so ORDER_OBSERVATION may start the group too.
        assert!(patient_result.starts_with("PID"));
        assert!(patient_result.starts_with("ORC"));
        assert!(patient_result.starts_with("OBR"));
        assert!(!patient_result.starts_with("OBX"));
        assert!(patient_result.contains("OBX"));
    }

    #[test]
    fn test_child_lookup() {
        let procedure = ADT_A01.child("PROCEDURE").unwrap();
        assert!(procedure.is_group());
        assert!(procedure.contains("PR1"));
        assert!(!ADT_A01.child("PID").unwrap().is_group());
        assert!(ADT_A01.child("ZPI").is_none());
    }
}
