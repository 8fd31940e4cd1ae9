//! Built-in resource and segment creators for the common ADT content.

use chrono::NaiveDate;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::{resources, ConversionError, ResourceCreator, SegmentContext, SegmentCreator};
use crate::message::{FieldPath, Message, Segment};
use crate::transform::HL7_TIMESTAMP_FORMAT;

const EVENT_CODE_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/v2-0003";
const ACT_CODE_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/v3-ActCode";

fn text(segment: &Segment, field: usize, component: usize) -> String {
    segment.value(&FieldPath::component(field, component))
}

fn insert_nonempty(object: &mut Map<String, Value>, key: &str, value: String) {
    if !value.is_empty() {
        object.insert(key.to_string(), Value::String(value));
    }
}

fn now() -> String {
    chrono::Local::now().format(HL7_TIMESTAMP_FORMAT).to_string()
}

/// MessageHeader from MSH.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageHeaderCreator;

impl ResourceCreator for MessageHeaderCreator {
    fn name(&self) -> &str {
        "message_header"
    }

    fn create(&self, message: &Message) -> Result<Option<Value>, ConversionError> {
        let Some(msh) = message.header() else {
            return Ok(None);
        };

        let mut header = json!({
            "resourceType": "MessageHeader",
            "eventCoding": {
                "system": EVENT_CODE_SYSTEM,
                "code": text(msh, 9, 2),
            },
            "source": {
                "name": text(msh, 3, 1),
                "endpoint": format!("urn:hl7v2:{}", text(msh, 4, 1)),
            },
        });

        let receiver = text(msh, 5, 1);
        if !receiver.is_empty() {
            header["destination"] = json!([{
                "name": receiver,
                "endpoint": format!("urn:hl7v2:{}", text(msh, 6, 1)),
            }]);
        }

        Ok(Some(header))
    }
}

/// Patient from PID.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatientCreator;

impl PatientCreator {
    fn identifiers(pid: &Segment) -> Vec<Value> {
        (0..)
            .map_while(|repetition| {
                let value = pid.get(&FieldPath::component(3, 1).with_repetition(repetition))?;
                let assigner = pid
                    .get(&FieldPath::component(3, 4).with_repetition(repetition))
                    .unwrap_or_default();

                let mut identifier = Map::new();
                insert_nonempty(&mut identifier, "value", value.to_string());
                if !assigner.is_empty() {
                    identifier.insert("assigner".to_string(), json!({ "display": assigner }));
                }
                Some(Value::Object(identifier))
            })
            .filter(|identifier| identifier.get("value").is_some())
            .collect()
    }

    fn gender(code: &str) -> Option<&'static str> {
        match code {
            "M" => Some("male"),
            "F" => Some("female"),
            "O" | "A" => Some("other"),
            "U" => Some("unknown"),
            _ => None,
        }
    }
}

impl ResourceCreator for PatientCreator {
    fn name(&self) -> &str {
        "patient"
    }

    fn create(&self, message: &Message) -> Result<Option<Value>, ConversionError> {
        let Some(pid) = message.segment("PID") else {
            return Ok(None);
        };

        let mut patient = Map::new();
        patient.insert("resourceType".to_string(), json!("Patient"));

        let identifiers = Self::identifiers(pid);
        if !identifiers.is_empty() {
            patient.insert("identifier".to_string(), Value::Array(identifiers));
        }

        let family = text(pid, 5, 1);
        let given: Vec<String> = [text(pid, 5, 2), text(pid, 5, 3)]
            .into_iter()
            .filter(|name| !name.is_empty())
            .collect();
        if !family.is_empty() || !given.is_empty() {
            let mut name = Map::new();
            insert_nonempty(&mut name, "family", family);
            if !given.is_empty() {
                name.insert("given".to_string(), json!(given));
            }
            patient.insert("name".to_string(), json!([name]));
        }

        let birth = pid.value(&FieldPath::field(7));
        if let Some(date) = birth
            .get(..8)
            .and_then(|date| NaiveDate::parse_from_str(date, "%Y%m%d").ok())
        {
            patient.insert("birthDate".to_string(), json!(date.format("%Y-%m-%d").to_string()));
        }

        if let Some(gender) = Self::gender(&pid.value(&FieldPath::field(8))) {
            patient.insert("gender".to_string(), json!(gender));
        }

        Ok(Some(Value::Object(patient)))
    }
}

/// Encounter from PV1.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncounterCreator;

impl EncounterCreator {
    fn class_code(patient_class: &str) -> &str {
        match patient_class {
            "I" => "IMP",
            "O" => "AMB",
            "E" => "EMER",
            "P" => "PRENC",
            other => other,
        }
    }
}

impl ResourceCreator for EncounterCreator {
    fn name(&self) -> &str {
        "encounter"
    }

    fn create(&self, message: &Message) -> Result<Option<Value>, ConversionError> {
        let Some(pv1) = message.segment("PV1") else {
            return Ok(None);
        };

        let discharged = !pv1.value(&FieldPath::field(45)).is_empty();
        let mut encounter = json!({
            "resourceType": "Encounter",
            "status": if discharged { "finished" } else { "in-progress" },
            "class": {
                "system": ACT_CODE_SYSTEM,
                "code": Self::class_code(&pv1.value(&FieldPath::field(2))),
            },
        });

        let visit = text(pv1, 19, 1);
        if !visit.is_empty() {
            encounter["identifier"] = json!([{ "value": visit }]);
        }

        let location: Vec<String> = (1..=3)
            .map(|component| text(pv1, 3, component))
            .filter(|part| !part.is_empty())
            .collect();
        if !location.is_empty() {
            encounter["location"] = json!([{ "location": { "display": location.join(" ") } }]);
        }

        Ok(Some(encounter))
    }
}

/// MSH for the requested message type.
///
/// The sending application comes from the bundle's MessageHeader when there
/// is one, otherwise from `sending_application`.
#[derive(Debug, Clone)]
pub struct MshSegmentCreator {
    pub sending_application: String,
    pub version: String,
}

impl Default for MshSegmentCreator {
    fn default() -> Self {
        Self {
            sending_application: "HL7TRANSFORM".to_string(),
            version: "2.5".to_string(),
        }
    }
}

impl SegmentCreator for MshSegmentCreator {
    fn name(&self) -> &str {
        "msh"
    }

    fn create(&self, bundle: &Value, context: &SegmentContext) -> Result<Option<Segment>, ConversionError> {
        let header = resources(bundle, "MessageHeader").next();
        let source = header
            .and_then(|header| header.pointer("/source/name"))
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .unwrap_or(self.sending_application.as_str());
        let destination = header
            .and_then(|header| header.pointer("/destination/0/name"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        let (code, trigger) = context.code_and_trigger();
        let control_id: String = Uuid::new_v4().simple().to_string().chars().take(20).collect();

        let mut msh = Segment::new("MSH", context.encoding);
        msh.set(&FieldPath::field(3), source);
        msh.set(&FieldPath::field(5), destination);
        msh.set(&FieldPath::field(7), &now());
        msh.set(&FieldPath::component(9, 1), code);
        if !trigger.is_empty() {
            msh.set(&FieldPath::component(9, 2), trigger);
        }
        msh.set(&FieldPath::field(10), &control_id);
        msh.set(&FieldPath::field(11), "P");
        msh.set(&FieldPath::field(12), &self.version);

        Ok(Some(msh))
    }
}

/// EVN carrying the trigger event of the requested message type.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvnSegmentCreator;

impl SegmentCreator for EvnSegmentCreator {
    fn name(&self) -> &str {
        "evn"
    }

    fn create(&self, _bundle: &Value, context: &SegmentContext) -> Result<Option<Segment>, ConversionError> {
        let (_, trigger) = context.code_and_trigger();

        let mut evn = Segment::new("EVN", context.encoding);
        evn.set(&FieldPath::field(1), trigger);
        evn.set(&FieldPath::field(2), &now());
        Ok(Some(evn))
    }
}

/// PID from the first Patient of the bundle.
#[derive(Debug, Clone, Copy, Default)]
pub struct PidSegmentCreator;

impl SegmentCreator for PidSegmentCreator {
    fn name(&self) -> &str {
        "pid"
    }

    fn create(&self, bundle: &Value, context: &SegmentContext) -> Result<Option<Segment>, ConversionError> {
        let Some(patient) = resources(bundle, "Patient").next() else {
            return Ok(None);
        };
        let str_at = |pointer: &str| patient.pointer(pointer).and_then(Value::as_str).unwrap_or_default();

        let mut pid = Segment::new("PID", context.encoding);
        pid.set(&FieldPath::field(1), "1");

        let identifiers = patient
            .get("identifier")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for (repetition, identifier) in identifiers.iter().enumerate() {
            let value = identifier.get("value").and_then(Value::as_str).unwrap_or_default();
            let assigner = identifier
                .pointer("/assigner/display")
                .and_then(Value::as_str)
                .unwrap_or_default();
            pid.set(&FieldPath::component(3, 1).with_repetition(repetition), value);
            if !assigner.is_empty() {
                pid.set(&FieldPath::component(3, 4).with_repetition(repetition), assigner);
            }
        }

        pid.set(&FieldPath::component(5, 1), str_at("/name/0/family"));
        pid.set(&FieldPath::component(5, 2), str_at("/name/0/given/0"));
        let middle = str_at("/name/0/given/1");
        if !middle.is_empty() {
            pid.set(&FieldPath::component(5, 3), middle);
        }

        pid.set(&FieldPath::field(7), &str_at("/birthDate").replace('-', ""));

        let gender = match str_at("/gender") {
            "male" => "M",
            "female" => "F",
            "other" => "O",
            "unknown" => "U",
            _ => "",
        };
        pid.set(&FieldPath::field(8), gender);

        Ok(Some(pid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::EncodingCharacters;

    fn context() -> SegmentContext {
        SegmentContext {
            message_type: "ADT_A04".to_string(),
            encoding: EncodingCharacters::default(),
        }
    }

    #[test]
    fn test_patient_resource() {
        let message = Message::parse(
            "MSH|^~\\&|A|B|||20240101||ADT^A04|1|P|2.5\rEVN|A04\rPID|1||111^^^MRN~222^^^SSN||Roe^Jane^Q||19751231|F",
        )
        .unwrap();
        let patient = PatientCreator.create(&message).unwrap().unwrap();

        assert_eq!(patient["identifier"][1]["value"], "222");
        assert_eq!(patient["identifier"][1]["assigner"]["display"], "SSN");
        assert_eq!(patient["name"][0]["family"], "Roe");
        assert_eq!(patient["name"][0]["given"], json!(["Jane", "Q"]));
        assert_eq!(patient["birthDate"], "1975-12-31");
        assert_eq!(patient["gender"], "female");
    }

    #[test]
    fn test_encounter_resource() {
        let message = Message::parse("MSH|^~\\&|A|B|||20240101||ADT^A01|1|P|2.5\rEVN|A01\rPID|1\rPV1|1|E|ER^2").unwrap();
        let encounter = EncounterCreator.create(&message).unwrap().unwrap();

        assert_eq!(encounter["class"]["code"], "EMER");
        assert_eq!(encounter["status"], "in-progress");
        assert_eq!(encounter["location"][0]["location"]["display"], "ER 2");
    }

    #[test]
    fn test_missing_segments_produce_nothing() {
        let message = Message::parse("MSH|^~\\&|A|B|||20240101||ADT^A01|1|P|2.5\rEVN|A01").unwrap();

        assert!(PatientCreator.create(&message).unwrap().is_none());
        assert!(EncounterCreator.create(&message).unwrap().is_none());
    }

    #[test]
    fn test_msh_segment_from_header_resource() {
        let bundle = json!({
            "resourceType": "Bundle",
            "entry": [{"resource": {
                "resourceType": "MessageHeader",
                "source": {"name": "EPIC"},
                "destination": [{"name": "LAB"}]
            }}]
        });
        let msh = MshSegmentCreator::default().create(&bundle, &context()).unwrap().unwrap();

        assert_eq!(msh.value(&FieldPath::field(3)), "EPIC");
        assert_eq!(msh.value(&FieldPath::field(5)), "LAB");
        assert_eq!(msh.value(&FieldPath::field(9)), "ADT^A04");
        assert_eq!(msh.value(&FieldPath::field(10)).len(), 20);
        assert!(msh.encode().starts_with("MSH|^~\\&|EPIC||LAB||"));
    }

    #[test]
    fn test_pid_segment_without_patient() {
        let bundle = json!({"resourceType": "Bundle", "entry": []});

        assert!(PidSegmentCreator.create(&bundle, &context()).unwrap().is_none());
        assert_eq!(
            EvnSegmentCreator.create(&bundle, &context()).unwrap().unwrap().value(&FieldPath::field(1)),
            "A04"
        );
    }
}
