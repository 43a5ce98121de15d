use std::collections::HashMap;
use std::sync::Arc;

use chrono::prelude::*;
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::{IpfixError, Result};
use crate::fields::*;
use crate::ie::InformationElement;
use crate::templates::Template;

/// Appends one Data Record laid out per `template`; values are in template order.
pub fn encode_record(template: &Template, values: &[FieldValue], out: &mut Vec<u8>) -> Result<()> {
    if values.len() != template.fields.len() {
        return Err(IpfixError::Encoding(format!(
            "template {} has {} fields, got {} values",
            template.id,
            template.fields.len(),
            values.len()
        )));
    }
    for (ie, value) in template.fields.iter().zip(values) {
        if ie.is_varlen() {
            let length = value_length(ie.data_type, value)?;
            encode_varlen(length, out)?;
            encode_value(ie.data_type, value, length, out)?;
        } else {
            encode_value(ie.data_type, value, ie.length as usize, out)?;
        }
    }
    Ok(())
}

/// Decodes one Data Record at `offset`, returning its values and the number
/// of bytes it used.
pub fn decode_record(template: &Template, buf: &[u8], offset: usize) -> Result<(Vec<FieldValue>, usize)> {
    let mut values = Vec::with_capacity(template.fields.len());
    let mut cursor = offset;
    for ie in &template.fields {
        let length = if ie.is_varlen() {
            let (length, value_offset) = decode_varlen(buf, cursor)?;
            cursor = value_offset;
            length
        } else {
            ie.length as usize
        };
        let tail = buf.get(cursor..).unwrap_or(&[]);
        values.push(decode_value(ie.data_type, tail, length)?);
        cursor += length;
    }
    Ok((values, cursor - offset))
}

/// Orders named values to match `template`; every template field must be named.
pub fn values_from_names(template: &Template, named: &HashMap<String, FieldValue>) -> Result<Vec<FieldValue>> {
    template
        .fields
        .iter()
        .map(|ie| {
            named.get(&ie.name).cloned().ok_or_else(|| {
                IpfixError::Encoding(format!("no value for {} in template {}", ie.name, template.id))
            })
        })
        .collect()
}

/// A decoded Data Record with the context it arrived in.
#[derive(Clone, Debug, PartialEq)]
pub struct DataRecord {
    pub domain_id: u32,
    pub export_time: DateTime<Utc>,
    pub template: Arc<Template>,
    pub values: Vec<FieldValue>,
}

impl DataRecord {
    pub fn template_id(&self) -> u16 {
        self.template.id
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.template.field_index(name).and_then(|i| self.values.get(i))
    }

    pub fn name_map(&self) -> HashMap<String, FieldValue> {
        self.template
            .fields
            .iter()
            .zip(&self.values)
            .map(|(ie, v)| (ie.name.clone(), v.clone()))
            .collect()
    }

    /// Values for `ies` in the order given, matched by (pen, num); `None`
    /// where the record's template lacks the element.
    pub fn project(&self, ies: &[Arc<InformationElement>]) -> Vec<Option<FieldValue>> {
        ies.iter()
            .map(|want| {
                self.template
                    .fields
                    .iter()
                    .position(|f| f.pen == want.pen && f.num == want.num)
                    .and_then(|i| self.values.get(i).cloned())
            })
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl Serialize for DataRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (ie, value) in self.template.fields.iter().zip(&self.values) {
            map.serialize_entry(&ie.name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ie::InfoModel;
    use proptest::prelude::*;
    use std::net::Ipv4Addr;

    fn flow_template(model: &mut InfoModel) -> Template {
        let fields = model.spec_list(&["octetDeltaCount", "sourceIPv4Address"]).unwrap();
        Template::new(256, fields).unwrap()
    }

    #[test]
    fn test_decode_fixed_record() {
        let mut model = InfoModel::iana_core();
        let template = flow_template(&mut model);
        let bytes = [
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0xe8, //octetDeltaCount 1000
            0xc0, 0xa8, 0x01, 0x01, //sourceIPv4Address
        ];
        let (values, used) = decode_record(&template, &bytes, 0).unwrap();
        assert_eq!(used, 12);
        assert_eq!(values[0], FieldValue::Unsigned(1000));
        assert_eq!(values[1], FieldValue::Ipv4(Ipv4Addr::new(192, 168, 1, 1)));

        let mut out = Vec::new();
        encode_record(&template, &values, &mut out).unwrap();
        assert_eq!(out, bytes);
    }

    #[test]
    fn test_varlen_record() {
        let mut model = InfoModel::iana_core();
        let fields = model.spec_list(&["interfaceName", "octetDeltaCount[4]", "paddingOctets"]).unwrap();
        let template = Template::new(257, fields).unwrap();

        let values = vec![
            FieldValue::from("eth0"),
            FieldValue::from(7u32),
            FieldValue::Bytes(Vec::new()),
        ];
        let mut out = Vec::new();
        encode_record(&template, &values, &mut out).unwrap();
        assert_eq!(out, vec![4, b'e', b't', b'h', b'0', 0, 0, 0, 7, 0]);

        let (decoded, used) = decode_record(&template, &out, 0).unwrap();
        assert_eq!(used, out.len());
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_long_varlen_uses_escape() {
        let mut model = InfoModel::iana_core();
        let template = Template::new(258, model.spec_list(&["paddingOctets"]).unwrap()).unwrap();
        let mut out = Vec::new();
        encode_record(&template, &[FieldValue::Bytes(vec![0xab; 300])], &mut out).unwrap();
        assert_eq!(&out[..3], &[0xff, 0x01, 0x2c]);
        assert_eq!(out.len(), 303);
        let (decoded, _) = decode_record(&template, &out, 0).unwrap();
        assert_eq!(decoded[0].as_bytes().unwrap().len(), 300);
    }

    #[test]
    fn test_truncated_record() {
        let mut model = InfoModel::iana_core();
        let template = flow_template(&mut model);
        let bytes = [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0xe8, 0xc0, 0xa8];
        assert!(matches!(
            decode_record(&template, &bytes, 0),
            Err(IpfixError::TruncatedRecord { need: 4, have: 2 })
        ));
    }

    #[test]
    fn test_value_count_mismatch() {
        let mut model = InfoModel::iana_core();
        let template = flow_template(&mut model);
        let mut out = Vec::new();
        assert!(encode_record(&template, &[FieldValue::from(1u64)], &mut out).is_err());
    }

    #[test]
    fn test_record_accessors_and_json() {
        let mut model = InfoModel::iana_core();
        let template = Arc::new(flow_template(&mut model));
        let record = DataRecord {
            domain_id: 1,
            export_time: DateTime::from_timestamp(0, 0).unwrap(),
            template: Arc::clone(&template),
            values: vec![FieldValue::from(1000u64), FieldValue::from(Ipv4Addr::new(10, 0, 0, 1))],
        };
        assert_eq!(record.template_id(), 256);
        assert_eq!(record.get("octetDeltaCount").and_then(|v| v.as_u64()), Some(1000));
        assert!(record.get("packetDeltaCount").is_none());
        assert_eq!(record.name_map().len(), 2);

        let want = model.spec_list(&["sourceIPv4Address", "packetDeltaCount"]).unwrap();
        assert_eq!(
            record.project(&want),
            vec![Some(FieldValue::Ipv4(Ipv4Addr::new(10, 0, 0, 1))), None]
        );

        assert_eq!(
            record.to_json().unwrap(),
            r#"{"octetDeltaCount":1000,"sourceIPv4Address":"10.0.0.1"}"#
        );
    }

    proptest! {
        #[test]
        fn record_round_trip(
            count in any::<u64>(),
            name in "[a-z0-9]{0,300}",
            raw in proptest::collection::vec(any::<u8>(), 0..400),
            flag in any::<bool>(),
        ) {
            let mut model = InfoModel::iana_core();
            let fields = model
                .spec_list(&["octetDeltaCount", "interfaceName", "paddingOctets", "dataRecordsReliability"])
                .unwrap();
            let template = Template::new(256, fields).unwrap();
            let values = vec![
                FieldValue::from(count),
                FieldValue::from(name),
                FieldValue::Bytes(raw),
                FieldValue::from(flag),
            ];
            let mut out = Vec::new();
            encode_record(&template, &values, &mut out).unwrap();
            let (decoded, used) = decode_record(&template, &out, 0).unwrap();
            prop_assert_eq!(used, out.len());
            prop_assert_eq!(decoded, values);
        }
    }

    #[test]
    fn test_values_from_names() {
        let mut model = InfoModel::iana_core();
        let template = flow_template(&mut model);
        let mut named = HashMap::new();
        named.insert("sourceIPv4Address".to_string(), FieldValue::from(Ipv4Addr::LOCALHOST));
        assert!(values_from_names(&template, &named).is_err());
        named.insert("octetDeltaCount".to_string(), FieldValue::from(5u64));
        let values = values_from_names(&template, &named).unwrap();
        assert_eq!(values[0], FieldValue::Unsigned(5));
    }
}
