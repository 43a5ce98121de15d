use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use chrono::prelude::*;
use serde::{Serialize, Serializer};

use crate::error::{IpfixError, Result};
use crate::time::*;
use crate::utils::*;

/// Length marker for variable-length fields in a template.
pub const VARLEN: u16 = 65535;

//a single length octet of 255 announces the 3-byte form
const VARLEN_ESCAPE: u8 = 255;
const VARLEN_MAX: usize = 65534;

/// IPFIX abstract data types (RFC 7012), numbered as in the IANA registry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DataType {
    OctetArray,
    Unsigned8,
    Unsigned16,
    Unsigned32,
    Unsigned64,
    Signed8,
    Signed16,
    Signed32,
    Signed64,
    Float32,
    Float64,
    Boolean,
    MacAddress,
    String,
    DateTimeSeconds,
    DateTimeMilliseconds,
    DateTimeMicroseconds,
    DateTimeNanoseconds,
    Ipv4Address,
    Ipv6Address,
}

const ALL_TYPES: [DataType; 20] = [
    DataType::OctetArray,
    DataType::Unsigned8,
    DataType::Unsigned16,
    DataType::Unsigned32,
    DataType::Unsigned64,
    DataType::Signed8,
    DataType::Signed16,
    DataType::Signed32,
    DataType::Signed64,
    DataType::Float32,
    DataType::Float64,
    DataType::Boolean,
    DataType::MacAddress,
    DataType::String,
    DataType::DateTimeSeconds,
    DataType::DateTimeMilliseconds,
    DataType::DateTimeMicroseconds,
    DataType::DateTimeNanoseconds,
    DataType::Ipv4Address,
    DataType::Ipv6Address,
];

impl DataType {
    pub fn name(&self) -> &'static str {
        match self {
            DataType::OctetArray => "octetArray",
            DataType::Unsigned8 => "unsigned8",
            DataType::Unsigned16 => "unsigned16",
            DataType::Unsigned32 => "unsigned32",
            DataType::Unsigned64 => "unsigned64",
            DataType::Signed8 => "signed8",
            DataType::Signed16 => "signed16",
            DataType::Signed32 => "signed32",
            DataType::Signed64 => "signed64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::Boolean => "boolean",
            DataType::MacAddress => "macAddress",
            DataType::String => "string",
            DataType::DateTimeSeconds => "dateTimeSeconds",
            DataType::DateTimeMilliseconds => "dateTimeMilliseconds",
            DataType::DateTimeMicroseconds => "dateTimeMicroseconds",
            DataType::DateTimeNanoseconds => "dateTimeNanoseconds",
            DataType::Ipv4Address => "ipv4Address",
            DataType::Ipv6Address => "ipv6Address",
        }
    }

    /// IANA abstract data type number.
    pub fn number(&self) -> u8 {
        ALL_TYPES.iter().position(|t| t == self).unwrap_or(0) as u8
    }

    pub fn from_number(num: u8) -> Option<DataType> {
        ALL_TYPES.get(num as usize).copied()
    }

    /// Nominal encoded length; `VARLEN` for octetArray and string.
    pub fn nominal_length(&self) -> u16 {
        match self {
            DataType::OctetArray | DataType::String => VARLEN,
            DataType::Unsigned8 | DataType::Signed8 | DataType::Boolean => 1,
            DataType::Unsigned16 | DataType::Signed16 => 2,
            DataType::Unsigned32
            | DataType::Signed32
            | DataType::Float32
            | DataType::DateTimeSeconds
            | DataType::Ipv4Address => 4,
            DataType::MacAddress => 6,
            DataType::Unsigned64
            | DataType::Signed64
            | DataType::Float64
            | DataType::DateTimeMilliseconds
            | DataType::DateTimeMicroseconds
            | DataType::DateTimeNanoseconds => 8,
            DataType::Ipv6Address => 16,
        }
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(
            self,
            DataType::Unsigned8 | DataType::Unsigned16 | DataType::Unsigned32 | DataType::Unsigned64
        )
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            DataType::Signed8 | DataType::Signed16 | DataType::Signed32 | DataType::Signed64
        )
    }

    pub fn is_octets(&self) -> bool {
        matches!(self, DataType::OctetArray | DataType::String)
    }

    /// Whether a template may declare this type at `length` (VARLEN included).
    pub fn accepts_length(&self, length: u16) -> bool {
        if length == VARLEN {
            return self.is_octets();
        }
        if self.is_octets() {
            return true;
        }
        if self.is_unsigned() || self.is_signed() {
            return length >= 1 && length <= self.nominal_length();
        }
        match self {
            DataType::Float64 => length == 4 || length == 8,
            _ => length == self.nominal_length(),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = IpfixError;

    fn from_str(s: &str) -> Result<Self> {
        ALL_TYPES
            .iter()
            .find(|t| t.name() == s)
            .copied()
            .ok_or_else(|| IpfixError::UnknownType(s.to_string()))
    }
}

/// A decoded field value, independent of its encoded width.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Boolean(bool),
    #[serde(serialize_with = "serialize_mac")]
    MacAddress([u8; 6]),
    Bytes(Vec<u8>),
    String(String),
    DateTime(DateTime<Utc>),
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
}

fn serialize_mac<S: Serializer>(mac: &[u8; 6], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_mac(mac))
}

fn format_mac(mac: &[u8; 6]) -> String {
    mac.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(":")
}

impl FieldValue {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            FieldValue::Unsigned(v) => Some(*v),
            FieldValue::Signed(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Signed(v) => Some(*v),
            FieldValue::Unsigned(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Bytes(b) => Some(b),
            FieldValue::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    pub fn as_ipv4(&self) -> Option<Ipv4Addr> {
        match self {
            FieldValue::Ipv4(ip) => Some(*ip),
            _ => None,
        }
    }

    pub fn as_ipv6(&self) -> Option<Ipv6Addr> {
        match self {
            FieldValue::Ipv6(ip) => Some(*ip),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Unsigned(v) => write!(f, "{v}"),
            FieldValue::Signed(v) => write!(f, "{v}"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Boolean(v) => write!(f, "{v}"),
            FieldValue::MacAddress(mac) => f.write_str(&format_mac(mac)),
            FieldValue::Bytes(b) => write!(f, "0x{}", b.iter().map(|x| format!("{x:02x}")).collect::<String>()),
            FieldValue::String(s) => f.write_str(s),
            FieldValue::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            FieldValue::Ipv4(ip) => write!(f, "{ip}"),
            FieldValue::Ipv6(ip) => write!(f, "{ip}"),
        }
    }
}

macro_rules! field_value_from {
    ($($t:ty => $variant:ident as $cast:ty),* $(,)?) => {
        $(impl From<$t> for FieldValue {
            fn from(v: $t) -> Self {
                FieldValue::$variant(v as $cast)
            }
        })*
    };
}

field_value_from!(
    u8 => Unsigned as u64,
    u16 => Unsigned as u64,
    u32 => Unsigned as u64,
    u64 => Unsigned as u64,
    i8 => Signed as i64,
    i16 => Signed as i64,
    i32 => Signed as i64,
    i64 => Signed as i64,
    f32 => Float as f64,
    f64 => Float as f64,
);

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        FieldValue::Bytes(v)
    }
}

impl From<Ipv4Addr> for FieldValue {
    fn from(v: Ipv4Addr) -> Self {
        FieldValue::Ipv4(v)
    }
}

impl From<Ipv6Addr> for FieldValue {
    fn from(v: Ipv6Addr) -> Self {
        FieldValue::Ipv6(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        FieldValue::DateTime(v)
    }
}

fn mismatch(data_type: DataType, value: &FieldValue) -> IpfixError {
    IpfixError::Encoding(format!("value {value} is not a valid <{data_type}>"))
}

fn bad_length(data_type: DataType, length: usize) -> IpfixError {
    IpfixError::Encoding(format!("<{data_type}> can't be encoded in {length} bytes"))
}

fn check_encode_length(data_type: DataType, length: usize) -> Result<()> {
    if length >= VARLEN as usize || !data_type.accepts_length(length as u16) {
        return Err(bad_length(data_type, length));
    }
    Ok(())
}

/// Natural encoded length of a value, used for variable-length fields.
pub fn value_length(data_type: DataType, value: &FieldValue) -> Result<usize> {
    if data_type.is_octets() {
        value
            .as_bytes()
            .map(|b| b.len())
            .ok_or_else(|| mismatch(data_type, value))
    } else {
        Ok(data_type.nominal_length() as usize)
    }
}

/// Appends `value` encoded as `data_type` in exactly `length` bytes.
pub fn encode_value(data_type: DataType, value: &FieldValue, length: usize, out: &mut Vec<u8>) -> Result<()> {
    check_encode_length(data_type, length)?;

    match data_type {
        t if t.is_unsigned() => {
            let v = value.as_u64().ok_or_else(|| mismatch(t, value))?;
            if length < 8 && v >> (8 * length) != 0 {
                return Err(IpfixError::Encoding(format!(
                    "{v} does not fit in {length} bytes of <{t}>"
                )));
            }
            out.extend_from_slice(&v.to_be_bytes()[8 - length..]);
        }
        t if t.is_signed() => {
            let v = value.as_i64().ok_or_else(|| mismatch(t, value))?;
            if length < 8 {
                let bound = 1i64 << (8 * length - 1);
                if v < -bound || v >= bound {
                    return Err(IpfixError::Encoding(format!(
                        "{v} does not fit in {length} bytes of <{t}>"
                    )));
                }
            }
            out.extend_from_slice(&v.to_be_bytes()[8 - length..]);
        }
        DataType::Float32 | DataType::Float64 => {
            let v = match value {
                FieldValue::Float(v) => *v,
                other => return Err(mismatch(data_type, other)),
            };
            if length == 4 {
                out.extend_from_slice(&(v as f32).to_be_bytes());
            } else {
                out.extend_from_slice(&v.to_be_bytes());
            }
        }
        DataType::Boolean => match value {
            //SMI TruthValue: 1 is true, 2 is false
            FieldValue::Boolean(true) => out.push(1),
            FieldValue::Boolean(false) => out.push(2),
            other => return Err(mismatch(data_type, other)),
        },
        DataType::MacAddress => match value {
            FieldValue::MacAddress(mac) => out.extend_from_slice(mac),
            FieldValue::Bytes(b) if b.len() == 6 => out.extend_from_slice(b),
            other => return Err(mismatch(data_type, other)),
        },
        DataType::OctetArray | DataType::String => {
            let bytes = match (data_type, value) {
                (DataType::String, FieldValue::String(s)) => s.as_bytes(),
                (DataType::OctetArray, FieldValue::Bytes(b)) => b.as_slice(),
                (DataType::OctetArray, FieldValue::String(s)) => s.as_bytes(),
                (_, other) => return Err(mismatch(data_type, other)),
            };
            if bytes.len() != length {
                return Err(IpfixError::Encoding(format!(
                    "<{data_type}> value is {} bytes, field is {length}",
                    bytes.len()
                )));
            }
            out.extend_from_slice(bytes);
        }
        DataType::DateTimeSeconds => {
            let dt = value.as_datetime().ok_or_else(|| mismatch(data_type, value))?;
            out.extend_from_slice(&to_epoch_seconds(&dt)?.to_be_bytes());
        }
        DataType::DateTimeMilliseconds => {
            let dt = value.as_datetime().ok_or_else(|| mismatch(data_type, value))?;
            out.extend_from_slice(&to_epoch_millis(&dt)?.to_be_bytes());
        }
        DataType::DateTimeMicroseconds => {
            let dt = value.as_datetime().ok_or_else(|| mismatch(data_type, value))?;
            out.extend_from_slice(&to_ntp(&dt, NtpResolution::Micro)?.to_be_bytes());
        }
        DataType::DateTimeNanoseconds => {
            let dt = value.as_datetime().ok_or_else(|| mismatch(data_type, value))?;
            out.extend_from_slice(&to_ntp(&dt, NtpResolution::Nano)?.to_be_bytes());
        }
        DataType::Ipv4Address => {
            let ip = value.as_ipv4().ok_or_else(|| mismatch(data_type, value))?;
            out.extend_from_slice(&ip.octets());
        }
        DataType::Ipv6Address => {
            let ip = value.as_ipv6().ok_or_else(|| mismatch(data_type, value))?;
            out.extend_from_slice(&ip.octets());
        }
        _ => return Err(mismatch(data_type, value)),
    }
    Ok(())
}

fn unsigned_from(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
}

/// Decodes `length` bytes at the start of `buf` as `data_type`.
pub fn decode_value(data_type: DataType, buf: &[u8], length: usize) -> Result<FieldValue> {
    let field_slice = take(buf, 0, length)?;
    if length >= VARLEN as usize || !data_type.accepts_length(length as u16) {
        return Err(IpfixError::InvalidValue(format!(
            "<{data_type}> can't be decoded from {length} bytes"
        )));
    }

    let value = match data_type {
        t if t.is_unsigned() => FieldValue::Unsigned(unsigned_from(field_slice)),
        t if t.is_signed() => {
            //sign-extend from the encoded width
            let shift = 64 - 8 * length as u32;
            let raw = unsigned_from(field_slice);
            FieldValue::Signed(((raw << shift) as i64) >> shift)
        }
        DataType::Float32 | DataType::Float64 => {
            if length == 4 {
                FieldValue::Float(f32::from_bits(unsigned_from(field_slice) as u32) as f64)
            } else {
                FieldValue::Float(f64::from_bits(unsigned_from(field_slice)))
            }
        }
        DataType::Boolean => match field_slice[0] {
            1 => FieldValue::Boolean(true),
            2 => FieldValue::Boolean(false),
            other => {
                return Err(IpfixError::InvalidValue(format!("boolean octet {other}")));
            }
        },
        DataType::MacAddress => {
            let mut mac = [0u8; 6];
            mac.copy_from_slice(field_slice);
            FieldValue::MacAddress(mac)
        }
        DataType::OctetArray => FieldValue::Bytes(field_slice.to_vec()),
        DataType::String => {
            let s = String::from_utf8(field_slice.to_vec())
                .map_err(|e| IpfixError::InvalidValue(format!("string is not UTF-8: {e}")))?;
            FieldValue::String(s)
        }
        DataType::DateTimeSeconds => {
            FieldValue::DateTime(from_epoch_seconds(unsigned_from(field_slice) as u32)?)
        }
        DataType::DateTimeMilliseconds => FieldValue::DateTime(from_epoch_millis(unsigned_from(field_slice))?),
        DataType::DateTimeMicroseconds => {
            FieldValue::DateTime(from_ntp(unsigned_from(field_slice), NtpResolution::Micro)?)
        }
        DataType::DateTimeNanoseconds => {
            FieldValue::DateTime(from_ntp(unsigned_from(field_slice), NtpResolution::Nano)?)
        }
        DataType::Ipv4Address => FieldValue::Ipv4(Ipv4Addr::from(unsigned_from(field_slice) as u32)),
        DataType::Ipv6Address => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(field_slice);
            FieldValue::Ipv6(Ipv6Addr::from(octets))
        }
        _ => {
            return Err(IpfixError::InvalidValue(format!("no decoder for <{data_type}>")));
        }
    };
    Ok(value)
}

/// Appends the length prefix of a variable-length field.
pub fn encode_varlen(length: usize, out: &mut Vec<u8>) -> Result<()> {
    if length < VARLEN_ESCAPE as usize {
        out.push(length as u8);
    } else if length <= VARLEN_MAX {
        out.push(VARLEN_ESCAPE);
        out.extend_from_slice(&(length as u16).to_be_bytes());
    } else {
        return Err(IpfixError::Encoding(format!(
            "variable-length value of {length} bytes exceeds {VARLEN_MAX}"
        )));
    }
    Ok(())
}

/// Reads a variable-length prefix at `offset`, returning the value length
/// and the offset of the value.
pub fn decode_varlen(buf: &[u8], offset: usize) -> Result<(usize, usize)> {
    let first = read_u8(buf, offset)?;
    if first == VARLEN_ESCAPE {
        let length = read_u16(buf, offset + 1)? as usize;
        if length > VARLEN_MAX {
            return Err(IpfixError::InvalidValue(format!(
                "reserved variable length {length} at offset {offset}"
            )));
        }
        Ok((length, offset + 3))
    } else {
        Ok((first as usize, offset + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode(data_type: DataType, value: FieldValue, length: usize) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        encode_value(data_type, &value, length, &mut out)?;
        Ok(out)
    }

    #[test]
    fn test_type_names_and_numbers() {
        assert_eq!("unsigned64".parse::<DataType>().unwrap(), DataType::Unsigned64);
        assert_eq!(DataType::Ipv6Address.number(), 19);
        assert_eq!(DataType::from_number(13), Some(DataType::String));
        assert_eq!(DataType::from_number(20), None);
        assert!("basicList".parse::<DataType>().is_err());
    }

    #[test]
    fn test_reduced_length_unsigned() {
        assert_eq!(encode(DataType::Unsigned64, 1000u64.into(), 4).unwrap(), vec![0, 0, 0x03, 0xe8]);
        assert_eq!(encode(DataType::Unsigned32, 0x123456u32.into(), 3).unwrap(), vec![0x12, 0x34, 0x56]);
        assert!(matches!(
            encode(DataType::Unsigned64, 256u64.into(), 1),
            Err(IpfixError::Encoding(_))
        ));
        //zero extension
        let v = decode_value(DataType::Unsigned64, &[0xff, 0xfe], 2).unwrap();
        assert_eq!(v, FieldValue::Unsigned(0xfffe));
    }

    #[test]
    fn test_reduced_length_signed() {
        assert_eq!(encode(DataType::Signed32, (-2i32).into(), 1).unwrap(), vec![0xfe]);
        let v = decode_value(DataType::Signed64, &[0xff, 0x00], 2).unwrap();
        assert_eq!(v, FieldValue::Signed(-256));
        let v = decode_value(DataType::Signed16, &[0x7f], 1).unwrap();
        assert_eq!(v, FieldValue::Signed(127));
        assert!(encode(DataType::Signed32, 128i32.into(), 1).is_err());
        assert!(encode(DataType::Signed32, (-129i32).into(), 1).is_err());
        assert!(encode(DataType::Signed32, (-128i32).into(), 1).is_ok());
    }

    #[test]
    fn test_length_longer_than_nominal_rejected() {
        assert!(encode(DataType::Unsigned16, 1u16.into(), 4).is_err());
        assert!(encode(DataType::Ipv4Address, Ipv4Addr::LOCALHOST.into(), 2).is_err());
        assert!(decode_value(DataType::Ipv4Address, &[127, 0], 2).is_err());
    }

    #[test]
    fn test_float_lengths() {
        let out = encode(DataType::Float64, 1.5f64.into(), 4).unwrap();
        assert_eq!(out, 1.5f32.to_be_bytes().to_vec());
        assert_eq!(decode_value(DataType::Float64, &out, 4).unwrap(), FieldValue::Float(1.5));
        assert!(encode(DataType::Float64, 1.5f64.into(), 2).is_err());
        assert!(encode(DataType::Float32, 1.5f64.into(), 8).is_err());
    }

    #[test]
    fn test_boolean_is_smi_truth_value() {
        assert_eq!(encode(DataType::Boolean, true.into(), 1).unwrap(), vec![1]);
        assert_eq!(encode(DataType::Boolean, false.into(), 1).unwrap(), vec![2]);
        assert_eq!(decode_value(DataType::Boolean, &[2], 1).unwrap(), FieldValue::Boolean(false));
        assert!(matches!(
            decode_value(DataType::Boolean, &[0], 1),
            Err(IpfixError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_string_validation() {
        assert!(matches!(
            decode_value(DataType::String, &[0xc3, 0x28], 2),
            Err(IpfixError::InvalidValue(_))
        ));
        let v = decode_value(DataType::String, "grüezi".as_bytes(), 7).unwrap();
        assert_eq!(v.as_str(), Some("grüezi"));
        assert!(encode(DataType::String, "abc".into(), 4).is_err());
    }

    #[test]
    fn test_truncated_decode() {
        assert!(matches!(
            decode_value(DataType::Unsigned32, &[0, 1], 4),
            Err(IpfixError::TruncatedRecord { need: 4, have: 2 })
        ));
    }

    #[test]
    fn test_addresses_and_mac() {
        let v = decode_value(DataType::Ipv4Address, &[192, 168, 1, 1], 4).unwrap();
        assert_eq!(v, FieldValue::Ipv4(Ipv4Addr::new(192, 168, 1, 1)));
        let ip6: Ipv6Addr = "2001:db8::1".parse().unwrap();
        assert_eq!(encode(DataType::Ipv6Address, ip6.into(), 16).unwrap(), ip6.octets().to_vec());
        let mac = FieldValue::MacAddress([0, 0x1b, 0x21, 0x3c, 0x4d, 0x5e]);
        assert_eq!(mac.to_string(), "00:1b:21:3c:4d:5e");
        assert_eq!(serde_json::to_string(&mac).unwrap(), "\"00:1b:21:3c:4d:5e\"");
    }

    #[test]
    fn test_varlen_prefix_forms() {
        let mut out = Vec::new();
        encode_varlen(254, &mut out).unwrap();
        assert_eq!(out, vec![254]);

        out.clear();
        encode_varlen(255, &mut out).unwrap();
        assert_eq!(out, vec![255, 0x00, 0xff]);
        assert_eq!(decode_varlen(&out, 0).unwrap(), (255, 3));

        out.clear();
        encode_varlen(0, &mut out).unwrap();
        assert_eq!(decode_varlen(&out, 0).unwrap(), (0, 1));

        assert!(encode_varlen(65535, &mut out).is_err());
        assert!(decode_varlen(&[255, 0x01], 0).is_err());
        assert!(matches!(
            decode_varlen(&[255, 0xff, 0xff], 0),
            Err(IpfixError::InvalidValue(_))
        ));
        assert_eq!(decode_varlen(&[255, 0xff, 0xfe], 0).unwrap(), (65534, 3));
    }

    #[test]
    fn test_type_mismatch_is_encoding_error() {
        assert!(matches!(
            encode(DataType::Ipv4Address, 5u32.into(), 4),
            Err(IpfixError::Encoding(_))
        ));
        assert!(encode(DataType::Unsigned8, (-1i8).into(), 1).is_err());
    }

    proptest! {
        #[test]
        fn unsigned_round_trip(v in any::<u64>(), length in 1usize..=8) {
            let v = if length == 8 { v } else { v & ((1u64 << (8 * length)) - 1) };
            let out = encode(DataType::Unsigned64, v.into(), length).unwrap();
            prop_assert_eq!(out.len(), length);
            prop_assert_eq!(decode_value(DataType::Unsigned64, &out, length).unwrap(), FieldValue::Unsigned(v));
        }

        #[test]
        fn signed_round_trip(v in any::<i64>(), length in 1usize..=8) {
            let v = if length == 8 { v } else {
                let shift = 64 - 8 * length as u32;
                (v << shift) >> shift
            };
            let out = encode(DataType::Signed64, v.into(), length).unwrap();
            prop_assert_eq!(decode_value(DataType::Signed64, &out, length).unwrap(), FieldValue::Signed(v));
        }

        #[test]
        fn octets_round_trip(bytes in proptest::collection::vec(any::<u8>(), 0..300)) {
            let len = bytes.len();
            let out = encode(DataType::OctetArray, bytes.clone().into(), len).unwrap();
            prop_assert_eq!(decode_value(DataType::OctetArray, &out, len).unwrap(), FieldValue::Bytes(bytes));
        }

        #[test]
        fn millis_round_trip(ms in 0u64..4_102_444_800_000) {
            let dt = from_epoch_millis(ms).unwrap();
            let out = encode(DataType::DateTimeMilliseconds, dt.into(), 8).unwrap();
            prop_assert_eq!(decode_value(DataType::DateTimeMilliseconds, &out, 8).unwrap(), FieldValue::DateTime(dt));
        }
    }
}
