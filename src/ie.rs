//! Information Elements and the registry used to resolve them.
//!
//! An Information Element is identified by (private enterprise number, element
//! number). Standard IANA elements carry PEN 0. The textual IESpec form
//! `name(pen/num)<type>[size]` is accepted wherever an element is named.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use log::debug;
use serde::Serialize;

use crate::error::{IpfixError, Result};
use crate::fields::*;

/// PEN of IANA-registered (standard) elements.
pub const IANA_PEN: u32 = 0;

/// PEN under which RFC 5103 reverse elements of IANA elements live.
pub const REVERSE_PEN: u32 = 29305;

//reverse of an enterprise element: same PEN, this bit set in the number
const REVERSE_ENTERPRISE_BIT: u16 = 0x4000;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct InformationElement {
    pub name: String,
    pub pen: u32,
    pub num: u16,
    pub data_type: DataType,
    /// Declared length; `VARLEN` for variable-length.
    pub length: u16,
}

impl InformationElement {
    /// `length` of `None` means the nominal length of the type.
    pub fn new(name: &str, pen: u32, num: u16, data_type: DataType, length: Option<u16>) -> Result<Self> {
        let length = length.unwrap_or_else(|| data_type.nominal_length());
        if num & 0x8000 != 0 {
            return Err(IpfixError::InvalidSpec(format!(
                "element number {num} uses the enterprise bit"
            )));
        }
        if !data_type.accepts_length(length) {
            return Err(IpfixError::InvalidSpec(format!(
                "{name}: <{data_type}> can't have length {length}"
            )));
        }
        let name = if name.is_empty() {
            format!("_ipfix_{pen}_{num}")
        } else {
            name.to_string()
        };
        Ok(InformationElement { name, pen, num, data_type, length })
    }

    /// Stand-in for an element the registry doesn't know: an octetArray of
    /// the declared length, so records using it still parse.
    pub fn placeholder(pen: u32, num: u16, length: u16) -> Self {
        InformationElement {
            name: format!("_ipfix_{pen}_{num}"),
            pen,
            num,
            data_type: DataType::OctetArray,
            length,
        }
    }

    pub fn is_enterprise(&self) -> bool {
        self.pen != IANA_PEN
    }

    pub fn is_varlen(&self) -> bool {
        self.length == VARLEN
    }

    /// A view of this element at another length (reduced-length encoding,
    /// or a fixed length for an octetArray/string). The receiver is unchanged.
    pub fn for_length(&self, length: u16) -> Result<Self> {
        if length == self.length {
            return Ok(self.clone());
        }
        if !self.data_type.accepts_length(length) {
            return Err(IpfixError::MalformedTemplate(format!(
                "{} <{}> can't be encoded in {length} bytes",
                self.name, self.data_type
            )));
        }
        Ok(InformationElement { length, ..self.clone() })
    }

    /// RFC 5103 reverse (biflow) counterpart of this element.
    pub fn reverse(&self) -> Self {
        let mut chars = self.name.chars();
        let name = match chars.next() {
            Some(first) => format!("reverse{}{}", first.to_uppercase(), chars.as_str()),
            None => "reverse".to_string(),
        };
        let (pen, num) = if self.is_enterprise() {
            (self.pen, self.num | REVERSE_ENTERPRISE_BIT)
        } else {
            (REVERSE_PEN, self.num)
        };
        InformationElement { name, pen, num, ..self.clone() }
    }

    /// Renders the element as an IESpec.
    pub fn spec(&self) -> String {
        format!("{}({}/{})<{}>[{}]", self.name, self.pen, self.num, self.data_type, self.length)
    }
}

impl fmt::Display for InformationElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.spec())
    }
}

/// Parsed form of an IESpec; every part is optional.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IeSpec {
    pub name: Option<String>,
    pub pen: Option<u32>,
    pub num: Option<u16>,
    pub data_type: Option<DataType>,
    pub length: Option<u16>,
}

fn spec_error(spec: &str, why: &str) -> IpfixError {
    IpfixError::InvalidSpec(format!("{spec:?}: {why}"))
}

impl FromStr for IeSpec {
    type Err = IpfixError;

    fn from_str(spec: &str) -> Result<Self> {
        let s = spec.trim();
        let mut parsed = IeSpec::default();

        let name_end = s.find(&['(', '<', '['][..]).unwrap_or(s.len());
        if name_end > 0 {
            let name = &s[..name_end];
            if name.chars().any(char::is_whitespace) {
                return Err(spec_error(spec, "whitespace in name"));
            }
            parsed.name = Some(name.to_string());
        }
        let mut rest = &s[name_end..];

        if let Some(inner) = rest.strip_prefix('(') {
            let close = inner.find(')').ok_or_else(|| spec_error(spec, "unclosed ("))?;
            let ids = &inner[..close];
            let (pen, num) = match ids.split_once('/') {
                Some((pen, num)) => (Some(pen), num),
                None => (None, ids),
            };
            if let Some(pen) = pen {
                parsed.pen = Some(pen.trim().parse().map_err(|_| spec_error(spec, "bad PEN"))?);
            }
            parsed.num = Some(num.trim().parse().map_err(|_| spec_error(spec, "bad element number"))?);
            rest = &inner[close + 1..];
        }

        if let Some(inner) = rest.strip_prefix('<') {
            let close = inner.find('>').ok_or_else(|| spec_error(spec, "unclosed <"))?;
            parsed.data_type = Some(inner[..close].trim().parse()?);
            rest = &inner[close + 1..];
        }

        if let Some(inner) = rest.strip_prefix('[') {
            let close = inner.find(']').ok_or_else(|| spec_error(spec, "unclosed ["))?;
            parsed.length = Some(inner[..close].trim().parse().map_err(|_| spec_error(spec, "bad length"))?);
            rest = &inner[close + 1..];
        }

        if !rest.trim().is_empty() {
            return Err(spec_error(spec, "trailing characters"));
        }
        if parsed == IeSpec::default() {
            return Err(spec_error(spec, "empty spec"));
        }
        Ok(parsed)
    }
}

/// Lookup capability the codec needs from an Information Element registry.
pub trait IeRegistry: Send + Sync {
    fn lookup(&self, pen: u32, num: u16) -> Option<Arc<InformationElement>>;
    fn lookup_by_name(&self, name: &str) -> Option<Arc<InformationElement>>;
}

/// Resolves a field specifier from a template record. Unknown elements become
/// octetArray placeholders rather than failing the template.
pub fn resolve_template_entry(
    registry: &dyn IeRegistry,
    pen: u32,
    num: u16,
    length: u16,
) -> Result<Arc<InformationElement>> {
    match registry.lookup(pen, num) {
        Some(ie) if ie.length == length => Ok(ie),
        Some(ie) => Ok(Arc::new(ie.for_length(length)?)),
        None => {
            debug!("unknown information element {pen}/{num}, decoding as octetArray[{length}]");
            Ok(Arc::new(InformationElement::placeholder(pen, num, length)))
        }
    }
}

/// In-memory information model.
#[derive(Clone, Debug, Default)]
pub struct InfoModel {
    by_num: HashMap<(u32, u16), Arc<InformationElement>>,
    by_name: HashMap<String, Arc<InformationElement>>,
}

impl InfoModel {
    pub fn new() -> Self {
        InfoModel::default()
    }

    /// Model pre-loaded with commonly used IANA elements.
    pub fn iana_core() -> Self {
        let mut model = InfoModel::new();
        for spec in IANA_CORE {
            //the table is static and well-formed
            if let Ok(ie) = spec.parse::<IeSpec>().and_then(|s| model.create(&s, spec)) {
                model.register(ie);
            }
        }
        model
    }

    pub fn register(&mut self, ie: InformationElement) -> Arc<InformationElement> {
        let ie = Arc::new(ie);
        self.by_num.insert((ie.pen, ie.num), Arc::clone(&ie));
        self.by_name.insert(ie.name.clone(), Arc::clone(&ie));
        ie
    }

    fn create(&self, parsed: &IeSpec, spec: &str) -> Result<InformationElement> {
        let name = parsed.name.as_deref().ok_or_else(|| spec_error(spec, "new element needs a name"))?;
        let num = parsed.num.ok_or_else(|| spec_error(spec, "new element needs a number"))?;
        let data_type = parsed
            .data_type
            .ok_or_else(|| spec_error(spec, "new element needs a type"))?;
        InformationElement::new(name, parsed.pen.unwrap_or(IANA_PEN), num, data_type, parsed.length)
    }

    /// Looks up an element by name or number, or creates and registers it
    /// when the spec carries a type. A `[size]` on a known element yields a
    /// length-specialized view and leaves the registered element alone.
    pub fn for_spec(&mut self, spec: &str) -> Result<Arc<InformationElement>> {
        let parsed: IeSpec = spec.parse()?;

        let known = match (&parsed.name, parsed.num) {
            (_, Some(num)) => self.lookup(parsed.pen.unwrap_or(IANA_PEN), num),
            (Some(name), None) => self.lookup_by_name(name),
            (None, None) => None,
        };

        match known {
            Some(ie) => match parsed.length {
                Some(length) if length != ie.length => Ok(Arc::new(ie.for_length(length)?)),
                _ => Ok(ie),
            },
            None => {
                let ie = self.create(&parsed, spec)?;
                Ok(self.register(ie))
            }
        }
    }

    /// Ordered element list for building templates or projecting records.
    pub fn spec_list(&mut self, specs: &[&str]) -> Result<Vec<Arc<InformationElement>>> {
        specs.iter().map(|spec| self.for_spec(spec)).collect()
    }

    /// Registers the reverse of every IANA element currently in the model.
    pub fn add_reverse(&mut self) {
        let forward: Vec<InformationElement> = self
            .by_num
            .values()
            .filter(|ie| !ie.is_enterprise())
            .map(|ie| ie.reverse())
            .collect();
        for ie in forward {
            self.register(ie);
        }
    }

    /// All registered elements sorted by (pen, num).
    pub fn dump(&self) -> Vec<Arc<InformationElement>> {
        let mut all: Vec<_> = self.by_num.values().cloned().collect();
        all.sort_by_key(|ie| (ie.pen, ie.num));
        all
    }

    pub fn len(&self) -> usize {
        self.by_num.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_num.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_num.clear();
        self.by_name.clear();
    }
}

impl IeRegistry for InfoModel {
    fn lookup(&self, pen: u32, num: u16) -> Option<Arc<InformationElement>> {
        self.by_num.get(&(pen, num)).cloned()
    }

    fn lookup_by_name(&self, name: &str) -> Option<Arc<InformationElement>> {
        self.by_name.get(name).cloned()
    }
}

//commonly exported IANA elements
const IANA_CORE: &[&str] = &[
    "octetDeltaCount(1)<unsigned64>",
    "packetDeltaCount(2)<unsigned64>",
    "deltaFlowCount(3)<unsigned64>",
    "protocolIdentifier(4)<unsigned8>",
    "ipClassOfService(5)<unsigned8>",
    "tcpControlBits(6)<unsigned16>",
    "sourceTransportPort(7)<unsigned16>",
    "sourceIPv4Address(8)<ipv4Address>",
    "sourceIPv4PrefixLength(9)<unsigned8>",
    "ingressInterface(10)<unsigned32>",
    "destinationTransportPort(11)<unsigned16>",
    "destinationIPv4Address(12)<ipv4Address>",
    "destinationIPv4PrefixLength(13)<unsigned8>",
    "egressInterface(14)<unsigned32>",
    "ipNextHopIPv4Address(15)<ipv4Address>",
    "bgpSourceAsNumber(16)<unsigned32>",
    "bgpDestinationAsNumber(17)<unsigned32>",
    "bgpNextHopIPv4Address(18)<ipv4Address>",
    "postMCastPacketDeltaCount(19)<unsigned64>",
    "postMCastOctetDeltaCount(20)<unsigned64>",
    "flowEndSysUpTime(21)<unsigned32>",
    "flowStartSysUpTime(22)<unsigned32>",
    "postOctetDeltaCount(23)<unsigned64>",
    "postPacketDeltaCount(24)<unsigned64>",
    "minimumIpTotalLength(25)<unsigned64>",
    "maximumIpTotalLength(26)<unsigned64>",
    "sourceIPv6Address(27)<ipv6Address>",
    "destinationIPv6Address(28)<ipv6Address>",
    "sourceIPv6PrefixLength(29)<unsigned8>",
    "destinationIPv6PrefixLength(30)<unsigned8>",
    "flowLabelIPv6(31)<unsigned32>",
    "icmpTypeCodeIPv4(32)<unsigned16>",
    "igmpType(33)<unsigned8>",
    "minimumTTL(52)<unsigned8>",
    "maximumTTL(53)<unsigned8>",
    "fragmentIdentification(54)<unsigned32>",
    "postIpClassOfService(55)<unsigned8>",
    "sourceMacAddress(56)<macAddress>",
    "postDestinationMacAddress(57)<macAddress>",
    "vlanId(58)<unsigned16>",
    "postVlanId(59)<unsigned16>",
    "ipVersion(60)<unsigned8>",
    "flowDirection(61)<unsigned8>",
    "ipNextHopIPv6Address(62)<ipv6Address>",
    "destinationMacAddress(80)<macAddress>",
    "postSourceMacAddress(81)<macAddress>",
    "interfaceName(82)<string>",
    "interfaceDescription(83)<string>",
    "octetTotalCount(85)<unsigned64>",
    "packetTotalCount(86)<unsigned64>",
    "fragmentOffset(88)<unsigned16>",
    "forwardingStatus(89)<unsigned8>",
    "flowEndReason(136)<unsigned8>",
    "exporterIPv4Address(130)<ipv4Address>",
    "exporterIPv6Address(131)<ipv6Address>",
    "flowId(148)<unsigned64>",
    "observationDomainId(149)<unsigned32>",
    "flowStartSeconds(150)<dateTimeSeconds>",
    "flowEndSeconds(151)<dateTimeSeconds>",
    "flowStartMilliseconds(152)<dateTimeMilliseconds>",
    "flowEndMilliseconds(153)<dateTimeMilliseconds>",
    "flowStartMicroseconds(154)<dateTimeMicroseconds>",
    "flowEndMicroseconds(155)<dateTimeMicroseconds>",
    "flowStartNanoseconds(156)<dateTimeNanoseconds>",
    "flowEndNanoseconds(157)<dateTimeNanoseconds>",
    "flowDurationMilliseconds(161)<unsigned32>",
    "flowDurationMicroseconds(162)<unsigned32>",
    "observedFlowTotalCount(163)<unsigned64>",
    "ignoredPacketTotalCount(164)<unsigned64>",
    "ignoredOctetTotalCount(165)<unsigned64>",
    "icmpTypeCodeIPv6(139)<unsigned16>",
    "mplsTopLabelStackSection(70)<octetArray>",
    "applicationName(96)<string>",
    "exportingProcessId(144)<unsigned32>",
    "templateId(145)<unsigned16>",
    "samplingInterval(34)<unsigned32>",
    "samplingAlgorithm(35)<unsigned8>",
    "flowActiveTimeout(36)<unsigned16>",
    "flowIdleTimeout(37)<unsigned16>",
    "exportedMessageTotalCount(41)<unsigned64>",
    "exportedOctetTotalCount(40)<unsigned64>",
    "exportedFlowRecordTotalCount(42)<unsigned64>",
    "meteringProcessId(143)<unsigned32>",
    "systemInitTimeMilliseconds(160)<dateTimeMilliseconds>",
    "observationTimeSeconds(322)<dateTimeSeconds>",
    "observationTimeMilliseconds(323)<dateTimeMilliseconds>",
    "observationTimeMicroseconds(324)<dateTimeMicroseconds>",
    "observationTimeNanoseconds(325)<dateTimeNanoseconds>",
    "dataRecordsReliability(276)<boolean>",
    "paddingOctets(210)<octetArray>",
    "absoluteError(320)<float64>",
    "samplingProbability(311)<float64>",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_spec() {
        let spec: IeSpec = "myNewInformationElement(35566/1)<string>[32]".parse().unwrap();
        assert_eq!(spec.name.as_deref(), Some("myNewInformationElement"));
        assert_eq!(spec.pen, Some(35566));
        assert_eq!(spec.num, Some(1));
        assert_eq!(spec.data_type, Some(DataType::String));
        assert_eq!(spec.length, Some(32));
    }

    #[test]
    fn test_parse_partial_specs() {
        let spec: IeSpec = "(2)".parse().unwrap();
        assert_eq!(spec.num, Some(2));
        assert_eq!(spec.name, None);

        let spec: IeSpec = "octetDeltaCount[4]".parse().unwrap();
        assert_eq!(spec.name.as_deref(), Some("octetDeltaCount"));
        assert_eq!(spec.length, Some(4));

        assert!("".parse::<IeSpec>().is_err());
        assert!("foo(1".parse::<IeSpec>().is_err());
        assert!("foo<bogus>".parse::<IeSpec>().is_err());
        assert!("foo[4]x".parse::<IeSpec>().is_err());
    }

    #[test]
    fn test_spec_renders_back() {
        let mut model = InfoModel::new();
        let ie = model.for_spec("myNewInformationElement(35566/1)<string>").unwrap();
        assert_eq!(ie.spec(), "myNewInformationElement(35566/1)<string>[65535]");
        assert!(ie.is_varlen());
        assert!(ie.is_enterprise());
    }

    #[test]
    fn test_lookup_by_name_and_number() {
        let mut model = InfoModel::iana_core();
        assert_eq!(model.for_spec("octetDeltaCount").unwrap().spec(), "octetDeltaCount(0/1)<unsigned64>[8]");
        assert_eq!(model.for_spec("(2)").unwrap().name, "packetDeltaCount");
        assert!(model.lookup_by_name("sourceIPv4Address").is_some());
        assert!(model.lookup(0, 8).is_some());
    }

    #[test]
    fn test_length_view_leaves_registry_untouched() {
        let mut model = InfoModel::iana_core();
        let reduced = model.for_spec("octetDeltaCount[4]").unwrap();
        assert_eq!(reduced.length, 4);
        assert_eq!(model.lookup(0, 1).unwrap().length, 8);
        assert!(model.for_spec("sourceIPv4Address[2]").is_err());
    }

    #[test]
    fn test_unknown_without_type_fails() {
        let mut model = InfoModel::new();
        assert!(matches!(model.for_spec("mysteryElement"), Err(IpfixError::InvalidSpec(_))));
    }

    #[test]
    fn test_placeholder_for_unknown_entry() {
        let model = InfoModel::iana_core();
        let ie = resolve_template_entry(&model, 9999, 42, 6).unwrap();
        assert_eq!(ie.name, "_ipfix_9999_42");
        assert_eq!(ie.data_type, DataType::OctetArray);
        assert_eq!(ie.length, 6);
        //not registered as a side effect
        assert!(model.lookup(9999, 42).is_none());

        let ie = resolve_template_entry(&model, 0, 1, 4).unwrap();
        assert_eq!(ie.name, "octetDeltaCount");
        assert_eq!(ie.length, 4);
    }

    #[test]
    fn test_reverse_elements() {
        let mut model = InfoModel::iana_core();
        let fwd = model.for_spec("octetDeltaCount").unwrap();
        let rev = fwd.reverse();
        assert_eq!(rev.spec(), "reverseOctetDeltaCount(29305/1)<unsigned64>[8]");

        let ent = InformationElement::new("testString", 35566, 32766, DataType::String, None).unwrap();
        let rev = ent.reverse();
        assert_eq!((rev.pen, rev.num), (35566, 32766 | 0x4000));

        model.add_reverse();
        assert!(model.lookup_by_name("reverseSourceIPv4Address").is_some());
    }

    #[test]
    fn test_dump_is_sorted() {
        let mut model = InfoModel::iana_core();
        model.for_spec("testString(35566/32766)<string>").unwrap();
        let dump = model.dump();
        assert_eq!(dump.len(), model.len());
        assert_eq!(dump.first().unwrap().num, 1);
        assert_eq!(dump.last().unwrap().pen, 35566);
        model.clear();
        assert!(model.is_empty());
    }
}
