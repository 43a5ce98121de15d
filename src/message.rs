use std::sync::Arc;

use log::{debug, warn};
use serde::Serialize;

use crate::error::{IpfixError, Result};
use crate::fields::FieldValue;
use crate::records::*;
use crate::sessions::Session;
use crate::templates::*;
use crate::time::*;
use crate::utils::*;

pub const IPFIX_VERSION: u16 = 10;
pub const MESSAGE_HEADER_LENGTH: usize = 16;
pub const SET_HEADER_LENGTH: usize = 4;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageHeader {
    pub version: u16,
    pub length: u16,
    pub export_time: u32,
    pub sequence_number: u32,
    pub domain_id: u32,
}

impl MessageHeader {
    /// Reads and validates the header at the start of `buf`. The message
    /// length is only checked for plausibility here.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < MESSAGE_HEADER_LENGTH {
            return Err(IpfixError::MalformedHeader(format!(
                "{} bytes is shorter than a message header",
                buf.len()
            )));
        }
        let header = MessageHeader {
            version: read_u16(buf, 0)?,
            length: read_u16(buf, 2)?,
            export_time: read_u32(buf, 4)?,
            sequence_number: read_u32(buf, 8)?,
            domain_id: read_u32(buf, 12)?,
        };
        if header.version != IPFIX_VERSION {
            return Err(IpfixError::MalformedHeader(format!("version {} is not IPFIX", header.version)));
        }
        if (header.length as usize) < MESSAGE_HEADER_LENGTH {
            return Err(IpfixError::MalformedHeader(format!("message length {}", header.length)));
        }
        Ok(header)
    }

    pub fn encode_to(&self, out: &mut [u8]) {
        write_u16_at(out, 0, self.version);
        write_u16_at(out, 2, self.length);
        write_u32_at(out, 4, self.export_time);
        write_u32_at(out, 8, self.sequence_number);
        write_u32_at(out, 12, self.domain_id);
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SetHeader {
    pub set_id: u16,
    pub length: u16,
}

/// Result of decoding one message. Problems confined to a single set show up
/// in `items` next to the records of the sets that decoded.
#[derive(Debug)]
pub struct DecodedMessage {
    pub header: MessageHeader,
    pub items: Vec<Result<DataRecord>>,
    /// Data Records carried, whether or not they were kept.
    pub data_record_count: u32,
}

impl DecodedMessage {
    pub fn records(&self) -> impl Iterator<Item = &DataRecord> {
        self.items.iter().filter_map(|item| item.as_ref().ok())
    }

    pub fn errors(&self) -> impl Iterator<Item = &IpfixError> {
        self.items.iter().filter_map(|item| item.as_ref().err())
    }
}

//walks the set headers; the sets have to tile the body exactly
fn scan_sets(buf: &[u8]) -> Result<Vec<(SetHeader, usize)>> {
    let mut sets = Vec::new();
    let mut offset = MESSAGE_HEADER_LENGTH;
    while offset < buf.len() {
        if buf.len() - offset < SET_HEADER_LENGTH {
            return Err(IpfixError::MalformedHeader(format!(
                "{} stray bytes after the last set",
                buf.len() - offset
            )));
        }
        let set = SetHeader { set_id: read_u16(buf, offset)?, length: read_u16(buf, offset + 2)? };
        let set_length = set.length as usize;
        if set_length < SET_HEADER_LENGTH || offset + set_length > buf.len() {
            return Err(IpfixError::MalformedHeader(format!(
                "set {} at offset {offset} claims {set_length} bytes",
                set.set_id
            )));
        }
        sets.push((set, offset + SET_HEADER_LENGTH));
        offset += set_length;
    }
    Ok(sets)
}

fn decode_template_set(session: &Session, domain_id: u32, set_id: u16, body: &[u8]) -> Result<()> {
    let mut offset = 0;
    //anything shorter than a withdrawal record is padding
    while body.len() - offset >= 4 {
        let (record, used) = if set_id == TEMPLATE_SET_ID {
            parse_template_record(session.registry(), body, offset)?
        } else {
            parse_options_template_record(session.registry(), body, offset)?
        };
        session.apply(domain_id, record);
        offset += used;
    }
    Ok(())
}

fn decode_data_set(
    template: &Arc<Template>,
    header: &MessageHeader,
    body: &[u8],
    items: &mut Vec<Result<DataRecord>>,
) -> u32 {
    let export_time = match from_epoch_seconds(header.export_time) {
        Ok(t) => t,
        Err(e) => {
            items.push(Err(e));
            return 0;
        }
    };
    let min_length = template.min_record_length();
    if min_length == 0 {
        //zero-width records can't be counted out of a set
        items.push(Err(IpfixError::MalformedTemplate(format!(
            "template {} describes zero-length records",
            template.id
        ))));
        return 0;
    }
    let mut offset = 0;
    let mut count = 0;
    while body.len() - offset >= min_length {
        match decode_record(template, body, offset) {
            Ok((values, used)) => {
                items.push(Ok(DataRecord {
                    domain_id: header.domain_id,
                    export_time,
                    template: Arc::clone(template),
                    values,
                }));
                offset += used;
                count += 1;
            }
            Err(e) => {
                //later field boundaries can't be trusted
                items.push(Err(e));
                break;
            }
        }
    }
    count
}

/// Decodes one complete message against `session`, updating its template
/// cache as Template Sets go by. `accept` filters which templates' records
/// are kept; records of other templates are still decoded and counted.
pub fn decode_message(session: &mut Session, buf: &[u8], accept: &dyn Fn(&Template) -> bool) -> Result<DecodedMessage> {
    let header = MessageHeader::parse(buf)?;
    if header.length as usize != buf.len() {
        return Err(IpfixError::MalformedHeader(format!(
            "message length {} but {} bytes present",
            header.length,
            buf.len()
        )));
    }
    let sets = scan_sets(buf)?;

    let mut items = Vec::new();
    let mut data_record_count = 0;
    for (set, body_start) in sets {
        let body = &buf[body_start..body_start + set.length as usize - SET_HEADER_LENGTH];
        match set.set_id {
            TEMPLATE_SET_ID | OPTIONS_TEMPLATE_SET_ID => {
                if let Err(e) = decode_template_set(session, header.domain_id, set.set_id, body) {
                    warn!("dropping rest of template set in domain {}: {e}", header.domain_id);
                    items.push(Err(e));
                }
            }
            id if id >= MIN_TEMPLATE_ID => match session.template(header.domain_id, id) {
                Some(template) => {
                    let mut decoded = Vec::new();
                    data_record_count += decode_data_set(&template, &header, body, &mut decoded);
                    let keep = accept(&template);
                    items.extend(decoded.into_iter().filter(|item| keep || item.is_err()));
                }
                None => items.push(Err(IpfixError::UnknownTemplate {
                    domain_id: header.domain_id,
                    template_id: id,
                })),
            },
            reserved => debug!(
                "skipping set with reserved id {reserved}: {}",
                hex_string(&body[..body.len().min(16)])
            ),
        }
    }

    session.observe_sequence(header.domain_id, header.sequence_number, data_record_count);
    Ok(DecodedMessage { header, items, data_record_count })
}

/// Outcome of adding something to a `MessageBuilder`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Appended {
    Written,
    /// Would push the message past its size limit; the message is unchanged.
    NoRoom,
}

/// Accumulates sets for one message without ever exceeding `max_size`.
#[derive(Debug)]
pub struct MessageBuilder {
    buf: Vec<u8>,
    max_size: usize,
    domain_id: u32,
    //(set id, offset of its set header)
    open_set: Option<(u16, usize)>,
    record_count: u32,
}

impl MessageBuilder {
    pub fn new(domain_id: u32, max_size: usize) -> Self {
        MessageBuilder {
            buf: vec![0; MESSAGE_HEADER_LENGTH],
            max_size,
            domain_id,
            open_set: None,
            record_count: 0,
        }
    }

    pub fn domain_id(&self) -> u32 {
        self.domain_id
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True while no set has been started.
    pub fn is_empty(&self) -> bool {
        self.buf.len() == MESSAGE_HEADER_LENGTH
    }

    pub fn record_count(&self) -> u32 {
        self.record_count
    }

    fn close_set(&mut self) {
        if let Some((_, start)) = self.open_set.take() {
            let length = (self.buf.len() - start) as u16;
            write_u16_at(&mut self.buf, start + 2, length);
        }
    }

    fn append_to_set(&mut self, set_id: u16, bytes: &[u8]) -> Appended {
        let continues = matches!(self.open_set, Some((open, _)) if open == set_id);
        let needed = if continues { bytes.len() } else { SET_HEADER_LENGTH + bytes.len() };
        if self.buf.len() + needed > self.max_size {
            return Appended::NoRoom;
        }
        if !continues {
            self.close_set();
            self.open_set = Some((set_id, self.buf.len()));
            self.buf.extend_from_slice(&set_id.to_be_bytes());
            self.buf.extend_from_slice(&0u16.to_be_bytes());
        }
        self.buf.extend_from_slice(bytes);
        Appended::Written
    }

    pub fn append_template(&mut self, template: &Template) -> Appended {
        self.append_to_set(template.native_set_id(), &template.serialize())
    }

    /// `set_id` is the kind of template being withdrawn (2 or 3).
    pub fn append_withdrawal(&mut self, set_id: u16, template_id: u16) -> Appended {
        let mut record = Vec::with_capacity(4);
        encode_withdrawal(template_id, &mut record);
        self.append_to_set(set_id, &record)
    }

    /// Encodes first, so a value that can't be encoded leaves the message as it was.
    pub fn append_record(&mut self, template: &Template, values: &[FieldValue]) -> Result<Appended> {
        let mut record = Vec::with_capacity(template.min_record_length());
        encode_record(template, values, &mut record)?;
        let appended = self.append_to_set(template.id, &record);
        if appended == Appended::Written {
            self.record_count += 1;
        }
        Ok(appended)
    }

    /// Closes the open set and fills in the header.
    pub fn finish(mut self, export_time: u32, sequence_number: u32) -> Vec<u8> {
        self.close_set();
        let header = MessageHeader {
            version: IPFIX_VERSION,
            length: self.buf.len() as u16,
            export_time,
            sequence_number,
            domain_id: self.domain_id,
        };
        header.encode_to(&mut self.buf);
        self.buf
    }
}
