use std::sync::Arc;

use tabled::{builder::Builder, settings::Style};

use crate::error::{IpfixError, Result};
use crate::ie::*;
use crate::utils::*;

pub const TEMPLATE_SET_ID: u16 = 2;
pub const OPTIONS_TEMPLATE_SET_ID: u16 = 3;
/// Lowest template id (and data set id); 0-255 are reserved set ids.
pub const MIN_TEMPLATE_ID: u16 = 256;

//top bit of the element id flags a trailing PEN
const ENTERPRISE_BIT: u16 = 0x8000;

/// Ordered field layout for Data Records of one template id.
#[derive(Clone, Debug, PartialEq)]
pub struct Template {
    pub id: u16,
    /// Number of leading scope fields; nonzero only for Options Templates.
    pub scope_count: u16,
    pub fields: Vec<Arc<InformationElement>>,
}

impl Template {
    pub fn new(id: u16, fields: Vec<Arc<InformationElement>>) -> Result<Self> {
        check_template(id, &fields)?;
        Ok(Template { id, scope_count: 0, fields })
    }

    pub fn new_options(id: u16, fields: Vec<Arc<InformationElement>>, scope_count: u16) -> Result<Self> {
        check_template(id, &fields)?;
        if scope_count == 0 || scope_count as usize > fields.len() {
            return Err(IpfixError::MalformedTemplate(format!(
                "template {id}: scope count {scope_count} with {} fields",
                fields.len()
            )));
        }
        Ok(Template { id, scope_count, fields })
    }

    pub fn is_options(&self) -> bool {
        self.scope_count > 0
    }

    /// Set id under which this template is announced.
    pub fn native_set_id(&self) -> u16 {
        if self.is_options() {
            OPTIONS_TEMPLATE_SET_ID
        } else {
            TEMPLATE_SET_ID
        }
    }

    pub fn has_varlen(&self) -> bool {
        self.fields.iter().any(|ie| ie.is_varlen())
    }

    /// Smallest possible Data Record: fixed lengths plus one prefix octet per
    /// variable-length field.
    pub fn min_record_length(&self) -> usize {
        self.fields
            .iter()
            .map(|ie| if ie.is_varlen() { 1 } else { ie.length as usize })
            .sum()
    }

    pub fn scope_fields(&self) -> &[Arc<InformationElement>] {
        &self.fields[..self.scope_count as usize]
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|ie| ie.name == name)
    }

    pub fn contains(&self, ie: &InformationElement) -> bool {
        self.fields.iter().any(|f| f.pen == ie.pen && f.num == ie.num)
    }

    /// Size of this template's Template Record on the wire.
    pub fn encoded_length(&self) -> usize {
        let header = if self.is_options() { 6 } else { 4 };
        header
            + self
                .fields
                .iter()
                .map(|ie| if ie.is_enterprise() { 8 } else { 4 })
                .sum::<usize>()
    }

    pub fn serialize_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.id.to_be_bytes());
        out.extend_from_slice(&(self.fields.len() as u16).to_be_bytes());
        if self.is_options() {
            out.extend_from_slice(&self.scope_count.to_be_bytes());
        }
        for ie in &self.fields {
            if ie.is_enterprise() {
                out.extend_from_slice(&(ie.num | ENTERPRISE_BIT).to_be_bytes());
                out.extend_from_slice(&ie.length.to_be_bytes());
                out.extend_from_slice(&ie.pen.to_be_bytes());
            } else {
                out.extend_from_slice(&ie.num.to_be_bytes());
                out.extend_from_slice(&ie.length.to_be_bytes());
            }
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_length());
        self.serialize_to(&mut out);
        out
    }
}

fn check_template(id: u16, fields: &[Arc<InformationElement>]) -> Result<()> {
    if id < MIN_TEMPLATE_ID {
        return Err(IpfixError::MalformedTemplate(format!("template id {id} is reserved")));
    }
    if fields.is_empty() {
        return Err(IpfixError::MalformedTemplate(format!("template {id} has no fields")));
    }
    if fields.len() > u16::MAX as usize {
        return Err(IpfixError::MalformedTemplate(format!("template {id} has too many fields")));
    }
    Ok(())
}

/// One record out of a Template Set or Options Template Set.
#[derive(Clone, Debug, PartialEq)]
pub enum TemplateRecord {
    Definition(Template),
    /// Withdraws a single template id.
    Withdrawal { template_id: u16 },
    /// Withdraws every template announced under `set_id` (2 or 3).
    WithdrawAll { set_id: u16 },
}

//running out of bytes inside a template record means the record itself is bad
fn template_truncated(e: IpfixError) -> IpfixError {
    match e {
        IpfixError::TruncatedRecord { need, have } => IpfixError::MalformedTemplate(format!(
            "template record truncated: need {need} bytes, have {have}"
        )),
        other => other,
    }
}

fn withdrawal_for(set_id: u16, template_id: u16) -> Result<TemplateRecord> {
    if template_id == set_id {
        Ok(TemplateRecord::WithdrawAll { set_id })
    } else if template_id >= MIN_TEMPLATE_ID {
        Ok(TemplateRecord::Withdrawal { template_id })
    } else {
        Err(IpfixError::MalformedTemplate(format!(
            "withdrawal of reserved template id {template_id} in set {set_id}"
        )))
    }
}

fn parse_field_specifiers(
    registry: &dyn IeRegistry,
    buf: &[u8],
    mut offset: usize,
    field_count: u16,
) -> Result<(Vec<Arc<InformationElement>>, usize)> {
    let mut fields = Vec::with_capacity(field_count as usize);
    for _ in 0..field_count {
        let raw_num = read_u16(buf, offset)?;
        let length = read_u16(buf, offset + 2)?;
        offset += 4;
        let pen = if raw_num & ENTERPRISE_BIT != 0 {
            let pen = read_u32(buf, offset)?;
            offset += 4;
            pen
        } else {
            IANA_PEN
        };
        fields.push(resolve_template_entry(registry, pen, raw_num & !ENTERPRISE_BIT, length)?);
    }
    Ok((fields, offset))
}

/// Parses the Template Record at `offset` in a Template Set body, returning
/// the record and the number of bytes it used.
pub fn parse_template_record(registry: &dyn IeRegistry, buf: &[u8], offset: usize) -> Result<(TemplateRecord, usize)> {
    let template_id = read_u16(buf, offset).map_err(template_truncated)?;
    let field_count = read_u16(buf, offset + 2).map_err(template_truncated)?;
    if field_count == 0 {
        return Ok((withdrawal_for(TEMPLATE_SET_ID, template_id)?, 4));
    }
    let (fields, end) =
        parse_field_specifiers(registry, buf, offset + 4, field_count).map_err(template_truncated)?;
    let template = Template::new(template_id, fields)?;
    Ok((TemplateRecord::Definition(template), end - offset))
}

/// Options Template Record variant of `parse_template_record`.
/// Withdrawals carry no scope count and use 4 bytes.
pub fn parse_options_template_record(
    registry: &dyn IeRegistry,
    buf: &[u8],
    offset: usize,
) -> Result<(TemplateRecord, usize)> {
    let template_id = read_u16(buf, offset).map_err(template_truncated)?;
    let field_count = read_u16(buf, offset + 2).map_err(template_truncated)?;
    if field_count == 0 {
        return Ok((withdrawal_for(OPTIONS_TEMPLATE_SET_ID, template_id)?, 4));
    }
    let scope_count = read_u16(buf, offset + 4).map_err(template_truncated)?;
    let (fields, end) =
        parse_field_specifiers(registry, buf, offset + 6, field_count).map_err(template_truncated)?;
    let template = Template::new_options(template_id, fields, scope_count)?;
    Ok((TemplateRecord::Definition(template), end - offset))
}

/// Withdrawal record for `template_id`; pass the set id (2 or 3) to withdraw
/// every template of that kind.
pub fn encode_withdrawal(template_id: u16, out: &mut Vec<u8>) {
    out.extend_from_slice(&template_id.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
}

/// One row per field, for inspecting a template by eye.
pub fn template_table(template: &Template) -> tabled::Table {
    let mut builder = Builder::new();
    builder.push_record(["#", "name", "pen", "num", "type", "length", "scope"]);
    for (i, ie) in template.fields.iter().enumerate() {
        let length = if ie.is_varlen() {
            "varlen".to_string()
        } else {
            ie.length.to_string()
        };
        builder.push_record([
            i.to_string(),
            ie.name.clone(),
            ie.pen.to_string(),
            ie.num.to_string(),
            ie.data_type.to_string(),
            length,
            (i < template.scope_count as usize).to_string(),
        ]);
    }
    let mut table = builder.build();
    table.with(Style::ascii_rounded());
    table
}
