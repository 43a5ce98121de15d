use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::iter::Peekable;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info};

use crate::error::{IpfixError, Result};
use crate::fields::FieldValue;
use crate::ie::InformationElement;
use crate::message::{Appended, MessageBuilder};
use crate::records::values_from_names;
use crate::settings::{ExporterSettings, TemplateRefresh};
use crate::templates::*;
use crate::time::now_epoch_seconds;
use crate::utils::check_message_size;

/// Batches records into messages no larger than the configured maximum and
/// writes each finished message to `sink`.
///
/// Templates are announced in-band before their first use, and again as the
/// refresh policy asks. Sequence numbers count data records per domain.
pub struct MessageStreamWriter<W: Write> {
    sink: W,
    settings: ExporterSettings,
    domain_id: u32,
    templates: HashMap<(u32, u16), Arc<Template>>,
    announced: HashSet<(u32, u16)>,
    export_template: Option<Arc<Template>>,
    message: Option<MessageBuilder>,
    sequence: HashMap<u32, u32>,
    message_count: u64,
    records_since_refresh: u64,
    last_refresh: Instant,
}

impl<W: Write> MessageStreamWriter<W> {
    pub fn new(sink: W, settings: ExporterSettings) -> Result<Self> {
        check_message_size(settings.max_message_size)?;
        let domain_id = settings.domain_id;
        Ok(MessageStreamWriter {
            sink,
            settings,
            domain_id,
            templates: HashMap::new(),
            announced: HashSet::new(),
            export_template: None,
            message: None,
            sequence: HashMap::new(),
            message_count: 0,
            records_since_refresh: 0,
            last_refresh: Instant::now(),
        })
    }

    pub fn domain_id(&self) -> u32 {
        self.domain_id
    }

    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    /// Switches the observation domain for subsequent records. Templates are
    /// scoped per domain, so they have to be added again for a new one.
    pub fn set_domain(&mut self, domain_id: u32) -> Result<()> {
        if domain_id != self.domain_id {
            self.flush()?;
            self.domain_id = domain_id;
            self.export_template = None;
        }
        Ok(())
    }

    /// Makes a template available for export in the current domain. It goes
    /// on the wire ahead of the first record that uses it.
    pub fn add_template(&mut self, template: Template) {
        let key = (self.domain_id, template.id);
        if self.templates.insert(key, Arc::new(template)).is_some() {
            debug!("redefining template {} in domain {}", key.1, key.0);
        }
        self.announced.remove(&key);
        if self.export_template.as_ref().is_some_and(|t| t.id == key.1) {
            self.export_template = None;
        }
    }

    pub fn set_export_template(&mut self, template_id: u16) -> Result<()> {
        let template = self.templates.get(&(self.domain_id, template_id)).ok_or(
            IpfixError::UnknownTemplate { domain_id: self.domain_id, template_id },
        )?;
        self.export_template = Some(Arc::clone(template));
        Ok(())
    }

    pub fn withdraw_template(&mut self, template_id: u16) -> Result<()> {
        let key = (self.domain_id, template_id);
        let template = self
            .templates
            .remove(&key)
            .ok_or(IpfixError::UnknownTemplate { domain_id: self.domain_id, template_id })?;
        //never announced means the collector never heard of it
        if self.announced.remove(&key) {
            self.append_retrying(|message| message.append_withdrawal(template.native_set_id(), template_id))?;
        }
        if self.export_template.as_ref().is_some_and(|t| t.id == template_id) {
            self.export_template = None;
        }
        Ok(())
    }

    /// Withdraws every template in the current domain, both kinds.
    pub fn withdraw_all_templates(&mut self) -> Result<()> {
        for set_id in [TEMPLATE_SET_ID, OPTIONS_TEMPLATE_SET_ID] {
            self.append_retrying(|message| message.append_withdrawal(set_id, set_id))?;
        }
        let domain_id = self.domain_id;
        self.templates.retain(|(domain, _), _| *domain != domain_id);
        self.announced.retain(|(domain, _)| *domain != domain_id);
        self.export_template = None;
        Ok(())
    }

    fn current_message(&mut self) -> &mut MessageBuilder {
        let (domain_id, max_size) = (self.domain_id, self.settings.max_message_size);
        self.message.get_or_insert_with(|| MessageBuilder::new(domain_id, max_size))
    }

    //runs `append` on the current message, once more on a fresh one if it didn't fit
    fn append_retrying<F>(&mut self, append: F) -> Result<()>
    where
        F: Fn(&mut MessageBuilder) -> Appended,
    {
        if append(self.current_message()) == Appended::Written {
            return Ok(());
        }
        self.flush()?;
        match append(self.current_message()) {
            Appended::Written => Ok(()),
            Appended::NoRoom => Err(IpfixError::Encoding(format!(
                "set does not fit in a {} byte message",
                self.settings.max_message_size
            ))),
        }
    }

    fn refresh_due(&mut self) {
        let due = match self.settings.template_refresh {
            TemplateRefresh::Never | TemplateRefresh::EveryMessage => false,
            TemplateRefresh::Interval(interval) => self.last_refresh.elapsed() >= interval,
            TemplateRefresh::Records(count) => self.records_since_refresh >= count,
        };
        if due {
            debug!("template refresh due in domain {}", self.domain_id);
            self.announced.clear();
            self.records_since_refresh = 0;
            self.last_refresh = Instant::now();
        }
    }

    //true when no message can go out without the template in it
    fn repeats_template_each_message(&self) -> bool {
        match self.settings.template_refresh {
            TemplateRefresh::EveryMessage | TemplateRefresh::Records(0) => true,
            TemplateRefresh::Interval(interval) => interval.is_zero(),
            TemplateRefresh::Never | TemplateRefresh::Records(_) => false,
        }
    }

    //announces the export template if needed, then appends the record
    fn try_append(&mut self, template: &Arc<Template>, values: &[FieldValue]) -> Result<Appended> {
        let key = (self.domain_id, template.id);
        let announce = !self.announced.contains(&key);
        let message = self.current_message();
        if announce && message.append_template(template) == Appended::NoRoom {
            return Ok(Appended::NoRoom);
        }
        let appended = message.append_record(template, values);
        if announce {
            self.announced.insert(key);
        }
        if matches!(appended, Ok(Appended::Written)) {
            self.records_since_refresh += 1;
        }
        appended
    }

    fn active_template(&self) -> Result<Arc<Template>> {
        self.export_template
            .clone()
            .ok_or_else(|| IpfixError::Encoding("no export template set".to_string()))
    }

    /// Exports one record with values in template order.
    pub fn export_record(&mut self, values: &[FieldValue]) -> Result<()> {
        let template = self.active_template()?;
        self.refresh_due();
        if self.try_append(&template, values)? == Appended::Written {
            return Ok(());
        }
        self.flush()?;
        match self.try_append(&template, values)? {
            Appended::Written => Ok(()),
            Appended::NoRoom => Err(IpfixError::Encoding(format!(
                "record does not fit in a {} byte message",
                self.settings.max_message_size
            ))),
        }
    }

    /// Exports one record given as name to value; every template field must
    /// be present and extra names are ignored.
    pub fn export_namedict(&mut self, named: &HashMap<String, FieldValue>) -> Result<()> {
        let template = self.active_template()?;
        let values = values_from_names(&template, named)?;
        self.export_record(&values)
    }

    /// Exports one record whose values follow `ies` rather than template order.
    pub fn export_tuple(&mut self, values: &[FieldValue], ies: &[Arc<InformationElement>]) -> Result<()> {
        let template = self.active_template()?;
        let ordered = template
            .fields
            .iter()
            .map(|field| {
                ies.iter()
                    .position(|ie| ie.pen == field.pen && ie.num == field.num)
                    .and_then(|i| values.get(i).cloned())
                    .ok_or_else(|| {
                        IpfixError::Encoding(format!("no value for {} in template {}", field.name, template.id))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        self.export_record(&ordered)
    }

    /// Finishes the pending message, if any, and returns its bytes.
    fn take_message(&mut self) -> Option<Vec<u8>> {
        let message = self.message.take()?;
        if message.is_empty() {
            return None;
        }
        let domain_id = message.domain_id();
        let records = message.record_count();
        let sequence = self.sequence.entry(domain_id).or_insert(0);
        let sequence_number = *sequence;
        *sequence = sequence.wrapping_add(records);

        let export_time = self.settings.export_time.unwrap_or_else(now_epoch_seconds);
        let bytes = message.finish(export_time, sequence_number);
        self.message_count += 1;
        if self.settings.template_refresh == TemplateRefresh::EveryMessage {
            self.announced.clear();
        }
        debug!(
            "finished message {} for domain {domain_id}: {} bytes, {records} records",
            self.message_count,
            bytes.len()
        );
        Some(bytes)
    }

    /// Writes out the pending message now.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(bytes) = self.take_message() {
            self.sink.write_all(&bytes)?;
            self.sink.flush()?;
        }
        Ok(())
    }

    /// Fills one message from `records` using the export template and
    /// returns it without writing to the sink. Records that didn't fit stay
    /// in the iterator; `None` once the iterator is exhausted.
    pub fn produce_message<I>(&mut self, records: &mut Peekable<I>) -> Result<Option<Vec<u8>>>
    where
        I: Iterator<Item = Vec<FieldValue>>,
    {
        let template = self.active_template()?;
        let started_empty = self.message.as_ref().map_or(true, |m| m.is_empty());
        while let Some(values) = records.peek() {
            self.refresh_due();
            match self.try_append(&template, values) {
                Ok(Appended::Written) => {
                    records.next();
                }
                Ok(Appended::NoRoom) => {
                    let (written, has_records) = self
                        .message
                        .as_ref()
                        .map_or((false, false), |m| (!m.is_empty(), m.record_count() > 0));
                    //a template-only message goes out alone unless every message must repeat it
                    let template_only = written && !self.repeats_template_each_message();
                    if !started_empty || has_records || template_only {
                        break;
                    }
                    records.next();
                    return Err(IpfixError::Encoding(format!(
                        "record does not fit in a {} byte message",
                        self.settings.max_message_size
                    )));
                }
                Err(e) => {
                    records.next();
                    return Err(e);
                }
            }
        }
        Ok(self.take_message())
    }

    /// Flushes and hands back the sink.
    pub fn into_inner(mut self) -> Result<W> {
        self.flush()?;
        info!("closing exporter after {} messages", self.message_count);
        Ok(self.sink)
    }
}
