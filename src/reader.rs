use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read};
use std::sync::Arc;

use log::{debug, warn};

use crate::error::{IpfixError, Result};
use crate::fields::FieldValue;
use crate::ie::{IeRegistry, InformationElement};
use crate::message::*;
use crate::records::DataRecord;
use crate::sessions::{Session, TemplateCache};
use crate::settings::{CollectorSettings, ErrorPolicy};
use crate::templates::Template;

type TemplateFilter = Box<dyn Fn(&Template) -> bool + Send + Sync>;

/// Decodes messages for one transport session.
pub struct Collector {
    session: Session,
    accept: Option<TemplateFilter>,
}

impl Collector {
    pub fn new(registry: Arc<dyn IeRegistry>) -> Self {
        Collector { session: Session::new(registry), accept: None }
    }

    pub fn with_settings(registry: Arc<dyn IeRegistry>, settings: &CollectorSettings) -> Self {
        let mut collector = Collector::new(registry);
        collector.session.set_check_sequence(settings.check_sequence);
        collector
    }

    /// Keeps only records whose template passes `filter`.
    pub fn accept_templates<F>(&mut self, filter: F)
    where
        F: Fn(&Template) -> bool + Send + Sync + 'static,
    {
        self.accept = Some(Box::new(filter));
    }

    /// Keeps only records whose template carries every one of `ies`.
    pub fn only_containing(&mut self, ies: Vec<Arc<InformationElement>>) {
        self.accept_templates(move |template| ies.iter().all(|ie| template.contains(ie)));
    }

    pub fn accept_all(&mut self) {
        self.accept = None;
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn templates(&self) -> Arc<TemplateCache> {
        self.session.templates()
    }

    pub fn sequence_errors(&self) -> u64 {
        self.session.sequence_errors()
    }

    /// Decodes one complete message; `buf` must hold exactly that message.
    pub fn decode_message(&mut self, buf: &[u8]) -> Result<DecodedMessage> {
        match &self.accept {
            Some(filter) => decode_message(&mut self.session, buf, &**filter),
            None => decode_message(&mut self.session, buf, &|_: &Template| true),
        }
    }

    pub fn reset(&mut self) {
        self.session.reset();
    }
}

/// Lazily decodes Data Records from a byte stream carrying back-to-back
/// messages. Errors are yielded in place; under `ErrorPolicy::Strict`, or
/// when framing is lost, iteration ends after the error.
pub struct MessageStreamReader<R: Read> {
    source: R,
    collector: Collector,
    policy: ErrorPolicy,
    chunk_size: usize,
    buffer: Vec<u8>,
    pending: VecDeque<Result<DataRecord>>,
    messages_read: u64,
    finished: bool,
}

impl<R: Read> MessageStreamReader<R> {
    pub fn new(source: R, collector: Collector, settings: &CollectorSettings) -> Self {
        MessageStreamReader {
            source,
            collector,
            policy: settings.error_policy,
            chunk_size: settings.read_chunk_size.max(1),
            buffer: Vec::new(),
            pending: VecDeque::new(),
            messages_read: 0,
            finished: false,
        }
    }

    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    pub fn collector_mut(&mut self) -> &mut Collector {
        &mut self.collector
    }

    pub fn messages_read(&self) -> u64 {
        self.messages_read
    }

    /// Gives back the collector so a reconnected source can resume with the
    /// same templates.
    pub fn into_collector(self) -> Collector {
        self.collector
    }

    //false at a clean end of stream
    fn fill(&mut self, want: usize) -> Result<bool> {
        let mut chunk = vec![0u8; self.chunk_size];
        while self.buffer.len() < want {
            match self.source.read(&mut chunk) {
                Ok(0) => return Ok(false),
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }

    /// Pulls the next whole message off the stream; `None` at a clean end.
    pub fn next_message(&mut self) -> Result<Option<Vec<u8>>> {
        if !self.fill(MESSAGE_HEADER_LENGTH)? {
            if self.buffer.is_empty() {
                return Ok(None);
            }
            return Err(IpfixError::Io(io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("stream ended {} bytes into a message header", self.buffer.len()),
            )));
        }
        //version and minimum length are checked before the length is trusted
        let length = MessageHeader::parse(&self.buffer[..MESSAGE_HEADER_LENGTH])?.length as usize;
        if !self.fill(length)? {
            return Err(IpfixError::Io(io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("stream ended inside a {length} byte message"),
            )));
        }
        let rest = self.buffer.split_off(length);
        let message = std::mem::replace(&mut self.buffer, rest);
        self.messages_read += 1;
        Ok(Some(message))
    }

    /// Projects each record onto `ies`, skipping templates that lack any of them.
    pub fn projected(
        mut self,
        ies: Vec<Arc<InformationElement>>,
    ) -> impl Iterator<Item = Result<Vec<Option<FieldValue>>>> {
        self.collector.only_containing(ies.clone());
        self.map(move |item| item.map(|record| record.project(&ies)))
    }
}

impl<R: Read> Iterator for MessageStreamReader<R> {
    type Item = Result<DataRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                if let Err(e) = &item {
                    match self.policy {
                        ErrorPolicy::Strict => {
                            self.pending.clear();
                            self.finished = true;
                        }
                        ErrorPolicy::BestEffort => warn!("skipping undecodable set: {e}"),
                    }
                }
                return Some(item);
            }
            if self.finished {
                return None;
            }

            let message = match self.next_message() {
                Ok(Some(message)) => message,
                Ok(None) => {
                    self.finished = true;
                    return None;
                }
                Err(e) => {
                    if e.is_fatal_to_stream() || self.policy == ErrorPolicy::Strict {
                        self.finished = true;
                    }
                    return Some(Err(e));
                }
            };
            //framing came from the header length, so a bad body only costs this message
            match self.collector.decode_message(&message) {
                Ok(decoded) => {
                    debug!(
                        "message {} from domain {}: {} records",
                        decoded.header.sequence_number,
                        decoded.header.domain_id,
                        decoded.data_record_count
                    );
                    self.pending.extend(decoded.items);
                }
                Err(e) => {
                    match self.policy {
                        ErrorPolicy::Strict => self.finished = true,
                        ErrorPolicy::BestEffort => warn!("dropping message {}: {e}", self.messages_read),
                    }
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Record iterator over a continuous message stream.
pub fn consume_stream<R: Read>(
    source: R,
    registry: Arc<dyn IeRegistry>,
    settings: &CollectorSettings,
) -> MessageStreamReader<R> {
    MessageStreamReader::new(source, Collector::with_settings(registry, settings), settings)
}
