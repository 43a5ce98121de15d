use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};
use tabled::{builder::Builder, settings::Style};

use crate::ie::IeRegistry;
use crate::templates::*;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateKey {
    pub session_id: u64,
    pub domain_id: u32,
    pub template_id: u16,
}

/// Active templates, shared between a session's decoder and anything that
/// wants to inspect them from another thread.
#[derive(Debug, Default)]
pub struct TemplateCache {
    templates: Mutex<HashMap<TemplateKey, Arc<Template>>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        TemplateCache::default()
    }

    fn locked(&self) -> MutexGuard<'_, HashMap<TemplateKey, Arc<Template>>> {
        //a panic elsewhere doesn't leave the map half-written
        self.templates.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Inserts or replaces; returns the definition that was replaced.
    pub fn insert(&self, key: TemplateKey, template: Arc<Template>) -> Option<Arc<Template>> {
        let previous = self.locked().insert(key, template);
        match &previous {
            Some(_) => debug!(
                "replaced template {} in domain {} (session {})",
                key.template_id, key.domain_id, key.session_id
            ),
            None => debug!(
                "added template {} in domain {} (session {})",
                key.template_id, key.domain_id, key.session_id
            ),
        }
        previous
    }

    pub fn get(&self, key: &TemplateKey) -> Option<Arc<Template>> {
        self.locked().get(key).cloned()
    }

    pub fn withdraw(&self, key: &TemplateKey) -> Option<Arc<Template>> {
        let removed = self.locked().remove(key);
        if removed.is_none() {
            debug!(
                "withdrawal of unknown template {} in domain {}",
                key.template_id, key.domain_id
            );
        }
        removed
    }

    /// Drops every template of the kind announced under `set_id` in one
    /// domain; returns how many went.
    pub fn withdraw_all(&self, session_id: u64, domain_id: u32, set_id: u16) -> usize {
        let mut templates = self.locked();
        let before = templates.len();
        templates.retain(|key, t| {
            !(key.session_id == session_id && key.domain_id == domain_id && t.native_set_id() == set_id)
        });
        before - templates.len()
    }

    pub fn clear(&self) {
        self.locked().clear();
    }

    pub fn len(&self) -> usize {
        self.locked().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locked().is_empty()
    }

    /// Snapshot of the active templates, sorted by key.
    pub fn snapshot(&self) -> Vec<(TemplateKey, Arc<Template>)> {
        let mut all: Vec<_> = self.locked().iter().map(|(k, t)| (*k, Arc::clone(t))).collect();
        all.sort_by_key(|(k, _)| *k);
        all
    }

    pub fn describe(&self) -> tabled::Table {
        let mut builder = Builder::new();
        builder.push_record(["session", "domain", "template", "kind", "fields", "min_length"]);
        for (key, template) in self.snapshot() {
            let kind = if template.is_options() { "options" } else { "data" };
            builder.push_record([
                key.session_id.to_string(),
                key.domain_id.to_string(),
                key.template_id.to_string(),
                kind.to_string(),
                template.fields.len().to_string(),
                template.min_record_length().to_string(),
            ]);
        }
        let mut table = builder.build();
        table.with(Style::ascii_rounded());
        table
    }
}

/// Decoding state for one transport session: the template cache and the
/// expected sequence number per observation domain.
pub struct Session {
    id: u64,
    registry: Arc<dyn IeRegistry>,
    templates: Arc<TemplateCache>,
    check_sequence: bool,
    next_sequence: HashMap<u32, u32>,
    sequence_errors: u64,
}

impl Session {
    pub fn new(registry: Arc<dyn IeRegistry>) -> Self {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        info!("opened IPFIX session {id}");
        Session {
            id,
            registry,
            templates: Arc::new(TemplateCache::new()),
            check_sequence: true,
            next_sequence: HashMap::new(),
            sequence_errors: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn registry(&self) -> &dyn IeRegistry {
        self.registry.as_ref()
    }

    pub fn templates(&self) -> Arc<TemplateCache> {
        Arc::clone(&self.templates)
    }

    pub fn set_check_sequence(&mut self, check: bool) {
        self.check_sequence = check;
    }

    pub fn sequence_errors(&self) -> u64 {
        self.sequence_errors
    }

    pub fn key(&self, domain_id: u32, template_id: u16) -> TemplateKey {
        TemplateKey { session_id: self.id, domain_id, template_id }
    }

    pub fn template(&self, domain_id: u32, template_id: u16) -> Option<Arc<Template>> {
        self.templates.get(&self.key(domain_id, template_id))
    }

    /// Applies a decoded Template Set record to the cache.
    pub fn apply(&self, domain_id: u32, record: TemplateRecord) {
        match record {
            TemplateRecord::Definition(template) => {
                let key = self.key(domain_id, template.id);
                self.templates.insert(key, Arc::new(template));
            }
            TemplateRecord::Withdrawal { template_id } => {
                self.templates.withdraw(&self.key(domain_id, template_id));
            }
            TemplateRecord::WithdrawAll { set_id } => {
                let count = self.templates.withdraw_all(self.id, domain_id, set_id);
                debug!("withdrew {count} templates of set {set_id} in domain {domain_id}");
            }
        }
    }

    /// Checks a message's sequence number against the records seen so far
    /// in its domain, then advances the expectation.
    pub fn observe_sequence(&mut self, domain_id: u32, sequence_number: u32, data_records: u32) {
        if self.check_sequence {
            if let Some(expected) = self.next_sequence.get(&domain_id) {
                if *expected != sequence_number {
                    warn!(
                        "sequence error in domain {domain_id}: expected {expected}, got {sequence_number}"
                    );
                    self.sequence_errors += 1;
                }
            }
        }
        self.next_sequence
            .insert(domain_id, sequence_number.wrapping_add(data_records));
    }

    /// Forgets all templates and sequence state, as on transport teardown.
    pub fn reset(&mut self) {
        info!("resetting IPFIX session {}", self.id);
        self.templates.clear();
        self.next_sequence.clear();
    }
}
