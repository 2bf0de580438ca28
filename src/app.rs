//! The application context.
//!
//! One [`Application`] owns everything a project needs: the record ledger,
//! the subject hierarchy, the record types, the connection registry, and the
//! queue that transport threads post records to. Components get what they
//! need from it explicitly; nothing is global.

use crate::codec;
use crate::config::LedgerConfig;
use crate::connections::{Connections, Inbound, TransportFactory};
use crate::error::Result;
use crate::events::{EventHandle, Listeners};
use crate::ledger::{FilteredLedgerView, RecordLedger, RecordSource};
use crate::marshal::{marshaller_for, Marshaller, Message};
use crate::matchers::{Matcher, MatcherRegistry};
use crate::project::ProjectSnapshot;
use crate::record_types::{RecordTypes, ERROR_TYPE_NAME};
use crate::subjects::{self, SubjectHierarchy};
use crate::types::{Record, SequenceGenerator};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Project lifecycle notifications.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApplicationEvent {
    ProjectOpened(PathBuf),
    /// Sent before anything is torn down. Hierarchy listeners must
    /// resubscribe afterwards since the tree is replaced.
    ProjectClosing,
    LedgerCleared,
}

/// Owns the ledger, hierarchy, record types and connections of one project.
pub struct Application {
    config: LedgerConfig,
    sequence: Arc<SequenceGenerator>,
    marshaller: Arc<dyn Marshaller>,
    matchers: MatcherRegistry,
    record_types: Arc<RecordTypes>,
    ledger: Arc<RecordLedger>,
    hierarchy: SubjectHierarchy,
    connections: Connections,
    inbound_sender: Sender<Arc<Record>>,
    inbound: Receiver<Arc<Record>>,
    listeners: Listeners<ApplicationEvent>,
    project_path: Option<PathBuf>,
}

impl Application {
    pub fn new(config: LedgerConfig, transports: Arc<dyn TransportFactory>) -> Self {
        let buffer_size = config.event_buffer_size;
        let sequence = Arc::new(SequenceGenerator::new());
        let marshaller = marshaller_for(config.encoding);

        let (inbound_sender, inbound) = match config.inbound_capacity {
            Some(capacity) => bounded(capacity),
            None => unbounded(),
        };

        let connections = Connections::with_buffer_size(
            transports,
            Inbound {
                sequence: sequence.clone(),
                marshaller: marshaller.clone(),
                sender: inbound_sender.clone(),
            },
            buffer_size,
        );

        Self {
            sequence,
            marshaller,
            matchers: MatcherRegistry::new(),
            record_types: Arc::new(RecordTypes::with_buffer_size(buffer_size)),
            ledger: Arc::new(RecordLedger::with_buffer_size(buffer_size)),
            hierarchy: SubjectHierarchy::with_buffer_size(buffer_size),
            connections,
            inbound_sender,
            inbound,
            listeners: Listeners::with_buffer_size(buffer_size),
            project_path: None,
            config,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn sequence(&self) -> &Arc<SequenceGenerator> {
        &self.sequence
    }

    pub fn marshaller(&self) -> &Arc<dyn Marshaller> {
        &self.marshaller
    }

    pub fn matchers(&self) -> &MatcherRegistry {
        &self.matchers
    }

    pub fn record_types(&self) -> &Arc<RecordTypes> {
        &self.record_types
    }

    pub fn ledger(&self) -> &Arc<RecordLedger> {
        &self.ledger
    }

    pub fn hierarchy(&self) -> &SubjectHierarchy {
        &self.hierarchy
    }

    pub fn hierarchy_mut(&mut self) -> &mut SubjectHierarchy {
        &mut self.hierarchy
    }

    pub fn connections(&self) -> &Connections {
        &self.connections
    }

    pub fn project_path(&self) -> Option<&Path> {
        self.project_path.as_deref()
    }

    pub fn subscribe(&self) -> EventHandle<ApplicationEvent> {
        self.listeners.subscribe()
    }

    /// Where records built outside the owning thread should be posted.
    pub fn inbound_sender(&self) -> Sender<Arc<Record>> {
        self.inbound_sender.clone()
    }

    /// Wrap a message with this project's sequence and marshaller.
    pub fn record(&self, message: Message) -> Result<Arc<Record>> {
        Ok(Arc::new(Record::new(
            &self.sequence,
            &*self.marshaller,
            message,
            None,
        )?))
    }

    // --- Record intake ---

    /// File every record waiting in the inbound queue. Call from the thread
    /// that owns the application.
    ///
    /// Records numbered before the last ledger clear are dropped.
    pub fn pump(&mut self) -> usize {
        let epoch = self.sequence.epoch();
        let (pending, stale): (Vec<Arc<Record>>, Vec<Arc<Record>>) = self
            .inbound
            .try_iter()
            .partition(|record| record.epoch() == epoch);
        if !stale.is_empty() {
            debug!(count = stale.len(), "dropped records from a cleared ledger");
        }
        self.ingest_all(pending)
    }

    fn discard_inbound(&self) {
        while self.inbound.try_recv().is_ok() {}
    }

    /// File one record into the hierarchy and append it to the ledger.
    pub fn ingest(&mut self, record: Arc<Record>) {
        self.file(&record);
        self.ledger.add(record);
    }

    /// Like [`ingest`](Self::ingest) for a batch, with a single ledger
    /// notification.
    pub fn ingest_all(&mut self, records: Vec<Arc<Record>>) -> usize {
        if records.is_empty() {
            return 0;
        }
        for record in &records {
            self.file(record);
        }
        let count = records.len();
        self.ledger.add_all(records);
        debug!(count, "ingested records");
        count
    }

    fn file(&mut self, record: &Record) {
        let node = self.hierarchy.record_arrived(record);
        if self.record_types.first_matching_type(record).name() == ERROR_TYPE_NAME {
            self.hierarchy.set_error_here(node);
        }
    }

    /// Drop every record, zero the subject counters and restart sequence
    /// numbering.
    pub fn clear_ledger(&mut self) {
        self.discard_inbound();
        self.ledger.clear();
        self.hierarchy.reset();
        self.sequence.reset();
        self.listeners.broadcast(ApplicationEvent::LedgerCleared);
    }

    /// Remove empty subjects, once or until none remain per config.
    pub fn prune_subjects(&mut self) -> usize {
        if self.config.recursive_prune {
            self.hierarchy.prune_empty_recursive()
        } else {
            self.hierarchy.prune_empty()
        }
    }

    // --- Views ---

    /// A live view of the ledger honouring record type selection.
    pub fn filtered_view(&self) -> FilteredLedgerView {
        FilteredLedgerView::new(self.ledger_source(), Some(self.record_types.clone()))
    }

    /// A frozen view of the records currently matching `matcher` whose record
    /// type is selected.
    pub fn search(&self, matcher: Arc<dyn Matcher>) -> FilteredLedgerView {
        FilteredLedgerView::snapshot_of(
            self.ledger_source(),
            Some(self.record_types.clone()),
            matcher,
        )
    }

    fn ledger_source(&self) -> Arc<dyn RecordSource> {
        self.ledger.clone()
    }

    // --- Projects ---

    /// Replace the current project with the one stored at `path`.
    ///
    /// The file is read and validated first; on error the current project
    /// is left as it was.
    pub fn open_project(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let snapshot = ProjectSnapshot::load(path)?;

        // Validate against scratch state before closing anything.
        RecordTypes::new().load(&snapshot.record_types, &self.matchers)?;
        for descriptor in &snapshot.connections {
            for subject in &descriptor.subjects {
                subjects::validate(subject, true)?;
            }
        }

        self.close_project();
        self.record_types
            .load(&snapshot.record_types, &self.matchers)?;
        let added = self.connections.load(&snapshot.connections)?;

        if self.config.start_connections_on_open {
            self.connections.start_all()?;
        }

        info!(path = %path.display(), connections = added, "project opened");
        self.project_path = Some(path.to_path_buf());
        self.listeners
            .broadcast(ApplicationEvent::ProjectOpened(path.to_path_buf()));
        Ok(())
    }

    pub fn snapshot(&self) -> ProjectSnapshot {
        ProjectSnapshot::new(self.connections.descriptors(), self.record_types.descriptors())
    }

    /// Write the current project to `path` (which becomes the project path).
    pub fn save_project(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.snapshot().save(path)?;
        self.project_path = Some(path.to_path_buf());
        Ok(())
    }

    /// Stop and drop every connection, clear the ledger, and start from a
    /// fresh hierarchy and the default record types.
    pub fn close_project(&mut self) {
        self.listeners.broadcast(ApplicationEvent::ProjectClosing);

        self.connections.clear();
        // Anything still queued belongs to the old project.
        self.discard_inbound();

        self.ledger.clear();
        self.hierarchy = SubjectHierarchy::with_buffer_size(self.config.event_buffer_size);
        self.record_types.reset();
        self.sequence.reset();
        self.project_path = None;
        info!("project closed");
    }

    // --- Interchange ---

    /// Encode records for the clipboard.
    pub fn copy_records(&self, records: &[Arc<Record>]) -> Result<Vec<u8>> {
        codec::encode_records(records, &*self.marshaller)
    }

    /// Decode and ingest records from the clipboard. Nothing is ingested if
    /// the bytes are malformed.
    pub fn paste_records(&mut self, bytes: &[u8]) -> Result<usize> {
        let records = codec::decode(bytes, &*self.marshaller, &self.sequence, &self.connections)?;
        Ok(self.ingest_all(records))
    }

    pub fn export_records(&self, path: impl AsRef<Path>, records: &[Arc<Record>]) -> Result<()> {
        codec::export_to_file(path, records, &*self.marshaller)
    }

    pub fn import_records(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let records =
            codec::import_from_file(path, &*self.marshaller, &self.sequence, &self.connections)?;
        Ok(self.ingest_all(records))
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        self.connections.stop_all();
    }
}
