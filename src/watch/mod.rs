//! Real-time watch: maintains a local ordered view of a target (one document
//! or a query) from a resumable listen stream, and emits consistent
//! snapshots with per-document change lists.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use async_lock::Mutex;
use log::{debug, warn};
use serde_json::Value as JsonValue;

use crate::api::query::QueryDefinition;
use crate::api::snapshot::{DocumentChange, DocumentChangeKind, DocumentSnapshot};
use crate::error::{internal_error, DocstoreError, DocstoreResult};
use crate::model::{DocumentKey, Timestamp};
use crate::remote::channel::{ListenStream, StreamingDatastore};
use crate::remote::listen::{encode_add_target, encode_remove_target, ListenTarget};
use crate::remote::serializer::ProtoSerializer;
use crate::util::runtime::spawn_detached;

pub mod backoff;
pub mod change;
pub mod document_set;

use backoff::ExponentialBackoff;
use change::{decode_watch_event, TargetChangeState, WatchEvent};
use document_set::{DocumentComparator, DocumentSet};

/// The single target id used on each listen stream. Streams are not
/// multiplexed; every subscription opens its own.
pub const WATCH_TARGET_ID: i32 = 0x1;

/// A consistent view of the target at one read time, plus the changes that
/// transform the previously emitted view into this one.
pub struct ViewSnapshot {
    pub documents: Vec<DocumentSnapshot>,
    pub changes: Vec<DocumentChange>,
    pub read_time: Timestamp,
}

pub type SnapshotCallback = Box<dyn FnMut(ViewSnapshot) + Send>;
pub type ErrorCallback = Box<dyn FnOnce(DocstoreError) + Send>;

enum WatchTarget {
    Document(DocumentKey),
    Query(QueryDefinition),
}

/// A configured watch, turned live by [`Watch::subscribe`].
pub struct Watch {
    streaming: Arc<dyn StreamingDatastore>,
    serializer: ProtoSerializer,
    target: WatchTarget,
    comparator: DocumentComparator,
}

impl Watch {
    pub fn for_document(
        streaming: Arc<dyn StreamingDatastore>,
        serializer: ProtoSerializer,
        key: DocumentKey,
    ) -> Self {
        Self {
            streaming,
            serializer,
            target: WatchTarget::Document(key),
            comparator: Arc::new(|left, right| left.key().cmp(right.key())),
        }
    }

    pub fn for_query(
        streaming: Arc<dyn StreamingDatastore>,
        serializer: ProtoSerializer,
        definition: QueryDefinition,
        comparator: DocumentComparator,
    ) -> Self {
        Self {
            streaming,
            serializer,
            target: WatchTarget::Query(definition),
            comparator,
        }
    }

    /// Starts streaming. `on_next` fires once per settled view, `on_error`
    /// at most once when the subscription dies; neither fires after
    /// [`ListenerRegistration::remove`].
    pub fn subscribe(self, on_next: SnapshotCallback, on_error: ErrorCallback) -> ListenerRegistration {
        let registration =
            ListenerRegistration::new(encode_remove_target(&self.serializer, WATCH_TARGET_ID));
        let mut session = WatchSession {
            streaming: self.streaming,
            serializer: self.serializer,
            target: self.target,
            cancelled: Arc::clone(&registration.cancelled),
            stream_slot: Arc::clone(&registration.stream_slot),
            on_next,
            doc_set: DocumentSet::new(self.comparator),
            change_map: BTreeMap::new(),
            current: false,
            has_pushed: false,
            force_push: false,
            resume_token: None,
            backoff: ExponentialBackoff::new(),
        };
        spawn_detached(async move {
            if let Err(err) = session.run().await {
                if !session.cancelled.load(AtomicOrdering::SeqCst) {
                    warn!("watch stream terminated: {err}");
                    (on_error)(err);
                }
            }
        });
        registration
    }
}

/// Handle to an active subscription. Dropping it does NOT stop the stream;
/// call [`Self::remove`].
pub struct ListenerRegistration {
    cancelled: Arc<AtomicBool>,
    stream_slot: Arc<Mutex<Option<Arc<dyn ListenStream>>>>,
    remove_frame: JsonValue,
}

impl ListenerRegistration {
    fn new(remove_frame: JsonValue) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            stream_slot: Arc::new(Mutex::new(None)),
            remove_frame,
        }
    }

    /// Stops the subscription. The target is detached best-effort before the
    /// stream closes. No callback fires after this returns, not even for
    /// failures already in flight.
    pub fn remove(&self) {
        self.cancelled.store(true, AtomicOrdering::SeqCst);
        let slot = Arc::clone(&self.stream_slot);
        let remove_frame = self.remove_frame.clone();
        spawn_detached(async move {
            if let Some(stream) = slot.lock().await.take() {
                let _ = stream.send(remove_frame).await;
                stream.close().await;
            }
        });
    }
}

enum StreamOutcome {
    /// Reconnect after backoff, replaying the resume token.
    Retry,
    /// Reconnect immediately with local state reset (filter mismatch).
    Restart,
    Terminal(DocstoreError),
    Cancelled,
}

struct WatchSession {
    streaming: Arc<dyn StreamingDatastore>,
    serializer: ProtoSerializer,
    target: WatchTarget,
    cancelled: Arc<AtomicBool>,
    stream_slot: Arc<Mutex<Option<Arc<dyn ListenStream>>>>,
    on_next: SnapshotCallback,

    /// The materialized view from the last emitted snapshot.
    doc_set: DocumentSet,
    /// Accumulated changes since the last snapshot; `None` is a tombstone.
    change_map: BTreeMap<DocumentKey, Option<DocumentSnapshot>>,
    current: bool,
    has_pushed: bool,
    force_push: bool,
    resume_token: Option<Vec<u8>>,
    backoff: ExponentialBackoff,
}

impl WatchSession {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::SeqCst)
    }

    async fn run(&mut self) -> DocstoreResult<()> {
        loop {
            if self.is_cancelled() {
                return Ok(());
            }

            let stream = match self.streaming.open_listen_stream().await {
                Ok(stream) => stream,
                Err(err) if err.is_retryable() => {
                    let delay = self.backoff.next_delay();
                    debug!("listen stream open failed, retrying in {delay:?}: {err}");
                    crate::util::runtime::sleep(delay).await;
                    continue;
                }
                Err(err) => return Err(err),
            };
            *self.stream_slot.lock().await = Some(Arc::clone(&stream));

            let outcome = self.run_stream(&stream).await;
            stream.close().await;
            self.stream_slot.lock().await.take();

            // Any restart must re-observe consistency before emitting.
            self.current = false;

            match outcome {
                StreamOutcome::Cancelled => return Ok(()),
                StreamOutcome::Terminal(err) => return Err(err),
                StreamOutcome::Restart => continue,
                StreamOutcome::Retry => {
                    let delay = self.backoff.next_delay();
                    debug!("listen stream lost, retrying in {delay:?}");
                    crate::util::runtime::sleep(delay).await;
                }
            }
        }
    }

    async fn run_stream(&mut self, stream: &Arc<dyn ListenStream>) -> StreamOutcome {
        let target = match &self.target {
            WatchTarget::Document(key) => {
                ListenTarget::for_document(&self.serializer, WATCH_TARGET_ID, key)
            }
            WatchTarget::Query(definition) => {
                ListenTarget::for_query(&self.serializer, WATCH_TARGET_ID, definition)
            }
        }
        .with_resume_token(self.resume_token.clone());

        if let Err(err) = stream.send(encode_add_target(&self.serializer, &target)).await {
            return if err.is_retryable() {
                StreamOutcome::Retry
            } else {
                StreamOutcome::Terminal(err)
            };
        }

        loop {
            if self.is_cancelled() {
                return StreamOutcome::Cancelled;
            }
            match stream.next().await {
                Some(Ok(frame)) => {
                    let event = match decode_watch_event(&self.serializer, &frame) {
                        Ok(event) => event,
                        // A frame we cannot interpret leaves the local view
                        // unreliable; give up instead of guessing.
                        Err(err) => return StreamOutcome::Terminal(err),
                    };
                    match self.handle_event(event) {
                        EventOutcome::Continue => {}
                        EventOutcome::Restart => return StreamOutcome::Restart,
                        EventOutcome::Terminal(err) => return StreamOutcome::Terminal(err),
                    }
                }
                Some(Err(err)) => {
                    if self.is_cancelled() {
                        return StreamOutcome::Cancelled;
                    }
                    return if err.is_retryable() {
                        StreamOutcome::Retry
                    } else {
                        StreamOutcome::Terminal(err)
                    };
                }
                None => {
                    if self.is_cancelled() {
                        return StreamOutcome::Cancelled;
                    }
                    // Clean server close: reconnect and resume.
                    return StreamOutcome::Retry;
                }
            }
        }
    }

    fn handle_event(&mut self, event: WatchEvent) -> EventOutcome {
        match event {
            WatchEvent::TargetChange(target_change) => {
                let affects_target = target_change.target_ids.is_empty()
                    || target_change.target_ids.contains(&WATCH_TARGET_ID);

                match target_change.state {
                    TargetChangeState::NoChange => {
                        if target_change.target_ids.is_empty() {
                            // A global no-change with a read time is the
                            // consistency marker for everything seen so far.
                            if let (true, Some(read_time)) = (self.current, target_change.read_time)
                            {
                                self.push_snapshot(read_time, target_change.resume_token.clone());
                            }
                        }
                    }
                    TargetChangeState::Add => {
                        if !target_change.target_ids.contains(&WATCH_TARGET_ID)
                            && !target_change.target_ids.is_empty()
                        {
                            return EventOutcome::Terminal(internal_error(
                                "Backend added an unexpected target id",
                            ));
                        }
                    }
                    TargetChangeState::Remove => {
                        let err = target_change
                            .cause
                            .unwrap_or_else(|| internal_error("Target was removed by the backend"));
                        return EventOutcome::Terminal(err);
                    }
                    TargetChangeState::Current => {
                        if affects_target {
                            self.current = true;
                            if let Some(read_time) = target_change.read_time {
                                self.push_snapshot(read_time, target_change.resume_token.clone());
                            }
                        }
                    }
                    TargetChangeState::Reset => {
                        if affects_target {
                            self.reset_docs();
                        }
                    }
                }

                if let Some(token) = target_change.resume_token {
                    if affects_target {
                        self.resume_token = Some(token);
                        // A fresh token means the stream is healthy.
                        self.backoff.reset();
                    }
                }
                EventOutcome::Continue
            }
            WatchEvent::DocumentChange {
                target_ids,
                removed_target_ids,
                document,
            } => {
                if target_ids.contains(&WATCH_TARGET_ID) {
                    self.change_map.insert(document.key().clone(), Some(document));
                } else if removed_target_ids.contains(&WATCH_TARGET_ID) {
                    self.change_map.insert(document.key().clone(), None);
                }
                EventOutcome::Continue
            }
            WatchEvent::DocumentDelete { key, .. } | WatchEvent::DocumentRemove { key, .. } => {
                self.change_map.insert(key, None);
                EventOutcome::Continue
            }
            WatchEvent::Filter { target_id, count } => {
                if target_id == WATCH_TARGET_ID && count as usize != self.current_size() {
                    debug!(
                        "existence filter mismatch (server {count}, local {}), restarting stream",
                        self.current_size()
                    );
                    self.reset_docs();
                    // The view must be retransmitted in full; the old resume
                    // token would skip it.
                    self.resume_token = None;
                    self.force_push = true;
                    return EventOutcome::Restart;
                }
                EventOutcome::Continue
            }
        }
    }

    /// The size the server's existence filter should agree with: the
    /// materialized view adjusted by pending adds and deletes.
    fn current_size(&self) -> usize {
        let mut size = self.doc_set.len() as isize;
        for (key, entry) in &self.change_map {
            let exists = self.doc_set.contains(key);
            match entry {
                Some(_) if !exists => size += 1,
                None if exists => size -= 1,
                _ => {}
            }
        }
        size.max(0) as usize
    }

    /// Marks the entire materialized view as pending deletion and drops
    /// resume state. Used for RESET and filter mismatches.
    fn reset_docs(&mut self) {
        self.change_map.clear();
        self.resume_token = None;
        for document in self.doc_set.documents() {
            self.change_map.insert(document.key().clone(), None);
        }
        self.current = false;
    }

    fn push_snapshot(&mut self, read_time: Timestamp, resume_token: Option<Vec<u8>>) {
        let applied = self.apply_changes();
        if !self.has_pushed || !applied.is_empty() || self.force_push {
            self.has_pushed = true;
            self.force_push = false;
            let documents = self
                .doc_set
                .documents()
                .iter()
                .map(|document| document.clone().with_read_time(read_time))
                .collect();
            let changes = applied
                .into_iter()
                .map(|change| DocumentChange {
                    kind: change.kind,
                    document: change.document.with_read_time(read_time),
                    old_index: change.old_index,
                    new_index: change.new_index,
                })
                .collect();
            if !self.is_cancelled() {
                (self.on_next)(ViewSnapshot {
                    documents,
                    changes,
                    read_time,
                });
            }
        }
        self.change_map.clear();
        if let Some(token) = resume_token {
            self.resume_token = Some(token);
        }
    }

    /// Folds the accumulated change map into the sorted view, producing the
    /// ordered change list: deletions first, then additions, then updates,
    /// each change recording the index it applied at.
    fn apply_changes(&mut self) -> Vec<DocumentChange> {
        let mut deletes: Vec<DocumentKey> = Vec::new();
        let mut adds: Vec<DocumentSnapshot> = Vec::new();
        let mut updates: Vec<DocumentSnapshot> = Vec::new();

        for (key, entry) in std::mem::take(&mut self.change_map) {
            match entry {
                None => {
                    if self.doc_set.contains(&key) {
                        deletes.push(key);
                    }
                }
                Some(document) => match self.doc_set.get(&key) {
                    Some(existing) => {
                        let unchanged = existing.update_time() == document.update_time()
                            && existing.map_value() == document.map_value();
                        if !unchanged {
                            updates.push(document);
                        }
                    }
                    None => adds.push(document),
                },
            }
        }

        // Sort each group under the view's order so replaying the change
        // list reproduces the final array deterministically.
        let comparator = Arc::clone(self.doc_set.comparator());
        deletes.sort_by(|a, b| {
            match (self.doc_set.get(a), self.doc_set.get(b)) {
                (Some(left), Some(right)) => comparator(left, right),
                _ => a.cmp(b),
            }
        });
        adds.sort_by(|a, b| comparator(a, b));
        updates.sort_by(|a, b| comparator(a, b));

        let mut applied = Vec::new();
        for key in deletes {
            if let Some((old_index, document)) = self.doc_set.remove(&key) {
                applied.push(DocumentChange {
                    kind: DocumentChangeKind::Removed,
                    document,
                    old_index: old_index as isize,
                    new_index: -1,
                });
            }
        }
        for document in adds {
            let new_index = self.doc_set.insert(document.clone());
            applied.push(DocumentChange {
                kind: DocumentChangeKind::Added,
                document,
                old_index: -1,
                new_index: new_index as isize,
            });
        }
        for document in updates {
            let Some((old_index, _)) = self.doc_set.remove(document.key()) else {
                continue;
            };
            let new_index = self.doc_set.insert(document.clone());
            applied.push(DocumentChange {
                kind: DocumentChangeKind::Modified,
                document,
                old_index: old_index as isize,
                new_index: new_index as isize,
            });
        }
        applied
    }
}

enum EventOutcome {
    Continue,
    Restart,
    Terminal(DocstoreError),
}
