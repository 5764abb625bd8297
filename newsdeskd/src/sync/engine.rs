use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use newsdesk_core::{Article, Bookmark, BookmarkClient};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use super::connectivity::Connectivity;
use super::dispatcher::Dispatcher;
use super::queue::{
    DeleteTarget, DispatchOutcome, DrainReport, Operation, OperationPayload, OperationQueue,
};
use super::reconcile::{dedup_by_url, find_by_url, position_of, reconcile};
use super::state::{SyncSnapshot, SyncState, local_bookmark};
use crate::storage::{CacheStore, bookmarks_key, queue_key};

/// Handle to an optimistic add or remove.
///
/// The local change is already applied when the handle is returned; the remote
/// leg, if any, keeps running after the handle is dropped.
#[derive(Debug)]
pub struct Mutation {
    bookmark: Bookmark,
    queued: bool,
    task: Option<JoinHandle<DispatchOutcome>>,
}

impl Mutation {
    fn local(bookmark: Bookmark) -> Self {
        Self {
            bookmark,
            queued: false,
            task: None,
        }
    }

    fn queued(bookmark: Bookmark) -> Self {
        Self {
            bookmark,
            queued: true,
            task: None,
        }
    }

    fn in_flight(bookmark: Bookmark, task: JoinHandle<DispatchOutcome>) -> Self {
        Self {
            bookmark,
            queued: false,
            task: Some(task),
        }
    }

    pub fn bookmark(&self) -> &Bookmark {
        &self.bookmark
    }

    /// True when the mutation went straight to the queue without a network attempt.
    pub fn is_queued(&self) -> bool {
        self.queued
    }

    /// Waits for the remote leg. `None` when no request was made.
    pub async fn settled(self) -> Option<DispatchOutcome> {
        let task = self.task?;
        match task.await {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                tracing::warn!(error = %err, "bookmark dispatch task did not finish");
                None
            }
        }
    }
}

struct Session {
    generation: u64,
    dispatcher: Dispatcher,
    state: SyncState,
}

fn current(session: &mut Option<Session>, generation: u64) -> Option<&mut Session> {
    session
        .as_mut()
        .filter(|session| session.generation == generation)
}

struct EngineInner {
    cache: CacheStore,
    client: BookmarkClient,
    connectivity: Connectivity,
    session: Mutex<Option<Session>>,
    drain_gate: Mutex<()>,
    generation: AtomicU64,
    snapshot: watch::Sender<SyncSnapshot>,
}

/// Keeps one user's bookmarks consistent between the local cache and the
/// bookmark service.
///
/// No public operation fails: mutations apply locally right away and anything
/// the service could not take yet waits in the operation queue.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// `client` is used as a template; each session swaps in its own credential.
    pub fn new(cache: CacheStore, client: BookmarkClient, connectivity: Connectivity) -> Self {
        let (snapshot, _) = watch::channel(SyncSnapshot::default());
        Self {
            inner: Arc::new(EngineInner {
                cache,
                client,
                connectivity,
                session: Mutex::new(None),
                drain_gate: Mutex::new(()),
                generation: AtomicU64::new(0),
                snapshot,
            }),
        }
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.inner.connectivity
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn status(&self) -> SyncSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub async fn bookmarks(&self) -> Vec<Bookmark> {
        let guard = self.inner.session.lock().await;
        guard
            .as_ref()
            .map(|session| session.state.bookmarks.clone())
            .unwrap_or_default()
    }

    pub async fn pending(&self) -> Vec<Operation> {
        let guard = self.inner.session.lock().await;
        guard
            .as_ref()
            .map(|session| session.state.queue.to_vec())
            .unwrap_or_default()
    }

    pub async fn is_saved(&self, url: &str) -> bool {
        let guard = self.inner.session.lock().await;
        guard
            .as_ref()
            .is_some_and(|session| find_by_url(&session.state.bookmarks, url).is_some())
    }

    /// Starts (or restarts) the session for `user_id` from its cached state and
    /// reconciles with the service when it is reachable.
    pub async fn init_for_user(&self, user_id: &str, credential: &str) {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        {
            let mut guard = self.inner.session.lock().await;
            let mut state = SyncState::new(user_id);
            state.bookmarks = self.inner.cache.load_list(&bookmarks_key(user_id)).await;
            dedup_by_url(&mut state.bookmarks);
            state.queue =
                OperationQueue::from_vec(self.inner.cache.load_list(&queue_key(user_id)).await);
            tracing::info!(
                user_id,
                bookmarks = state.bookmarks.len(),
                pending = state.queue.len(),
                "bookmark session started"
            );

            self.inner.publish(&state);
            *guard = Some(Session {
                generation,
                dispatcher: Dispatcher::new(
                    self.inner.client.with_token(credential),
                    self.inner.connectivity.clone(),
                ),
                state,
            });
        }

        if self.inner.connectivity.is_online() {
            self.sync_with_server().await;
        }
    }

    /// Drops the live session. Cached slots stay so the next sign-in starts warm.
    pub async fn logout(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.inner.session.lock().await;
        if let Some(session) = guard.take() {
            tracing::info!(user_id = %session.state.user_id, "bookmark session closed");
        }
        self.inner.snapshot.send_replace(SyncSnapshot::default());
    }

    /// Saves `article`, or returns the existing bookmark for its url unchanged.
    /// `None` when no user is signed in.
    pub async fn add_bookmark(&self, article: Article) -> Option<Mutation> {
        let mut guard = self.inner.session.lock().await;
        let Some(session) = guard.as_mut() else {
            tracing::warn!(url = %article.url, "add_bookmark without an active session");
            return None;
        };
        if let Some(existing) = find_by_url(&session.state.bookmarks, &article.url) {
            return Some(Mutation::local(existing.clone()));
        }

        let bookmark = local_bookmark(&session.state.user_id, article);
        session.state.bookmarks.insert(0, bookmark.clone());
        self.inner.persist_bookmarks(&session.state).await;

        if !self.inner.can_dispatch(&session.state) {
            session.state.queue.enqueue(Operation::add(bookmark.clone()));
            self.inner.persist_queue(&session.state).await;
            self.inner.publish(&session.state);
            return Some(Mutation::queued(bookmark));
        }
        self.inner.publish(&session.state);

        let generation = session.generation;
        let dispatcher = session.dispatcher.clone();
        drop(guard);

        let inner = Arc::clone(&self.inner);
        let pending = bookmark.clone();
        let task = tokio::spawn(async move {
            let outcome = match dispatcher.create(&pending.article).await {
                Ok(record) => DispatchOutcome::Success(Some(record)),
                Err(err) => {
                    tracing::debug!(url = %pending.article.url, error = %err, "remote create failed");
                    err.outcome()
                }
            };
            inner.settle_add(generation, pending, &outcome).await;
            outcome
        });
        Some(Mutation::in_flight(bookmark, task))
    }

    /// Removes the bookmark whose id or url is `id_or_url`. `None` when there
    /// is no such bookmark.
    pub async fn remove_bookmark(&self, id_or_url: &str) -> Option<Mutation> {
        let mut guard = self.inner.session.lock().await;
        let session = guard.as_mut()?;
        let index = position_of(&session.state.bookmarks, id_or_url)?;

        let removed = session.state.bookmarks.remove(index);
        self.inner.persist_bookmarks(&session.state).await;
        let target = DeleteTarget::for_bookmark(&removed);

        if !self.inner.can_dispatch(&session.state) {
            session.state.queue.enqueue(Operation::delete(target));
            self.inner.persist_queue(&session.state).await;
            self.inner.publish(&session.state);
            return Some(Mutation::queued(removed));
        }
        session.state.deleting.push(target.clone());
        self.inner.publish(&session.state);

        let generation = session.generation;
        let dispatcher = session.dispatcher.clone();
        drop(guard);

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let outcome = match dispatcher.delete(&target).await {
                Ok(()) => DispatchOutcome::Success(None),
                Err(err) => {
                    tracing::debug!(?target, error = %err, "remote delete failed");
                    err.outcome()
                }
            };
            inner.settle_delete(generation, target, &outcome).await;
            outcome
        });
        Some(Mutation::in_flight(removed, task))
    }

    /// Replays the queue and then reconciles. Does nothing while offline.
    pub async fn flush_queue(&self) {
        if !self.inner.connectivity.is_online() {
            tracing::debug!("offline, queue flush skipped");
            return;
        }
        let _gate = self.inner.drain_gate.lock().await;
        self.inner.drain().await;
        self.inner.sync().await;
    }

    /// Pulls the remote list, merges it into the local one, pushes local-only
    /// bookmarks, and drains the queue.
    pub async fn sync_with_server(&self) {
        let _gate = self.inner.drain_gate.lock().await;
        self.inner.sync().await;
    }

    /// Asks the service whether it is reachable, ignoring the connectivity flag.
    pub async fn probe(&self) -> bool {
        Dispatcher::new(self.inner.client.clone(), self.inner.connectivity.clone())
            .probe()
            .await
    }
}

impl EngineInner {
    fn can_dispatch(&self, state: &SyncState) -> bool {
        self.connectivity.is_online() && !state.credential_rejected
    }

    fn publish(&self, state: &SyncState) {
        self.snapshot.send_replace(state.snapshot());
    }

    async fn persist_bookmarks(&self, state: &SyncState) {
        self.cache
            .store_list(&bookmarks_key(&state.user_id), &state.bookmarks)
            .await;
    }

    async fn persist_queue(&self, state: &SyncState) {
        self.cache
            .store_list(&queue_key(&state.user_id), &state.queue.to_vec())
            .await;
    }

    async fn settle_add(&self, generation: u64, bookmark: Bookmark, outcome: &DispatchOutcome) {
        let mut guard = self.session.lock().await;
        let Some(session) = current(&mut guard, generation) else {
            return;
        };
        let state = &mut session.state;
        match outcome {
            DispatchOutcome::Success(Some(record)) => {
                if state.promote(record.clone()) {
                    self.persist_bookmarks(state).await;
                } else {
                    // Removed locally while the create was in flight.
                    state
                        .queue
                        .enqueue(Operation::delete(DeleteTarget::Id(record.id.clone())));
                    self.persist_queue(state).await;
                }
            }
            DispatchOutcome::Success(None) | DispatchOutcome::AlreadySatisfied => {}
            DispatchOutcome::Rejected => {
                tracing::warn!(url = %bookmark.article.url, "server refused bookmark, rolling back");
                if state.roll_back_local(bookmark.url()) {
                    self.persist_bookmarks(state).await;
                }
            }
            DispatchOutcome::Retryable | DispatchOutcome::Fatal => {
                if *outcome == DispatchOutcome::Fatal {
                    state.credential_rejected = true;
                }
                let op = if find_by_url(&state.bookmarks, bookmark.url()).is_some() {
                    Operation::add(bookmark)
                } else {
                    Operation::delete(DeleteTarget::Url(bookmark.article.url))
                };
                state.queue.enqueue(op);
                self.persist_queue(state).await;
            }
        }
        self.publish(state);
    }

    async fn settle_delete(&self, generation: u64, target: DeleteTarget, outcome: &DispatchOutcome) {
        let mut guard = self.session.lock().await;
        let Some(session) = current(&mut guard, generation) else {
            return;
        };
        let state = &mut session.state;
        state.finish_delete(&target);
        if *outcome == DispatchOutcome::Rejected {
            tracing::warn!(?target, "server refused delete, dropping it");
        }
        if !matches!(outcome, DispatchOutcome::Retryable | DispatchOutcome::Fatal) {
            return;
        }
        if *outcome == DispatchOutcome::Fatal {
            state.credential_rejected = true;
        }
        // A url that was saved again since the removal must not be deleted by replay.
        let superseded = match &target {
            DeleteTarget::Url(url) => find_by_url(&state.bookmarks, url).is_some(),
            DeleteTarget::Id(_) => false,
        };
        if !superseded {
            state.queue.enqueue(Operation::delete(target));
            self.persist_queue(state).await;
        }
        self.publish(state);
    }

    /// One FIFO pass over the queue. Callers hold `drain_gate`.
    async fn drain(&self) -> Option<DrainReport> {
        let (generation, dispatcher, mut batch) = {
            let guard = self.session.lock().await;
            let session = guard.as_ref()?;
            if session.state.credential_rejected || session.state.queue.is_empty() {
                return None;
            }
            (
                session.generation,
                session.dispatcher.clone(),
                session.state.queue.clone(),
            )
        };
        let batch_len = batch.len();

        let report = batch
            .drain(|op| {
                let dispatcher = dispatcher.clone();
                let op = op.clone();
                async move { dispatcher.dispatch(&op).await }
            })
            .await;

        let mut guard = self.session.lock().await;
        let session = current(&mut guard, generation)?;
        let state = &mut session.state;
        state.queue.replace_front(batch_len, batch);
        for record in &report.confirmed {
            if !state.promote(record.clone()) {
                state
                    .queue
                    .enqueue(Operation::delete(DeleteTarget::Id(record.id.clone())));
            }
        }
        for op in &report.rejected {
            tracing::warn!(kind = ?op.kind(), url = ?op.url(), "server refused queued operation, dropped");
            if let OperationPayload::Add { bookmark } = &op.payload {
                state.roll_back_local(bookmark.url());
            }
        }
        if report.halted {
            tracing::warn!(user_id = %state.user_id, "credential rejected, queue paused");
            state.credential_rejected = true;
        }
        self.persist_bookmarks(state).await;
        self.persist_queue(state).await;
        self.publish(state);
        tracing::info!(
            resolved = report.resolved,
            rejected = report.rejected.len(),
            remaining = report.remaining,
            "drained pending bookmark operations"
        );
        Some(report)
    }

    /// Callers hold `drain_gate`.
    async fn sync(&self) {
        let (generation, dispatcher) = {
            let mut guard = self.session.lock().await;
            let Some(session) = guard.as_mut() else {
                return;
            };
            if session.state.credential_rejected {
                tracing::debug!("credential rejected, sync skipped");
                return;
            }
            session.state.loading = true;
            self.publish(&session.state);
            (session.generation, session.dispatcher.clone())
        };

        let mut remote = match dispatcher.list().await {
            Ok(remote) => remote,
            Err(err) => {
                tracing::warn!(error = %err, "bookmark sync failed");
                self.finish_loading(generation, err.outcome() == DispatchOutcome::Fatal)
                    .await;
                return;
            }
        };

        let backfill: Vec<Bookmark> = {
            let mut guard = self.session.lock().await;
            let Some(session) = current(&mut guard, generation) else {
                return;
            };
            let state = &mut session.state;
            // Records still being deleted must not come back through the merge.
            remote.retain(|record| !state.is_being_deleted(record));
            state.bookmarks = reconcile(&state.bookmarks, &remote);
            self.persist_bookmarks(state).await;
            self.publish(state);
            state
                .bookmarks
                .iter()
                .filter(|bookmark| bookmark.is_local() && !state.queue.has_pending_add(bookmark.url()))
                .cloned()
                .collect()
        };
        tracing::info!(
            remote = remote.len(),
            backfill = backfill.len(),
            "reconciled bookmarks with server"
        );

        for bookmark in backfill {
            let outcome = match dispatcher.create(&bookmark.article).await {
                Ok(record) => DispatchOutcome::Success(Some(record)),
                Err(err) => err.outcome(),
            };
            let fatal = outcome == DispatchOutcome::Fatal;
            self.settle_add(generation, bookmark, &outcome).await;
            if fatal {
                break;
            }
        }

        self.drain().await;
        self.finish_loading(generation, false).await;
    }

    async fn finish_loading(&self, generation: u64, credential_rejected: bool) {
        let mut guard = self.session.lock().await;
        if let Some(session) = current(&mut guard, generation) {
            session.state.loading = false;
            session.state.credential_rejected |= credential_rejected;
            self.publish(&session.state);
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
