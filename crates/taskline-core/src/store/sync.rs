//! Optimistic replica of one remote collection.
//!
//! Every mutation applies its local half synchronously inside the call and
//! hands back a [`Pending`] future for the remote half. Each mutation is
//! stamped with a sequence number drawn from a store-wide monotonic counter,
//! and only the newest number recorded for an id may write an outcome, so an
//! old response (success or failure) can never overwrite a newer edit no
//! matter the order in which responses arrive.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use futures::future::{self, BoxFuture};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::api::{ApiError, ApiResult, ErrorKind, Remote};
use crate::entity::Entity;

pub type Pending<T> = BoxFuture<'static, T>;

/// How an optimistic operation finally settled.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// The server accepted the change and the replica holds its answer.
    Confirmed(T),
    /// A newer mutation for the same id was issued first; this result was dropped.
    Superseded,
    /// The call was cancelled; nothing was rolled back or reported.
    Cancelled,
    /// The server call failed and the local change was undone.
    RolledBack(ApiError),
    /// Refused locally before any network call.
    Rejected,
}

impl<T> Outcome<T> {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed(_))
    }

    pub(crate) fn ready(self) -> Pending<Self>
    where
        T: Send + 'static,
    {
        future::ready(self).boxed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Uninitialized,
    Loading,
    Ready,
}

/// The single user-facing error slot of a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    pub kind: ErrorKind,
    pub message: String,
    /// Reachability at the time of the failure.
    pub offline: bool,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if self.offline {
            f.write_str(" (you appear to be offline)")?;
        }
        Ok(())
    }
}

/// Fixed user-facing messages, one per operation.
#[derive(Debug, Clone, Copy)]
pub struct Messages {
    pub load: &'static str,
    pub create: &'static str,
    pub update: &'static str,
    pub delete: &'static str,
}

#[derive(Debug)]
enum Snapshot<E> {
    Created,
    Updated(E),
    Deleted { entity: E, index: usize },
}

#[derive(Debug)]
struct PendingMutation<E> {
    id: String,
    snapshot: Snapshot<E>,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct State<E> {
    items: Vec<E>,
    load_state: LoadState,
    load_token: Option<CancellationToken>,
    mutated: bool,
    next_seq: u64,
    latest: HashMap<String, u64>,
    pending: HashMap<u64, PendingMutation<E>>,
    error: Option<StoreError>,
}

impl<E: Entity> State<E> {
    fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id() == id)
    }

    fn creating(&self, id: &str) -> bool {
        self.pending
            .values()
            .any(|m| m.id == id && matches!(m.snapshot, Snapshot::Created))
    }

    fn begin(&mut self, id: &str, snapshot: Snapshot<E>) -> (u64, CancellationToken) {
        self.next_seq += 1;
        let seq = self.next_seq;
        let cancel = CancellationToken::new();
        self.mutated = true;
        self.latest.insert(id.to_string(), seq);
        self.pending.insert(
            seq,
            PendingMutation {
                id: id.to_string(),
                snapshot,
                cancel: cancel.clone(),
            },
        );
        (seq, cancel)
    }

    /// Removes the pending record and reports whether `seq` is still the
    /// newest mutation for `id`. The newest entry is cleared once it settles.
    fn finish(&mut self, id: &str, seq: u64) -> (Option<PendingMutation<E>>, bool) {
        let mutation = self.pending.remove(&seq);
        let is_latest = self.latest.get(id) == Some(&seq);
        if is_latest {
            self.latest.remove(id);
        }
        (mutation, is_latest)
    }
}

pub struct SyncStore<E: Entity> {
    state: Arc<Mutex<State<E>>>,
    remote: Arc<dyn Remote<E>>,
    offline: Option<watch::Receiver<bool>>,
    messages: Messages,
}

impl<E: Entity> Clone for SyncStore<E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            remote: Arc::clone(&self.remote),
            offline: self.offline.clone(),
            messages: self.messages,
        }
    }
}

impl<E: Entity> SyncStore<E> {
    pub fn new(remote: Arc<dyn Remote<E>>, messages: Messages) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                items: Vec::new(),
                load_state: LoadState::Uninitialized,
                load_token: None,
                mutated: false,
                next_seq: 0,
                latest: HashMap::new(),
                pending: HashMap::new(),
                error: None,
            })),
            remote,
            offline: None,
            messages,
        }
    }

    /// Annotates recorded errors with the tracker's offline flag.
    pub fn with_offline(mut self, offline: watch::Receiver<bool>) -> Self {
        self.offline = Some(offline);
        self
    }

    pub fn items(&self) -> Vec<E> {
        self.state.lock().items.clone()
    }

    pub fn with_items<R>(&self, f: impl FnOnce(&[E]) -> R) -> R {
        f(&self.state.lock().items)
    }

    pub fn get(&self, id: &str) -> Option<E> {
        let state = self.state.lock();
        state.position(id).map(|idx| state.items[idx].clone())
    }

    pub fn load_state(&self) -> LoadState {
        self.state.lock().load_state
    }

    pub fn error(&self) -> Option<StoreError> {
        self.state.lock().error.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Cancels every in-flight mutation for `id`. Their outcomes settle as
    /// [`Outcome::Cancelled`] with no error recorded. Updates and deletes
    /// keep their optimistic state; a cancelled create drops its temporary
    /// entity, which would otherwise never receive a server id.
    pub fn cancel(&self, id: &str) {
        let state = self.state.lock();
        for mutation in state.pending.values().filter(|m| m.id == id) {
            mutation.cancel.cancel();
        }
    }

    pub fn is_offline(&self) -> bool {
        self.offline.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Issues the initial list call. Only the first activation of a store
    /// does anything; later calls return `None`.
    pub fn activate(&self) -> Option<Pending<()>> {
        let cancel = {
            let mut state = self.state.lock();
            if state.load_state != LoadState::Uninitialized {
                debug!(kind = E::KIND, state = ?state.load_state, "load already issued");
                return None;
            }
            let cancel = CancellationToken::new();
            state.load_state = LoadState::Loading;
            state.load_token = Some(cancel.clone());
            cancel
        };

        let store = self.clone();
        Some(async move { store.load(cancel).await }.boxed())
    }

    /// Cancels the outstanding load, if any.
    pub fn teardown(&self) {
        if let Some(cancel) = self.state.lock().load_token.take() {
            debug!(kind = E::KIND, "cancelling load");
            cancel.cancel();
        }
    }

    #[instrument(skip_all, fields(kind = E::KIND))]
    async fn load(self, cancel: CancellationToken) {
        let result = self.remote.list(&cancel).await;

        let mut state = self.state.lock();
        if cancel.is_cancelled() {
            debug!("load settled after cancellation; ignoring");
            return;
        }
        state.load_token = None;

        match result {
            Ok(items) => {
                if state.mutated {
                    warn!(
                        received = items.len(),
                        "collection changed before load settled; keeping local state"
                    );
                } else {
                    info!(count = items.len(), "collection loaded");
                    state.items = items;
                    state.error = None;
                }
                state.load_state = LoadState::Ready;
            }
            Err(err) if err.is_abort() => {
                debug!("load aborted");
            }
            Err(err) => {
                self.record(&mut state, &err, self.messages.load);
                state.load_state = LoadState::Ready;
            }
        }
    }

    /// Builds and inserts an optimistic entity from the current collection.
    /// `build` returning `None` rejects the create with no side effects.
    pub fn create_with(
        &self,
        draft: E::Draft,
        build: impl FnOnce(&[E]) -> Option<E>,
    ) -> Pending<Outcome<E>> {
        let (temp_id, seq, cancel) = {
            let mut state = self.state.lock();
            let Some(optimistic) = build(&state.items) else {
                debug!(kind = E::KIND, "create rejected");
                return Outcome::Rejected.ready();
            };
            let temp_id = optimistic.id().to_string();
            state.items.push(optimistic);
            let (seq, cancel) = state.begin(&temp_id, Snapshot::Created);
            debug!(kind = E::KIND, id = %temp_id, seq, "optimistic create");
            (temp_id, seq, cancel)
        };

        let store = self.clone();
        async move {
            let result = store.remote.create(&draft, &cancel).await;
            store.settle_create(&temp_id, seq, result, &cancel)
        }
        .boxed()
    }

    fn settle_create(
        &self,
        temp_id: &str,
        seq: u64,
        result: ApiResult<E>,
        cancel: &CancellationToken,
    ) -> Outcome<E> {
        let mut state = self.state.lock();
        state.finish(temp_id, seq);

        if cancel.is_cancelled() || matches!(&result, Err(err) if err.is_abort()) {
            if let Some(idx) = state.position(temp_id) {
                state.items.remove(idx);
            }
            debug!(kind = E::KIND, temp_id, "create cancelled");
            return Outcome::Cancelled;
        }

        match result {
            Ok(confirmed) => {
                state.error = None;
                match state.position(temp_id) {
                    Some(idx) => {
                        let entity = &mut state.items[idx];
                        entity.reconcile(confirmed);
                        info!(kind = E::KIND, temp_id, id = entity.id(), "create confirmed");
                        Outcome::Confirmed(entity.clone())
                    }
                    None => Outcome::Confirmed(confirmed),
                }
            }
            Err(err) => {
                // Never existed remotely, so rolling back means removing it.
                if let Some(idx) = state.position(temp_id) {
                    state.items.remove(idx);
                }
                self.record(&mut state, &err, self.messages.create);
                Outcome::RolledBack(err)
            }
        }
    }

    pub fn update(&self, id: &str, patch: E::Patch) -> Pending<Outcome<E>> {
        self.update_with(id, move |_| Some(patch))
    }

    /// Applies a patch derived from the current entity. Unknown ids, ids
    /// whose create is still in flight, and `None` patches are rejected.
    pub fn update_with(
        &self,
        id: &str,
        make_patch: impl FnOnce(&E) -> Option<E::Patch>,
    ) -> Pending<Outcome<E>> {
        let (patch, seq, cancel) = {
            let mut state = self.state.lock();
            let Some(idx) = state.position(id) else {
                debug!(kind = E::KIND, id, "update of unknown id");
                return Outcome::Rejected.ready();
            };
            if state.creating(id) {
                debug!(kind = E::KIND, id, "update while create in flight");
                return Outcome::Rejected.ready();
            }
            let Some(patch) = make_patch(&state.items[idx]) else {
                return Outcome::Rejected.ready();
            };

            let before = state.items[idx].clone();
            state.items[idx].apply_patch(&patch, Utc::now());
            let (seq, cancel) = state.begin(id, Snapshot::Updated(before));
            debug!(kind = E::KIND, id, seq, "optimistic update");
            (patch, seq, cancel)
        };

        let store = self.clone();
        let id = id.to_string();
        async move {
            let result = store.remote.update(&id, &patch, &cancel).await;
            store.settle_update(&id, seq, result, &cancel)
        }
        .boxed()
    }

    fn settle_update(
        &self,
        id: &str,
        seq: u64,
        result: ApiResult<E>,
        cancel: &CancellationToken,
    ) -> Outcome<E> {
        let mut state = self.state.lock();
        let (mutation, is_latest) = state.finish(id, seq);

        if cancel.is_cancelled() || matches!(&result, Err(err) if err.is_abort()) {
            return Outcome::Cancelled;
        }
        if !is_latest {
            debug!(kind = E::KIND, id, seq, ok = result.is_ok(), "update superseded");
            return Outcome::Superseded;
        }

        match result {
            Ok(confirmed) => {
                state.error = None;
                match state.position(id) {
                    Some(idx) => {
                        state.items[idx].reconcile(confirmed);
                        Outcome::Confirmed(state.items[idx].clone())
                    }
                    None => Outcome::Confirmed(confirmed),
                }
            }
            Err(err) => {
                if let Some(PendingMutation {
                    snapshot: Snapshot::Updated(before),
                    ..
                }) = mutation
                    && let Some(idx) = state.position(id)
                {
                    state.items[idx].revert_remote(before);
                }
                self.record(&mut state, &err, self.messages.update);
                Outcome::RolledBack(err)
            }
        }
    }

    pub fn delete(&self, id: &str) -> Pending<Outcome<()>> {
        let (seq, cancel) = {
            let mut state = self.state.lock();
            let Some(index) = state.position(id) else {
                debug!(kind = E::KIND, id, "delete of unknown id");
                return Outcome::Rejected.ready();
            };
            if state.creating(id) {
                debug!(kind = E::KIND, id, "delete while create in flight");
                return Outcome::Rejected.ready();
            }
            let entity = state.items.remove(index);
            let (seq, cancel) = state.begin(id, Snapshot::Deleted { entity, index });
            debug!(kind = E::KIND, id, seq, "optimistic delete");
            (seq, cancel)
        };

        let store = self.clone();
        let id = id.to_string();
        async move {
            let result = store.remote.delete(&id, &cancel).await;
            store.settle_delete(&id, seq, result, &cancel)
        }
        .boxed()
    }

    fn settle_delete(
        &self,
        id: &str,
        seq: u64,
        result: ApiResult<()>,
        cancel: &CancellationToken,
    ) -> Outcome<()> {
        let mut state = self.state.lock();
        let (mutation, is_latest) = state.finish(id, seq);

        if cancel.is_cancelled() || matches!(&result, Err(err) if err.is_abort()) {
            return Outcome::Cancelled;
        }
        if !is_latest {
            return Outcome::Superseded;
        }

        match result {
            Ok(()) => {
                state.error = None;
                info!(kind = E::KIND, id, "delete confirmed");
                Outcome::Confirmed(())
            }
            Err(err) => {
                if let Some(PendingMutation {
                    snapshot: Snapshot::Deleted { entity, index },
                    ..
                }) = mutation
                    && state.position(id).is_none()
                {
                    let index = index.min(state.items.len());
                    state.items.insert(index, entity);
                }
                self.record(&mut state, &err, self.messages.delete);
                Outcome::RolledBack(err)
            }
        }
    }

    /// Applies a patch to the replica only, with no remote call.
    pub fn patch_local(&self, id: &str, patch: &E::Patch) -> Option<E> {
        let mut state = self.state.lock();
        let idx = state.position(id)?;
        state.items[idx].apply_patch(patch, Utc::now());
        state.mutated = true;
        Some(state.items[idx].clone())
    }

    /// Rewrites the whole collection locally. `f` returns `None` to leave it
    /// untouched.
    pub fn rewrite_local(&self, f: impl FnOnce(&[E]) -> Option<Vec<E>>) -> bool {
        let mut state = self.state.lock();
        match f(&state.items) {
            Some(items) => {
                state.items = items;
                state.mutated = true;
                true
            }
            None => false,
        }
    }

    /// Records a failure that did not come from one of this store's own
    /// mutations, such as a precondition check.
    pub fn report(&self, err: &ApiError, message: &'static str) {
        let mut state = self.state.lock();
        self.record(&mut state, err, message);
    }

    fn record(&self, state: &mut State<E>, err: &ApiError, message: &'static str) {
        if err.is_abort() {
            return;
        }
        let offline = self.is_offline();
        warn!(kind = E::KIND, error = %err, offline, "{message}");
        state.error = Some(StoreError {
            kind: err.kind(),
            message: message.to_string(),
            offline,
        });
    }
}
