//! Live subscription that survives the store refusing an ordered query.
//!
//! Each subscription starts with the caller's ordered (indexed) query. If
//! the store answers with a failed-precondition error, the primary listener
//! is released and, after a short delay, an unordered listener over the same
//! collection and filters takes over; its snapshots are sorted client-side
//! so callers cannot tell the two apart. The switch happens at most once.
//!
//! Every emission goes through a gate guarded by a monotonic cancelled flag,
//! so nothing reaches the result channel once [`SubscriptionHandle::cancel`]
//! has returned, whatever is still in flight on the store side.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::store::{
    sort_documents, CollectionQuery, DocumentStore, Snapshot, SnapshotStream, StoreError,
    StoreErrorCode,
};
use crate::suppression;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionSettings {
    pub fallback_delay: Duration,
    pub fallback_timeout: Duration,
    pub read_timeout: Duration,
    pub retry_interval: Duration,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SubscriptionSettings {
    fn from(config: &Config) -> Self {
        Self {
            fallback_delay: config.fallback_delay(),
            fallback_timeout: config.fallback_timeout(),
            read_timeout: config.read_timeout(),
            retry_interval: config.retry_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    Primary = 0,
    Secondary = 1,
}

struct Gate {
    cancelled: AtomicBool,
    emission: Mutex<()>,
    mode: AtomicU8,
}

impl Gate {
    fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            emission: Mutex::new(()),
            mode: AtomicU8::new(QueryMode::Primary as u8),
        }
    }

    /// Runs `emit` only while open. Holding the emission lock across the
    /// check and the send is what makes `close` a hard barrier.
    fn pass(&self, emit: impl FnOnce()) -> bool {
        let _guard = self.emission.lock().unwrap_or_else(PoisonError::into_inner);
        if self.cancelled.load(Ordering::Acquire) {
            return false;
        }
        emit();
        true
    }

    fn close(&self) {
        let _guard = self.emission.lock().unwrap_or_else(PoisonError::into_inner);
        self.cancelled.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Idempotent cancellation for one subscription. Cloneable.
#[derive(Clone)]
pub struct SubscriptionHandle {
    gate: Arc<Gate>,
    token: CancellationToken,
}

impl SubscriptionHandle {
    /// Stops all emissions before returning and releases whichever store
    /// listener is open, along with any pending fallback timer.
    pub fn cancel(&self) {
        self.gate.close();
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.gate.is_closed()
    }

    pub fn mode(&self) -> QueryMode {
        match self.gate.mode.load(Ordering::Acquire) {
            0 => QueryMode::Primary,
            _ => QueryMode::Secondary,
        }
    }
}

pub struct Subscription {
    pub results: mpsc::UnboundedReceiver<Snapshot>,
    pub errors: mpsc::UnboundedReceiver<StoreError>,
    pub handle: SubscriptionHandle,
}

struct Emitter {
    collection: String,
    gate: Arc<Gate>,
    results: mpsc::UnboundedSender<Snapshot>,
    errors: mpsc::UnboundedSender<StoreError>,
}

impl Emitter {
    fn emit(&self, snapshot: Snapshot) {
        let count = snapshot.len();
        let delivered = self.gate.pass(|| {
            let _ = self.results.send(snapshot);
        });
        if !delivered {
            debug!(collection = %self.collection, count, "dropped snapshot after cancellation");
        }
    }

    /// Routes a store error: suppressed assertions and missing-index errors
    /// stay internal, everything else goes to the caller.
    fn report(&self, err: StoreError) {
        if suppression::should_suppress(&err) {
            debug!(collection = %self.collection, error = %err, "suppressed internal store assertion");
            return;
        }
        if err.is_failed_precondition() {
            info!(collection = %self.collection, error = %err, "store rejected query shape");
            return;
        }
        warn!(collection = %self.collection, error = %err, "store error on subscription");
        self.gate.pass(|| {
            let _ = self.errors.send(err);
        });
    }

    fn set_mode(&self, mode: QueryMode) {
        self.gate.mode.store(mode as u8, Ordering::Release);
    }

    fn receiver_gone(&self) -> bool {
        self.results.is_closed()
    }
}

/// Start a resilient subscription for `query`. Must be called inside a
/// tokio runtime; the listener runs on its own task until cancelled.
pub fn subscribe(
    store: Arc<dyn DocumentStore>,
    query: CollectionQuery,
    settings: SubscriptionSettings,
) -> Subscription {
    let (results_tx, results) = mpsc::unbounded_channel();
    let (errors_tx, errors) = mpsc::unbounded_channel();
    let gate = Arc::new(Gate::new());
    let token = CancellationToken::new();

    let emitter = Emitter {
        collection: query.collection.clone(),
        gate: gate.clone(),
        results: results_tx,
        errors: errors_tx,
    };
    let handle = SubscriptionHandle { gate, token };

    let task_token = handle.token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = task_token.cancelled() => {
                debug!(collection = %emitter.collection, "subscription cancelled");
            }
            _ = run(store, query, settings, &emitter) => {}
        }
    });

    Subscription {
        results,
        errors,
        handle,
    }
}

enum PrimaryOutcome {
    Closed,
    NeedsFallback(StoreError),
}

async fn run(
    store: Arc<dyn DocumentStore>,
    query: CollectionQuery,
    settings: SubscriptionSettings,
    emitter: &Emitter,
) {
    let rejection = match run_primary(store.as_ref(), &query, &settings, emitter).await {
        PrimaryOutcome::Closed => return,
        PrimaryOutcome::NeedsFallback(err) => err,
    };

    info!(
        collection = %query.collection,
        error = %rejection,
        delay = ?settings.fallback_delay,
        "primary query unavailable, falling back to unordered listener"
    );
    sleep(settings.fallback_delay).await;
    emitter.set_mode(QueryMode::Secondary);
    run_secondary(store.as_ref(), &query, &settings, emitter).await;
}

async fn run_primary(
    store: &dyn DocumentStore,
    query: &CollectionQuery,
    settings: &SubscriptionSettings,
    emitter: &Emitter,
) -> PrimaryOutcome {
    loop {
        let mut stream = match store.subscribe(query).await {
            Ok(stream) => stream,
            Err(err) if err.is_failed_precondition() => return PrimaryOutcome::NeedsFallback(err),
            Err(err) => {
                emitter.report(err);
                sleep(settings.retry_interval).await;
                continue;
            }
        };
        debug!(%query, "primary listener open");

        while let Some(item) = stream.next().await {
            if emitter.receiver_gone() {
                return PrimaryOutcome::Closed;
            }
            match item {
                Ok(snapshot) => emitter.emit(snapshot),
                Err(err) if err.is_failed_precondition() => {
                    // Dropping the stream releases the primary listener before the
                    // secondary opens, so no stale primary snapshot can follow.
                    drop(stream);
                    return PrimaryOutcome::NeedsFallback(err);
                }
                Err(err) => emitter.report(err),
            }
        }
        if emitter.receiver_gone() {
            return PrimaryOutcome::Closed;
        }
        info!(collection = %query.collection, "primary listener closed by store, reopening");
        sleep(settings.retry_interval).await;
    }
}

async fn run_secondary(
    store: &dyn DocumentStore,
    primary: &CollectionQuery,
    settings: &SubscriptionSettings,
    emitter: &Emitter,
) {
    let secondary = primary.without_ordering();
    loop {
        let mut stream = match open_with_timeout(store, &secondary, settings.fallback_timeout).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(collection = %secondary.collection, error = %err, "secondary listener failed to open");
                emitter.report(err);
                emitter.emit(Vec::new());
                sleep(settings.retry_interval).await;
                continue;
            }
        };
        debug!(query = %secondary, "secondary listener open");

        // Set once the caller already holds the empty fail-open result.
        let mut degraded = false;
        while let Some(item) = stream.next().await {
            if emitter.receiver_gone() {
                return;
            }
            match item {
                Ok(mut snapshot) => {
                    if let Some(order) = &primary.order_by {
                        sort_documents(&mut snapshot, order);
                    }
                    emitter.emit(snapshot);
                    degraded = false;
                }
                Err(err) if suppression::should_suppress(&err) => emitter.report(err),
                Err(err) => {
                    emitter.report(err);
                    emitter.emit(Vec::new());
                    degraded = true;
                }
            }
        }
        if emitter.receiver_gone() {
            return;
        }
        warn!(collection = %secondary.collection, "secondary listener closed by store, reopening");
        if !degraded {
            emitter.emit(Vec::new());
        }
        sleep(settings.retry_interval).await;
    }
}

async fn open_with_timeout(
    store: &dyn DocumentStore,
    query: &CollectionQuery,
    limit: Duration,
) -> Result<SnapshotStream, StoreError> {
    timeout(limit, store.subscribe(query))
        .await
        .unwrap_or_else(|_| Err(deadline(query, limit)))
}

fn deadline(query: &CollectionQuery, limit: Duration) -> StoreError {
    StoreError::new(
        StoreErrorCode::DeadlineExceeded,
        format!("{} did not answer within {:?}", query.collection, limit),
    )
}

/// One-shot read with the same primary-then-unordered fallback.
pub async fn read_once(
    store: &dyn DocumentStore,
    query: &CollectionQuery,
    settings: &SubscriptionSettings,
) -> Result<Snapshot, StoreError> {
    let primary = timeout(settings.read_timeout, store.query(query))
        .await
        .unwrap_or_else(|_| Err(deadline(query, settings.read_timeout)));

    match primary {
        Err(err) if err.is_failed_precondition() => {
            info!(collection = %query.collection, error = %err, "falling back to unordered read");
            sleep(settings.fallback_delay).await;
            let secondary = query.without_ordering();
            let mut snapshot = timeout(settings.fallback_timeout, store.query(&secondary))
                .await
                .unwrap_or_else(|_| Err(deadline(&secondary, settings.fallback_timeout)))?;
            if let Some(order) = &query.order_by {
                sort_documents(&mut snapshot, order);
            }
            Ok(snapshot)
        }
        other => other,
    }
}
