//! Debounced, single-flight scheduling of list requests.
//!
//! Callers report "the query changed" or "refresh now"; the worker waits for
//! a quiet interval after the last change, then issues one request and
//! aborts whichever request was still in flight. Every issued request gets
//! a sequence number so a target can refuse to apply a response older than
//! one it already applied.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::domain::entities::query::FetchRequest;

#[async_trait]
pub trait FetchTarget: Send + Sync + 'static {
    /// Runs one request; returns a follow-up request to issue right away
    /// (for instance when the applied page turned out to be out of range).
    async fn fetch(&self, seq: u64, request: FetchRequest) -> Option<FetchRequest>;
}

#[derive(Debug)]
enum Trigger {
    Changed { id: u64, request: FetchRequest },
    Refresh { id: u64, request: FetchRequest },
}

impl Trigger {
    fn id(&self) -> u64 {
        match self {
            Trigger::Changed { id, .. } | Trigger::Refresh { id, .. } => *id,
        }
    }

    fn into_request(self) -> FetchRequest {
        match self {
            Trigger::Changed { request, .. } | Trigger::Refresh { request, .. } => request,
        }
    }
}

pub struct FetchScheduler {
    tx: mpsc::UnboundedSender<Trigger>,
    last_trigger: AtomicU64,
    settled: watch::Receiver<u64>,
    worker: JoinHandle<()>,
}

impl FetchScheduler {
    /// Spawns the worker on the current tokio runtime.
    pub fn spawn<T: FetchTarget>(target: Arc<T>, quiet: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (settled_tx, settled) = watch::channel(0_u64);
        let worker = tokio::spawn(run_worker(target, quiet, rx, settled_tx));

        Self {
            tx,
            last_trigger: AtomicU64::new(0),
            settled,
            worker,
        }
    }

    pub fn query_changed(&self, request: FetchRequest) {
        let id = self.next_id();
        self.submit(Trigger::Changed { id, request });
    }

    pub fn refresh_now(&self, request: FetchRequest) {
        let id = self.next_id();
        self.submit(Trigger::Refresh { id, request });
    }

    /// Resolves once every trigger issued so far has been answered
    /// (applied, discarded as stale, or failed).
    pub async fn settled(&self) {
        let target = self.last_trigger.load(Ordering::SeqCst);
        let mut settled = self.settled.clone();
        // The worker only drops its sender when it exits, which ends waiting too.
        let _ = settled.wait_for(|done| *done >= target).await;
    }

    fn next_id(&self) -> u64 {
        self.last_trigger.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn submit(&self, trigger: Trigger) {
        if self.tx.send(trigger).is_err() {
            debug!("fetch scheduler worker is gone; trigger dropped");
        }
    }
}

impl Drop for FetchScheduler {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run_worker<T: FetchTarget>(
    target: Arc<T>,
    quiet: Duration,
    mut rx: mpsc::UnboundedReceiver<Trigger>,
    settled_tx: watch::Sender<u64>,
) {
    let settled_tx = Arc::new(settled_tx);
    let issued = Arc::new(AtomicU64::new(0));
    let mut in_flight: Option<JoinHandle<()>> = None;

    while let Some(first) = rx.recv().await {
        let mut latest = first;

        if matches!(latest, Trigger::Changed { .. }) {
            loop {
                match tokio::time::timeout(quiet, rx.recv()).await {
                    Ok(Some(next)) => {
                        debug!(trigger = next.id(), "query changed again; debounce restarted");
                        let immediate = matches!(next, Trigger::Refresh { .. });
                        latest = next;
                        if immediate {
                            break;
                        }
                    }
                    Ok(None) => return,
                    Err(_) => break,
                }
            }
        }

        if let Some(previous) = in_flight.take() {
            if !previous.is_finished() {
                debug!("superseding in-flight request");
                previous.abort();
            }
        }

        let covers = latest.id();
        let request = latest.into_request();
        let target = Arc::clone(&target);
        let issued = Arc::clone(&issued);
        let settled_tx = Arc::clone(&settled_tx);

        in_flight = Some(tokio::spawn(async move {
            let mut next = Some(request);
            while let Some(request) = next.take() {
                let seq = issued.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(seq, query = %request.query_string(), "issuing list request");
                next = target.fetch(seq, request).await;
            }
            settled_tx.send_if_modified(|done| {
                if *done < covers {
                    *done = covers;
                    true
                } else {
                    false
                }
            });
        }));
    }
}
