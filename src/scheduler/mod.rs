//! The request-coalescing scheduler.
//!
//! Grounded on the teacher's `BatchProcessor` in
//! `optimization/batch_processor.rs`: requests are pushed into a shared,
//! lock-guarded queue; a background `tokio::spawn`ed task periodically
//! drains it and hands the batch to a pluggable handler; each submitter
//! gets its own `oneshot` rendezvous. This module generalises that shape
//! to the spec's stronger requirements: batches are keyed by a parameter
//! fingerprint rather than size alone, exactly one batch is dispatched
//! per tick (not "whatever accumulated"), and insertion order is
//! preserved both within a batch and across the batch table.

pub mod params;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::error::SchedulerError;
use crate::upstream::Upstream;
use params::{Fingerprint, SharedParams};

/// One outstanding client request, waiting on its slice of a future
/// upstream response.
struct PendingWaiter {
    prompt: String,
    result_tx: oneshot::Sender<Result<Vec<serde_json::Value>, SchedulerError>>,
}

/// A group of waiters sharing a fingerprint, not yet dispatched.
struct Batch {
    shared_params: SharedParams,
    waiters: Vec<PendingWaiter>,
}

#[derive(Default)]
struct BatchTable {
    order: VecDeque<Fingerprint>,
    batches: HashMap<Fingerprint, Batch>,
    shutting_down: bool,
}

impl BatchTable {
    fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Remove and return the oldest batch, preserving FIFO order for
    /// whatever remains.
    fn pop_oldest(&mut self) -> Option<(Fingerprint, Batch)> {
        while let Some(fp) = self.order.pop_front() {
            if let Some(batch) = self.batches.remove(&fp) {
                return Some((fp, batch));
            }
        }
        None
    }

    /// Remove every batch, in insertion order, for draining on shutdown.
    fn drain_all(&mut self) -> Vec<Batch> {
        let mut drained = Vec::new();
        while let Some((_, batch)) = self.pop_oldest() {
            drained.push(batch);
        }
        drained
    }
}

/// Handle returned by [`Scheduler::submit`]: await it to get this
/// waiter's slice of the eventual batch response.
pub type WaiterHandle = oneshot::Receiver<Result<Vec<serde_json::Value>, SchedulerError>>;

pub struct Scheduler {
    table: Mutex<BatchTable>,
    non_empty: Notify,
    shutdown: CancellationToken,
    upstream: Arc<dyn Upstream>,
    flush_interval: Duration,
}

impl Scheduler {
    pub fn new(upstream: Arc<dyn Upstream>, flush_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            table: Mutex::new(BatchTable::default()),
            non_empty: Notify::new(),
            shutdown: CancellationToken::new(),
            upstream,
            flush_interval,
        })
    }

    /// Admit one prompt under the given shared parameters. Non-blocking
    /// beyond the brief critical section; never touches the network.
    pub async fn submit(
        &self,
        prompt: String,
        shared_params: SharedParams,
    ) -> Result<WaiterHandle, SchedulerError> {
        let (tx, rx) = oneshot::channel();
        let fingerprint = shared_params.fingerprint();

        let mut table = self.table.lock().await;
        if table.shutting_down {
            return Err(SchedulerError::ShuttingDown);
        }

        let was_empty = table.is_empty();
        let waiter = PendingWaiter { prompt, result_tx: tx };

        match table.batches.get_mut(&fingerprint) {
            Some(batch) => batch.waiters.push(waiter),
            None => {
                table.batches.insert(
                    fingerprint.clone(),
                    Batch {
                        shared_params,
                        waiters: vec![waiter],
                    },
                );
                table.order.push_back(fingerprint);
            }
        }
        drop(table);

        if was_empty {
            self.non_empty.notify_one();
        }

        Ok(rx)
    }

    /// Run the flush loop until shutdown. Intended to be spawned as a
    /// single background task bound to the server's lifetime.
    pub async fn run(self: Arc<Self>) {
        loop {
            if !self.wait_for_work().await {
                return; // shutdown observed while idle
            }

            let next = {
                let mut table = self.table.lock().await;
                table.pop_oldest()
            };

            if let Some((_, batch)) = next {
                self.dispatch(batch).await;
            }

            if self.flush_interval.is_zero() {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.flush_interval) => {}
                _ = self.shutdown.cancelled() => {}
            }
        }
    }

    /// Block until the batch table is non-empty or shutdown is signalled.
    /// Returns `false` on shutdown.
    async fn wait_for_work(&self) -> bool {
        loop {
            {
                let table = self.table.lock().await;
                if !table.is_empty() {
                    return true;
                }
                if table.shutting_down {
                    return false;
                }
            }
            tokio::select! {
                _ = self.non_empty.notified() => {}
                _ = self.shutdown.cancelled() => {
                    // One more look: shutdown() already drained whatever
                    // was queued, but don't miss a concurrent submit that
                    // raced the shutdown flag.
                    let table = self.table.lock().await;
                    if table.is_empty() {
                        return false;
                    }
                }
            }
        }
    }

    /// Dispatch one batch: call upstream, partition the response, and
    /// fire every waiter's signal exactly once.
    async fn dispatch(&self, batch: Batch) {
        let prompts: Vec<String> = batch.waiters.iter().map(|w| w.prompt.clone()).collect();
        let n = batch.shared_params.n().max(1);

        let outcome = self.upstream.complete(&batch.shared_params, &prompts).await;

        match outcome {
            Ok(response) => {
                let expected = n * batch.waiters.len();
                if response.choices.len() != expected {
                    self.fail_all(
                        batch.waiters,
                        SchedulerError::UpstreamShape {
                            got: response.choices.len(),
                            expected,
                            waiters: prompts.len(),
                            n,
                        },
                    );
                    return;
                }

                for (i, waiter) in batch.waiters.into_iter().enumerate() {
                    let group = response.choices[i * n..(i + 1) * n].to_vec();
                    // Dropped receiver (client disconnected) is not an error
                    // we need to act on: the request was still dispatched,
                    // per the spec's cancellation semantics.
                    let _ = waiter.result_tx.send(Ok(group));
                }
            }
            Err(e) => self.fail_all(batch.waiters, SchedulerError::UpstreamTransport(e.to_string())),
        }
    }

    fn fail_all(&self, waiters: Vec<PendingWaiter>, err: SchedulerError) {
        for waiter in waiters {
            let _ = waiter.result_tx.send(Err(err.clone()));
        }
    }

    /// Refuse further submissions, fail every currently-batched waiter,
    /// and wake the flush loop so it can observe shutdown and exit once
    /// any in-flight dispatch completes.
    pub async fn shutdown(&self) {
        let drained = {
            let mut table = self.table.lock().await;
            table.shutting_down = true;
            table.drain_all()
        };
        for batch in drained {
            self.fail_all(batch.waiters, SchedulerError::ShuttingDown);
        }
        self.shutdown.cancel();
        self.non_empty.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UpstreamError;
    use crate::scheduler::params::{CompletionRequestBody, PromptInput};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct EchoUpstream {
        calls: AtomicUsize,
        prompts_seen: StdMutex<Vec<Vec<String>>>,
    }

    impl EchoUpstream {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                prompts_seen: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl Upstream for EchoUpstream {
        async fn complete(
            &self,
            shared: &SharedParams,
            prompts: &[String],
        ) -> Result<crate::upstream::UpstreamResponse, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts_seen.lock().unwrap().push(prompts.to_vec());
            let n = shared.n();
            let mut choices = Vec::new();
            for p in prompts {
                for i in 0..n {
                    choices.push(serde_json::json!({"text": format!("{p}-{i}")}));
                }
            }
            Ok(crate::upstream::UpstreamResponse { choices })
        }
    }

    struct FailingUpstream;

    #[async_trait::async_trait]
    impl Upstream for FailingUpstream {
        async fn complete(
            &self,
            _shared: &SharedParams,
            _prompts: &[String],
        ) -> Result<crate::upstream::UpstreamResponse, UpstreamError> {
            Err(UpstreamError::Status(500))
        }
    }

    fn shared(n: Option<u32>) -> SharedParams {
        SharedParams::from_request(
            &CompletionRequestBody {
                prompt: Some(PromptInput::Single("x".into())),
                max_tokens: Some(10),
                n,
                stop: None,
                temperature: None,
            },
            "code-davinci-002",
        )
    }

    #[tokio::test]
    async fn single_request_round_trips() {
        let upstream = Arc::new(EchoUpstream::new());
        let scheduler = Scheduler::new(upstream.clone(), Duration::ZERO);
        let handle = tokio::spawn(scheduler.clone().run());

        let rx = scheduler
            .submit("hello".to_string(), shared(Some(1)))
            .await
            .unwrap();
        let result = rx.await.unwrap().unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0]["text"], "hello-0");

        scheduler.shutdown().await;
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn coalesces_same_fingerprint_into_one_call() {
        let upstream = Arc::new(EchoUpstream::new());
        let scheduler = Scheduler::new(upstream.clone(), Duration::from_millis(20));
        let handle = tokio::spawn(scheduler.clone().run());

        let a = scheduler.submit("a".into(), shared(Some(1))).await.unwrap();
        let b = scheduler.submit("b".into(), shared(Some(1))).await.unwrap();
        let c = scheduler.submit("c".into(), shared(Some(1))).await.unwrap();

        let (ra, rb, rc) = tokio::join!(a, b, c);
        assert_eq!(ra.unwrap().unwrap()[0]["text"], "a-0");
        assert_eq!(rb.unwrap().unwrap()[0]["text"], "b-0");
        assert_eq!(rc.unwrap().unwrap()[0]["text"], "c-0");

        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
        assert_eq!(upstream.prompts_seen.lock().unwrap()[0], vec!["a", "b", "c"]);

        scheduler.shutdown().await;
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn partitions_by_fingerprint() {
        let upstream = Arc::new(EchoUpstream::new());
        let scheduler = Scheduler::new(upstream.clone(), Duration::from_millis(20));
        let handle = tokio::spawn(scheduler.clone().run());

        let n1a = scheduler.submit("1a".into(), shared(Some(1))).await.unwrap();
        let n2a = scheduler.submit("2a".into(), shared(Some(2))).await.unwrap();
        let n1b = scheduler.submit("1b".into(), shared(Some(1))).await.unwrap();
        let n2b = scheduler.submit("2b".into(), shared(Some(2))).await.unwrap();

        let (r1a, r2a, r1b, r2b) = tokio::join!(n1a, n2a, n1b, n2b);
        assert_eq!(r1a.unwrap().unwrap().len(), 1);
        assert_eq!(r2a.unwrap().unwrap().len(), 2);
        assert_eq!(r1b.unwrap().unwrap().len(), 1);
        assert_eq!(r2b.unwrap().unwrap().len(), 2);

        assert_eq!(upstream.calls.load(Ordering::SeqCst), 2);

        scheduler.shutdown().await;
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn upstream_failure_propagates_to_every_waiter() {
        let scheduler = Scheduler::new(Arc::new(FailingUpstream), Duration::ZERO);
        let handle = tokio::spawn(scheduler.clone().run());

        let mut handles = Vec::new();
        for i in 0..4 {
            handles.push(
                scheduler
                    .submit(format!("p{i}"), shared(Some(1)))
                    .await
                    .unwrap(),
            );
        }

        for h in handles {
            let result = h.await.unwrap();
            assert!(matches!(result, Err(SchedulerError::UpstreamTransport(_))));
        }

        scheduler.shutdown().await;
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_drains_pending_waiters_with_failure() {
        let upstream = Arc::new(EchoUpstream::new());
        // Long flush interval: requests should still be sitting in the
        // table, un-dispatched, when shutdown is signalled.
        let scheduler = Scheduler::new(upstream, Duration::from_secs(60));
        let handle = tokio::spawn(scheduler.clone().run());

        // Let the flush loop take the first (empty -> non-empty) wakeup path.
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut handles = Vec::new();
        for i in 0..5 {
            handles.push(
                scheduler
                    .submit(format!("p{i}"), shared(Some(1)))
                    .await
                    .unwrap(),
            );
        }

        scheduler.shutdown().await;

        for h in handles {
            let result = h.await.unwrap();
            assert!(matches!(result, Err(SchedulerError::ShuttingDown)));
        }

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_rejected() {
        let upstream = Arc::new(EchoUpstream::new());
        let scheduler = Scheduler::new(upstream, Duration::ZERO);
        let handle = tokio::spawn(scheduler.clone().run());

        scheduler.shutdown().await;
        handle.await.unwrap();

        let err = scheduler.submit("x".into(), shared(Some(1))).await.unwrap_err();
        assert!(matches!(err, SchedulerError::ShuttingDown));
    }
}
