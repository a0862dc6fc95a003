//! Adaptive-concurrency dispatch of a batch through a [`Classifier`].
//!
//! A single loop owns the queue, the in-flight task set and the results. It
//! submits while the limiter allows, records each completion (latency sample,
//! rate-limit halving, upsert, confidence) and rechecks capacity every
//! [`CAPACITY_RECHECK`] when the bound is reached.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::batch::{ClassificationResult, ResultSet, WorkItem};
use crate::confidence::{Confidence, score_result};
use crate::limiter::AdaptiveLimiter;
use crate::schema::SchemaSpec;

/// How long the fill loop waits before re-reading the limiter when no slot is free.
pub const CAPACITY_RECHECK: Duration = Duration::from_millis(200);

/// Error recorded for items whose input text is empty.
pub const EMPTY_INPUT_ERROR: &str = "Input text is empty";

/// The external classification service. Implementations never fail: every
/// outcome, including transport errors, comes back as a [`ClassificationResult`].
pub trait Classifier: Send + Sync + 'static {
    fn classify(&self, item: &WorkItem) -> impl Future<Output = ClassificationResult> + Send;
}

/// Cooperative stop flag shared between the dispatch loop and its callers.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Stops new submissions. Calls already issued still complete and are recorded.
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// State passed to the completion observer after each result is stored.
pub struct Progress<'a> {
    pub result: &'a ClassificationResult,
    pub results: &'a ResultSet,
    pub limiter: &'a AdaptiveLimiter,
    /// Scores for `result`, when it succeeded and carries logprobs.
    pub confidence: Option<Confidence>,
    /// Items not yet submitted.
    pub queued: usize,
    pub in_flight: usize,
}

// Mutable state of a single run.
struct RunContext {
    queue: VecDeque<WorkItem>,
    in_flight: JoinSet<ClassificationResult>,
    // Item behind each in-flight task, so a task that dies still gets a record.
    tasks: HashMap<Id, WorkItem>,
    results: ResultSet,
}

impl RunContext {
    // Only ids without a successful prior record are queued.
    fn new(items: &[WorkItem], prior: ResultSet) -> Self {
        let queue = items
            .iter()
            .filter(|item| !prior.is_succeeded(&item.id))
            .cloned()
            .collect();
        Self {
            queue,
            in_flight: JoinSet::new(),
            tasks: HashMap::new(),
            results: prior,
        }
    }
}

/// Drives a batch of items through a [`Classifier`] under an [`AdaptiveLimiter`].
pub struct Dispatcher<C: Classifier> {
    classifier: Arc<C>,
    limiter: AdaptiveLimiter,
    stop: StopHandle,
    recheck: Duration,
    schema: SchemaSpec,
}

impl<C: Classifier> Dispatcher<C> {
    pub fn new(classifier: Arc<C>, limiter: AdaptiveLimiter) -> Self {
        Self {
            classifier,
            limiter,
            stop: StopHandle::default(),
            recheck: CAPACITY_RECHECK,
            schema: SchemaSpec::default(),
        }
    }

    /// Schema used to score each result as it completes.
    pub fn with_schema(mut self, schema: SchemaSpec) -> Self {
        self.schema = schema;
        self
    }

    /// Handle that stops this dispatcher from another task.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    #[allow(dead_code)]
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn limiter(&self) -> &AdaptiveLimiter {
        &self.limiter
    }

    /// Runs `items`, skipping ids that already succeeded in `prior`.
    pub async fn run(&mut self, items: &[WorkItem], prior: ResultSet) -> ResultSet {
        self.run_observed(items, prior, |_| {}).await
    }

    /// Like [`run`](Self::run), calling `observe` after every recorded result.
    pub async fn run_observed<F>(
        &mut self,
        items: &[WorkItem],
        prior: ResultSet,
        mut observe: F,
    ) -> ResultSet
    where
        F: FnMut(&Progress<'_>),
    {
        let resuming = !prior.is_empty();
        let mut ctx = RunContext::new(items, prior);
        if resuming {
            info!(remaining = ctx.queue.len(), recorded = ctx.results.len(), "Resuming run");
        } else {
            info!(items = ctx.queue.len(), "Starting run");
        }

        loop {
            self.fill(&mut ctx, &mut observe);

            if ctx.in_flight.is_empty() && (ctx.queue.is_empty() || self.stop.is_stopped()) {
                break;
            }

            let waiting_for_capacity = !ctx.queue.is_empty() && !self.stop.is_stopped();
            tokio::select! {
                joined = ctx.in_flight.join_next_with_id(), if !ctx.in_flight.is_empty() => {
                    match joined {
                        Some(Ok((task, result))) => {
                            ctx.tasks.remove(&task);
                            self.complete(&mut ctx, result, &mut observe);
                        }
                        Some(Err(e)) => self.abandon(&mut ctx, e, &mut observe),
                        None => {}
                    }
                }
                _ = sleep(self.recheck), if waiting_for_capacity => {}
                else => break,
            }
        }

        if self.stop.is_stopped() {
            warn!(
                remaining = ctx.queue.len(),
                errors = ctx.results.error_count(),
                "Run stopped"
            );
        } else {
            info!(
                errors = ctx.results.error_count(),
                concurrency = self.limiter.concurrency(),
                target_rpm = self.limiter.target_rpm(),
                "Run complete"
            );
        }
        ctx.results
    }

    // Submits queued items until the limiter's current bound is reached.
    fn fill<F>(&mut self, ctx: &mut RunContext, observe: &mut F)
    where
        F: FnMut(&Progress<'_>),
    {
        while !self.stop.is_stopped() && ctx.in_flight.len() < self.limiter.effective_concurrency()
        {
            let Some(item) = ctx.queue.pop_front() else {
                break;
            };

            if item.input.is_empty() {
                let result =
                    ClassificationResult::failure(item.id, item.input, 0, EMPTY_INPUT_ERROR);
                self.record(ctx, result, observe);
                continue;
            }

            self.submit(ctx, item);
        }
    }

    fn submit(&self, ctx: &mut RunContext, item: WorkItem) {
        debug!(id = %item.id, "submitting");
        let classifier = Arc::clone(&self.classifier);
        let tracked = item.clone();

        let handle = ctx
            .in_flight
            .spawn(async move { classifier.classify(&item).await });
        ctx.tasks.insert(handle.id(), tracked);
    }

    // A panicked or cancelled task becomes a failed result for its item.
    // No latency sample is taken.
    fn abandon<F>(&self, ctx: &mut RunContext, err: JoinError, observe: &mut F)
    where
        F: FnMut(&Progress<'_>),
    {
        let Some(item) = ctx.tasks.remove(&err.id()) else {
            warn!("untracked dispatch task failed: {err}");
            return;
        };
        let result =
            ClassificationResult::failure(item.id, item.input, 0, format!("classifier task failed: {err}"));
        self.record(ctx, result, observe);
    }

    fn complete<F>(&mut self, ctx: &mut RunContext, result: ClassificationResult, observe: &mut F)
    where
        F: FnMut(&Progress<'_>),
    {
        self.limiter.record_latency(result.duration_ms as f64);

        if result.is_rate_limited() {
            self.limiter.halve_on_rate_limit();
            warn!(
                concurrency = self.limiter.effective_concurrency(),
                "Rate limit hit, reducing concurrency"
            );
        }

        self.record(ctx, result, observe);
    }

    fn record<F>(&self, ctx: &mut RunContext, result: ClassificationResult, observe: &mut F)
    where
        F: FnMut(&Progress<'_>),
    {
        if let Some(error) = &result.error {
            warn!(id = %result.id, "Error on item: {error}");
        }

        let id = result.id.clone();
        ctx.results.upsert(result);

        if let Some(stored) = ctx.results.get(&id) {
            observe(&Progress {
                result: stored,
                confidence: score_result(stored, &self.schema),
                results: &ctx.results,
                limiter: &self.limiter,
                queued: ctx.queue.len(),
                in_flight: ctx.in_flight.len(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{TokenLogprob, TopLogprob};
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    /// Records every call; ids listed in `fail_with` fail with the given error.
    #[derive(Default)]
    struct MockClassifier {
        calls: AtomicUsize,
        called_ids: Mutex<Vec<String>>,
        fail_with: Vec<(String, String)>,
        duration_ms: u64,
        stop_after_call: Option<StopHandle>,
    }

    impl MockClassifier {
        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn called_ids(&self) -> Vec<String> {
            let mut ids = self.called_ids.lock().unwrap().clone();
            ids.sort();
            ids
        }
    }

    impl Classifier for MockClassifier {
        async fn classify(&self, item: &WorkItem) -> ClassificationResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.called_ids.lock().unwrap().push(item.id.clone());
            if let Some(stop) = &self.stop_after_call {
                stop.stop();
            }
            tokio::task::yield_now().await;

            match self.fail_with.iter().find(|(id, _)| *id == item.id) {
                Some((_, error)) => {
                    ClassificationResult::failure(&item.id, &item.input, self.duration_ms, error)
                }
                None => ClassificationResult::success(
                    &item.id,
                    &item.input,
                    self.duration_ms,
                    json!({"classification": "A"}),
                ),
            }
        }
    }

    /// Tracks how many calls overlap. Reports a fixed 2 s latency so the
    /// limiter settles on a known bound.
    #[derive(Default)]
    struct GaugeClassifier {
        current: AtomicUsize,
        max_seen: AtomicUsize,
    }

    impl Classifier for GaugeClassifier {
        async fn classify(&self, item: &WorkItem) -> ClassificationResult {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            ClassificationResult::success(&item.id, &item.input, 2000, json!({"classification": "A"}))
        }
    }

    /// Returns a result whose logprobs put the value token at `A` (p = e^-0.1).
    struct ScoredClassifier;

    impl Classifier for ScoredClassifier {
        async fn classify(&self, item: &WorkItem) -> ClassificationResult {
            let mut result =
                ClassificationResult::success(&item.id, &item.input, 10, json!({"classification": "A"}));
            result.logprobs = Some(vec![
                TokenLogprob::new("classification", -0.01, vec![]),
                TokenLogprob::new(
                    "A",
                    -0.1,
                    vec![
                        TopLogprob { token: "A".into(), logprob: -0.1 },
                        TopLogprob { token: "B".into(), logprob: -2.3 },
                    ],
                ),
            ]);
            result
        }
    }

    struct PanickingClassifier;

    impl Classifier for PanickingClassifier {
        async fn classify(&self, item: &WorkItem) -> ClassificationResult {
            if item.id == "boom" {
                panic!("classifier bug");
            }
            ClassificationResult::success(&item.id, &item.input, 5, json!("ok"))
        }
    }

    fn items(ids: &[&str]) -> Vec<WorkItem> {
        ids.iter().map(|id| WorkItem::new(*id, format!("text {id}"))).collect()
    }

    fn dispatcher<C: Classifier>(classifier: Arc<C>) -> Dispatcher<C> {
        Dispatcher::new(classifier, AdaptiveLimiter::new(600.0))
    }

    #[tokio::test]
    async fn every_item_gets_exactly_one_result() {
        let mock = Arc::new(MockClassifier {
            duration_ms: 2000,
            ..Default::default()
        });
        let ids: Vec<String> = (0..40).map(|i| i.to_string()).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let work = items(&id_refs);

        let mut d = dispatcher(Arc::clone(&mock));
        let results = d.run(&work, ResultSet::new()).await;

        assert_eq!(results.len(), 40);
        assert_eq!(results.success_count(), 40);
        assert_eq!(mock.call_count(), 40);
        for item in &work {
            assert!(results.is_succeeded(&item.id));
        }
        // 2 s latency at 600 rpm lets the limiter ramp past a single slot.
        assert!(d.limiter().effective_concurrency() > 1);
    }

    #[tokio::test]
    async fn resume_only_retries_unsuccessful_ids() {
        let mock = Arc::new(MockClassifier::default());
        let prior = ResultSet::from_results([
            ClassificationResult::success("1", "text 1", 10, json!({"classification": "A"})),
            ClassificationResult::failure("2", "text 2", 10, "HTTP 500"),
            ClassificationResult::success("3", "text 3", 10, json!({"classification": "B"})),
        ]);

        let mut d = dispatcher(Arc::clone(&mock));
        let results = d.run(&items(&["1", "2", "3"]), prior).await;

        assert_eq!(mock.called_ids(), vec!["2"]);
        assert_eq!(results.len(), 3);
        assert!(results.is_succeeded("2"));
        assert_eq!(results.error_count(), 0);
        // Earlier successes are left untouched.
        assert_eq!(results.get("3").unwrap().output, Some(json!({"classification": "B"})));
    }

    #[tokio::test]
    async fn retry_failure_replaces_stale_failure() {
        let mock = Arc::new(MockClassifier {
            fail_with: vec![("2".into(), "HTTP 503".into())],
            ..Default::default()
        });
        let prior =
            ResultSet::from_results([ClassificationResult::failure("2", "text 2", 10, "HTTP 500")]);

        let mut d = dispatcher(Arc::clone(&mock));
        let results = d.run(&items(&["2"]), prior).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results.error_count(), 1);
        assert_eq!(results.get("2").unwrap().error.as_deref(), Some("HTTP 503"));
    }

    #[tokio::test]
    async fn empty_input_fails_without_calling_classifier() {
        let mock = Arc::new(MockClassifier::default());
        let work = vec![WorkItem::new("blank", ""), WorkItem::new("ok", "some text")];

        let mut d = dispatcher(Arc::clone(&mock));
        let results = d.run(&work, ResultSet::new()).await;

        assert_eq!(mock.call_count(), 1);
        let blank = results.get("blank").unwrap();
        assert!(!blank.success);
        assert_eq!(blank.duration_ms, 0);
        assert_eq!(blank.error.as_deref(), Some(EMPTY_INPUT_ERROR));
        // No latency sample for the synthesized failure.
        assert_eq!(d.limiter().window().len(), 1);
    }

    #[tokio::test]
    async fn rate_limit_halves_concurrency() {
        let mock = Arc::new(MockClassifier {
            fail_with: vec![("limited".into(), "HTTP 429: Rate limit reached".into())],
            duration_ms: 2000,
            ..Default::default()
        });
        let mut limiter = AdaptiveLimiter::new(600.0);
        for _ in 0..200 {
            limiter.record_latency(2000.0);
        }
        let before = limiter.concurrency();

        let mut d = Dispatcher::new(Arc::clone(&mock), limiter);
        let results = d.run(&items(&["limited"]), ResultSet::new()).await;

        assert!(results.get("limited").unwrap().is_rate_limited());
        // The new sample matches the window mean, so only the halving moves the estimate.
        assert!((d.limiter().concurrency() - before / 2.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn stop_before_run_submits_nothing() {
        let mock = Arc::new(MockClassifier::default());
        let prior =
            ResultSet::from_results([ClassificationResult::failure("1", "text 1", 10, "HTTP 500")]);

        let mut d = dispatcher(Arc::clone(&mock));
        d.stop();
        let results = d.run(&items(&["1", "2"]), prior).await;

        assert_eq!(mock.call_count(), 0);
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn stop_lets_in_flight_calls_finish() {
        let stop = StopHandle::default();
        let mock = Arc::new(MockClassifier {
            stop_after_call: Some(stop.clone()),
            ..Default::default()
        });

        let mut d = dispatcher(Arc::clone(&mock));
        d.stop = stop;
        let results = d.run(&items(&["1", "2", "3"]), ResultSet::new()).await;

        // Concurrency starts at one, so only the first item was in flight.
        assert_eq!(mock.call_count(), 1);
        assert_eq!(results.len(), 1);
        assert!(results.is_succeeded("1"));
    }

    #[tokio::test]
    async fn classifier_panic_is_recorded_as_failure() {
        let mut d = dispatcher(Arc::new(PanickingClassifier));
        let results = d.run(&items(&["boom", "fine"]), ResultSet::new()).await;

        assert_eq!(results.len(), 2);
        assert!(results.is_succeeded("fine"));
        let boom = results.get("boom").unwrap();
        assert!(boom.error.as_deref().unwrap().contains("classifier task failed"));
    }

    #[tokio::test]
    async fn observer_sees_every_result() {
        let mock = Arc::new(MockClassifier::default());
        let mut seen = Vec::new();

        let mut d = dispatcher(Arc::clone(&mock));
        d.run_observed(&items(&["a", "b", "c"]), ResultSet::new(), |p| {
            seen.push((p.result.id.clone(), p.results.len()));
        })
        .await;

        assert_eq!(seen.len(), 3);
        assert_eq!(seen.last().unwrap().1, 3);
    }

    #[tokio::test]
    async fn in_flight_never_exceeds_limiter_bound() {
        let gauge = Arc::new(GaugeClassifier::default());
        let mut limiter = AdaptiveLimiter::new(600.0);
        for _ in 0..200 {
            limiter.record_latency(2000.0);
        }
        // 10 rps * 2 s * 0.9
        assert_eq!(limiter.effective_concurrency(), 18);

        let ids: Vec<String> = (0..100).map(|i| i.to_string()).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let mut d = Dispatcher::new(Arc::clone(&gauge), limiter);
        let results = d.run(&items(&id_refs), ResultSet::new()).await;

        let max = gauge.max_seen.load(Ordering::SeqCst);
        assert!(max > 1, "max in flight was {max}");
        assert!(max <= 18, "max in flight was {max}");
        assert_eq!(results.len(), 100);
    }

    #[tokio::test]
    async fn bound_is_reread_as_latency_arrives() {
        let gauge = Arc::new(GaugeClassifier::default());
        let ids: Vec<String> = (0..60).map(|i| i.to_string()).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();

        // Starts at one slot; only a re-read bound lets calls overlap.
        let mut d = dispatcher(Arc::clone(&gauge));
        let results = d.run(&items(&id_refs), ResultSet::new()).await;

        assert!(gauge.max_seen.load(Ordering::SeqCst) > 1);
        assert!(gauge.max_seen.load(Ordering::SeqCst) <= 18);
        assert_eq!(results.len(), 60);
    }

    #[tokio::test]
    async fn observer_receives_confidence() {
        let mut scores = Vec::new();
        let schema = SchemaSpec::new(vec![], vec!["A".into(), "B".into()]);

        let mut d = dispatcher(Arc::new(ScoredClassifier)).with_schema(schema);
        d.run_observed(&items(&["1"]), ResultSet::new(), |p| {
            scores.push(p.confidence.clone());
        })
        .await;

        let conf = scores[0].as_ref().unwrap();
        assert!((conf.top1 - (-0.1f64).exp()).abs() < 1e-12);
        assert!((conf.margin - ((-0.1f64).exp() - (-2.3f64).exp())).abs() < 1e-12);
    }

    #[tokio::test]
    async fn failed_results_have_no_confidence() {
        let mock = Arc::new(MockClassifier {
            fail_with: vec![("1".into(), "HTTP 500".into())],
            ..Default::default()
        });
        let mut seen = Vec::new();

        let mut d = dispatcher(mock);
        d.run_observed(&items(&["1"]), ResultSet::new(), |p| {
            seen.push(p.confidence.is_some());
        })
        .await;

        assert_eq!(seen, vec![false]);
    }

    #[test]
    fn stop_handle_is_shared() {
        let a = StopHandle::default();
        let b = a.clone();
        assert!(!b.is_stopped());
        a.stop();
        assert!(b.is_stopped());
    }
}
