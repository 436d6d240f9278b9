//! Stream plumbing shared by the persist and save pipelines.
//!
//! A pipeline turns a stream of dispatched actions into a stream of result
//! actions. A [`PipelineHandler`] decides what each input means; [`drive`]
//! runs the requests it starts concurrently and feeds their completions
//! back to it.

use crate::inflight::CancelReceiver;
use entcache_model::{Action, ServiceFailure};
use entcache_types::CorrelationId;
use futures::future::BoxFuture;
use futures::stream::{self, FuturesUnordered, Stream, StreamExt};
use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;

/// A finished request, handed back to the handler that started it.
#[derive(Debug, Clone)]
pub struct Completion {
    pub action: Action,
    pub correlation_id: Option<CorrelationId>,
    /// Set for requests other identical requests may have joined.
    pub exhaust_key: Option<String>,
}

/// What a handler wants done in response to an input.
pub enum Step {
    /// Emit an action right away.
    Emit(Action),
    /// Run a request; its completion goes to [`PipelineHandler::on_completion`].
    Start(BoxFuture<'static, Completion>),
}

/// The stateful part of a pipeline. Called from one task only.
pub trait PipelineHandler: Send + 'static {
    fn on_action(&mut self, action: &Action) -> Vec<Step>;

    fn on_completion(&mut self, completion: Completion) -> Vec<Step>;
}

struct Driver<S, H> {
    actions: S,
    handler: H,
    ready: VecDeque<Action>,
    running: FuturesUnordered<BoxFuture<'static, Completion>>,
    input_done: bool,
}

impl<S, H> Driver<S, H> {
    fn apply(&mut self, steps: Vec<Step>) {
        for step in steps {
            match step {
                Step::Emit(action) => self.ready.push_back(action),
                Step::Start(request) => self.running.push(request),
            }
        }
    }
}

/// Runs `handler` over `actions`.
///
/// The output ends once the input has ended and every started request has
/// completed.
pub fn drive<S, H>(actions: S, handler: H) -> impl Stream<Item = Action> + Send
where
    S: Stream<Item = Action> + Send + Unpin + 'static,
    H: PipelineHandler,
{
    let driver = Driver {
        actions,
        handler,
        ready: VecDeque::new(),
        running: FuturesUnordered::new(),
        input_done: false,
    };

    stream::unfold(driver, |mut d| async move {
        loop {
            if let Some(action) = d.ready.pop_front() {
                return Some((action, d));
            }
            if d.input_done && d.running.is_empty() {
                return None;
            }
            tokio::select! {
                next = d.actions.next(), if !d.input_done => match next {
                    Some(action) => {
                        let steps = d.handler.on_action(&action);
                        d.apply(steps);
                    }
                    None => d.input_done = true,
                },
                Some(done) = d.running.next(), if !d.running.is_empty() => {
                    let steps = d.handler.on_completion(done);
                    d.apply(steps);
                }
                else => return None,
            }
        }
    })
}

/// Outcome of racing a request against its cancellation.
#[derive(Debug)]
pub enum Race<T> {
    Done(T),
    Canceled(Option<String>),
}

/// Awaits `work` unless a cancel arrives first. A dropped cancel sender
/// leaves the work running.
pub async fn race<T>(cancel: CancelReceiver, work: impl Future<Output = T>) -> Race<T> {
    tokio::pin!(work);
    tokio::select! {
        biased;
        Ok(reason) = cancel => Race::Canceled(reason),
        out = &mut work => Race::Done(out),
    }
}

/// Like [`race`], for requests that cannot be canceled.
pub async fn race_opt<T>(cancel: Option<CancelReceiver>, work: impl Future<Output = T>) -> Race<T> {
    match cancel {
        Some(cancel) => race(cancel, work).await,
        None => Race::Done(work.await),
    }
}

/// Fails a call with [`ServiceFailure::Timeout`] after `timeout_ms`
/// milliseconds. `0` waits forever.
pub async fn with_timeout<T>(
    timeout_ms: u64,
    call: impl Future<Output = Result<T, ServiceFailure>>,
) -> Result<T, ServiceFailure> {
    if timeout_ms == 0 {
        return call.await;
    }
    match tokio::time::timeout(Duration::from_millis(timeout_ms), call).await {
        Ok(result) => result,
        Err(_) => Err(ServiceFailure::Timeout(timeout_ms)),
    }
}

/// Adapts a store feed into an action stream.
pub fn action_stream(rx: mpsc::UnboundedReceiver<Action>) -> impl Stream<Item = Action> + Send + Unpin {
    Box::pin(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|action| (action, rx))
    }))
}
