//! Concurrent multi-upstream exchange.
//!
//! Every upstream in a request gets its own task. The first attempt to come
//! back with a well-formed response wins and the rest are cancelled through a
//! shared child token. Results travel over a channel with one slot per
//! attempt and are delivered with `try_send`, so an attempt never waits on a
//! caller that has already returned. A supervisor task joins all attempts so
//! their sockets are released even when nobody reads their result.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use hickory_proto::op::Message;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{Upstream, UpstreamTransport};
use crate::error::ExchangeError;

/// Cancellation and deadline scope of one exchange.
#[derive(Debug, Clone, Default)]
pub struct ExchangeContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl ExchangeContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline, zero once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Context cancelled together with `self`, and also on its own.
    fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    async fn expired(&self) {
        match self.deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}

/// One query to race across a set of upstreams.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeRequest<'a> {
    pub query: &'a Message,
    pub upstreams: &'a [String],
    pub tls_verify: bool,
}

type AttemptResult = (Upstream, Result<Message, ExchangeError>);

/// Races a query across upstreams and returns the first valid response.
pub struct ExchangeEngine<T> {
    transport: Arc<T>,
}

impl<T> Clone for ExchangeEngine<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T: UpstreamTransport> ExchangeEngine<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send `request.query` to every upstream at once.
    ///
    /// Returns the first successful response. Fails with `NoUpstreams` for an
    /// empty list, `Cancelled` when `ctx` is cancelled or expires first, and
    /// `AllUpstreamsFailed` once every attempt has failed. Dropping the
    /// returned future cancels all attempts.
    pub async fn exchange(
        &self,
        request: ExchangeRequest<'_>,
        ctx: &ExchangeContext,
    ) -> Result<Message, ExchangeError> {
        if request.upstreams.is_empty() {
            return Err(ExchangeError::NoUpstreams);
        }

        let query: Arc<[u8]> = request
            .query
            .to_vec()
            .map_err(|e| ExchangeError::Protocol(format!("cannot serialize query: {e}")))?
            .into();

        let race = ctx.child();
        let _cancel_on_exit = race.token().clone().drop_guard();
        let (tx, mut rx) = mpsc::channel::<AttemptResult>(request.upstreams.len());

        let attempts: Vec<JoinHandle<()>> = request
            .upstreams
            .iter()
            .map(|identifier| {
                let upstream = Upstream::parse(identifier);
                let transport = Arc::clone(&self.transport);
                let query = Arc::clone(&query);
                let race = race.clone();
                let tx = tx.clone();
                let tls_verify = request.tls_verify;

                tokio::spawn(async move {
                    let outcome = tokio::select! {
                        biased;
                        _ = race.token().cancelled() => {
                            trace!(upstream = %upstream, "Upstream attempt cancelled");
                            return;
                        }
                        outcome = transport.query(&upstream, &query[..], tls_verify, &race) => outcome,
                    };
                    if let Err(e) = &outcome {
                        debug!(upstream = %upstream, error = %e, "Upstream attempt failed");
                    }
                    // The caller may be gone already.
                    let _ = tx.try_send((upstream, outcome));
                })
            })
            .collect();
        drop(tx);

        tokio::spawn(supervise(attempts));

        let mut last_error = None;
        loop {
            let next = tokio::select! {
                biased;
                _ = ctx.token().cancelled() => return Err(ExchangeError::Cancelled),
                _ = ctx.expired() => return Err(ExchangeError::Cancelled),
                next = rx.recv() => next,
            };

            match next {
                Some((upstream, Ok(response))) => {
                    debug!(upstream = %upstream, "Upstream won race");
                    return Ok(response);
                }
                Some((_, Err(e))) => last_error = Some(e),
                None => {
                    return Err(ExchangeError::AllUpstreamsFailed {
                        last: last_error.map(Box::new),
                    });
                }
            }
        }
    }
}

/// Wait for every attempt of one exchange to finish.
async fn supervise(attempts: Vec<JoinHandle<()>>) {
    let total = attempts.len();
    for result in join_all(attempts).await {
        if let Err(e) = result {
            if e.is_panic() {
                warn!(error = %e, "Upstream attempt panicked");
            }
        }
    }
    trace!(attempts = total, "All upstream attempts settled");
}
