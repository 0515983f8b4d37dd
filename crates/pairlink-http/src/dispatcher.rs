//! The request dispatcher actor.
//!
//! One task owns the queue, the rolling request sequence and the session
//! token. Callers talk to it through a cloneable [`DispatcherHandle`], the
//! same handle/actor split a room uses: commands go in over an mpsc
//! channel, results come back over a oneshot per request.
//!
//! Because only the actor sends, and it awaits each request before popping
//! the next, exactly one request is ever in flight.

use pairlink_protocol::Signer;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::classify::{Outcome, classify};
use crate::request::{
    CONTENT_TYPE_JSON, HEADER_BOOK_KEY, HEADER_CONTENT_TYPE, HEADER_PLATFORM_VERSION,
    HEADER_REQ_SEQ, HEADER_REQUEST_SIGN, HEADER_SESSION_TOKEN,
};
use crate::{
    ClientError, HttpClient, HttpConfig, HttpError, HttpRequest, PendingRequest, RequestQueue,
    SignedRequest,
};

/// Request sequence after startup and after adopting a new session token.
pub const INITIAL_SEQUENCE: u64 = 1;

pub(crate) enum DispatchCommand {
    Request(PendingRequest),
    SetSequence(u64),
    SetSessionToken(Option<String>),
    Status {
        reply: oneshot::Sender<DispatcherStatus>,
    },
}

/// A snapshot of dispatcher state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherStatus {
    /// Sequence the next request will be signed with.
    pub sequence: u64,
    pub has_session_token: bool,
    /// Requests waiting behind the one in flight.
    pub pending: usize,
}

/// Handle to a running dispatcher.
///
/// Cheap to clone; every clone feeds the same queue.
#[derive(Clone)]
pub struct DispatcherHandle {
    sender: mpsc::Sender<DispatchCommand>,
}

impl DispatcherHandle {
    /// Queues a request and waits for its result.
    pub async fn request(&self, request: HttpRequest) -> Result<Value, HttpError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(DispatchCommand::Request(PendingRequest::new(request, reply_tx)))
            .await
            .map_err(|_| HttpError::Shutdown)?;
        reply_rx.await.map_err(|_| HttpError::Shutdown)?
    }

    /// Adopts a server-supplied request-sequence baseline.
    pub async fn set_sequence(&self, sequence: u64) -> Result<(), HttpError> {
        self.sender
            .send(DispatchCommand::SetSequence(sequence))
            .await
            .map_err(|_| HttpError::Shutdown)
    }

    /// Replaces (or clears) the session token.
    pub async fn set_session_token(&self, token: Option<String>) -> Result<(), HttpError> {
        self.sender
            .send(DispatchCommand::SetSessionToken(token))
            .await
            .map_err(|_| HttpError::Shutdown)
    }

    /// Reads the current sequence, token presence and queue length.
    pub async fn status(&self) -> Result<DispatcherStatus, HttpError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(DispatchCommand::Status { reply: reply_tx })
            .await
            .map_err(|_| HttpError::Shutdown)?;
        reply_rx.await.map_err(|_| HttpError::Shutdown)
    }
}

struct Dispatcher<C: HttpClient> {
    client: C,
    config: HttpConfig,
    signer: Signer,
    platform_version: String,
    sequence: u64,
    session_token: Option<String>,
    queue: RequestQueue,
    receiver: mpsc::Receiver<DispatchCommand>,
}

impl<C: HttpClient> Dispatcher<C> {
    async fn run(mut self) {
        info!(base_url = %self.config.base_url, order = ?self.config.order, "http dispatcher started");

        loop {
            if self.queue.is_empty() {
                match self.receiver.recv().await {
                    Some(cmd) => self.accept(cmd),
                    None => break,
                }
            }
            self.absorb_ready();

            let Some(pending) = self.queue.pop() else {
                continue;
            };
            self.queue.set_processing(true);
            self.process(pending).await;
            self.queue.set_processing(false);
        }

        info!("http dispatcher stopped");
    }

    fn accept(&mut self, cmd: DispatchCommand) {
        match cmd {
            DispatchCommand::Request(pending) => self.queue.push(pending),
            DispatchCommand::SetSequence(sequence) => {
                debug!(sequence, "request sequence set");
                self.sequence = sequence;
            }
            DispatchCommand::SetSessionToken(token) => {
                debug!(present = token.is_some(), "session token set");
                self.session_token = token;
            }
            DispatchCommand::Status { reply } => {
                let _ = reply.send(DispatcherStatus {
                    sequence: self.sequence,
                    has_session_token: self.session_token.is_some(),
                    pending: self.queue.len(),
                });
            }
        }
    }

    /// Moves every command already waiting in the channel into the queue.
    fn absorb_ready(&mut self) {
        while let Ok(cmd) = self.receiver.try_recv() {
            self.accept(cmd);
        }
    }

    fn sign(&mut self, request: &HttpRequest) -> SignedRequest {
        let sequence = self.sequence;
        self.sequence += 1;

        let (token_header, token) = match (&request.book_key, &self.session_token) {
            (Some(key), _) => (Some(HEADER_BOOK_KEY), Some(key.as_str())),
            (None, Some(token)) => (Some(HEADER_SESSION_TOKEN), Some(token.as_str())),
            (None, None) => (None, None),
        };
        let signature =
            self.signer
                .sign_request(&request.uri, request.body.as_ref(), sequence, token);

        let mut headers = vec![
            (HEADER_CONTENT_TYPE, CONTENT_TYPE_JSON.to_string()),
            (HEADER_PLATFORM_VERSION, self.platform_version.clone()),
            (HEADER_REQ_SEQ, sequence.to_string()),
            (HEADER_REQUEST_SIGN, signature),
        ];
        if let (Some(name), Some(value)) = (token_header, token) {
            headers.push((name, value.to_string()));
        }

        SignedRequest {
            method: request.method,
            url: self.config.url_for(&request.uri),
            body: pairlink_protocol::sign::canonical_body(request.body.as_ref()),
            headers,
        }
    }

    /// Runs one request to completion: timeout retries, overload requeue,
    /// or a fatal failure that empties the queue.
    async fn process(&mut self, mut pending: PendingRequest) {
        let mut timeouts = 0u32;

        loop {
            let signed = self.sign(&pending.request);
            debug!(
                method = signed.method.as_str(),
                uri = %pending.request.uri,
                seq = self.sequence - 1,
                "sending request"
            );

            let response = match self.client.execute(signed).await {
                Ok(response) => response,
                Err(ClientError::Timeout) if timeouts < self.config.timeout_retries => {
                    timeouts += 1;
                    warn!(uri = %pending.request.uri, attempt = timeouts, "request timed out, retrying");
                    continue;
                }
                Err(ClientError::Timeout) => {
                    warn!(uri = %pending.request.uri, "request timed out");
                    pending.complete(Err(HttpError::Timeout {
                        attempts: timeouts + 1,
                    }));
                    return;
                }
                Err(ClientError::Connection(reason)) => {
                    warn!(uri = %pending.request.uri, %reason, "connection error");
                    pending.complete(Err(HttpError::Connection(reason)));
                    return;
                }
            };

            match classify(&response) {
                Outcome::Success {
                    body,
                    session_token,
                } => {
                    if let Some(token) = session_token {
                        debug!("adopted new session token");
                        self.session_token = Some(token);
                        self.sequence = INITIAL_SEQUENCE;
                    }
                    debug!(uri = %pending.request.uri, status = response.status, "request done");
                    pending.complete(Ok(body));
                }
                Outcome::Overloaded => {
                    let retries = pending.overload_retries;
                    if pending
                        .request
                        .retry
                        .allows(retries, self.config.overload_retry_cap)
                    {
                        pending.overload_retries += 1;
                        warn!(
                            uri = %pending.request.uri,
                            retry = retries + 1,
                            delay_ms = self.config.overload_retry_delay.as_millis() as u64,
                            "backend overloaded, requeueing"
                        );
                        self.queue.requeue(pending);
                        time::sleep(self.config.overload_retry_delay).await;
                    } else {
                        warn!(uri = %pending.request.uri, retries, "overload retries exhausted");
                        pending.complete(Err(HttpError::OverloadRetriesExhausted { retries }));
                    }
                }
                Outcome::Failed(err) if err.is_queue_fatal() => {
                    error!(uri = %pending.request.uri, status = response.status, error = %err, "fatal request error, dropping queue");
                    pending.complete(Err(err));
                    self.drop_queue();
                }
                Outcome::Failed(err) => {
                    warn!(uri = %pending.request.uri, status = response.status, error = %err, "request failed");
                    pending.complete(Err(err));
                }
            }
            return;
        }
    }

    /// Fails every waiting request with [`HttpError::EarlierRequestFailed`],
    /// including ones that arrived while the fatal request was in flight.
    fn drop_queue(&mut self) {
        self.absorb_ready();
        let dropped = self.queue.drain();
        if !dropped.is_empty() {
            warn!(count = dropped.len(), "failing queued requests");
        }
        for pending in dropped {
            pending.complete(Err(HttpError::EarlierRequestFailed));
        }
    }
}

/// Spawns a dispatcher task and returns a handle to it.
///
/// The task stops once every handle is dropped and the queue is empty.
pub fn spawn_dispatcher<C: HttpClient>(client: C, config: HttpConfig) -> DispatcherHandle {
    let config = config.validated();
    let (tx, rx) = mpsc::channel(config.channel_size);

    let dispatcher = Dispatcher {
        client,
        signer: Signer::new(config.secret.clone()),
        platform_version: config.platform_version(),
        sequence: INITIAL_SEQUENCE,
        session_token: config.session_token.clone(),
        queue: RequestQueue::new(config.order),
        receiver: rx,
        config,
    };

    tokio::spawn(dispatcher.run());

    DispatcherHandle { sender: tx }
}
