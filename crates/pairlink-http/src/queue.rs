//! The request queue.
//!
//! Requests wait here while another one is in flight. The dispatcher pops
//! one, runs it to completion (including timeout retries), and only then
//! pops the next, so at most one request is ever on the wire.

use std::collections::VecDeque;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::{HttpError, HttpRequest};

/// Which queued request is popped next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueOrder {
    /// Oldest first.
    #[default]
    Fifo,
    /// Newest first (stack discipline), for backends that rely on it.
    Lifo,
}

/// One queued call with its completion channel.
#[derive(Debug)]
pub struct PendingRequest {
    pub request: HttpRequest,
    /// Overload retries already spent.
    pub overload_retries: u32,
    reply: oneshot::Sender<Result<Value, HttpError>>,
}

impl PendingRequest {
    pub fn new(
        request: HttpRequest,
        reply: oneshot::Sender<Result<Value, HttpError>>,
    ) -> Self {
        Self {
            request,
            overload_retries: 0,
            reply,
        }
    }

    /// Delivers the result. Consumes the request, so a completion fires at
    /// most once. A caller that stopped waiting is ignored.
    pub fn complete(self, result: Result<Value, HttpError>) {
        let _ = self.reply.send(result);
    }
}

/// Queue of pending items, popped in [`QueueOrder`].
#[derive(Debug)]
pub struct RequestQueue<T = PendingRequest> {
    items: VecDeque<T>,
    order: QueueOrder,
    processing: bool,
}

impl<T> RequestQueue<T> {
    pub fn new(order: QueueOrder) -> Self {
        Self {
            items: VecDeque::new(),
            order,
            processing: false,
        }
    }

    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
    }

    pub fn pop(&mut self) -> Option<T> {
        match self.order {
            QueueOrder::Fifo => self.items.pop_front(),
            QueueOrder::Lifo => self.items.pop_back(),
        }
    }

    /// Puts an item back so it is the next one popped.
    pub fn requeue(&mut self, item: T) {
        match self.order {
            QueueOrder::Fifo => self.items.push_front(item),
            QueueOrder::Lifo => self.items.push_back(item),
        }
    }

    /// Empties the queue, yielding items in pop order.
    pub fn drain(&mut self) -> Vec<T> {
        let mut drained = Vec::with_capacity(self.items.len());
        while let Some(item) = self.pop() {
            drained.push(item);
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether a popped item is currently being worked on.
    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn set_processing(&mut self, processing: bool) {
        self.processing = processing;
    }

    pub fn order(&self) -> QueueOrder {
        self.order
    }
}
