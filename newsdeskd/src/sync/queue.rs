use std::collections::VecDeque;
use std::future::Future;

use newsdesk_core::Bookmark;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Add,
    Delete,
}

/// What a queued delete points at. Bookmarks removed before they were ever
/// acknowledged only have a url to go by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteTarget {
    Id(String),
    Url(String),
}

impl DeleteTarget {
    pub fn for_bookmark(bookmark: &Bookmark) -> Self {
        if bookmark.is_local() {
            DeleteTarget::Url(bookmark.article.url.clone())
        } else {
            DeleteTarget::Id(bookmark.id.clone())
        }
    }

    pub fn matches(&self, bookmark: &Bookmark) -> bool {
        match self {
            DeleteTarget::Id(id) => bookmark.id == *id,
            DeleteTarget::Url(url) => bookmark.url() == url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OperationPayload {
    Add { bookmark: Bookmark },
    Delete { target: DeleteTarget },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(flatten)]
    pub payload: OperationPayload,
    #[serde(with = "time::serde::rfc3339")]
    pub enqueued_at: OffsetDateTime,
    /// Drain passes that left this operation queued.
    #[serde(default)]
    pub attempt: u32,
}

impl Operation {
    pub fn add(bookmark: Bookmark) -> Self {
        Self::new(OperationPayload::Add { bookmark })
    }

    pub fn delete(target: DeleteTarget) -> Self {
        Self::new(OperationPayload::Delete { target })
    }

    fn new(payload: OperationPayload) -> Self {
        Self {
            payload,
            enqueued_at: OffsetDateTime::now_utc(),
            attempt: 0,
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self.payload {
            OperationPayload::Add { .. } => OperationKind::Add,
            OperationPayload::Delete { .. } => OperationKind::Delete,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match &self.payload {
            OperationPayload::Add { bookmark } => Some(bookmark.url()),
            OperationPayload::Delete {
                target: DeleteTarget::Url(url),
            } => Some(url),
            OperationPayload::Delete { .. } => None,
        }
    }
}

/// Result of handing one operation to the remote side.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Applied remotely. Creates carry the canonical record.
    Success(Option<Bookmark>),
    /// The remote already reflects the operation's end state.
    AlreadySatisfied,
    Retryable,
    /// The service refused this one operation for good. It leaves the queue.
    Rejected,
    /// The credential was rejected; nothing else should be attempted with it.
    Fatal,
}

impl DispatchOutcome {
    pub fn is_resolved(&self) -> bool {
        matches!(
            self,
            DispatchOutcome::Success(_) | DispatchOutcome::AlreadySatisfied
        )
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct DrainReport {
    pub resolved: usize,
    pub remaining: usize,
    /// Canonical records returned by creates during the pass.
    pub confirmed: Vec<Bookmark>,
    /// Operations the service refused; already removed from the queue.
    pub rejected: Vec<Operation>,
    /// Set when a fatal outcome stopped the pass early.
    pub halted: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationQueue {
    inner: VecDeque<Operation>,
}

impl OperationQueue {
    pub fn from_vec(ops: Vec<Operation>) -> Self {
        Self { inner: ops.into() }
    }

    pub fn enqueue(&mut self, op: Operation) {
        self.inner.push_back(op);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.inner.iter()
    }

    pub fn to_vec(&self) -> Vec<Operation> {
        self.inner.iter().cloned().collect()
    }

    pub fn has_pending_add(&self, url: &str) -> bool {
        self.inner
            .iter()
            .any(|op| op.kind() == OperationKind::Add && op.url() == Some(url))
    }

    /// True when a queued delete targets `bookmark` by id or url.
    pub fn has_pending_delete(&self, bookmark: &Bookmark) -> bool {
        self.inner.iter().any(|op| match &op.payload {
            OperationPayload::Delete { target } => target.matches(bookmark),
            OperationPayload::Add { .. } => false,
        })
    }

    /// Runs every operation through `dispatch` in FIFO order.
    ///
    /// Resolved and rejected operations leave the queue; retryable ones stay in
    /// their original order. A fatal outcome stops the pass and keeps that
    /// operation and everything behind it.
    pub async fn drain<F, Fut>(&mut self, mut dispatch: F) -> DrainReport
    where
        F: FnMut(&Operation) -> Fut,
        Fut: Future<Output = DispatchOutcome>,
    {
        let mut report = DrainReport::default();
        let mut kept = VecDeque::with_capacity(self.inner.len());

        while let Some(mut op) = self.inner.pop_front() {
            match dispatch(&op).await {
                DispatchOutcome::Success(record) => {
                    report.resolved += 1;
                    report.confirmed.extend(record);
                }
                DispatchOutcome::AlreadySatisfied => report.resolved += 1,
                DispatchOutcome::Rejected => report.rejected.push(op),
                DispatchOutcome::Retryable => {
                    op.attempt = op.attempt.saturating_add(1);
                    kept.push_back(op);
                }
                DispatchOutcome::Fatal => {
                    kept.push_back(op);
                    kept.extend(self.inner.drain(..));
                    report.halted = true;
                    break;
                }
            }
        }

        self.inner = kept;
        report.remaining = self.inner.len();
        report
    }

    /// Swaps the first `batch_len` entries for `remaining`, keeping anything
    /// enqueued after the batch was copied out for draining.
    pub fn replace_front(&mut self, batch_len: usize, remaining: OperationQueue) {
        let batch_len = batch_len.min(self.inner.len());
        let newer = self.inner.split_off(batch_len);
        self.inner = remaining.inner;
        self.inner.extend(newer);
    }
}
