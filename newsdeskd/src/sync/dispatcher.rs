use newsdesk_core::{ApiError, ApiErrorClass, Article, Bookmark, BookmarkClient};
use thiserror::Error;

use super::connectivity::Connectivity;
use super::queue::{DeleteTarget, DispatchOutcome, Operation, OperationPayload};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("bookmark already exists remotely")]
    Conflict,
    #[error("bookmark not found remotely")]
    NotFound,
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("bookmark service unreachable: {0}")]
    Unreachable(String),
    #[error("request refused: {0}")]
    Rejected(String),
    #[error("credential rejected: {0}")]
    Fatal(String),
}

impl From<ApiError> for DispatchError {
    fn from(err: ApiError) -> Self {
        match err.classification() {
            ApiErrorClass::Conflict => DispatchError::Conflict,
            ApiErrorClass::NotFound => DispatchError::NotFound,
            ApiErrorClass::Unreachable => DispatchError::Unreachable(err.to_string()),
            ApiErrorClass::Transient => DispatchError::Transient(err.to_string()),
            ApiErrorClass::Permanent => DispatchError::Rejected(err.to_string()),
            ApiErrorClass::Auth => DispatchError::Fatal(err.to_string()),
        }
    }
}

impl DispatchError {
    /// How the queue should treat an operation that failed with this error.
    pub fn outcome(&self) -> DispatchOutcome {
        match self {
            DispatchError::Conflict | DispatchError::NotFound => DispatchOutcome::AlreadySatisfied,
            DispatchError::Transient(_) | DispatchError::Unreachable(_) => {
                DispatchOutcome::Retryable
            }
            DispatchError::Rejected(_) => DispatchOutcome::Rejected,
            DispatchError::Fatal(_) => DispatchOutcome::Fatal,
        }
    }
}

/// Sends bookmark mutations to the remote service and turns every transport
/// failure into a [`DispatchError`].
#[derive(Clone)]
pub struct Dispatcher {
    client: BookmarkClient,
    connectivity: Connectivity,
}

impl Dispatcher {
    pub fn new(client: BookmarkClient, connectivity: Connectivity) -> Self {
        Self {
            client,
            connectivity,
        }
    }

    pub async fn list(&self) -> Result<Vec<Bookmark>, DispatchError> {
        self.ensure_online()?;
        let result = self.client.list_bookmarks().await;
        self.observe(result)
    }

    pub async fn create(&self, article: &Article) -> Result<Bookmark, DispatchError> {
        self.ensure_online()?;
        let result = self.client.create_bookmark(article).await;
        self.observe(result)
    }

    /// Deletes by canonical id, or resolves the url against the remote list first.
    /// A url with no remote match reports [`DispatchError::NotFound`].
    pub async fn delete(&self, target: &DeleteTarget) -> Result<(), DispatchError> {
        self.ensure_online()?;
        let id = match target {
            DeleteTarget::Id(id) => id.clone(),
            DeleteTarget::Url(url) => {
                let remote = self.list().await?;
                match remote.into_iter().find(|bookmark| bookmark.url() == url) {
                    Some(bookmark) => bookmark.id,
                    None => return Err(DispatchError::NotFound),
                }
            }
        };
        let result = self.client.delete_bookmark(&id).await;
        self.observe(result)
    }

    pub async fn dispatch(&self, op: &Operation) -> DispatchOutcome {
        let outcome = match &op.payload {
            OperationPayload::Add { bookmark } => match self.create(&bookmark.article).await {
                Ok(record) => DispatchOutcome::Success(Some(record)),
                Err(err) => err.outcome(),
            },
            OperationPayload::Delete { target } => match self.delete(target).await {
                Ok(()) => DispatchOutcome::Success(None),
                Err(err) => err.outcome(),
            },
        };
        tracing::debug!(kind = ?op.kind(), attempt = op.attempt, ?outcome, "dispatched queued operation");
        outcome
    }

    /// Checks reachability without consulting the connectivity flag. Any HTTP
    /// answer, even an error status, counts as reachable.
    pub async fn probe(&self) -> bool {
        match self.client.list_bookmarks().await {
            Ok(_) => true,
            Err(err) => err.classification() != ApiErrorClass::Unreachable,
        }
    }

    fn ensure_online(&self) -> Result<(), DispatchError> {
        if self.connectivity.is_online() {
            Ok(())
        } else {
            Err(DispatchError::Unreachable("offline".into()))
        }
    }

    fn observe<T>(&self, result: Result<T, ApiError>) -> Result<T, DispatchError> {
        result.map_err(|err| {
            let err = DispatchError::from(err);
            if matches!(err, DispatchError::Unreachable(_)) {
                tracing::warn!(error = %err, "bookmark service unreachable, going offline");
                self.connectivity.set_online(false);
            }
            err
        })
    }
}
