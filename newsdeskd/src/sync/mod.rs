pub mod backoff;
pub mod connectivity;
pub mod dispatcher;
pub mod engine;
pub mod queue;
pub mod reconcile;
pub mod state;

#[cfg(test)]
pub(crate) mod fake_remote;
