pub mod acquisitions;
pub mod invoices;
pub mod reports;
pub mod system;

/// Run a blocking store/collaborator call off the async runtime.
pub(crate) async fn blocking<T, F>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .expect("blocking task panicked")
}
