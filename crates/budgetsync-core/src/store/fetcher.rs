use std::future::Future;

use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;

/// Anything that can produce a fresh copy of a collection.
///
/// Failures are reported through the `Result`; a panicking fetch is caught by
/// the store and recorded the same way.
pub trait Fetcher<T>: Send + Sync + 'static {
    fn fetch(&self) -> BoxFuture<'static, Result<Vec<T>>>;
}

impl<T, F, Fut> Fetcher<T> for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<T>>> + Send + 'static,
{
    fn fetch(&self) -> BoxFuture<'static, Result<Vec<T>>> {
        (self)().boxed()
    }
}
