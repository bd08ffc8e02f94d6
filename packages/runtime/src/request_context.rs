//! Request-scoped context.
//!
//! Transports serve each request inside [`scope`] with a snapshot of the
//! request extensions. Code running on behalf of that request, such as the
//! logger extractor or the panic recovery hook, reads it back with
//! [`current`].

use std::future::Future;

use http::Extensions;

tokio::task_local! {
    static CURRENT: Extensions;
}

/// Runs `fut` with `ctx` as the current request context.
pub async fn scope<F: Future>(ctx: Extensions, fut: F) -> F::Output {
    CURRENT.scope(ctx, fut).await
}

/// The context of the request being served. Empty outside of one.
#[must_use]
pub fn current() -> Extensions {
    CURRENT.try_with(Clone::clone).unwrap_or_default()
}
