//! The result algebra the flows are written in.
//!
//! Every flow transition has the shape [`FlowResult<T, F>`]: the outer
//! `Result` is the fatal request plane ([`RequestError`] aborts the
//! operation), the inner `Result` carries the expected flow-level outcome.
//! `std::result::Result` already provides the synchronous combinators; this
//! module adds the few missing ones and an async facade so chains of
//! transitions compose without awaiting at every step.

use crate::error::RequestError;
use std::future::Future;

/// Outcome of one flow transition. Outer `Err` aborts the operation; inner
/// `Err` is an expected flow-level failure (retry states, typed refusals).
pub type FlowResult<T, F> = Result<Result<T, F>, RequestError>;

/// Combinators missing from `std::result::Result`.
pub trait ResultExt<T, E> {
    /// Like `expect`, with the message computed from the error.
    ///
    /// # Panics
    /// Panics with `f(&err)` when the value is an `Err`.
    fn expect_with(self, f: impl FnOnce(&E) -> String) -> T;

    /// Replace both sides with constants, preserving the variant.
    fn replace<U, F>(self, ok: U, err: F) -> Result<U, F>;
}

impl<T, E> ResultExt<T, E> for Result<T, E> {
    fn expect_with(self, f: impl FnOnce(&E) -> String) -> T {
        match self {
            Ok(value) => value,
            Err(error) => panic!("{}", f(&error)),
        }
    }

    fn replace<U, F>(self, ok: U, err: F) -> Result<U, F> {
        match self {
            Ok(_) => Ok(ok),
            Err(_) => Err(err),
        }
    }
}

/// Collapse a `Result` whose sides carry the same type.
pub trait Collapse<T> {
    fn collapse(self) -> T;
}

impl<T> Collapse<T> for Result<T, T> {
    fn collapse(self) -> T {
        match self {
            Ok(value) | Err(value) => value,
        }
    }
}

/// Async combinators over any future resolving to a `Result`.
///
/// The `*_fut` variants accept async continuations and flatten the inner
/// asynchrony. Dropping the returned future without polling it discards the
/// outcome, so every combinator is must-use.
pub trait FutureResultExt<T, E>: Future<Output = Result<T, E>> + Sized {
    #[must_use]
    fn map_ok<U, F>(self, f: F) -> impl Future<Output = Result<U, E>>
    where
        F: FnOnce(T) -> U,
    {
        async move { self.await.map(f) }
    }

    #[must_use]
    fn map_err_to<D, F>(self, f: F) -> impl Future<Output = Result<T, D>>
    where
        F: FnOnce(E) -> D,
    {
        async move { self.await.map_err(f) }
    }

    #[must_use]
    fn and_then_ok<U, F>(self, f: F) -> impl Future<Output = Result<U, E>>
    where
        F: FnOnce(T) -> Result<U, E>,
    {
        async move { self.await.and_then(f) }
    }

    #[must_use]
    fn map_ok_fut<U, Fut, F>(self, f: F) -> impl Future<Output = Result<U, E>>
    where
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = U>,
    {
        async move {
            match self.await {
                Ok(value) => Ok(f(value).await),
                Err(error) => Err(error),
            }
        }
    }

    #[must_use]
    fn map_err_fut<D, Fut, F>(self, f: F) -> impl Future<Output = Result<T, D>>
    where
        F: FnOnce(E) -> Fut,
        Fut: Future<Output = D>,
    {
        async move {
            match self.await {
                Ok(value) => Ok(value),
                Err(error) => Err(f(error).await),
            }
        }
    }

    #[must_use]
    fn and_then_fut<U, Fut, F>(self, f: F) -> impl Future<Output = Result<U, E>>
    where
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = Result<U, E>>,
    {
        async move {
            match self.await {
                Ok(value) => f(value).await,
                Err(error) => Err(error),
            }
        }
    }

    #[must_use]
    fn map_or_ok<R, F>(self, default: R, f: F) -> impl Future<Output = R>
    where
        F: FnOnce(T) -> R,
    {
        async move { self.await.map_or(default, f) }
    }

    #[must_use]
    fn map_or_else_ok<R, D, F>(self, default: D, f: F) -> impl Future<Output = R>
    where
        D: FnOnce(E) -> R,
        F: FnOnce(T) -> R,
    {
        async move { self.await.map_or_else(default, f) }
    }

    #[must_use]
    fn inspect_ok<F>(self, f: F) -> impl Future<Output = Result<T, E>>
    where
        F: FnOnce(&T),
    {
        async move { self.await.inspect(f) }
    }

    #[must_use]
    fn inspect_err_to<F>(self, f: F) -> impl Future<Output = Result<T, E>>
    where
        F: FnOnce(&E),
    {
        async move { self.await.inspect_err(f) }
    }

    /// Await and unwrap the success value.
    ///
    /// # Panics
    /// Panics when the resolved value is an `Err`.
    fn unwrap_ok(self) -> impl Future<Output = T>
    where
        E: std::fmt::Debug,
    {
        async move {
            match self.await {
                Ok(value) => value,
                Err(error) => panic!("called unwrap_ok on an Err value: {error:?}"),
            }
        }
    }

    /// Await and unwrap the success value with a fixed message.
    ///
    /// # Panics
    /// Panics with `msg` when the resolved value is an `Err`.
    fn expect_ok(self, msg: &str) -> impl Future<Output = T>
    where
        E: std::fmt::Debug,
    {
        async move {
            match self.await {
                Ok(value) => value,
                Err(error) => panic!("{msg}: {error:?}"),
            }
        }
    }

    /// Await and collapse when both sides carry the same type.
    #[must_use]
    fn collapse_fut(self) -> impl Future<Output = T>
    where
        E: Into<T>,
    {
        async move {
            match self.await {
                Ok(value) => value,
                Err(error) => error.into(),
            }
        }
    }
}

impl<T, E, Fut> FutureResultExt<T, E> for Fut where Fut: Future<Output = Result<T, E>> + Sized {}
