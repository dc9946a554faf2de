//! # Completion
//!
//! Single-use handle for the outcome of a background operation. The
//! initiating call returns immediately with a [`Completion`]; the work runs
//! on the tokio runtime and the handle resolves exactly once with either a
//! value or a [`PrinterError`].
//!
//! A panicking or dropped task resolves as [`PrinterError::IoFailure`], so
//! nothing escapes past the handle.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{Failure, PrinterError};

/// Pending result of a background operation
#[must_use = "a Completion does nothing unless awaited or handed to on_complete"]
pub struct Completion<T> {
    rx: oneshot::Receiver<Result<T, PrinterError>>,
}

impl<T: Send + 'static> Completion<T> {
    /// Run `work` on the runtime and return a handle to its result.
    pub fn spawn<F>(work: F) -> Self
    where
        F: Future<Output = Result<T, PrinterError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = tx.send(work.await);
        });
        Self { rx }
    }

    /// Already-resolved completion.
    pub fn ready(result: Result<T, PrinterError>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }

    /// Deliver the outcome to a host callback as `Ok(value)` or
    /// `Err((kind, message))`.
    pub fn on_complete<H>(self, handler: H)
    where
        H: FnOnce(Result<T, Failure>) + Send + 'static,
    {
        tokio::spawn(async move {
            handler(self.await.map_err(PrinterError::into_failure));
        });
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T, PrinterError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| match received {
            Ok(result) => result,
            Err(_) => Err(PrinterError::IoFailure(
                "background task ended without reporting".to_string(),
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_spawned_value() {
        let c = Completion::spawn(async { Ok(7) });
        assert_eq!(c.await, Ok(7));
    }

    #[tokio::test]
    async fn test_panic_becomes_io_failure() {
        let c: Completion<()> = Completion::spawn(async { panic!("boom") });
        assert!(matches!(c.await, Err(PrinterError::IoFailure(_))));
    }

    #[tokio::test]
    async fn test_on_complete_delivers_failure_pair() {
        let (tx, rx) = oneshot::channel();
        Completion::<()>::ready(Err(PrinterError::NotConnected)).on_complete(move |result| {
            let _ = tx.send(result);
        });
        let failure = rx.await.unwrap().unwrap_err();
        assert_eq!(failure.kind, ErrorKind::NotConnected);
    }
}
