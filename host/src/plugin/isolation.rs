//! Plugin Isolation and Panic Safety
//!
//! Panic isolation for plugin calls using `catch_unwind`. Panics in plugin
//! code are caught and converted to error messages, preventing one broken
//! plugin from crashing the host.
//!
//! # Safety Considerations
//!
//! - `catch_unwind` only catches panics, not aborts
//! - Only the direct poll path of a wrapped future is covered; panics in
//!   tasks a plugin spawns itself are not caught

use std::any::Any;
use std::future::Future;
use std::panic::{AssertUnwindSafe, UnwindSafe, catch_unwind};
use std::pin::Pin;
use std::task::{Context, Poll};

/// Call a synchronous plugin function, converting a panic into `Err(message)`.
pub fn call_plugin_safely<F, T>(plugin_fn: F) -> Result<T, String>
where
    F: FnOnce() -> T + UnwindSafe,
{
    match catch_unwind(plugin_fn) {
        Ok(value) => Ok(value),
        Err(panic_info) => {
            let msg = extract_panic_message(&panic_info);
            tracing::error!(message = %msg, "Plugin panicked");
            Err(msg)
        }
    }
}

/// Await a plugin future, converting a panic during any poll into
/// `Err(message)`.
///
/// The future itself must already exist; catch panics during its creation
/// separately with [`call_plugin_safely`].
pub async fn catch_unwind_future<F: Future>(future: F) -> Result<F::Output, String> {
    // Wrapper future that catches panics during poll
    struct CatchUnwindFuture<F> {
        inner: F,
    }

    impl<F: Future> Future for CatchUnwindFuture<AssertUnwindSafe<F>> {
        type Output = Result<F::Output, Box<dyn Any + Send>>;

        fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            // SAFETY: We're only projecting to the inner field
            let inner = unsafe { self.map_unchecked_mut(|s| &mut s.inner) };

            match catch_unwind(AssertUnwindSafe(|| inner.poll(cx))) {
                Ok(Poll::Ready(output)) => Poll::Ready(Ok(output)),
                Ok(Poll::Pending) => Poll::Pending,
                Err(panic_info) => Poll::Ready(Err(panic_info)),
            }
        }
    }

    let catch_future = CatchUnwindFuture {
        inner: AssertUnwindSafe(future),
    };

    match catch_future.await {
        Ok(output) => Ok(output),
        Err(panic_info) => {
            let msg = extract_panic_message(&panic_info);
            tracing::error!(message = %msg, "Plugin panicked during async execution");
            Err(msg)
        }
    }
}

/// Extract a human-readable message from panic info.
///
/// Handles the common panic payload types (&str, String) and falls back to a
/// generic message for anything else.
pub fn extract_panic_message(panic_info: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic (non-string payload)".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_plugin_safely_success() {
        let result = call_plugin_safely(|| 42);
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_call_plugin_safely_panic_str() {
        let result: Result<i32, String> = call_plugin_safely(|| {
            panic!("test panic message");
        });
        assert!(result.unwrap_err().contains("test panic message"));
    }

    #[test]
    fn test_call_plugin_safely_panic_string() {
        let result: Result<i32, String> = call_plugin_safely(|| {
            panic!("{}", "dynamic panic message".to_string());
        });
        assert!(result.unwrap_err().contains("dynamic panic message"));
    }

    #[tokio::test]
    async fn test_catch_unwind_future_success() {
        let result = catch_unwind_future(async { 7 }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_catch_unwind_future_panic() {
        let result: Result<i32, String> = catch_unwind_future(async {
            panic!("async panic");
        })
        .await;
        assert!(result.unwrap_err().contains("async panic"));
    }
}
