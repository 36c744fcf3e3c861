//! Core traits for FerroSync operations
//!
//! Cancellation is cooperative: long running work holds a
//! [`CancellationContext`] and checks it at batch and object boundaries.

use crate::{Error, Result};
use tokio_util::sync::CancellationToken;

/// Trait for operation cancellation
pub trait Cancellable {
    /// Cancel the operation
    fn cancel(&self);

    /// Check if the operation is cancelled
    fn is_cancelled(&self) -> bool;

    /// Fail with [`Error::Cancelled`] once cancellation was requested
    fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Trait for things addressed by a name, such as sync profiles
pub trait Identifiable {
    /// Get the name
    fn name(&self) -> &str;
}

/// Cancellation handle passed through every call of a sync run
#[derive(Debug, Clone, Default)]
pub struct CancellationContext {
    token: CancellationToken,
}

impl CancellationContext {
    /// Create a new, uncancelled context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context from an existing token
    pub fn from_token(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Child context, cancelled together with this one
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Underlying token, for use in `tokio::select!`
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Cancellable for CancellationContext {
    fn cancel(&self) {
        self.token.cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_context() {
        let context = CancellationContext::new();
        assert!(context.check_cancelled().is_ok());

        let child = context.child();
        context.cancel();

        assert!(child.is_cancelled());
        assert_eq!(child.check_cancelled(), Err(Error::Cancelled));
    }

    #[test]
    fn test_cancelled_future_resolves() {
        let context = CancellationContext::new();
        let clone = context.clone();
        clone.cancel();

        tokio_test::block_on(context.token().cancelled());
        assert!(context.is_cancelled());
    }
}
