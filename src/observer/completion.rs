//! One-shot completion guards for observer round-trips.
//!
//! Every asynchronous hand-off to the observer carries a `Completion`. It
//! resolves exactly once: either the observer calls [`Completion::complete`],
//! or the guard is dropped unresolved and the fallback value is delivered
//! instead. A transport that loses a message therefore still unblocks the
//! sender.

use crate::core::model::RulePermission;

type Handler<T> = Box<dyn FnOnce(T) + Send>;

/// A use-once result slot with a drop-time fallback.
#[must_use = "dropping a completion resolves it with its fallback value"]
pub struct Completion<T> {
    handler: Option<Handler<T>>,
    fallback: Option<T>,
}

/// Acknowledgment for a delivered rules diff or packet batch.
/// Dropping it unresolved reports a failed delivery.
pub type DeliveryAck = Completion<bool>;

/// Answer slot for an interactive permission request.
/// Dropping it unresolved yields the configured abandoned-ask permission.
pub type PermissionReply = Completion<RulePermission>;

impl<T> Completion<T> {
    pub fn new<F>(fallback: T, handler: F) -> Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        Self {
            handler: Some(Box::new(handler)),
            fallback: Some(fallback),
        }
    }

    /// Resolve with `value`, suppressing the fallback.
    pub fn complete(mut self, value: T) {
        self.fallback = None;
        if let Some(handler) = self.handler.take() {
            handler(value);
        }
    }
}

impl Completion<bool> {
    /// Delivery acknowledgment whose fallback is failure.
    pub fn delivery<F>(handler: F) -> Self
    where
        F: FnOnce(bool) + Send + 'static,
    {
        Self::new(false, handler)
    }

    pub fn succeed(self) {
        self.complete(true);
    }

    pub fn fail(self) {
        self.complete(false);
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if let (Some(handler), Some(fallback)) = (self.handler.take(), self.fallback.take()) {
            handler(fallback);
        }
    }
}

impl<T> std::fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("resolved", &self.handler.is_none())
            .finish()
    }
}
