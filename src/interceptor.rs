//! Pre-publish interceptor chain.
//!
//! Interceptors run between a publisher and the routing step. Each one
//! receives the message and a continuation to the rest of the chain, and
//! decides to pass the message on (possibly modified), swallow it by
//! returning `Ok` without continuing, or reject it by returning an error.
//! A rejection becomes the publisher's delivery-status failure, verbatim; a
//! swallowed message is dropped without any error surfacing.
//!
//! The chain is folded once when the broker is built. Interceptors run in
//! registration order: the first registered is outermost.

use crate::error::Result;
use std::sync::{Arc, Mutex, PoisonError};

/// Continuation to the remainder of a chain.
pub trait PublishHandler<M>: Send + Sync {
    /// # Errors
    ///
    /// Whatever a downstream interceptor raises, verbatim.
    fn handle(&self, message: M) -> Result<()>;
}

/// One pluggable pre-publish step.
pub trait Interceptor<M>: Send + Sync {
    /// # Errors
    ///
    /// An error rejects the publish and is reported back to the publisher.
    fn intercept(&self, message: M, next: &dyn PublishHandler<M>) -> Result<()>;
}

/// Wraps a closure as an interceptor.
pub fn from_fn<M, F>(f: F) -> Arc<dyn Interceptor<M>>
where
    M: 'static,
    F: Fn(M, &dyn PublishHandler<M>) -> Result<()> + Send + Sync + 'static,
{
    struct FnInterceptor<F>(F);

    impl<M, F> Interceptor<M> for FnInterceptor<F>
    where
        F: Fn(M, &dyn PublishHandler<M>) -> Result<()> + Send + Sync,
    {
        fn intercept(&self, message: M, next: &dyn PublishHandler<M>) -> Result<()> {
            (self.0)(message, next)
        }
    }

    Arc::new(FnInterceptor(f))
}

struct Link<M> {
    interceptor: Arc<dyn Interceptor<M>>,
    next: Arc<dyn PublishHandler<M>>,
}

impl<M> PublishHandler<M> for Link<M> {
    fn handle(&self, message: M) -> Result<()> {
        self.interceptor.intercept(message, self.next.as_ref())
    }
}

/// An interceptor pipeline ending in a terminal handler.
pub struct InterceptorChain<M> {
    head: Arc<dyn PublishHandler<M>>,
}

impl<M: 'static> InterceptorChain<M> {
    /// Folds `interceptors` around `terminal`, right to left, so the first
    /// interceptor ends up outermost.
    #[must_use]
    pub fn new(
        interceptors: Vec<Arc<dyn Interceptor<M>>>,
        terminal: Arc<dyn PublishHandler<M>>,
    ) -> Self {
        let head = interceptors
            .into_iter()
            .rev()
            .fold(terminal, |next, interceptor| {
                Arc::new(Link { interceptor, next }) as Arc<dyn PublishHandler<M>>
            });
        Self { head }
    }

    /// Runs `message` through the chain.
    ///
    /// # Errors
    ///
    /// The first rejection raised by an interceptor, verbatim.
    pub fn publish(&self, message: M) -> Result<()> {
        self.head.handle(message)
    }
}

/// Terminal handler that captures the message surviving the chain.
///
/// After a successful [`InterceptorChain::publish`], an empty slot means
/// some interceptor swallowed the message.
pub struct CaptureSlot<M> {
    slot: Mutex<Option<M>>,
}

impl<M> CaptureSlot<M> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Takes the captured message, leaving the slot empty.
    pub fn take(&self) -> Option<M> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl<M> Default for CaptureSlot<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Send> PublishHandler<M> for CaptureSlot<M> {
    fn handle(&self, message: M) -> Result<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn chain_with_slot(
        interceptors: Vec<Arc<dyn Interceptor<String>>>,
    ) -> (InterceptorChain<String>, Arc<CaptureSlot<String>>) {
        let slot = Arc::new(CaptureSlot::new());
        let terminal = Arc::clone(&slot) as Arc<dyn PublishHandler<String>>;
        (InterceptorChain::new(interceptors, terminal), slot)
    }

    #[test]
    fn empty_chain_reaches_the_terminal() {
        let (chain, slot) = chain_with_slot(vec![]);
        chain.publish("hello".to_string()).unwrap();
        assert_eq!(slot.take(), Some("hello".to_string()));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn interceptors_run_in_registration_order() {
        let first = from_fn(|message: String, next: &dyn PublishHandler<String>| {
            next.handle(format!("{message}.first"))
        });
        let second = from_fn(|message: String, next: &dyn PublishHandler<String>| {
            next.handle(format!("{message}.second"))
        });
        let (chain, slot) = chain_with_slot(vec![first, second]);

        chain.publish("m".to_string()).unwrap();
        assert_eq!(slot.take(), Some("m.first.second".to_string()));
    }

    #[test]
    fn an_interceptor_can_swallow_the_message() {
        let gate = from_fn(|message: String, next: &dyn PublishHandler<String>| {
            if message.contains("secret") {
                Ok(())
            } else {
                next.handle(message)
            }
        });
        let (chain, slot) = chain_with_slot(vec![gate]);

        chain.publish("a secret thing".to_string()).unwrap();
        assert_eq!(slot.take(), None);

        chain.publish("public".to_string()).unwrap();
        assert_eq!(slot.take(), Some("public".to_string()));
    }

    #[test]
    fn a_rejection_propagates_verbatim_and_skips_the_rest() {
        let reject = from_fn(|_: String, _: &dyn PublishHandler<String>| {
            Err(Error::Rejected("payload too large".to_string()))
        });
        let never_runs = from_fn(|_: String, _: &dyn PublishHandler<String>| {
            panic!("must not run past a rejection")
        });
        let (chain, slot) = chain_with_slot(vec![reject, never_runs]);

        let err = chain.publish("m".to_string()).unwrap_err();
        assert_eq!(err, Error::Rejected("payload too large".to_string()));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn struct_interceptors_work_alongside_closures() {
        struct Uppercase;

        impl Interceptor<String> for Uppercase {
            fn intercept(&self, message: String, next: &dyn PublishHandler<String>) -> Result<()> {
                next.handle(message.to_uppercase())
            }
        }

        let (chain, slot) = chain_with_slot(vec![Arc::new(Uppercase)]);
        chain.publish("quiet".to_string()).unwrap();
        assert_eq!(slot.take(), Some("QUIET".to_string()));
    }

    #[test]
    fn the_chain_is_reusable_across_publishes() {
        let counter = Arc::new(Mutex::new(0));
        let seen = Arc::clone(&counter);
        let count = from_fn(move |message: String, next: &dyn PublishHandler<String>| {
            *seen.lock().unwrap() += 1;
            next.handle(message)
        });
        let (chain, slot) = chain_with_slot(vec![count]);

        for i in 0..3 {
            chain.publish(format!("m{i}")).unwrap();
            assert_eq!(slot.take(), Some(format!("m{i}")));
        }
        assert_eq!(*counter.lock().unwrap(), 3);
    }
}
