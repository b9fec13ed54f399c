use std::sync::{Arc, PoisonError, RwLock};

use crate::errors::TrackerError;
use crate::notify::NotificationText;

type CompleteFn<T> = Arc<dyn Fn(Option<&T>) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&TrackerError) + Send + Sync>;
type FragmentFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Consumer callbacks and notification text for one tracker.
pub struct Callbacks<T> {
    on_complete: Option<CompleteFn<T>>,
    on_error: Option<ErrorFn>,
    on_fragment: Option<FragmentFn>,
    text: NotificationText,
}

impl<T> Default for Callbacks<T> {
    fn default() -> Self {
        Self {
            on_complete: None,
            on_error: None,
            on_fragment: None,
            text: NotificationText::default(),
        }
    }
}

impl<T> Clone for Callbacks<T> {
    fn clone(&self) -> Self {
        Self {
            on_complete: self.on_complete.clone(),
            on_error: self.on_error.clone(),
            on_fragment: self.on_fragment.clone(),
            text: self.text.clone(),
        }
    }
}

impl<T> Callbacks<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once when the tracked run completes, with its output if it has one.
    pub fn on_complete(mut self, f: impl Fn(Option<&T>) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(f));
        self
    }

    /// Called once per failed/cancelled run, and for every subscription error.
    pub fn on_error(mut self, f: impl Fn(&TrackerError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Called once per stream fragment, in stream order.
    pub fn on_fragment(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_fragment = Some(Arc::new(f));
        self
    }

    pub fn notification_text(mut self, text: NotificationText) -> Self {
        self.text = text;
        self
    }
}

/// Shared slot holding the current `Callbacks`.
///
/// Long-lived sessions read through the slot at call time, so replacing the
/// callbacks takes effect immediately without touching subscriptions. The lock
/// is never held while a callback runs.
pub struct CallbackSlot<T> {
    inner: Arc<RwLock<Callbacks<T>>>,
}

impl<T> Clone for CallbackSlot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for CallbackSlot<T> {
    fn default() -> Self {
        Self::new(Callbacks::default())
    }
}

impl<T> CallbackSlot<T> {
    pub fn new(callbacks: Callbacks<T>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(callbacks)),
        }
    }

    /// Swaps in new callbacks.
    pub fn replace(&self, callbacks: Callbacks<T>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = callbacks;
    }

    fn current(&self) -> Callbacks<T> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn wants_fragments(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .on_fragment
            .is_some()
    }

    pub(crate) fn text(&self) -> NotificationText {
        self.current().text
    }

    pub(crate) fn complete(&self, output: Option<&T>) {
        if let Some(f) = self.current().on_complete {
            f(output);
        }
    }

    pub(crate) fn error(&self, error: &TrackerError) {
        if let Some(f) = self.current().on_error {
            f(error);
        }
    }

    pub(crate) fn fragment(&self, text: &str) {
        if let Some(f) = self.current().on_fragment {
            f(text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn replaced_callbacks_are_used_on_next_call() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = seen.clone();
        let slot: CallbackSlot<()> =
            CallbackSlot::new(Callbacks::new().on_fragment(move |t| first.lock().unwrap().push(format!("1:{t}"))));
        slot.fragment("a");

        let second = seen.clone();
        slot.replace(Callbacks::new().on_fragment(move |t| second.lock().unwrap().push(format!("2:{t}"))));
        slot.fragment("b");

        assert_eq!(*seen.lock().unwrap(), vec!["1:a".to_string(), "2:b".to_string()]);
    }

    #[test]
    fn callback_may_replace_slot_while_running() {
        let slot: CallbackSlot<u32> = CallbackSlot::default();
        let inner = slot.clone();
        slot.replace(Callbacks::new().on_complete(move |_| inner.replace(Callbacks::new())));
        slot.complete(Some(&1));
        assert!(!slot.wants_fragments());
    }

    #[test]
    fn missing_callbacks_are_noops() {
        let slot: CallbackSlot<u32> = CallbackSlot::default();
        slot.complete(None);
        slot.error(&TrackerError::Closed);
        slot.fragment("x");
        assert!(!slot.wants_fragments());
    }
}
