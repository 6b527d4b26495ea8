//! Update listeners

use std::sync::{Arc, RwLock};

use crate::token::TokenRecord;

/// Receives every stored or updated token
pub trait TokenListener: Send + Sync {
    fn on_token(&self, record: &TokenRecord);
}

impl<F> TokenListener for F
where
    F: Fn(&TokenRecord) + Send + Sync,
{
    fn on_token(&self, record: &TokenRecord) {
        self(record)
    }
}

#[derive(Default)]
pub struct Listeners {
    listeners: RwLock<Vec<Arc<dyn TokenListener>>>,
}

impl Listeners {
    pub fn add(&self, listener: Arc<dyn TokenListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    pub fn notify(&self, record: &TokenRecord) {
        let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner()).clone();
        for listener in listeners {
            listener.on_token(record);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_closures_are_listeners() {
        let listeners = Listeners::default();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        listeners.add(Arc::new(move |_: &TokenRecord| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let record = TokenRecord::new("Mint111", chrono::Utc::now());
        listeners.notify(&record);
        listeners.notify(&record);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(listeners.len(), 1);
    }
}
