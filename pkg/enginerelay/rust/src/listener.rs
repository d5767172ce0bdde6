// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Receives every line an engine writes to its standard output.
///
/// Called synchronously from the supervisor's I/O loop, so implementations
/// must not block.
pub trait OutputListener: Send + Sync {
    fn on_engine_output(&self, line: &str);
}

/// Ordered publish/subscribe registry of output listeners.
///
/// Holds weak references: a subscriber that is dropped elsewhere is pruned on
/// the next notification.
#[derive(Default)]
pub struct OutputFanout {
    subscribers: Mutex<Vec<Weak<dyn OutputListener>>>,
}

impl OutputFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener`. Subscribing the same listener twice is a no-op.
    pub fn subscribe<L: OutputListener + 'static>(&self, listener: &Arc<L>) {
        let weak: Weak<dyn OutputListener> = Arc::downgrade(listener) as Weak<dyn OutputListener>;
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        if subscribers.iter().any(|s| Weak::ptr_eq(s, &weak)) {
            return;
        }
        subscribers.push(weak);
    }

    pub fn subscriber_count(&self) -> usize {
        let subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.iter().filter(|s| s.strong_count() > 0).count()
    }

    /// Deliver `line` to every live subscriber in registration order.
    pub fn notify(&self, line: &str) {
        // Listeners run outside the registry lock so they may subscribe others.
        let live: Vec<Arc<dyn OutputListener>> = {
            let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
            subscribers.retain(|s| s.strong_count() > 0);
            subscribers.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in live {
            listener.on_engine_output(line);
        }
    }
}

impl OutputListener for OutputFanout {
    fn on_engine_output(&self, line: &str) {
        self.notify(line);
    }
}
