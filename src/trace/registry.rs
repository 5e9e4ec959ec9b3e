//! The instrumentation plugin table.
//!
//! Instrumentations register here keyed by library identity; the tracing
//! runtime activates and deactivates them as a group, and each adapter
//! consults its own activation state before tracing an operation.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// One library integration.
///
/// Implementations wrap a specific client library's call sites and drive
/// spans through the [`Tracer`](crate::Tracer); the engine only needs to
/// know their identity and activation hooks.
pub trait Instrumentation: Send + Sync + fmt::Debug {
    /// The library identity this instrumentation covers, e.g. `"mysql"`.
    fn name(&self) -> &str;

    /// Called when tracing is switched on.
    fn activate(&self) {}

    /// Called when tracing is switched off.
    fn deactivate(&self) {}
}

#[derive(Debug)]
struct RegistryEntry {
    instrumentation: Arc<dyn Instrumentation>,
    active: bool,
}

/// A lookup table of registered instrumentations, keyed by library identity.
#[derive(Debug, Default)]
pub struct InstrumentationRegistry {
    entries: Mutex<HashMap<String, RegistryEntry>>,
}

impl InstrumentationRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        InstrumentationRegistry::default()
    }

    /// Registers an instrumentation, replacing any previous registration
    /// for the same library. Registrations start inactive.
    pub fn register(&self, instrumentation: Arc<dyn Instrumentation>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                instrumentation.name().to_owned(),
                RegistryEntry {
                    instrumentation,
                    active: false,
                },
            );
        }
    }

    /// Whether the instrumentation for `name` is registered and active.
    pub fn is_active(&self, name: &str) -> bool {
        self.entries
            .lock()
            .map(|entries| entries.get(name).map(|entry| entry.active).unwrap_or(false))
            .unwrap_or(false)
    }

    /// Activates all registered instrumentations.
    pub fn activate_all(&self) {
        self.for_each(|entry| {
            entry.active = true;
            entry.instrumentation.activate();
        });
    }

    /// Deactivates all registered instrumentations.
    pub fn deactivate_all(&self) {
        self.for_each(|entry| {
            entry.active = false;
            entry.instrumentation.deactivate();
        });
    }

    /// Sets the activation state of a single instrumentation. Unknown names
    /// are ignored.
    pub fn set_active(&self, name: &str, active: bool) {
        if let Ok(mut entries) = self.entries.lock() {
            if let Some(entry) = entries.get_mut(name) {
                entry.active = active;
                if active {
                    entry.instrumentation.activate();
                } else {
                    entry.instrumentation.deactivate();
                }
            }
        }
    }

    /// The registered library identities.
    pub fn names(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn for_each(&self, mut f: impl FnMut(&mut RegistryEntry)) {
        if let Ok(mut entries) = self.entries.lock() {
            for entry in entries.values_mut() {
                f(entry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingInstrumentation {
        activations: AtomicUsize,
    }

    impl Instrumentation for CountingInstrumentation {
        fn name(&self) -> &str {
            "mysql"
        }

        fn activate(&self) {
            self.activations.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn registrations_start_inactive() {
        let registry = InstrumentationRegistry::new();
        registry.register(Arc::new(CountingInstrumentation::default()));
        assert!(!registry.is_active("mysql"));
        assert!(!registry.is_active("unknown"));
    }

    #[test]
    fn activate_all_flips_state_and_calls_hooks() {
        let registry = InstrumentationRegistry::new();
        let instrumentation = Arc::new(CountingInstrumentation::default());
        registry.register(instrumentation.clone());

        registry.activate_all();
        assert!(registry.is_active("mysql"));
        assert_eq!(instrumentation.activations.load(Ordering::Relaxed), 1);

        registry.deactivate_all();
        assert!(!registry.is_active("mysql"));
    }

    #[test]
    fn single_instrumentation_can_be_toggled() {
        let registry = InstrumentationRegistry::new();
        registry.register(Arc::new(CountingInstrumentation::default()));

        registry.set_active("mysql", true);
        assert!(registry.is_active("mysql"));
        registry.set_active("mysql", false);
        assert!(!registry.is_active("mysql"));

        // Unknown names are ignored.
        registry.set_active("pg", true);
        assert!(!registry.is_active("pg"));
    }

    #[test]
    fn names_lists_registrations() {
        let registry = InstrumentationRegistry::new();
        registry.register(Arc::new(CountingInstrumentation::default()));
        assert_eq!(registry.names(), vec!["mysql".to_owned()]);
    }
}
