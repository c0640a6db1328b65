//! Exposes the pipeline as a zero-argument procedure to whatever runtime hosts this crate.
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, OnceLock, PoisonError, RwLock};
use std::time::Duration;
use ahash::AHashMap;
use tracing::{debug, warn};
use crate::config::{get_global_settings, Settings};
use crate::pipeline::{EphemeralQuery, Reporter, Severity, TracingReporter};

/// Name the pipeline is registered and exported under.
pub const EPHEMERAL_QUERY_FN: &str = "EphemeralQuery";

pub type HostCallable = Arc<dyn Fn() + Send + Sync>;

/// The table of named, zero-argument procedures a host can call.
#[derive(Default)]
pub struct CallableRegistry {
    callables: RwLock<AHashMap<String, HostCallable>>,
}

impl CallableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callable` under `name`, returning whatever was registered there before.
    pub fn register<F>(&self, name: &str, callable: F) -> Option<HostCallable>
    where
        F: Fn() + Send + Sync + 'static,
    {
        debug!(name, "registering host callable");
        let mut callables = self.callables.write().unwrap_or_else(PoisonError::into_inner);
        callables.insert(name.to_string(), Arc::new(callable))
    }

    pub fn unregister(&self, name: &str) -> Option<HostCallable> {
        let mut callables = self.callables.write().unwrap_or_else(PoisonError::into_inner);
        callables.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        let callables = self.callables.read().unwrap_or_else(PoisonError::into_inner);
        callables.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let callables = self.callables.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = callables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Calls the procedure registered under `name`. Returns false if there is none.
    pub fn invoke(&self, name: &str) -> bool {
        // the lock is released before calling, so a callable may use the registry
        let callable = {
            let callables = self.callables.read().unwrap_or_else(PoisonError::into_inner);
            callables.get(name).cloned()
        };
        match callable {
            Some(callable) => {
                callable();
                true
            }
            None => {
                warn!(name, "no host callable registered");
                false
            }
        }
    }
}

impl std::fmt::Debug for CallableRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallableRegistry")
            .field("names", &self.names())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}

fn invoke_guarded(pipeline: &EphemeralQuery, reporter: &dyn Reporter) {
    let res = catch_unwind(AssertUnwindSafe(|| {
        pipeline.run(reporter);
    }));
    if let Err(payload) = res {
        let msg = format!("{EPHEMERAL_QUERY_FN} panicked: {}", panic_message(payload.as_ref()));
        reporter.report(Severity::Error, &msg);
    }
}

/// Registers `pipeline` under `name`. Every call runs one full cycle on a fresh head.
pub fn register_pipeline<R>(
    registry: &CallableRegistry,
    name: &str,
    pipeline: EphemeralQuery,
    reporter: R,
) -> Option<HostCallable>
where
    R: Reporter + 'static,
{
    registry.register(name, move || invoke_guarded(&pipeline, &reporter))
}

pub fn register_ephemeral_query(
    registry: &CallableRegistry,
    settings: Settings,
    reporter: Arc<dyn Reporter>,
) -> Option<HostCallable> {
    register_pipeline(registry, EPHEMERAL_QUERY_FN, EphemeralQuery::new(settings), reporter)
}

static EXPORTED_PIPELINE: OnceLock<EphemeralQuery> = OnceLock::new();

/// Entry point for hosts loading the shared library. Runs one cycle with the global settings
/// and reports through `tracing`.
#[export_name = "EphemeralQuery"]
pub extern "C" fn ephemeral_query_export() {
    let pipeline = EXPORTED_PIPELINE.get_or_init(|| EphemeralQuery::new(get_global_settings().clone()));
    invoke_guarded(pipeline, &TracingReporter);
}

/// Parks a thread until released. Keeps a process alive while its registered callables are
/// reachable.
#[derive(Debug, Default)]
pub struct KeepAlive {
    released: Mutex<bool>,
    signal: Condvar,
}

impl KeepAlive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn park(&self) {
        let mut released = self.released.lock().unwrap_or_else(PoisonError::into_inner);
        while !*released {
            released = self.signal.wait(released).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Returns true if released before `timeout` elapsed.
    pub fn park_timeout(&self, timeout: Duration) -> bool {
        let released = self.released.lock().unwrap_or_else(PoisonError::into_inner);
        let (released, _) = self
            .signal
            .wait_timeout_while(released, timeout, |released| !*released)
            .unwrap_or_else(PoisonError::into_inner);
        *released
    }

    pub fn release(&self) {
        let mut released = self.released.lock().unwrap_or_else(PoisonError::into_inner);
        *released = true;
        self.signal.notify_all();
    }

    pub fn is_released(&self) -> bool {
        *self.released.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_register_and_invoke() {
        let registry = CallableRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        assert!(registry.register("Tick", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }).is_none());

        assert!(registry.contains("Tick"));
        assert!(registry.invoke("Tick"));
        assert!(registry.invoke("Tick"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert!(!registry.invoke("Tock"));
        assert!(registry.unregister("Tick").is_some());
        assert!(!registry.invoke("Tick"));
        assert!(registry.names().is_empty());
    }

    #[test]
    fn test_register_replaces() {
        let registry = CallableRegistry::new();
        registry.register("Tick", || {});
        assert!(registry.register("Tick", || {}).is_some());
        assert_eq!(registry.names(), vec!["Tick".to_string()]);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[test]
    fn test_keep_alive() {
        let keep_alive = Arc::new(KeepAlive::new());
        assert!(!keep_alive.park_timeout(Duration::from_millis(10)));

        let releaser = keep_alive.clone();
        let handle = std::thread::spawn(move || releaser.release());
        keep_alive.park();
        handle.join().unwrap();
        assert!(keep_alive.is_released());
        assert!(keep_alive.park_timeout(Duration::from_millis(10)));
    }
}
