//! Ordered resource ownership with reverse-order release.
//!
//! A node records everything it acquires (sockets, connections, spawned
//! tasks) in its [`ResourceSet`]. Releasing the set undoes the acquisitions
//! last-in first-out. A failing or panicking release is logged and the
//! remaining releases still run.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};

use domino_id::NodeName;
use tracing::{debug, warn};

type Release = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

struct Resource {
    label: &'static str,
    release: Release,
}

/// Resources acquired by a single node, released in reverse order.
pub struct ResourceSet {
    owner: NodeName,
    resources: Vec<Resource>,
    generation: u64,
}

impl ResourceSet {
    pub(crate) fn new(owner: NodeName) -> Self {
        Self {
            owner,
            resources: Vec::new(),
            generation: 0,
        }
    }

    /// Register a release action.
    pub fn keep<F>(&mut self, release: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.resources.push(Resource {
            label: "release",
            release: Box::new(release),
        });
    }

    /// Take ownership of `value`; it is dropped on release.
    pub fn hold<T: Send + 'static>(&mut self, value: T) {
        self.resources.push(Resource {
            label: std::any::type_name::<T>(),
            release: Box::new(move || {
                drop(value);
                Ok(())
            }),
        });
    }

    /// Spawn a task on the current runtime that is aborted on release.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.resources.push(Resource {
            label: "task",
            release: Box::new(move || {
                handle.abort();
                Ok(())
            }),
        });
    }

    /// Number of resources currently held.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if nothing is held.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Bumped every time the node stops or fails and drops its resources.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Release everything and start a new generation.
    pub(crate) fn reset(&mut self) {
        self.release_all();
        self.generation += 1;
    }

    /// Release everything, last acquired first.
    ///
    /// Every release is attempted; failures are logged and swallowed.
    pub fn release_all(&mut self) {
        if self.resources.is_empty() {
            return;
        }

        debug!(
            node = %self.owner,
            count = self.resources.len(),
            "Releasing resources"
        );

        while let Some(resource) = self.resources.pop() {
            let label = resource.label;
            match catch_unwind(AssertUnwindSafe(resource.release)) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(node = %self.owner, resource = label, error = %e, "Failed to release resource");
                }
                Err(_) => {
                    warn!(node = %self.owner, resource = label, "Resource release panicked");
                }
            }
        }
    }
}

impl Drop for ResourceSet {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl std::fmt::Debug for ResourceSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceSet")
            .field("owner", &self.owner)
            .field("held", &self.resources.len())
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn set() -> ResourceSet {
        ResourceSet::new(NodeName::new("Test", 1).unwrap())
    }

    #[test]
    fn test_release_reverse_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut resources = set();

        for i in 0..3 {
            let order = Arc::clone(&order);
            resources.keep(move || {
                order.lock().unwrap().push(i);
                Ok(())
            });
        }
        resources.release_all();

        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
        assert!(resources.is_empty());
    }

    #[test]
    fn test_failures_do_not_stop_release() {
        let released = Arc::new(Mutex::new(Vec::new()));
        let mut resources = set();

        let r = Arc::clone(&released);
        resources.keep(move || {
            r.lock().unwrap().push("first");
            Ok(())
        });
        resources.keep(|| panic!("stuck"));
        resources.keep(|| Err(anyhow::anyhow!("broken")));
        resources.release_all();

        assert_eq!(*released.lock().unwrap(), vec!["first"]);
    }

    #[test]
    fn test_generation_bumps_on_reset_only() {
        let mut resources = set();
        assert_eq!(resources.generation(), 0);
        resources.release_all();
        assert_eq!(resources.generation(), 0);
        resources.reset();
        resources.reset();
        assert_eq!(resources.generation(), 2);
    }

    #[test]
    fn test_hold_drops_value() {
        let value = Arc::new(());
        let mut resources = set();
        resources.hold(Arc::clone(&value));
        assert_eq!(Arc::strong_count(&value), 2);

        resources.release_all();
        assert_eq!(Arc::strong_count(&value), 1);
    }

    #[tokio::test]
    async fn test_spawned_task_aborted() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let mut resources = set();
        resources.spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await;
        });

        resources.release_all();
        // The sender is dropped when the task is aborted.
        assert!(rx.await.is_err());
    }
}
