//! Registry of in-flight cache work.
//!
//! `close` waits for this registry to drain before it shuts the persistent
//! tier. Every `set` and every sweep registers itself for its whole duration
//! through a [`TaskGuard`].

use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct BusyTasks {
    names: Arc<Mutex<Vec<String>>>,
}

impl BusyTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task. It stays registered until the guard drops.
    pub fn register(&self, name: impl Into<String>) -> TaskGuard {
        let name = name.into();
        match self.names.lock() {
            Ok(mut names) => names.push(name.clone()),
            Err(poisoned) => poisoned.into_inner().push(name.clone()),
        }
        TaskGuard {
            tasks: self.clone(),
            name,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        match self.names.lock() {
            Ok(names) => names.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Snapshot of the registered task names, oldest first.
    pub fn names(&self) -> Vec<String> {
        match self.names.lock() {
            Ok(names) => names.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn remove(&self, name: &str) {
        let mut names = match self.names.lock() {
            Ok(names) => names,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(pos) = names.iter().position(|n| n == name) {
            names.remove(pos);
        }
    }
}

/// Deregisters its task on drop.
#[derive(Debug)]
pub struct TaskGuard {
    tasks: BusyTasks,
    name: String,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.tasks.remove(&self.name);
    }
}
