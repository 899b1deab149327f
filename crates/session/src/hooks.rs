// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process shutdown hook registry.
//!
//! Hooks run on the thread calling [`ShutdownHooks::fire`] and must only
//! enqueue work (typically a state-switch task); they never touch session
//! state directly.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

type Hook = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct HookMap {
    next_id: u64,
    hooks: HashMap<u64, Hook>,
}

/// Registry of shutdown callbacks.
#[derive(Clone, Default)]
pub struct ShutdownHooks {
    inner: Arc<Mutex<HookMap>>,
}

impl ShutdownHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `hook`; it stays installed until the returned guard drops.
    #[must_use]
    pub fn add_hook(&self, hook: impl Fn() + Send + Sync + 'static) -> HookGuard {
        let mut map = self.inner.lock();
        let id = map.next_id;
        map.next_id += 1;
        map.hooks.insert(id, Arc::new(hook));
        HookGuard { inner: Arc::clone(&self.inner), id }
    }

    /// Run every installed hook once.
    pub fn fire(&self) {
        let hooks: Vec<Hook> = self.inner.lock().hooks.values().cloned().collect();
        for hook in hooks {
            hook();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Deregisters its hook on drop.
pub struct HookGuard {
    inner: Arc<Mutex<HookMap>>,
    id: u64,
}

impl Drop for HookGuard {
    fn drop(&mut self) {
        self.inner.lock().hooks.remove(&self.id);
    }
}

#[cfg(test)]
#[path = "hooks_tests.rs"]
mod tests;
