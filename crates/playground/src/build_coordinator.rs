// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Build coordinator.
//!
//! Keeps at most one build current per app. Registering a build cancels the
//! one it replaces. Cancellation is cooperative: the superseded build sees its
//! token cancelled at its next await on the runtime and stops there.
//!
//! Registrations are released by dropping the [`BuildLease`] returned from
//! [`register_and_supersede`](BuildCoordinator::register_and_supersede), so a
//! build releases on every exit path. A lease only releases its own
//! registration; a superseded build finishing late never clears its successor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::app::AppId;

#[derive(Debug)]
struct Registration {
    generation: u64,
    token: CancellationToken,
}

/// Registry of in-flight builds, one per app.
#[derive(Debug, Default)]
pub struct BuildCoordinator {
    builds: Mutex<HashMap<AppId, Registration>>,
    next_generation: AtomicU64,
}

impl BuildCoordinator {
    /// Create an empty coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `token` as the current build for `app_id`, cancelling the
    /// previous build if one is registered.
    pub fn register_and_supersede(
        self: &Arc<Self>,
        app_id: AppId,
        token: CancellationToken,
    ) -> BuildLease {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let previous = self.lock().insert(
            app_id,
            Registration {
                generation,
                token: token.clone(),
            },
        );

        if let Some(previous) = previous {
            debug!(app_id, superseded = previous.generation, "Cancelling superseded build");
            previous.token.cancel();
        }

        BuildLease {
            coordinator: Arc::clone(self),
            app_id,
            generation,
            token,
        }
    }

    /// Remove the registration for `app_id`, if any, and cancel it.
    ///
    /// Returns `true` if a build was registered.
    pub fn clear(&self, app_id: AppId) -> bool {
        match self.lock().remove(&app_id) {
            Some(registration) => {
                registration.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether a build is registered for `app_id`.
    pub fn is_building(&self, app_id: AppId) -> bool {
        self.lock().contains_key(&app_id)
    }

    /// Number of registered builds.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no build is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn release(&self, app_id: AppId, generation: u64) {
        let mut builds = self.lock();
        if builds
            .get(&app_id)
            .is_some_and(|r| r.generation == generation)
        {
            builds.remove(&app_id);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<AppId, Registration>> {
        self.builds.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A registered build. Dropping it releases the registration.
#[derive(Debug)]
pub struct BuildLease {
    coordinator: Arc<BuildCoordinator>,
    app_id: AppId,
    generation: u64,
    token: CancellationToken,
}

impl BuildLease {
    /// The build's cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether this build has been superseded or cleared.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for BuildLease {
    fn drop(&mut self) {
        self.coordinator.release(self.app_id, self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_release() {
        let coordinator = Arc::new(BuildCoordinator::new());
        let lease = coordinator.register_and_supersede(1, CancellationToken::new());
        assert!(coordinator.is_building(1));
        assert!(!lease.is_cancelled());

        drop(lease);
        assert!(!coordinator.is_building(1));
        assert!(coordinator.is_empty());
    }

    #[test]
    fn test_newer_build_cancels_previous() {
        let coordinator = Arc::new(BuildCoordinator::new());
        let first = coordinator.register_and_supersede(1, CancellationToken::new());
        let second = coordinator.register_and_supersede(1, CancellationToken::new());

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(coordinator.len(), 1);
    }

    #[test]
    fn test_superseded_lease_does_not_clear_successor() {
        let coordinator = Arc::new(BuildCoordinator::new());
        let first = coordinator.register_and_supersede(1, CancellationToken::new());
        let second = coordinator.register_and_supersede(1, CancellationToken::new());

        drop(first);
        assert!(coordinator.is_building(1));

        let third = coordinator.register_and_supersede(1, CancellationToken::new());
        assert!(second.is_cancelled());
        assert!(!third.is_cancelled());
    }

    #[test]
    fn test_apps_are_independent() {
        let coordinator = Arc::new(BuildCoordinator::new());
        let a = coordinator.register_and_supersede(1, CancellationToken::new());
        let b = coordinator.register_and_supersede(2, CancellationToken::new());

        assert!(!a.is_cancelled());
        assert!(!b.is_cancelled());
        assert_eq!(coordinator.len(), 2);
    }

    #[test]
    fn test_clear_cancels_and_is_noop_when_absent() {
        let coordinator = Arc::new(BuildCoordinator::new());
        assert!(!coordinator.clear(1));

        let lease = coordinator.register_and_supersede(1, CancellationToken::new());
        assert!(coordinator.clear(1));
        assert!(lease.is_cancelled());
        assert!(!coordinator.is_building(1));

        // Dropping the cleared lease is harmless
        drop(lease);
        assert!(coordinator.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_registrations_leave_one_current() {
        let coordinator = Arc::new(BuildCoordinator::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(async move {
                coordinator.register_and_supersede(7, CancellationToken::new())
            }));
        }

        let mut leases = Vec::new();
        for handle in handles {
            leases.push(handle.await.unwrap());
        }

        let live = leases.iter().filter(|l| !l.is_cancelled()).count();
        assert_eq!(live, 1);
        assert_eq!(coordinator.len(), 1);
    }
}
