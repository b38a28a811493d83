// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock driver for testing.
//!
//! Tracks container state in memory and records every call, without touching
//! a container runtime. Builds can be held at a gate to exercise cancellation.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use super::traits::*;
use crate::app::{AppId, ContainerStatus, container_name};

/// A recorded driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Build(AppId),
    Run(AppId),
    Start(AppId),
    Stop(AppId),
    Remove(AppId),
    Logs(AppId),
}

/// Mock driver for testing.
pub struct MockDriver {
    containers: Mutex<HashMap<AppId, ContainerStatus>>,
    calls: Mutex<Vec<DriverCall>>,
    builds_started: AtomicUsize,
    /// Builds wait until the gate is open
    gate: watch::Sender<bool>,
    /// Simulated build time
    pub build_delay: Duration,
    /// If true, builds fail
    pub fail_builds: AtomicBool,
    /// If true, every operation fails and status reports unknown
    pub fail_all: AtomicBool,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    /// Create a new mock driver with an open gate.
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            containers: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            builds_started: AtomicUsize::new(0),
            gate,
            build_delay: Duration::from_millis(5),
            fail_builds: AtomicBool::new(false),
            fail_all: AtomicBool::new(false),
        }
    }

    /// Create a mock driver whose builds fail.
    pub fn failing_builds() -> Self {
        let driver = Self::new();
        driver.fail_builds.store(true, Ordering::SeqCst);
        driver
    }

    /// Create a mock driver where every operation fails.
    pub fn always_failing() -> Self {
        let driver = Self::new();
        driver.fail_all.store(true, Ordering::SeqCst);
        driver
    }

    /// Make builds block until [`release_builds`](Self::release_builds).
    pub fn hold_builds(&self) {
        self.gate.send_replace(false);
    }

    /// Let held and future builds proceed.
    pub fn release_builds(&self) {
        self.gate.send_replace(true);
    }

    /// Number of builds that have started.
    pub fn builds_started(&self) -> usize {
        self.builds_started.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` builds have started.
    pub async fn wait_for_builds(&self, n: usize) {
        while self.builds_started() < n {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    /// All calls so far.
    pub fn calls(&self) -> Vec<DriverCall> {
        self.lock_calls().clone()
    }

    /// Calls matching a predicate.
    pub fn count_calls(&self, pred: impl Fn(&DriverCall) -> bool) -> usize {
        self.lock_calls().iter().filter(|c| pred(c)).count()
    }

    /// Force the container status for an app.
    pub fn set_status(&self, app_id: AppId, status: ContainerStatus) {
        let mut containers = self.lock_containers();
        if status == ContainerStatus::NotFound {
            containers.remove(&app_id);
        } else {
            containers.insert(app_id, status);
        }
    }

    fn record(&self, call: DriverCall) {
        self.lock_calls().push(call);
    }

    fn lock_calls(&self) -> std::sync::MutexGuard<'_, Vec<DriverCall>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_containers(&self) -> std::sync::MutexGuard<'_, HashMap<AppId, ContainerStatus>> {
        self.containers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> Result<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(DriverError::Other("mock runtime unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RuntimeDriver for MockDriver {
    fn driver_type(&self) -> &'static str {
        "mock"
    }

    async fn build(&self, spec: &BuildSpec) -> Result<Artifact> {
        self.record(DriverCall::Build(spec.app_id));
        self.builds_started.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let mut gate = self.gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map(|_| ())
            .map_err(|_| DriverError::Other("build gate closed".to_string()))?;

        if !self.build_delay.is_zero() {
            tokio::time::sleep(self.build_delay).await;
        }

        if self.fail_builds.load(Ordering::SeqCst) {
            return Err(DriverError::BuildFailed(format!(
                "mock build failed for {}",
                spec.app_name
            )));
        }

        Ok(Artifact {
            app_id: spec.app_id,
            container_name: spec.container_name(),
            context_dir: None,
        })
    }

    async fn run(&self, artifact: &Artifact) -> Result<()> {
        self.record(DriverCall::Run(artifact.app_id));
        self.check_available()?;
        self.lock_containers()
            .insert(artifact.app_id, ContainerStatus::Running);
        Ok(())
    }

    async fn start(&self, app_id: AppId) -> Result<()> {
        self.record(DriverCall::Start(app_id));
        self.check_available()?;
        let mut containers = self.lock_containers();
        match containers.get_mut(&app_id) {
            Some(status) => {
                *status = ContainerStatus::Running;
                Ok(())
            }
            None => Err(DriverError::NotFound(container_name(app_id))),
        }
    }

    async fn stop(&self, app_id: AppId) -> Result<()> {
        self.record(DriverCall::Stop(app_id));
        self.check_available()?;
        if let Some(status) = self.lock_containers().get_mut(&app_id) {
            *status = ContainerStatus::Exited;
        }
        Ok(())
    }

    async fn remove(&self, app_id: AppId) -> Result<()> {
        self.record(DriverCall::Remove(app_id));
        self.check_available()?;
        self.lock_containers().remove(&app_id);
        Ok(())
    }

    async fn status(&self, app_id: AppId) -> ContainerStatus {
        if self.fail_all.load(Ordering::SeqCst) {
            return ContainerStatus::Unknown;
        }
        self.lock_containers()
            .get(&app_id)
            .copied()
            .unwrap_or(ContainerStatus::NotFound)
    }

    async fn logs(&self, app_id: AppId, tail: usize) -> Result<String> {
        self.record(DriverCall::Logs(app_id));
        self.check_available()?;
        if !self.lock_containers().contains_key(&app_id) {
            return Err(DriverError::NotFound(container_name(app_id)));
        }
        Ok(mock_lines(&container_name(app_id), tail))
    }

    async fn host_logs(&self, tail: usize) -> Result<String> {
        self.check_available()?;
        Ok(mock_lines("playground", tail))
    }

    async fn health_check(&self) -> Result<()> {
        self.check_available()
    }
}

fn mock_lines(source: &str, tail: usize) -> String {
    (1..=tail.min(3))
        .map(|i| format!("{} line {}\n", source, i))
        .collect()
}
