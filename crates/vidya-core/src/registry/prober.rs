//! Periodic agent health probing
//!
//! A single prober task owns all health-flag writes; every other component
//! treats agent health as read-only.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{AgentDescriptor, CapabilityRegistry, Health};

/// Probe an agent and report its observed health
#[async_trait]
pub trait AgentProbe: Send + Sync {
    async fn probe(&self, descriptor: &AgentDescriptor) -> Health;
}

/// Periodic health prober for registered agents
pub struct HealthProber {
    registry: Arc<CapabilityRegistry>,
    probe: Arc<dyn AgentProbe>,
    interval: Duration,
}

impl HealthProber {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        probe: Arc<dyn AgentProbe>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            probe,
            interval,
        }
    }

    /// Probe every registered agent once and update the registry
    pub async fn probe_all(&self) {
        for descriptor in self.registry.all().await {
            let health = self.probe.probe(&descriptor).await;
            if health != Health::Healthy {
                warn!(agent = %descriptor.id, health = %health, "Agent probe degraded");
            } else {
                debug!(agent = %descriptor.id, "Agent probe healthy");
            }
            // The descriptor can only have been replaced, never removed, so a
            // lookup failure here just means a racing re-registration.
            let _ = self.registry.mark_health(&descriptor.id, health).await;
        }
    }

    /// Spawn the probe loop on the current runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.probe_all().await;
            }
        })
    }
}
