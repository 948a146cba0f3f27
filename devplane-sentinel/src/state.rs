//! Shared sentinel state: everything the five cooperative tasks and the
//! status endpoint read or update. The cert store is the only field with
//! its own copy-on-write discipline (see `cert_store.rs`); mode and the
//! preemption counters are plain `tokio::sync` guards since they are read
//! and written far less often and don't need a lock-free swap.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use devplane_types::models::SentinelMode;

use crate::cert_store::CertStore;
use crate::config::SentinelConfig;

pub struct SentinelState {
    pub config: SentinelConfig,
    pub cert_store: Arc<CertStore>,
    mode: RwLock<SentinelMode>,
    preemption_count: AtomicU64,
    last_preemption_at: RwLock<Option<DateTime<Utc>>>,
}

impl SentinelState {
    pub fn new(config: SentinelConfig, cert_store: Arc<CertStore>) -> Self {
        Self {
            config,
            cert_store,
            mode: RwLock::new(SentinelMode::Proxy),
            preemption_count: AtomicU64::new(0),
            last_preemption_at: RwLock::new(None),
        }
    }

    pub async fn mode(&self) -> SentinelMode {
        *self.mode.read().await
    }

    pub fn preemption_count(&self) -> u64 {
        self.preemption_count.load(Ordering::SeqCst)
    }

    pub async fn last_preemption_at(&self) -> Option<DateTime<Utc>> {
        *self.last_preemption_at.read().await
    }

    /// Records a preemption and switches to MAINTENANCE. Idempotent: calling
    /// this while already in MAINTENANCE just bumps the counter again,
    /// which matches a provider reporting the same preempt event twice.
    pub async fn record_preemption_and_enter_maintenance(&self) {
        self.preemption_count.fetch_add(1, Ordering::SeqCst);
        *self.last_preemption_at.write().await = Some(Utc::now());
        *self.mode.write().await = SentinelMode::Maintenance;
    }

    /// Switches back to PROXY after the health checker observes two
    /// consecutive successful probes. Returns the recovery duration if a
    /// preemption timestamp was on record.
    pub async fn enter_proxy(&self) -> Option<chrono::Duration> {
        let recovery = self.last_preemption_at().await.map(|since| Utc::now() - since);
        *self.mode.write().await = SentinelMode::Proxy;
        recovery
    }

    pub async fn current_outage_duration(&self) -> Option<chrono::Duration> {
        if self.mode().await != SentinelMode::Maintenance {
            return None;
        }
        self.last_preemption_at().await.map(|since| Utc::now() - since)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert_store::CertStore;

    fn test_config() -> SentinelConfig {
        SentinelConfig {
            backend_internal_ip: "10.0.0.2".to_string(),
            health_port: 8080,
            forwarded_ports: vec![80, 443],
            management_ssh_port: 2222,
            maintenance_bind_addr: "0.0.0.0:8443".to_string(),
            status_bind_addr: "0.0.0.0:8081".to_string(),
            cert_export_url: "https://backend.internal:8443/certs".to_string(),
            provider_api_base_url: "https://provider.invalid".to_string(),
            provider_instance_id: "instance-1".to_string(),
            self_signed_domain: "maintenance.invalid".to_string(),
            preempt_poll_interval_secs: 10,
            health_probe_interval_secs: 15,
            cert_sync_interval_secs: 21600,
            recovery_timeout_secs: 600,
        }
    }

    fn state() -> SentinelState {
        SentinelState::new(test_config(), Arc::new(CertStore::new_with_self_signed("maintenance.invalid").unwrap()))
    }

    #[tokio::test]
    async fn starts_in_proxy_mode_with_no_outage() {
        let state = state();
        assert_eq!(state.mode().await, SentinelMode::Proxy);
        assert_eq!(state.preemption_count(), 0);
        assert!(state.current_outage_duration().await.is_none());
    }

    #[tokio::test]
    async fn preemption_enters_maintenance_and_tracks_outage() {
        let state = state();
        state.record_preemption_and_enter_maintenance().await;
        assert_eq!(state.mode().await, SentinelMode::Maintenance);
        assert_eq!(state.preemption_count(), 1);
        assert!(state.current_outage_duration().await.is_some());
    }

    #[tokio::test]
    async fn repeated_preemption_is_idempotent_but_bumps_counter() {
        let state = state();
        state.record_preemption_and_enter_maintenance().await;
        state.record_preemption_and_enter_maintenance().await;
        assert_eq!(state.mode().await, SentinelMode::Maintenance);
        assert_eq!(state.preemption_count(), 2);
    }

    #[tokio::test]
    async fn recovery_returns_to_proxy_and_clears_outage() {
        let state = state();
        state.record_preemption_and_enter_maintenance().await;
        let recovery = state.enter_proxy().await;
        assert!(recovery.is_some());
        assert_eq!(state.mode().await, SentinelMode::Proxy);
        assert!(state.current_outage_duration().await.is_none());
    }

    #[tokio::test]
    async fn recovery_without_prior_preemption_has_no_duration() {
        let state = state();
        assert!(state.enter_proxy().await.is_none());
    }
}
