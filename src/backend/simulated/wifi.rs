//! Simulated WiFi interface

use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex;

use crate::backend::WifiBackend;
use crate::core::error::{WifiError, WifiResult};
use crate::core::types::{NetworkInfo, NetworkSecurity};

/// Address handed out to provisioned devices
pub const SIMULATED_DEVICE_IP: &str = "192.168.1.100";

/// Internal state for the simulated interface
#[derive(Debug, Clone)]
struct WifiState {
    scan_results: Vec<NetworkInfo>,
    should_fail_scan: bool,
    should_fail_connect: bool,
    should_fail_delivery: bool,
    joined_ssid: Option<String>,
    assigned_ip: String,
    latency: Duration,
    deliveries: Vec<(String, Option<String>)>,
}

/// Simulated WiFi interface
///
/// Allows configuring behavior for tests without requiring actual hardware.
#[derive(Debug, Clone)]
pub struct SimulatedWifi {
    inner: Arc<Mutex<WifiState>>,
}

impl SimulatedWifi {
    /// Interface that sees three networks in range
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(WifiState {
                scan_results: vec![
                    NetworkInfo::new("HomeWiFi", NetworkSecurity::Wpa2, 3),
                    NetworkInfo::new("OfficeWiFi", NetworkSecurity::Wpa3, 2),
                    NetworkInfo::new("GuestNetwork", NetworkSecurity::None, 1),
                ],
                should_fail_scan: false,
                should_fail_connect: false,
                should_fail_delivery: false,
                joined_ssid: None,
                assigned_ip: SIMULATED_DEVICE_IP.to_string(),
                latency: Duration::ZERO,
                deliveries: vec![],
            })),
        }
    }

    /// Configure the networks returned on scan
    pub async fn set_scan_results(&self, networks: Vec<NetworkInfo>) {
        self.inner.lock().await.scan_results = networks;
    }

    pub async fn set_scan_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_scan = should_fail;
    }

    pub async fn set_connect_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_connect = should_fail;
    }

    pub async fn set_delivery_failure(&self, should_fail: bool) {
        self.inner.lock().await.should_fail_delivery = should_fail;
    }

    pub async fn set_latency(&self, latency: Duration) {
        self.inner.lock().await.latency = latency;
    }

    pub async fn joined_ssid(&self) -> Option<String> {
        self.inner.lock().await.joined_ssid.clone()
    }

    /// `(ssid, device_name)` of every credential hand-over
    pub async fn deliveries(&self) -> Vec<(String, Option<String>)> {
        self.inner.lock().await.deliveries.clone()
    }

    async fn delay(&self) {
        let latency = self.inner.lock().await.latency;
        tokio::time::sleep(latency).await;
    }
}

impl Default for SimulatedWifi {
    fn default() -> Self {
        Self::new()
    }
}

impl WifiBackend for SimulatedWifi {
    async fn scan(&self) -> WifiResult<Vec<NetworkInfo>> {
        self.delay().await;
        let state = self.inner.lock().await;
        if state.should_fail_scan {
            Err(WifiError::ScanFailed("interface busy".into()))
        } else {
            Ok(state.scan_results.clone())
        }
    }

    async fn connect(&self, ssid: &str, _password: &str) -> WifiResult<()> {
        if ssid.is_empty() || ssid.len() > 32 {
            return Err(WifiError::InvalidSsid(ssid.to_string()));
        }
        self.delay().await;

        let mut state = self.inner.lock().await;
        if state.should_fail_connect {
            Err(WifiError::ConnectionFailed(format!("{ssid} rejected association")))
        } else {
            state.joined_ssid = Some(ssid.to_string());
            Ok(())
        }
    }

    async fn disconnect(&self) -> WifiResult<()> {
        self.inner.lock().await.joined_ssid = None;
        Ok(())
    }

    async fn deliver_credentials(
        &self,
        ssid: &str,
        _password: &str,
        device_name: Option<&str>,
    ) -> WifiResult<String> {
        self.delay().await;

        let mut state = self.inner.lock().await;
        if state.joined_ssid.is_none() {
            return Err(WifiError::CredentialDeliveryFailed(
                "not associated with a device".into(),
            ));
        }
        if state.should_fail_delivery {
            return Err(WifiError::CredentialDeliveryFailed(
                "device did not acknowledge credentials".into(),
            ));
        }
        state
            .deliveries
            .push((ssid.to_string(), device_name.map(str::to_string)));
        Ok(state.assigned_ip.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_scan_results() {
        let backend = SimulatedWifi::new();
        let results = backend.scan().await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].ssid, "HomeWiFi");
        assert_eq!(results[1].security, NetworkSecurity::Wpa3);
    }

    #[tokio::test]
    async fn test_scan_failure() {
        let backend = SimulatedWifi::new();
        backend.set_scan_failure(true).await;
        assert!(matches!(backend.scan().await, Err(WifiError::ScanFailed(_))));
    }

    #[tokio::test]
    async fn test_connect_and_deliver() {
        let backend = SimulatedWifi::new();

        let result = backend.deliver_credentials("HomeWiFi", "pw", None).await;
        assert!(matches!(result, Err(WifiError::CredentialDeliveryFailed(_))));

        backend.connect("Device-AP", "").await.unwrap();
        assert_eq!(backend.joined_ssid().await, Some("Device-AP".into()));

        let ip = backend
            .deliver_credentials("HomeWiFi", "pw", Some("Kitchen"))
            .await
            .unwrap();
        assert_eq!(ip, SIMULATED_DEVICE_IP);
        assert_eq!(
            backend.deliveries().await,
            vec![("HomeWiFi".to_string(), Some("Kitchen".to_string()))]
        );

        backend.disconnect().await.unwrap();
        assert_eq!(backend.joined_ssid().await, None);
    }

    #[tokio::test]
    async fn test_invalid_ssid() {
        let backend = SimulatedWifi::new();
        assert!(matches!(
            backend.connect("", "pw").await,
            Err(WifiError::InvalidSsid(_))
        ));
    }
}
