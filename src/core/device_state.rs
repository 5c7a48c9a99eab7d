//! Last known device status with change notifications
//!
//! Status reports arrive from every transport's background task while clients
//! read concurrently. All writes go through one exclusive lock, and the
//! notification for a write is sent while that lock is held, so every
//! subscriber observes a device's updates in write order.

use std::collections::HashMap;

use futures::{StreamExt, stream, stream::BoxStream};
use tokio::sync::{RwLock, broadcast, watch};
use tracing::debug;

use crate::{
    core::types::DeviceStatus,
    util::{broadcast_stream, watch_stream},
};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct StatusTable {
    statuses: HashMap<String, DeviceStatus>,
    channels: HashMap<String, broadcast::Sender<DeviceStatus>>,
}

#[derive(Debug)]
pub struct DeviceStateManager {
    table: RwLock<StatusTable>,
    all: watch::Sender<HashMap<String, DeviceStatus>>,
}

impl Default for DeviceStateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStateManager {
    pub fn new() -> Self {
        let (all, _) = watch::channel(HashMap::new());
        Self {
            table: RwLock::new(StatusTable::default()),
            all,
        }
    }

    pub async fn update_device_status(&self, device_id: &str, status: DeviceStatus) {
        let mut table = self.table.write().await;
        let previous = table.statuses.insert(device_id.to_string(), status);

        let channel = table
            .channels
            .entry(device_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        let _ = channel.send(status);
        self.all.send_replace(table.statuses.clone());

        debug!(device_id, ?previous, ?status, "device status updated");
    }

    /// The last known status first, then every later update
    ///
    /// A device never reported on starts at [`DeviceStatus::Unknown`]. The
    /// stream ends when the device's status is cleared.
    pub async fn subscribe_to_device_status_changes(
        &self,
        device_id: &str,
    ) -> BoxStream<'static, DeviceStatus> {
        let mut table = self.table.write().await;
        let current = table
            .statuses
            .get(device_id)
            .copied()
            .unwrap_or_default();
        let updates = table
            .channels
            .entry(device_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();

        stream::once(async move { current })
            .chain(broadcast_stream(updates))
            .boxed()
    }

    pub async fn get_device_status(&self, device_id: &str) -> Option<DeviceStatus> {
        self.table.read().await.statuses.get(device_id).copied()
    }

    pub async fn get_all_device_statuses(&self) -> HashMap<String, DeviceStatus> {
        self.table.read().await.statuses.clone()
    }

    /// Forget a device; its open subscriptions end
    pub async fn clear_device_status(&self, device_id: &str) {
        let mut table = self.table.write().await;
        table.statuses.remove(device_id);
        table.channels.remove(device_id);
        self.all.send_replace(table.statuses.clone());
        debug!(device_id, "device status cleared");
    }

    /// Snapshots of the whole status map, current one first
    pub fn subscribe_all(&self) -> BoxStream<'static, HashMap<String, DeviceStatus>> {
        watch_stream(self.all.subscribe()).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_subscription_is_seeded_with_unknown() {
        let manager = DeviceStateManager::new();
        let mut early = manager.subscribe_to_device_status_changes("d1").await;
        assert_eq!(early.next().await, Some(DeviceStatus::Unknown));

        manager
            .update_device_status("d1", DeviceStatus::Working)
            .await;
        assert_eq!(early.next().await, Some(DeviceStatus::Working));

        let mut late = manager.subscribe_to_device_status_changes("d1").await;
        assert_eq!(late.next().await, Some(DeviceStatus::Working));
    }

    #[tokio::test]
    async fn test_reads() {
        let manager = DeviceStateManager::new();
        assert_eq!(manager.get_device_status("d1").await, None);

        manager.update_device_status("d1", DeviceStatus::Idle).await;
        manager
            .update_device_status("d2", DeviceStatus::Charging)
            .await;

        assert_eq!(
            manager.get_device_status("d1").await,
            Some(DeviceStatus::Idle)
        );
        let all = manager.get_all_device_statuses().await;
        assert_eq!(all.len(), 2);
        assert_eq!(all["d2"], DeviceStatus::Charging);
    }

    #[tokio::test]
    async fn test_clear_ends_stream_and_resets() {
        let manager = DeviceStateManager::new();
        manager.update_device_status("d1", DeviceStatus::Error).await;
        let mut old = manager.subscribe_to_device_status_changes("d1").await;
        assert_eq!(old.next().await, Some(DeviceStatus::Error));

        manager.clear_device_status("d1").await;
        assert_eq!(old.next().await, None);
        assert_eq!(manager.get_device_status("d1").await, None);

        let mut fresh = manager.subscribe_to_device_status_changes("d1").await;
        assert_eq!(fresh.next().await, Some(DeviceStatus::Unknown));
    }

    #[tokio::test]
    async fn test_updates_arrive_in_write_order() {
        let manager = DeviceStateManager::new();
        let mut updates = manager.subscribe_to_device_status_changes("d1").await;
        assert_eq!(updates.next().await, Some(DeviceStatus::Unknown));

        let sequence = [
            DeviceStatus::Idle,
            DeviceStatus::Working,
            DeviceStatus::Charging,
            DeviceStatus::Updating,
        ];
        for status in sequence {
            manager.update_device_status("d1", status).await;
        }

        let observed: Vec<DeviceStatus> = updates.take(sequence.len()).collect().await;
        assert_eq!(observed, sequence.to_vec());
    }

    #[tokio::test]
    async fn test_aggregate_stream() {
        let manager = DeviceStateManager::new();
        let mut all = manager.subscribe_all();
        assert!(all.next().await.unwrap().is_empty());

        manager
            .update_device_status("d1", DeviceStatus::Working)
            .await;
        let snapshot = all.next().await.unwrap();
        assert_eq!(snapshot.get("d1"), Some(&DeviceStatus::Working));
    }
}
