//! Device descriptors supplied by the device directory

use crate::error::{BackupError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Name carried by freshly flashed devices that have not been assigned yet
pub const PLACEHOLDER_DEVICE_NAME: &str = "ETHOSCOPE_000";

/// Statuses of devices that are never backed up
pub const INACTIVE_STATUSES: &[&str] = &["not_in_use", "retired", "offline"];

/// One recording device as seen by the directory service.
///
/// Unknown fields in the directory payload are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ip: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
    /// Relational mirror location relative to the results root
    #[serde(default)]
    pub backup_path: Option<String>,
}

impl DeviceDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ip: ip.into(),
            status: "stopped".to_string(),
            backup_path: None,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn with_backup_path(mut self, path: impl Into<String>) -> Self {
        self.backup_path = Some(path.into());
        self
    }

    /// Whether the device should take part in a backup cycle
    pub fn is_active(&self) -> bool {
        let status = self.status.to_lowercase();
        !INACTIVE_STATUSES.contains(&status.as_str()) && self.name != PLACEHOLDER_DEVICE_NAME
    }

    /// Fail unless id, name and address are all present
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [("id", &self.id), ("name", &self.name), ("ip", &self.ip)]
            .into_iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(field, _)| field)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(BackupError::invalid_device(format!(
                "device '{}' is missing {}",
                self.id,
                missing.join(", ")
            )))
        }
    }

    /// Name of the experiment database served by the device
    pub fn database_name(&self) -> String {
        format!("{}_db", self.name)
    }

    /// Base URL of the web service running on the device
    pub fn base_url(&self, port: u16) -> String {
        format!("http://{}:{}", self.ip, port)
    }

    /// Label used in log lines and status snapshots
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DeviceListing {
    Map(BTreeMap<String, DeviceDescriptor>),
    List(Vec<DeviceDescriptor>),
}

/// Parse a directory payload, either a JSON map keyed by id or an array.
///
/// Entries of a map without their own `id` inherit the key.
pub fn parse_device_listing(payload: serde_json::Value) -> Result<Vec<DeviceDescriptor>> {
    let listing: DeviceListing = serde_json::from_value(payload)?;

    let devices = match listing {
        DeviceListing::Map(map) => map
            .into_iter()
            .map(|(key, mut device)| {
                if device.id.is_empty() {
                    device.id = key;
                }
                device
            })
            .collect(),
        DeviceListing::List(list) => list,
    };

    Ok(devices)
}

/// Keep devices that are active and complete, logging the ones skipped
pub fn select_backup_candidates(devices: Vec<DeviceDescriptor>) -> Vec<DeviceDescriptor> {
    devices
        .into_iter()
        .filter(|device| device.is_active())
        .filter(|device| match device.validate() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(device_id = %device.id, error = %e, "Skipping device");
                false
            },
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_active_filter() {
        let running =
            DeviceDescriptor::new("a1", "ETHOSCOPE_001", "10.0.0.1").with_status("running");
        let retired = running.clone().with_status("not_in_use");
        let offline = running.clone().with_status("Offline");
        let placeholder = DeviceDescriptor::new("a0", PLACEHOLDER_DEVICE_NAME, "10.0.0.2");

        assert!(running.is_active());
        assert!(!retired.is_active());
        assert!(!offline.is_active());
        assert!(!placeholder.is_active());
    }

    #[test]
    fn test_validate_reports_missing_fields() {
        let device = DeviceDescriptor::new("abc", "", " ");
        let err = device.validate().unwrap_err().to_string();
        assert!(err.contains("name"));
        assert!(err.contains("ip"));
        assert!(!err.contains("id,"));
    }

    #[test]
    fn test_parse_map_listing_fills_ids() {
        let payload = json!({
            "0256424ac3f545b6b3c687723085ffcb": {
                "name": "ETHOSCOPE_025",
                "ip": "192.169.123.25",
                "status": "running",
                "backup_path": "0256424a/ETHOSCOPE_025/2024-01-01_10-00-00/db.db",
                "time": 1704100000.0
            }
        });

        let devices = parse_device_listing(payload).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "0256424ac3f545b6b3c687723085ffcb");
        assert_eq!(devices[0].database_name(), "ETHOSCOPE_025_db");
        assert!(devices[0].backup_path.is_some());
    }

    #[test]
    fn test_parse_array_listing() {
        let payload = json!([{ "id": "d1", "name": "ETHOSCOPE_001", "ip": "10.0.0.1" }]);
        let devices = parse_device_listing(payload).unwrap();
        assert_eq!(devices[0].name, "ETHOSCOPE_001");
        assert_eq!(devices[0].base_url(9000), "http://10.0.0.1:9000");
    }

    #[test]
    fn test_select_candidates() {
        let devices = vec![
            DeviceDescriptor::new("d1", "ETHOSCOPE_001", "10.0.0.1"),
            DeviceDescriptor::new("d2", "ETHOSCOPE_002", "").with_status("running"),
            DeviceDescriptor::new("d3", "ETHOSCOPE_003", "10.0.0.3").with_status("offline"),
        ];
        let selected = select_backup_candidates(devices);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, "d1");
    }
}
