//! Persisted table of service records.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::service::{service_id, ServiceInfo, ServiceStatus};
use crate::error::Result;
use crate::storage;

/// Service records keyed by service id, mirrored to a JSON array on disk.
#[derive(Debug)]
pub struct ServiceStore {
    path: PathBuf,
    services: BTreeMap<String, ServiceInfo>,
    /// Entries that did not parse as records, written back untouched.
    unreadable: Vec<serde_json::Value>,
}

impl ServiceStore {
    /// Loads the store.
    ///
    /// A missing or corrupt file yields an empty store. Individual entries
    /// that are not valid records are skipped but kept on disk.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries: Vec<serde_json::Value> = storage::load_or_default(&path);

        let mut services = BTreeMap::new();
        let mut unreadable = Vec::new();
        for (index, entry) in entries.into_iter().enumerate() {
            match serde_json::from_value::<ServiceInfo>(entry.clone()) {
                Ok(info) => {
                    services.insert(info.service_id(), info);
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        index,
                        error = %e,
                        "Skipping unreadable service record"
                    );
                    unreadable.push(entry);
                }
            }
        }
        debug!(path = %path.display(), services = services.len(), "Service store opened");

        Self {
            path,
            services,
            unreadable,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Inserts or replaces a record.
    pub fn register(&mut self, info: ServiceInfo) -> Result<()> {
        let id = info.service_id();
        let port = info.port;
        self.services.insert(id.clone(), info);
        self.save()?;
        info!(service = %id, port, "Service registered");
        Ok(())
    }

    /// Removes a record. Returns false if it was not registered.
    pub fn unregister(&mut self, app_id: &str, instance_id: &str) -> Result<bool> {
        let id = service_id(app_id, instance_id);
        if self.services.remove(&id).is_none() {
            return Ok(false);
        }
        self.save()?;
        info!(service = %id, "Service unregistered");
        Ok(true)
    }

    pub fn get(&self, app_id: &str, instance_id: &str) -> Option<&ServiceInfo> {
        self.services.get(&service_id(app_id, instance_id))
    }

    pub fn get_all(&self) -> Vec<ServiceInfo> {
        self.services.values().cloned().collect()
    }

    pub fn get_by_app(&self, app_id: &str) -> Vec<ServiceInfo> {
        self.services
            .values()
            .filter(|info| info.app_id() == app_id)
            .cloned()
            .collect()
    }

    pub fn get_by_technology(&self, technology: &str) -> Vec<ServiceInfo> {
        self.services
            .values()
            .filter(|info| info.technology.as_deref() == Some(technology))
            .cloned()
            .collect()
    }

    /// Sets the lifecycle status. Returns false if the record is absent.
    pub fn update_status(
        &mut self,
        app_id: &str,
        instance_id: &str,
        status: ServiceStatus,
    ) -> Result<bool> {
        let id = service_id(app_id, instance_id);
        let Some(info) = self.services.get_mut(&id) else {
            return Ok(false);
        };
        let shown = status.to_string();
        info.status = status;
        self.save()?;
        info!(service = %id, status = %shown, "Service status updated");
        Ok(true)
    }

    /// Copies health results onto records that still exist.
    ///
    /// Returns the number of records updated. Does not persist.
    pub fn apply_health(&mut self, results: &[ServiceInfo]) -> usize {
        let mut applied = 0;
        for result in results {
            if let Some(stored) = self.services.get_mut(&result.service_id()) {
                stored.apply_health(result);
                applied += 1;
            }
        }
        applied
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Writes every record as one JSON array, unreadable entries last.
    pub fn save(&self) -> Result<()> {
        let mut entries = self
            .services
            .values()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        entries.extend(self.unreadable.iter().cloned());
        storage::save(&self.path, &entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::service::HealthStatus;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> ServiceStore {
        ServiceStore::open(dir.path().join("services.json"))
    }

    #[test]
    fn test_register_and_get() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);

        store.register(ServiceInfo::new("web", "default", 8100)).unwrap();
        store.register(ServiceInfo::new("web", "blue", 8101)).unwrap();
        store
            .register(ServiceInfo::new("db", "default", 8102).with_technology("postgres"))
            .unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.get("web", "blue").unwrap().port, 8101);
        assert!(store.get("web", "green").is_none());
        assert_eq!(store.get_by_app("web").len(), 2);
        assert_eq!(store.get_by_technology("postgres").len(), 1);
        assert!(store.get_by_technology("redis").is_empty());
    }

    #[test]
    fn test_register_replaces() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);

        store
            .register(ServiceInfo::new("web", "default", 8100).with_technology("axum"))
            .unwrap();
        store.register(ServiceInfo::new("web", "default", 8200)).unwrap();

        let info = store.get("web", "default").unwrap();
        assert_eq!(info.port, 8200);
        assert!(info.technology.is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unregister_and_update_status() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store.register(ServiceInfo::new("web", "default", 8100)).unwrap();

        assert!(store
            .update_status("web", "default", ServiceStatus::Running)
            .unwrap());
        assert_eq!(
            store.get("web", "default").unwrap().status,
            ServiceStatus::Running
        );
        assert!(!store
            .update_status("api", "default", ServiceStatus::Running)
            .unwrap());

        assert!(store.unregister("web", "default").unwrap());
        assert!(!store.unregister("web", "default").unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_file_format_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("services.json");
        {
            let mut store = ServiceStore::open(&path);
            store
                .register(ServiceInfo::new("web", "default", 8100).with_health_endpoint("/health"))
                .unwrap();
        }

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let records = raw.as_array().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["app_id"], "web");
        assert_eq!(records[0]["health_endpoint"], "/health");

        let reopened = ServiceStore::open(&path);
        assert_eq!(
            reopened.get("web", "default").unwrap().health_endpoint.as_deref(),
            Some("/health")
        );
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("services.json");
        std::fs::write(&path, "[{\"app_id\": ").unwrap();

        let store = ServiceStore::open(&path);
        assert!(store.is_empty());
    }

    #[test]
    fn test_bad_entry_does_not_wipe_other_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("services.json");
        let entries = serde_json::json!([
            {"app_id": "web", "instance_id": "default", "name": "web", "port": 8100},
            {"app_id": "api", "instance_id": "default", "name": "api", "port": 8101,
             "health_check_type": "HTTP", "status": "Warming"},
            {"app_id": "db", "instance_id": "default", "name": "db", "port": "not-a-port"}
        ]);
        std::fs::write(&path, entries.to_string()).unwrap();

        let mut store = ServiceStore::open(&path);
        assert_eq!(store.len(), 2);
        assert!(store.get("api", "default").is_some());
        assert!(store.get("db", "default").is_none());

        store.register(ServiceInfo::new("cache", "default", 8102)).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let on_disk = raw.as_array().unwrap();
        assert_eq!(on_disk.len(), 4);
        assert!(on_disk.iter().any(|entry| entry["port"] == "not-a-port"));
        assert!(on_disk.iter().any(|entry| entry["status"] == "Warming"));

        assert_eq!(ServiceStore::open(&path).len(), 3);
    }

    #[test]
    fn test_apply_health_skips_removed_records() {
        let dir = TempDir::new().unwrap();
        let mut store = store(&dir);
        store.register(ServiceInfo::new("web", "default", 8100)).unwrap();

        let mut web = ServiceInfo::new("web", "default", 8100);
        web.health_status = HealthStatus::Healthy;
        let mut gone = ServiceInfo::new("gone", "default", 8101);
        gone.health_status = HealthStatus::Unhealthy;

        assert_eq!(store.apply_health(&[web, gone]), 1);
        assert_eq!(
            store.get("web", "default").unwrap().health_status,
            HealthStatus::Healthy
        );
        assert!(store.get("gone", "default").is_none());
    }
}
