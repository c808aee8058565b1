//! Service registry - service records, health checks and dependency order.
//!
//! [`ServiceRegistry`] owns the persisted [`ServiceStore`] behind one mutex
//! and optionally runs a background task that health checks every
//! registered service on a fixed interval.

pub mod dependency;
pub mod health;
pub mod service;
pub mod store;


use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::error::{DynaportError, Result};

pub use dependency::DependencyPlan;
pub use health::{CustomHealthCheck, HealthChecker};
pub use service::{service_id, HealthCheckType, HealthStatus, ServiceInfo, ServiceStatus};
pub use store::ServiceStore;

/// Running health monitor.
struct Monitor {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Registry of local services.
///
/// Every method except the health check ones is synchronous. The store lock
/// is never held across an await point.
pub struct ServiceRegistry {
    store: Arc<Mutex<ServiceStore>>,
    checker: Arc<HealthChecker>,
    interval: Duration,
    shutdown_timeout: Duration,
    monitor: Mutex<Option<Monitor>>,
}

impl ServiceRegistry {
    /// Opens the registry file at `path`.
    pub fn open(path: impl Into<PathBuf>, config: &RegistryConfig) -> Result<Self> {
        Ok(Self {
            store: Arc::new(Mutex::new(ServiceStore::open(path))),
            checker: Arc::new(HealthChecker::new(config)?),
            interval: config.interval(),
            shutdown_timeout: config.shutdown_timeout(),
            monitor: Mutex::new(None),
        })
    }

    /// Replaces the health checker, e.g. to install a custom check hook.
    pub fn with_checker(mut self, checker: HealthChecker) -> Self {
        self.checker = Arc::new(checker);
        self
    }

    /// Overrides the health check interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Registers a service, replacing any record with the same id.
    pub fn register(&self, info: ServiceInfo) -> Result<()> {
        self.store.lock().register(info)
    }

    /// Removes a service. Returns false if it was not registered.
    pub fn unregister(&self, app_id: &str, instance_id: &str) -> Result<bool> {
        self.store.lock().unregister(app_id, instance_id)
    }

    pub fn get(&self, app_id: &str, instance_id: &str) -> Option<ServiceInfo> {
        self.store.lock().get(app_id, instance_id).cloned()
    }

    pub fn get_all(&self) -> Vec<ServiceInfo> {
        self.store.lock().get_all()
    }

    pub fn get_by_app(&self, app_id: &str) -> Vec<ServiceInfo> {
        self.store.lock().get_by_app(app_id)
    }

    pub fn get_by_technology(&self, technology: &str) -> Vec<ServiceInfo> {
        self.store.lock().get_by_technology(technology)
    }

    /// Sets a service's lifecycle status. Returns false if it is not
    /// registered.
    pub fn update_status(
        &self,
        app_id: &str,
        instance_id: &str,
        status: ServiceStatus,
    ) -> Result<bool> {
        self.store.lock().update_status(app_id, instance_id, status)
    }

    /// Services grouped into start order layers.
    pub fn dependency_order(&self) -> Vec<BTreeSet<String>> {
        self.dependency_plan().layers
    }

    /// Start order layers plus unresolved and missing dependencies.
    pub fn dependency_plan(&self) -> DependencyPlan {
        let services = self.get_all();
        dependency::resolve(&services)
    }

    /// Checks a service outside the registry. See [`HealthChecker::check`].
    pub async fn check_health(&self, service: &mut ServiceInfo) -> bool {
        self.checker.check(service).await
    }

    /// Checks one registered service and stores the result.
    ///
    /// Returns the checked record, or `None` if it is not registered.
    pub async fn check_service(
        &self,
        app_id: &str,
        instance_id: &str,
    ) -> Result<Option<ServiceInfo>> {
        let Some(info) = self.get(app_id, instance_id) else {
            return Ok(None);
        };

        match check_isolated(&self.checker, info.clone()).await {
            Some(checked) => {
                let mut store = self.store.lock();
                if store.apply_health(std::slice::from_ref(&checked)) > 0 {
                    store.save()?;
                }
                Ok(Some(checked))
            }
            None => Ok(Some(info)),
        }
    }

    /// Runs one health check cycle over every registered service.
    ///
    /// Returns the number of records updated.
    pub async fn run_health_cycle(&self) -> Result<usize> {
        run_cycle(&self.store, &self.checker).await
    }

    /// Starts the background health monitor on the current Tokio runtime.
    ///
    /// Does nothing if the monitor is already running.
    pub fn start_health_monitor(&self) -> Result<()> {
        let mut monitor = self.monitor.lock();
        if monitor.is_some() {
            debug!("Health monitor already running");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            DynaportError::runtime_with_source("Health monitor requires a Tokio runtime", e)
        })?;

        let token = CancellationToken::new();
        let handle = runtime.spawn(monitor_loop(
            Arc::clone(&self.store),
            Arc::clone(&self.checker),
            self.interval,
            token.clone(),
        ));

        *monitor = Some(Monitor { token, handle });
        Ok(())
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.lock().is_some()
    }

    /// Stops the health monitor and writes the store one last time.
    ///
    /// A monitor still busy after the shutdown timeout is aborted.
    pub async fn close(&self) -> Result<()> {
        let monitor = self.monitor.lock().take();

        if let Some(Monitor { token, mut handle }) = monitor {
            token.cancel();
            match tokio::time::timeout(self.shutdown_timeout, &mut handle).await {
                Ok(Ok(())) => debug!("Health monitor joined"),
                Ok(Err(e)) => warn!(error = %e, "Health monitor task failed"),
                Err(_) => {
                    warn!(
                        timeout_ms = self.shutdown_timeout.as_millis() as u64,
                        "Health monitor did not stop in time, aborting"
                    );
                    handle.abort();
                }
            }
        }

        self.store.lock().save()
    }
}

impl Drop for ServiceRegistry {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.get_mut().as_ref() {
            monitor.token.cancel();
        }
    }
}

/// Checks one service on its own task, so a panicking custom hook fails
/// only that service. Returns `None` if the service has no check.
async fn check_isolated(
    checker: &Arc<HealthChecker>,
    mut service: ServiceInfo,
) -> Option<ServiceInfo> {
    let task = tokio::spawn({
        let checker = Arc::clone(checker);
        let mut service = service.clone();
        async move {
            let checked = checker.check(&mut service).await;
            checked.then_some(service)
        }
    });

    match task.await {
        Ok(result) => result,
        Err(e) => {
            warn!(service = %service.service_id(), error = %e, "Health check aborted");
            health::mark_failed(&mut service);
            Some(service)
        }
    }
}

async fn run_cycle(store: &Mutex<ServiceStore>, checker: &Arc<HealthChecker>) -> Result<usize> {
    let snapshot = store.lock().get_all();

    let mut checked = Vec::with_capacity(snapshot.len());
    for service in snapshot {
        if let Some(result) = check_isolated(checker, service).await {
            checked.push(result);
        }
    }

    if checked.is_empty() {
        return Ok(0);
    }

    let mut store = store.lock();
    let applied = store.apply_health(&checked);
    if applied > 0 {
        store.save()?;
    }
    Ok(applied)
}

async fn monitor_loop(
    store: Arc<Mutex<ServiceStore>>,
    checker: Arc<HealthChecker>,
    interval: Duration,
    token: CancellationToken,
) {
    info!(interval_secs = interval.as_secs(), "Health monitor started");

    while !token.is_cancelled() {
        match run_cycle(&store, &checker).await {
            Ok(updated) => debug!(updated, "Health check cycle complete"),
            Err(e) => warn!(error = %e, "Failed to save health check results"),
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!("Health monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> ServiceRegistry {
        ServiceRegistry::open(dir.path().join("services.json"), &RegistryConfig::default())
            .unwrap()
    }

    async fn wait_for_health(
        registry: &ServiceRegistry,
        app_id: &str,
        expected: HealthStatus,
    ) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if registry
                .get(app_id, "default")
                .is_some_and(|info| info.health_status == expected)
            {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[test]
    fn test_register_get_all() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);

        registry.register(ServiceInfo::new("web", "default", 8100)).unwrap();
        registry.register(ServiceInfo::new("api", "default", 8101)).unwrap();

        assert_eq!(registry.get_all().len(), 2);
        assert_eq!(registry.get("web", "default").unwrap().port, 8100);
        assert!(registry.unregister("web", "default").unwrap());
        assert_eq!(registry.get_all().len(), 1);
    }

    #[test]
    fn test_dependency_order() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);

        registry.register(ServiceInfo::new("a", "default", 8100)).unwrap();
        registry
            .register(ServiceInfo::new("b", "default", 8101).with_dependencies(["a:default"]))
            .unwrap();
        registry
            .register(ServiceInfo::new("d", "default", 8103).with_dependencies(["a:default"]))
            .unwrap();
        registry
            .register(
                ServiceInfo::new("c", "default", 8102)
                    .with_dependencies(["b:default", "d:default", "z:default"]),
            )
            .unwrap();

        let order = registry.dependency_order();
        let as_sets: Vec<Vec<&str>> = order
            .iter()
            .map(|layer| layer.iter().map(String::as_str).collect())
            .collect();
        assert_eq!(
            as_sets,
            vec![
                vec!["a:default"],
                vec!["b:default", "d:default"],
                vec!["c:default"]
            ]
        );

        let plan = registry.dependency_plan();
        assert!(plan.missing.contains_key("c:default"));
    }

    #[tokio::test]
    async fn test_check_service_stores_result() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        registry
            .register(
                ServiceInfo::new("db", "default", port).with_health_check_type(HealthCheckType::Tcp),
            )
            .unwrap();

        let checked = registry.check_service("db", "default").await.unwrap().unwrap();
        assert_eq!(checked.health_status, HealthStatus::Healthy);
        assert_eq!(
            registry.get("db", "default").unwrap().health_status,
            HealthStatus::Healthy
        );
        assert!(registry.check_service("nope", "default").await.unwrap().is_none());

        let reopened = ServiceStore::open(dir.path().join("services.json"));
        assert_eq!(
            reopened.get("db", "default").unwrap().health_status,
            HealthStatus::Healthy
        );
    }

    #[tokio::test]
    async fn test_health_cycle_isolates_failures() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = listener.local_addr().unwrap().port();
        let closed_port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };

        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        registry
            .register(
                ServiceInfo::new("down", "default", closed_port)
                    .with_health_check_type(HealthCheckType::Tcp),
            )
            .unwrap();
        registry
            .register(
                ServiceInfo::new("up", "default", open_port)
                    .with_health_check_type(HealthCheckType::Tcp),
            )
            .unwrap();
        registry.register(ServiceInfo::new("idle", "default", 8100)).unwrap();

        assert_eq!(registry.run_health_cycle().await.unwrap(), 2);
        assert_eq!(
            registry.get("down", "default").unwrap().health_status,
            HealthStatus::Unhealthy
        );
        assert_eq!(
            registry.get("up", "default").unwrap().health_status,
            HealthStatus::Healthy
        );
        let idle = registry.get("idle", "default").unwrap();
        assert_eq!(idle.health_status, HealthStatus::Unknown);
        assert!(idle.last_health_check.is_none());
    }

    #[tokio::test]
    async fn test_health_cycle_keeps_status_updates() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        registry
            .register(
                ServiceInfo::new("db", "default", port)
                    .with_health_check_type(HealthCheckType::Tcp)
                    .with_status(ServiceStatus::Starting),
            )
            .unwrap();
        registry
            .update_status("db", "default", ServiceStatus::Running)
            .unwrap();

        registry.run_health_cycle().await.unwrap();
        let info = registry.get("db", "default").unwrap();
        assert_eq!(info.status, ServiceStatus::Running);
        assert_eq!(info.health_status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_monitor_runs_and_close_interrupts_wait() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let dir = TempDir::new().unwrap();
        let registry = registry(&dir).with_interval(Duration::from_secs(60));
        registry
            .register(
                ServiceInfo::new("db", "default", port).with_health_check_type(HealthCheckType::Tcp),
            )
            .unwrap();

        registry.start_health_monitor().unwrap();
        registry.start_health_monitor().unwrap();
        assert!(registry.is_monitoring());
        assert!(wait_for_health(&registry, "db", HealthStatus::Healthy).await);

        let started = Instant::now();
        registry.close().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!registry.is_monitoring());
    }

    struct PanicsForApp(&'static str);

    #[async_trait::async_trait]
    impl CustomHealthCheck for PanicsForApp {
        async fn check(&self, service: &ServiceInfo) -> Result<bool> {
            if service.app_id() == self.0 {
                panic!("hook failure for {}", self.0);
            }
            Ok(true)
        }
    }

    fn custom_service(app_id: &str) -> ServiceInfo {
        let mut settings = serde_json::Map::new();
        settings.insert("model".to_string(), serde_json::json!("ready"));
        ServiceInfo::new(app_id, "default", 8100).with_custom_check(settings)
    }

    #[tokio::test]
    async fn test_panicking_hook_fails_only_its_service() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let dir = TempDir::new().unwrap();
        let checker = HealthChecker::new(&RegistryConfig::default())
            .unwrap()
            .with_custom_check(Arc::new(PanicsForApp("a")));
        let registry = registry(&dir).with_checker(checker);
        registry.register(custom_service("a")).unwrap();
        registry
            .register(
                ServiceInfo::new("b", "default", port).with_health_check_type(HealthCheckType::Tcp),
            )
            .unwrap();
        registry.register(custom_service("c")).unwrap();

        assert_eq!(registry.run_health_cycle().await.unwrap(), 3);

        let a = registry.get("a", "default").unwrap();
        assert_eq!(a.health_status, HealthStatus::Unhealthy);
        assert!(a.last_health_check.is_some());
        assert_eq!(
            registry.get("b", "default").unwrap().health_status,
            HealthStatus::Healthy
        );
        assert_eq!(
            registry.get("c", "default").unwrap().health_status,
            HealthStatus::Healthy
        );

        let checked = registry.check_service("a", "default").await.unwrap().unwrap();
        assert_eq!(checked.health_status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_monitor_survives_panicking_hook() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let dir = TempDir::new().unwrap();
        let checker = HealthChecker::new(&RegistryConfig::default())
            .unwrap()
            .with_custom_check(Arc::new(PanicsForApp("a")));
        let registry = registry(&dir)
            .with_checker(checker)
            .with_interval(Duration::from_millis(50));
        registry.register(custom_service("a")).unwrap();
        registry.start_health_monitor().unwrap();

        assert!(wait_for_health(&registry, "a", HealthStatus::Unhealthy).await);

        registry
            .register(
                ServiceInfo::new("b", "default", port).with_health_check_type(HealthCheckType::Tcp),
            )
            .unwrap();
        assert!(wait_for_health(&registry, "b", HealthStatus::Healthy).await);

        registry.close().await.unwrap();
    }

    #[test]
    fn test_monitor_requires_runtime() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);

        let err = registry.start_health_monitor().unwrap_err();
        assert!(matches!(err, DynaportError::Runtime { .. }));
        assert!(!registry.is_monitoring());
    }

    #[tokio::test]
    async fn test_close_persists() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        registry.register(ServiceInfo::new("web", "default", 8100)).unwrap();
        std::fs::remove_file(dir.path().join("services.json")).unwrap();

        registry.close().await.unwrap();
        assert!(dir.path().join("services.json").exists());
    }
}
