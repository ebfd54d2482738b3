//! Device session
//! The native runtime allows one client connection per process. `SessionHost` owns that
//! connection as reference-counted shared state: the first `open` connects, later opens share
//! the live connection under their own lease, and the last `close` disconnects.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{error, info, warn};
use uuid::Uuid;

use crate::config::session_config::SessionConfig;
use crate::core::backend::{select_backend, BackendKind, InputBackend};
use crate::core::runtime::{InputService, RuntimeClient, RuntimeInfo};
use crate::error::SessionError;

struct LiveSession {
    id: Uuid,
    application_name: String,
    runtime_info: RuntimeInfo,
    backend: Arc<dyn InputBackend>,
    closed: AtomicBool,
}

#[derive(Default)]
struct HostState {
    live: Option<Arc<LiveSession>>,
    next_lease: u64,
    leases: BTreeSet<u64>,
}

/// One caller's lease on the shared runtime connection. Release it with `SessionHost::close`.
pub struct SessionHandle {
    lease: u64,
    lease_open: AtomicBool,
    session: Arc<LiveSession>,
}

impl SessionHandle {
    /// Identifier of the underlying connection. Shared by every lease on it.
    pub fn session_id(&self) -> Uuid {
        self.session.id
    }

    pub fn application_name(&self) -> &str {
        &self.session.application_name
    }

    pub fn runtime_info(&self) -> &RuntimeInfo {
        &self.session.runtime_info
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.session.backend.kind()
    }

    pub fn backend(&self) -> Arc<dyn InputBackend> {
        self.session.backend.clone()
    }

    pub fn is_open(&self) -> bool {
        self.lease_open.load(Ordering::Acquire) && !self.session.closed.load(Ordering::Acquire)
    }
}

pub struct SessionHost {
    runtime: Arc<dyn RuntimeClient>,
    service: Option<Arc<dyn InputService>>,
    config: SessionConfig,
    haptic_max_pulse_us: u16,
    state: Mutex<HostState>,
}

impl SessionHost {
    pub fn new(
        runtime: Arc<dyn RuntimeClient>,
        service: Option<Arc<dyn InputService>>,
        config: SessionConfig,
    ) -> Self {
        Self {
            runtime,
            service,
            config,
            haptic_max_pulse_us: 2000,
            state: Mutex::new(HostState::default()),
        }
    }

    pub fn with_haptic_max_pulse_us(mut self, max_pulse_us: u16) -> Self {
        self.haptic_max_pulse_us = max_pulse_us;
        self
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of open leases on the live connection.
    pub fn lease_count(&self) -> usize {
        self.state().leases.len()
    }

    pub fn is_connected(&self) -> bool {
        self.state().live.is_some()
    }

    /// Opens the runtime connection, or joins the existing one.
    pub fn open(&self, application_name: &str) -> Result<SessionHandle, SessionError> {
        let mut state = self.state();

        let session = match &state.live {
            Some(live) => {
                if live.application_name != application_name {
                    warn!(
                        "Session already open for '{}', '{}' shares it",
                        live.application_name, application_name
                    );
                }
                live.clone()
            }
            None => {
                let live = Arc::new(self.connect(application_name)?);
                state.live = Some(live.clone());
                live
            }
        };

        state.next_lease += 1;
        let lease = state.next_lease;
        state.leases.insert(lease);
        info!("Session {} lease {} opened ({} open)", session.id, lease, state.leases.len());

        Ok(SessionHandle {
            lease,
            lease_open: AtomicBool::new(true),
            session,
        })
    }

    fn connect(&self, application_name: &str) -> Result<LiveSession, SessionError> {
        if !self.runtime.is_installed() {
            error!("VR runtime is not installed");
            return Err(SessionError::RuntimeUnavailable("runtime is not installed".to_string()));
        }

        let runtime_info = self.runtime.init(application_name).map_err(|e| {
            error!("Failed to initialize VR runtime: {}", e);
            SessionError::RuntimeUnavailable(e.to_string())
        })?;

        let (min, max) = (self.config.min_interface_version, self.config.max_interface_version);
        if !(min..=max).contains(&runtime_info.interface_version) {
            error!(
                "{} reports interface version {}, supported range is {}..={}",
                runtime_info.runtime_name, runtime_info.interface_version, min, max
            );
            self.runtime.shutdown();
            return Err(SessionError::VersionMismatch {
                found: runtime_info.interface_version,
                min,
                max,
            });
        }

        let Some(backend) = select_backend(
            self.config.backend,
            self.runtime.clone(),
            self.service.clone(),
            self.haptic_max_pulse_us,
        ) else {
            error!("No input backend satisfies the {:?} preference", self.config.backend);
            self.runtime.shutdown();
            return Err(SessionError::RuntimeUnavailable(format!(
                "no backend available for preference {:?}",
                self.config.backend
            )));
        };

        let id = Uuid::new_v4();
        info!(
            "Connected to {} (interface {}) as '{}', session {}",
            runtime_info.runtime_name, runtime_info.interface_version, application_name, id
        );
        Ok(LiveSession {
            id,
            application_name: application_name.to_string(),
            runtime_info,
            backend,
            closed: AtomicBool::new(false),
        })
    }

    /// Releases a lease. Closing the same handle twice is a no-op. The runtime connection is
    /// shut down once the last lease is released.
    pub fn close(&self, handle: &SessionHandle) {
        if !handle.lease_open.swap(false, Ordering::AcqRel) {
            return;
        }
        let mut state = self.state();
        if !state.leases.remove(&handle.lease) {
            return;
        }
        info!("Session {} lease {} closed ({} open)", handle.session.id, handle.lease, state.leases.len());

        let same_session = state
            .live
            .as_ref()
            .is_some_and(|live| Arc::ptr_eq(live, &handle.session));
        if state.leases.is_empty() && same_session {
            if let Some(live) = state.live.take() {
                live.closed.store(true, Ordering::Release);
                live.backend.shutdown();
                info!("Session {} shut down", live.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::BackendPreference;
    use crate::core::runtime::simulated::SimulatedRuntime;

    fn host(runtime: &Arc<SimulatedRuntime>, config: SessionConfig) -> SessionHost {
        SessionHost::new(runtime.clone(), Some(runtime.clone() as Arc<dyn InputService>), config)
    }

    #[test]
    fn concurrent_opens_share_one_connection() {
        let runtime = Arc::new(SimulatedRuntime::new());
        let host = host(&runtime, SessionConfig::default());

        let first = host.open("app").unwrap();
        let second = host.open("app").unwrap();
        assert_eq!(first.session_id(), second.session_id());
        assert_eq!(runtime.init_count(), 1);
        assert_eq!(host.lease_count(), 2);

        host.close(&first);
        assert!(!first.is_open());
        assert!(second.is_open());
        assert_eq!(runtime.shutdown_count(), 0);

        host.close(&second);
        assert!(!host.is_connected());
        assert_eq!(runtime.shutdown_count(), 1);
    }

    #[test]
    fn close_is_idempotent() {
        let runtime = Arc::new(SimulatedRuntime::new());
        let host = host(&runtime, SessionConfig::default());
        let handle = host.open("app").unwrap();
        host.close(&handle);
        host.close(&handle);
        assert_eq!(runtime.shutdown_count(), 1);

        // A stale handle must not tear down a newer connection.
        let fresh = host.open("app").unwrap();
        host.close(&handle);
        assert!(fresh.is_open());
        assert_ne!(fresh.session_id(), handle.session_id());
    }

    #[test]
    fn missing_runtime_is_unavailable() {
        let runtime = Arc::new(SimulatedRuntime::new());
        runtime.set_installed(false);
        let host = host(&runtime, SessionConfig::default());
        assert!(matches!(host.open("app"), Err(SessionError::RuntimeUnavailable(_))));
        assert_eq!(runtime.init_count(), 0);
    }

    #[test]
    fn failed_init_is_unavailable() {
        let runtime = Arc::new(SimulatedRuntime::new());
        runtime.set_init_failure(Some("hmd not found".to_string()));
        let host = host(&runtime, SessionConfig::default());
        match host.open("app") {
            Err(SessionError::RuntimeUnavailable(reason)) => assert!(reason.contains("hmd not found")),
            other => panic!("unexpected result: {:?}", other.map(|h| h.session_id())),
        }
    }

    #[test]
    fn out_of_range_version_is_rejected() {
        let runtime = Arc::new(SimulatedRuntime::new());
        runtime.set_interface_version(12);
        let host = host(&runtime, SessionConfig::default());
        assert!(matches!(
            host.open("app"),
            Err(SessionError::VersionMismatch { found: 12, min: 19, max: 22 })
        ));
        assert!(!runtime.is_initialized());
        assert!(!host.is_connected());
    }

    #[test]
    fn backend_is_fixed_at_open() {
        let runtime = Arc::new(SimulatedRuntime::new());
        let host = host(&runtime, SessionConfig::default());
        let handle = host.open("app").unwrap();
        assert_eq!(handle.backend_kind(), BackendKind::Mediated);

        runtime.set_service_available(false);
        let second = host.open("app").unwrap();
        assert_eq!(second.backend_kind(), BackendKind::Mediated);
    }

    #[test]
    fn mediated_preference_without_service_fails() {
        let runtime = Arc::new(SimulatedRuntime::new());
        runtime.set_service_available(false);
        let config = SessionConfig {
            backend: BackendPreference::Mediated,
            ..SessionConfig::default()
        };
        let host = host(&runtime, config);
        assert!(matches!(host.open("app"), Err(SessionError::RuntimeUnavailable(_))));
        assert!(!runtime.is_initialized());
    }
}
