//! Application state management
//! `AppState` holds what the host shares across threads; `InputSystem` is the per-tick
//! orchestrator owned by the input thread.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, info, warn};

use crate::config::AppConfig;
use crate::core::device::{ConnectionState, DeviceEvent, DeviceHandle};
use crate::core::frame::BoneTransform;
use crate::core::poller::InputPoller;
use crate::core::runtime::{InputService, ReferencePose, RuntimeClient};
use crate::core::session::{SessionHandle, SessionHost};
use crate::error::SessionError;
use crate::mapping::bindings::{ActionType, BindingStore};
use crate::mapping::feed::{ActionFeed, ActionSnapshot};
use crate::mapping::haptics::{HapticRequest, HapticRoute, HapticRouter};
use crate::mapping::manifest::{load_manifest, write_default_bindings};
use crate::mapping::resolver::{
    convert_bones, ActionResolver, ActionValue, ResolvedActionState, ResolverOptions,
};

/// What a single tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Devices were polled and every action of the active set was resolved.
    Resolved {
        tick: u64,
        actions: usize,
        events: Vec<DeviceEvent>,
    },
    /// The poll failed; previous action states are republished without edges.
    Skipped { tick: u64 },
}

pub struct InputSystem {
    host: Arc<SessionHost>,
    session: SessionHandle,
    poller: InputPoller,
    resolver: ActionResolver,
    store: Arc<BindingStore>,
    feed: ActionFeed,
    haptics: HapticRouter,
}

impl InputSystem {
    /// Opens a session lease on `host` and wires the pipeline around it.
    pub fn open(
        host: Arc<SessionHost>,
        application_name: &str,
        poll_timeout: Duration,
        options: ResolverOptions,
        store: Arc<BindingStore>,
        feed: ActionFeed,
    ) -> Result<Self, SessionError> {
        let session = host.open(application_name)?;
        info!(
            "Input system ready on {} backend (session {})",
            session.backend_kind(),
            session.session_id()
        );
        Ok(Self {
            host,
            session,
            poller: InputPoller::new(poll_timeout),
            resolver: ActionResolver::new(options),
            store,
            feed,
            haptics: HapticRouter::new(),
        })
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn poller(&self) -> &InputPoller {
        &self.poller
    }

    pub fn feed(&self) -> &ActionFeed {
        &self.feed
    }

    pub fn poll_error_count(&self) -> u64 {
        self.poller.poll_error_count()
    }

    pub fn haptic_failure_count(&self) -> u64 {
        self.haptics.failure_count()
    }

    pub fn get_action_state(&self, name: &str) -> Option<ResolvedActionState> {
        self.feed.get_action_state(name)
    }

    pub fn get_typed_action_state(&self, name: &str, action_type: ActionType) -> Option<ResolvedActionState> {
        self.feed.get_typed_action_state(name, action_type)
    }

    /// Bones of a fixed hand pose for a skeleton action, converted and mirrored the same way
    /// as its live bones. Read from the first bound device that is connected.
    pub fn get_reference_pose(&self, action: &str, pose: ReferencePose) -> Option<Vec<BoneTransform>> {
        let set = self.store.snapshot();
        let descriptor = set.action_of(action, ActionType::Skeleton)?;
        let registry = self.poller.registry();
        let device = set
            .bindings_for(&descriptor.path)?
            .keys()
            .filter_map(|role| registry.by_role(*role))
            .find(|info| info.connection == ConnectionState::Connected)?;

        let bones = match self.session.backend().reference_pose(device.native_index, pose) {
            Ok(bones) => bones?,
            Err(e) => {
                warn!("Cannot read {:?} reference pose for '{}': {}", pose, action, e);
                return None;
            }
        };
        let options = self.resolver.options();
        Some(convert_bones(
            &bones,
            descriptor.mirror_hand,
            options.convention,
            options.world_to_meters,
        ))
    }

    /// Runs one tick: poll, resolve, publish, then deliver haptics.
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        let output = match self.poller.poll_frame(&self.session) {
            Ok(output) => output,
            Err(_) => {
                // Already counted and logged by the poller.
                let tick = self.poller.tick();
                self.feed.publish(self.feed.latest().carried_over(tick));
                return TickOutcome::Skipped { tick };
            }
        };

        self.resolver.note_device_events(&output.events);
        let set = self.store.snapshot();
        let states = self.resolver.resolve(&output.frames, &set, output.tick);
        let actions = states.len();
        self.feed.publish(ActionSnapshot::new(output.tick, states));

        let snapshot = self.feed.latest();
        let registry = self.poller.registry();
        let route = |action: &str| {
            let state = snapshot.get_typed(action, ActionType::Haptic)?;
            let ActionValue::Haptic(target) = &state.value else {
                return None;
            };
            let device = target.device?;
            let info = registry.get(device)?;
            Some(HapticRoute {
                device,
                native_index: info.native_index,
            })
        };
        let slot_of = |device: DeviceHandle| registry.get(device).map(|info| info.native_index);
        let backend = self.session.backend();
        self.haptics.flush(backend.as_ref(), route, slot_of, now);

        TickOutcome::Resolved {
            tick: output.tick,
            actions,
            events: output.events,
        }
    }

    /// Queues vibration on a haptic action for the next tick. Without a request the action's
    /// declared defaults are used. Returns false if nothing was queued.
    pub fn trigger_haptic(&mut self, action: &str, request: Option<HapticRequest>) -> bool {
        let set = self.store.snapshot();
        let Some(descriptor) = set
            .action_of(action, ActionType::Haptic)
            .or_else(|| set.action(action))
        else {
            warn!("No action named '{}' to vibrate", action);
            return false;
        };
        if descriptor.action_type != ActionType::Haptic {
            warn!("Action '{}' is {:?}, not haptic", action, descriptor.action_type);
            return false;
        }
        let Some(request) = request.or_else(|| descriptor.haptic.map(HapticRequest::from)) else {
            debug!("Action '{}' has no haptic defaults, nothing to play", action);
            return false;
        };
        self.haptics.queue(action, request);
        true
    }

    pub fn stop_haptics(&mut self) {
        self.haptics.stop_all();
    }

    /// Releases the session lease.
    pub fn close(&self) {
        self.host.close(&self.session);
    }
}

impl Drop for InputSystem {
    fn drop(&mut self) {
        self.close();
    }
}

/// Global application state
pub struct AppState {
    pub config: AppConfig,
    pub config_dir: PathBuf,
    pub host: Arc<SessionHost>,
    pub store: Arc<BindingStore>,
    pub feed: ActionFeed,
}

impl AppState {
    /// Loads configuration from `config_dir` and the manifest it names, if any. A manifest
    /// that fails to load leaves the binding set empty.
    pub async fn new(
        config_dir: PathBuf,
        runtime: Arc<dyn RuntimeClient>,
        service: Option<Arc<dyn InputService>>,
    ) -> Result<Self> {
        info!("Loading configuration from {}", config_dir.display());
        let config = AppConfig::load(&config_dir).await?;

        let store = Arc::new(BindingStore::default());
        if let Some(path) = &config.input.manifest_path {
            match load_manifest(path).await {
                Ok(mut set) => {
                    if let Some(dir) = &config.input.default_bindings_dir {
                        match write_default_bindings(dir, set.default_bindings()).await {
                            Ok(written) => set = set.with_default_bindings(written),
                            Err(e) => warn!("Cannot write default bindings to {}: {}", dir.display(), e),
                        }
                    }
                    store.publish(set);
                }
                Err(e) => warn!("Cannot load bindings from {}: {}", path.display(), e),
            }
        }

        let host = SessionHost::new(runtime, service, config.session.clone())
            .with_haptic_max_pulse_us(config.input.haptic_max_pulse_us);

        Ok(Self {
            config,
            config_dir,
            host: Arc::new(host),
            store,
            feed: ActionFeed::new(),
        })
    }

    /// Opens an input system sharing this state's bindings and feed.
    pub fn open_input_system(&self) -> Result<InputSystem, SessionError> {
        InputSystem::open(
            self.host.clone(),
            &self.config.session.application_name,
            Duration::from_millis(self.config.session.poll_timeout_ms),
            ResolverOptions::from(&self.config.input),
            self.store.clone(),
            self.feed.clone(),
        )
    }
}
