use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use tokio::time::{interval, MissedTickBehavior};

use vr_input_bridge_lib::core::overlay::{expected_texture, GraphicsTextureHandle, OverlayBridge};
use vr_input_bridge_lib::core::runtime::simulated::SimulatedRuntime;
use vr_input_bridge_lib::core::runtime::{ButtonId, ControllerRole, InputService};
use vr_input_bridge_lib::mapping::reload::{FileManifestSource, ManifestWatcher};
use vr_input_bridge_lib::{logging, state::AppState, TickOutcome};

const RENDER_INTERVAL: Duration = Duration::from_millis(11);

#[tokio::main]
async fn main() -> Result<()> {
    logging::init(log::Level::Info, None);

    let config_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config"));

    let runtime = Arc::new(SimulatedRuntime::new());
    runtime.add_hmd();
    let left = runtime.add_controller(ControllerRole::LeftHand);
    runtime.add_controller(ControllerRole::RightHand);

    let app_state = AppState::new(
        config_dir,
        runtime.clone(),
        Some(runtime.clone() as Arc<dyn InputService>),
    )
    .await?;
    let config = app_state.config.clone();

    let mut input = app_state
        .open_input_system()
        .context("Failed to open the VR runtime session")?;

    let mut watcher = match &config.input.manifest_path {
        Some(path) => {
            let mut source = FileManifestSource::new(path);
            if let Err(e) = source.mark_current().await {
                warn!("Cannot stat {}: {}", path.display(), e);
            }
            Some(ManifestWatcher::start(
                Box::new(source),
                app_state.store.clone(),
                Duration::from_millis(config.input.reload_interval_ms),
            ))
        }
        None => {
            info!("No manifest configured; running without bindings");
            None
        }
    };

    let overlay = config
        .overlay
        .enabled
        .then(|| OverlayBridge::new(input.session().backend(), &config.overlay));
    let render_stop = Arc::new(AtomicBool::new(false));
    let render_thread = overlay.map(|bridge| {
        let stop = render_stop.clone();
        thread::Builder::new()
            .name("overlay-render".into())
            .spawn(move || render_loop(bridge, stop))
    });

    // Log every action that changed value, the way a host console would show them.
    let mut feed_rx = app_state.feed.subscribe();
    tokio::spawn(async move {
        while feed_rx.changed().await.is_ok() {
            let snapshot = feed_rx.borrow_and_update().clone();
            for state in snapshot.states.values() {
                if state.became_active || state.became_inactive {
                    debug!("tick {}: {} -> {:?}", snapshot.tick, state.name, state.value);
                }
            }
        }
    });

    let tick_rate = config.session.tick_rate_hz.max(1);
    let mut ticker = interval(Duration::from_secs_f64(1.0 / f64::from(tick_rate)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("Input loop running at {} Hz, Ctrl+C to stop", tick_rate);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut grip_down = false;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let outcome = input.tick(Instant::now());
                let TickOutcome::Resolved { tick, events, .. } = outcome else {
                    continue;
                };
                for event in events {
                    info!("Device event: {:?}", event);
                }

                // Simulated user: toggle the left grip once a second.
                if tick % u64::from(tick_rate) == 0 {
                    grip_down = !grip_down;
                    if grip_down {
                        runtime.press(left, ButtonId::Grip);
                    } else {
                        runtime.release(left, ButtonId::Grip);
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }

    if let Some(watcher) = watcher.as_mut() {
        watcher.stop().await;
    }
    render_stop.store(true, Ordering::Relaxed);
    match render_thread {
        Some(Ok(handle)) => {
            if let Ok(mut bridge) = handle.join() {
                let stats = bridge.stats();
                info!("Overlay frames: {} submitted, {} dropped", stats.submitted, stats.dropped);
                bridge.shutdown();
            }
        }
        Some(Err(e)) => warn!("Overlay render thread did not start: {}", e),
        None => {}
    }
    info!(
        "Stopped after {} ticks ({} poll errors, {} haptic failures)",
        input.poller().tick(),
        input.poll_error_count(),
        input.haptic_failure_count()
    );
    input.close();
    Ok(())
}

/// Stands in for the host's render thread: submits one overlay frame per refresh until stopped.
fn render_loop(bridge: OverlayBridge, stop: Arc<AtomicBool>) -> OverlayBridge {
    let Some(&api) = bridge.supported_apis().first() else {
        return bridge;
    };
    let expected = expected_texture(api);
    let texture = GraphicsTextureHandle {
        native: 1,
        width: 1024,
        height: 1024,
        format: expected.format,
        color_space: expected.color_space,
    };
    while !stop.load(Ordering::Relaxed) {
        // Drops are counted by the bridge.
        let _ = bridge.submit_frame(&texture, api);
        thread::sleep(RENDER_INTERVAL);
    }
    bridge
}
