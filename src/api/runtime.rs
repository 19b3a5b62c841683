//! Background driver for the engine's periodic ticks
//!
//! One scheduler thread owns the cadence. Each tick takes the engine lock for
//! its whole duration, so readers always see state between two ticks.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::engine::{IngestHandle, PositioningEngine};
use super::types::LayoutSnapshot;

/// Milliseconds since the Unix epoch, or 0 if the clock is before it
pub fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Runs a shared engine on wall-clock cadences until stopped
#[derive(Debug)]
pub struct EngineRuntime {
    engine: Arc<Mutex<PositioningEngine>>,
    ingest: IngestHandle,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl EngineRuntime {
    /// Start the scheduler thread. The loop period follows the shortest
    /// configured cadence, including later live changes.
    pub fn start(engine: PositioningEngine) -> std::io::Result<Self> {
        let ingest = engine.ingest_handle();
        let period = Duration::from_millis(base_period_ms(&engine).max(1));
        let engine = Arc::new(Mutex::new(engine));
        let running = Arc::new(AtomicBool::new(true));

        let worker = {
            let engine = Arc::clone(&engine);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("uwb-engine".to_string())
                .spawn(move || run(engine, running))?
        };
        tracing::info!(period_ms = period.as_millis() as u64, "engine runtime started");

        Ok(Self {
            engine,
            ingest,
            running,
            worker: Some(worker),
        })
    }

    pub fn ingest_handle(&self) -> IngestHandle {
        self.ingest.clone()
    }

    /// Shared engine, for controls and reads between ticks
    pub fn engine(&self) -> Arc<Mutex<PositioningEngine>> {
        Arc::clone(&self.engine)
    }

    /// Run a closure against the engine while no tick is in progress
    pub fn with_engine<T>(&self, f: impl FnOnce(&mut PositioningEngine) -> T) -> T {
        f(&mut self.engine.lock())
    }

    pub fn snapshot(&self) -> LayoutSnapshot {
        self.engine.lock().snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop after the current tick completes. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("engine scheduler thread panicked");
            }
            tracing::info!("engine runtime stopped");
        }
    }
}

impl Drop for EngineRuntime {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Shortest configured cadence
fn base_period_ms(engine: &PositioningEngine) -> u64 {
    let runtime = &engine.config().runtime;
    runtime
        .solver_interval_ms
        .min(runtime.lifecycle_interval_ms)
        .min(runtime.projection_interval_ms)
}

fn run(engine: Arc<Mutex<PositioningEngine>>, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        let started = std::time::Instant::now();
        // Re-read every round so live cadence changes apply immediately
        let period = {
            let mut engine = engine.lock();
            engine.tick(unix_time_ms());
            Duration::from_millis(base_period_ms(&engine).max(1))
        };
        let elapsed = started.elapsed();
        if elapsed < period {
            thread::sleep(period - elapsed);
        } else {
            tracing::debug!(elapsed_ms = elapsed.as_millis() as u64, "engine tick overran its period");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RangeMeasurement;
    use crate::utils::config::EngineConfig;

    #[test]
    fn test_runtime_applies_submitted_batches() {
        let engine = PositioningEngine::new(EngineConfig::default()).unwrap();
        let mut runtime = EngineRuntime::start(engine).unwrap();
        let handle = runtime.ingest_handle();
        assert!(handle.submit(vec![RangeMeasurement::new("B5A4", "Room1", 2.0)]));

        let mut seen = false;
        for _ in 0..200 {
            if runtime.snapshot().entities.len() == 2 {
                seen = true;
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(seen);

        runtime.stop();
        runtime.stop();
        assert!(!runtime.is_running());
    }

    #[test]
    fn test_live_cadence_change_speeds_up_loop() {
        let mut config = EngineConfig::default();
        config.runtime.solver_interval_ms = 400;
        let engine = PositioningEngine::new(config).unwrap();
        let runtime = EngineRuntime::start(engine).unwrap();

        runtime
            .with_engine(|e| {
                e.configure(|manager| {
                    let mut updated = manager.config().clone();
                    updated.runtime.solver_interval_ms = 5;
                    manager.update_config(updated)
                })
            })
            .unwrap();
        let start_ticks = runtime.snapshot().solver_ticks;

        // At the old 400 ms period this would take seconds
        let mut ticks = 0;
        for _ in 0..100 {
            ticks = runtime.snapshot().solver_ticks - start_ticks;
            if ticks >= 10 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(ticks >= 10, "only {} solver ticks", ticks);
    }

    #[test]
    fn test_controls_between_ticks() {
        let engine = PositioningEngine::new(EngineConfig::default()).unwrap();
        let runtime = EngineRuntime::start(engine).unwrap();
        let previous = runtime.with_engine(|e| e.set_geo_enabled(true));
        assert!(!previous);
        assert!(runtime.with_engine(|e| e.config().geo.enabled));
    }
}
