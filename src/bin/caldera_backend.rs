//! Backend process entrypoint: reads configuration from the environment,
//! wires a synthetic depth sensor into the processing pipeline and
//! shared-memory transport, and runs until interrupted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use caldera::app::App;
use caldera::config::Config;
use caldera::sensor::synthetic::{self, SyntheticSensorDevice};

fn main() -> anyhow::Result<()> {
    caldera::logging::init_default();

    let config = Config::from_env();
    tracing::info!(target: "app.lifecycle", "caldera backend starting");

    let sensor_cfg = synthetic::Config::default();
    let sensor = Box::new(SyntheticSensorDevice::new(sensor_cfg));

    let mut app = App::new(config, sensor);
    app.start()?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            tracing::info!(target: "app.lifecycle", "interrupt received, shutting down");
            running.store(false, Ordering::SeqCst);
        })?;
    }

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    app.stop();
    tracing::info!(target: "app.lifecycle", "caldera backend stopped");
    Ok(())
}
