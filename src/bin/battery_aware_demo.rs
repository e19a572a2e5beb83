//! Battery-aware demo workflow: the compute step branches between a quick
//! and a full analysis depending on the detected battery level.

use edgeflow::{CancellationToken, Dag, EngineConfig, Runner, TaskRegistry};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn detect_battery_level() -> Option<u8> {
    // No battery probe is wired up on this host; a real front-end would
    // inject a platform-specific probe here instead.
    None
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let registry = TaskRegistry::new();

    let check_battery = registry.register0("check_battery", || {
        let level = detect_battery_level().unwrap_or_else(|| {
            tracing::info!("battery level not available; assuming 100%");
            100
        });
        tracing::info!(level, "battery reading");
        Ok(level)
    })?;

    let compute = registry.register1("compute", |battery: u8| {
        let result = if battery < 50 {
            tracing::info!("low battery; running quick analysis only");
            "quick-result"
        } else {
            tracing::info!("sufficient battery; performing full analysis");
            "full-result"
        };
        Ok(result.to_string())
    })?;

    let save = registry.register1("save", |result: String| {
        let out_dir = PathBuf::from("demos/results");
        fs::create_dir_all(&out_dir)?;
        let path = out_dir.join("result.txt");
        fs::write(&path, &result)?;
        tracing::info!(path = %path.display(), "saved result");
        Ok(path.display().to_string())
    })?;

    let battery_future = check_battery.call();
    let compute_future = compute.call(battery_future);
    let save_future = save.call(compute_future);

    let dag = Dag::from_futures(vec![save_future.erased()])?;

    let config = EngineConfig::builder().failsafe(false).build();
    let runner = Runner::new(config).with_battery_probe(Arc::new(detect_battery_level));
    let record = runner.run(&dag, CancellationToken::new())?;

    if record.had_failures {
        tracing::warn!("run completed with failures");
        std::process::exit(1);
    }

    println!("saved to: {}", save_future.result()?);
    Ok(())
}
