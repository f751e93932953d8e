//! OpenSASE Synthetic Load - Main Entry Point

use sase_synth::{LoadEngine, StageEnv, SynthConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("OpenSASE Synth v{}", env!("CARGO_PKG_VERSION"));

    // First argument wins over CONFIG_PATH
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CONFIG_PATH").ok())
        .unwrap_or_else(|| "/etc/opensase/synth.json".into());

    let config = SynthConfig::load(&config_path)?;
    let pipeline = config.build_pipeline(&StageEnv::default())?;

    let mut engine = LoadEngine::new(config.engine.clone(), pipeline)?;
    let report = engine.run()?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
