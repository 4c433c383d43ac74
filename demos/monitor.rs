use std::env;
use std::sync::Arc;

use aeroflow::{CoordinatorConfig, GatewayClientBuilder, PollingScheduler};

#[tokio::main]
async fn main() -> aeroflow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = match env::args().nth(1) {
        Some(host) => CoordinatorConfig::new(host),
        None => CoordinatorConfig::from_env()?,
    };
    config.validate()?;

    let client = Arc::new(GatewayClientBuilder::from_config(&config).build()?);
    let scheduler = PollingScheduler::builder(client)
        .config(config.polling.clone())
        .on_event(|event| {
            println!("{event:?}");
        })
        .on_snapshot(|key, snapshot| {
            println!(
                "[{key}] {} / {} | preset: {} | {:?}",
                snapshot.current_temperature,
                snapshot.target_temperature,
                snapshot.preset_mode(),
                snapshot.hvac_action(),
            );
        })
        .build()?;

    println!("Discovering heaters on {}:{}...", config.host, config.port);
    let modules = scheduler.start().await?;
    for module in &modules {
        println!("  {} ({})", module.key, module.identifier);
    }
    println!("Polling for updates. Ctrl-C to stop.");

    if tokio::signal::ctrl_c().await.is_err() {
        eprintln!("failed to listen for ctrl-c");
    }
    scheduler.shutdown().await;
    Ok(())
}
