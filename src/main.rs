use anyhow::Result;
use chrono::Local;
use tracing_subscriber::EnvFilter;

use vandebron::api::consumers::EnergyConsumers;
use vandebron::api::usage::{collect_daily, collect_hourly};
use vandebron::config::{Config, OutputMode, Window};
use vandebron::output::{self, InfluxSink};
use vandebron::VandebronApi;

fn init_tracing() {
    let filter = EnvFilter::from_default_env()
        .add_directive("vandebron=info".parse().unwrap_or_else(|_| "info".parse().unwrap()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env()?;

    let mut portal = VandebronApi::new(config.username.clone(), config.password.clone())?;
    portal.login()?;
    let user = portal.user()?.clone();

    let connections = EnergyConsumers::new(&portal).connections(&user)?;
    tracing::info!(count = connections.len(), "resolved connections");

    let range = config.window.to_range(Local::now().date_naive());
    let records = match config.window {
        Window::Day(_) => collect_hourly(&portal, &user, &connections, &range)?,
        Window::LastDays(_) => collect_daily(&portal, &user, &connections, &range)?,
    };

    match &config.output {
        OutputMode::Json => output::print_json(&records)?,
        OutputMode::Influx(influx) => {
            tracing::info!(url = %influx.url, "pushing to influxdb");
            InfluxSink::new(influx)?.write_usage(&records)?;
        }
    }

    Ok(())
}
