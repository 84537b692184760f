use anyhow::{bail, Context};
use chrono::{Days, NaiveDate};

use crate::api::DateRange;

const DEFAULT_WINDOW_DAYS: u32 = 30;

/// Everything one run needs, read from the environment in one place and
/// handed to the components explicitly.
#[derive(Debug, Clone)]
pub struct Config {
    pub username: String,
    pub password: String,
    pub output: OutputMode,
    pub window: Window,
}

/// Where the collected usage ends up.
#[derive(Debug, Clone)]
pub enum OutputMode {
    Json,
    Influx(InfluxConfig),
}

#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub url: String,
    pub token: String,
    pub org: String,
}

/// Which days to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// One explicit day, fetched at hour resolution.
    Day(NaiveDate),
    /// The last `n` days ending today, fetched at day resolution.
    LastDays(u32),
}

impl Window {
    /// Concrete date range for a run happening on `today`.
    pub fn to_range(self, today: NaiveDate) -> DateRange {
        match self {
            Window::Day(day) => DateRange {
                start: day,
                end: day,
            },
            Window::LastDays(days) => {
                let start = today
                    .checked_sub_days(Days::new(u64::from(days.saturating_sub(1))))
                    .unwrap_or(today);
                DateRange { start, end: today }
            }
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let username = require("VANDEBRON_USERNAME")?;
        let password = require("VANDEBRON_PASSWORD")?;
        let output = parse_output(
            std::env::var("VANDEBRON_OUTPUT").ok(),
            std::env::var("INFLUXDB_URL").ok(),
            std::env::var("INFLUXDB_TOKEN").ok(),
            std::env::var("INFLUXDB_ORG").ok(),
        )?;
        let window = parse_window(
            std::env::var("VANDEBRON_DATE").ok(),
            std::env::var("VANDEBRON_DAYS").ok(),
        )?;

        Ok(Config {
            username,
            password,
            output,
            window,
        })
    }
}

fn require(name: &str) -> anyhow::Result<String> {
    std::env::var(name).with_context(|| format!("{name} must be set"))
}

fn parse_output(
    mode: Option<String>,
    url: Option<String>,
    token: Option<String>,
    org: Option<String>,
) -> anyhow::Result<OutputMode> {
    match mode.as_deref() {
        None | Some("json") => Ok(OutputMode::Json),
        Some("influxdb") => Ok(OutputMode::Influx(InfluxConfig {
            url: url.context("INFLUXDB_URL must be set for influxdb output")?,
            token: token.context("INFLUXDB_TOKEN must be set for influxdb output")?,
            org: org.context("INFLUXDB_ORG must be set for influxdb output")?,
        })),
        Some(other) => bail!("unknown output mode {other:?} (expected json or influxdb)"),
    }
}

/// An explicit date wins over a day count; with neither, the window is the
/// default number of days ending today.
fn parse_window(date: Option<String>, days: Option<String>) -> anyhow::Result<Window> {
    if let Some(date) = date {
        let day: NaiveDate = date
            .parse()
            .with_context(|| format!("VANDEBRON_DATE {date:?} is not a YYYY-MM-DD date"))?;
        return Ok(Window::Day(day));
    }

    let days = match days {
        Some(raw) => raw
            .parse::<u32>()
            .with_context(|| format!("VANDEBRON_DAYS {raw:?} is not a day count"))?,
        None => DEFAULT_WINDOW_DAYS,
    };
    if days == 0 {
        bail!("VANDEBRON_DAYS must be at least 1");
    }
    Ok(Window::LastDays(days))
}
