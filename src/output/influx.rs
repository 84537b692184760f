use chrono::NaiveDateTime;
use reqwest::blocking::Client;

use crate::api::usage::UsageRecord;
use crate::config::InfluxConfig;
use crate::error::{ApiError, Result};

/// Every run writes into the same bucket.
const BUCKET: &str = "sensordata";

const SEC_TO_NANO: i64 = 1_000_000_000;

/// Pushes usage points to an InfluxDB v2 instance over its HTTP write API,
/// encoded as line protocol.
pub struct InfluxSink {
    url: String,
    token: String,
    org: String,
    http: Client,
}

impl InfluxSink {
    pub fn new(config: &InfluxConfig) -> Result<Self> {
        Ok(Self {
            url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            org: config.org.clone(),
            http: Client::builder().build()?,
        })
    }

    /// Write two points per time bucket, one per consumption kind, each
    /// POSTed on its own. Earlier writes stay in place when a later one
    /// fails.
    pub fn write_usage(&self, records: &[UsageRecord]) -> Result<()> {
        for record in records {
            for line in usage_lines(record)? {
                self.write_line(&line)?;
            }
        }
        Ok(())
    }

    fn write_line(&self, line: &str) -> Result<()> {
        let url = format!("{}/api/v2/write", self.url);
        let response = self
            .http
            .post(&url)
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", BUCKET),
                ("precision", "ns"),
            ])
            .header("Authorization", format!("Token {}", self.token))
            .body(line.to_string())
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text()?;
            tracing::error!(%status, body, line, "point write rejected");
            return Err(ApiError::Transport { status, body });
        }
        Ok(())
    }
}

/// The line-protocol points for one usage payload: per bucket, a
/// `consumptionPeak` and a `consumptionOffPeak` point sharing the bucket's
/// timestamp, with the payload's market as measurement.
fn usage_lines(record: &UsageRecord) -> Result<Vec<String>> {
    let buckets = record.buckets()?;
    let mut lines = Vec::with_capacity(buckets.len() * 2);
    for bucket in buckets {
        let timestamp = parse_bucket_time(&bucket.time)?;
        lines.push(point_line(
            &record.market,
            "consumptionPeak",
            bucket.consumption_peak,
            timestamp,
        ));
        lines.push(point_line(
            &record.market,
            "consumptionOffPeak",
            bucket.consumption_off_peak,
            timestamp,
        ));
    }
    Ok(lines)
}

fn point_line(measurement: &str, kind: &str, value: f64, epoch_seconds: i64) -> String {
    let mut line = String::new();
    escape_ident(measurement, &mut line);
    line.push_str(",type=");
    escape_ident(kind, &mut line);
    line.push_str(" value=");
    line.push_str(&value.to_string());
    line.push(' ');
    line.push_str(&(epoch_seconds * SEC_TO_NANO).to_string());
    line
}

/// Line protocol requires escaping commas, spaces and equals in
/// measurement names and tag values with a backslash.
fn escape_ident(s: &str, out: &mut String) {
    for ch in s.chars() {
        match ch {
            ',' | ' ' | '=' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
}

/// Bucket times come back as UTC with a trailing `Z` marker (sometimes
/// with fractional seconds). Strip the marker and read the remainder as
/// UTC; if the server ever changes its mind about the zone, this is the
/// one place to fix.
fn parse_bucket_time(time: &str) -> Result<i64> {
    let naive = time.trim_end_matches('Z');
    let parsed = NaiveDateTime::parse_from_str(naive, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|e| ApiError::Parse(format!("unparseable bucket time {time:?}: {e}")))?;
    Ok(parsed.and_utc().timestamp())
}
