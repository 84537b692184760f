use crate::api::usage::UsageRecord;
use crate::error::Result;

pub mod influx;

pub use influx::InfluxSink;

/// The whole payload sequence as indented JSON, untransformed.
pub fn to_json_text(records: &[UsageRecord]) -> Result<String> {
    Ok(serde_json::to_string_pretty(records)?)
}

/// Print the accumulated payloads to stdout.
pub fn print_json(records: &[UsageRecord]) -> Result<()> {
    println!("{}", to_json_text(records)?);
    Ok(())
}
