use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::{Connection, DateRange, UserInfo};
use crate::error::{ApiError, Result};
use crate::ApiClient;

/// One usage payload exactly as the portal returned it, tagged with the
/// market segment of the connection it was fetched for. Serializing it
/// yields the original payload plus a `market` key.
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub market: String,
    #[serde(flatten)]
    pub payload: Value,
}

/// One time bucket inside a usage payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageBucket {
    pub time: String,
    pub consumption_peak: f64,
    pub consumption_off_peak: f64,
}

impl UsageRecord {
    /// The time-bucketed values inside the payload.
    pub fn buckets(&self) -> Result<Vec<UsageBucket>> {
        let values = self
            .payload
            .get("values")
            .ok_or_else(|| ApiError::Parse("usage payload carries no values".to_string()))?;
        Ok(serde_json::from_value(values.clone())?)
    }
}

/// Usage queries for a single metering connection.
///
/// The two resolutions the portal understands take differently shaped
/// parameters, so each gets its own method instead of a flag.
pub struct ConnectionUsage<'a> {
    client: &'a dyn ApiClient,
}

impl<'a> ConnectionUsage<'a> {
    pub fn new(client: &'a dyn ApiClient) -> Self {
        Self { client }
    }

    /// Day-resolution usage over an inclusive date range, in one payload.
    pub fn daily(
        &self,
        user: &UserInfo,
        connection: &Connection,
        range: &DateRange,
    ) -> Result<UsageRecord> {
        let mut query = vec![("resolution".to_string(), "Days".to_string())];
        query.extend(range.to_query_string());
        self.fetch(user, connection, &query)
    }

    /// Hour-resolution usage for exactly one calendar day.
    pub fn hourly(
        &self,
        user: &UserInfo,
        connection: &Connection,
        day: NaiveDate,
    ) -> Result<UsageRecord> {
        let (start, end) = day_window(day);
        let query = vec![
            ("resolution".to_string(), "Hours".to_string()),
            ("startDateTime".to_string(), start),
            ("endDateTime".to_string(), end),
        ];
        self.fetch(user, connection, &query)
    }

    fn fetch(
        &self,
        user: &UserInfo,
        connection: &Connection,
        query: &[(String, String)],
    ) -> Result<UsageRecord> {
        let path = format!(
            "/api/consumers/{}/connections/{}/usage",
            user.user_id, connection.connection_id
        );
        let body = self.client.http_get(&path, query)?;
        let payload: Value = serde_json::from_str(&body)?;
        Ok(UsageRecord {
            market: connection.market_segment.clone(),
            payload,
        })
    }
}

/// Request window for one day of hourly buckets: first bucket at 00:15,
/// last at midnight of the following day.
///
/// The timestamps are deliberately zone-naive. The server reads them as
/// Dutch civil time no matter what, while bucket times in the *response*
/// come back in UTC. Keep that asymmetry contained to this function.
fn day_window(day: NaiveDate) -> (String, String) {
    let next = day.checked_add_days(Days::new(1)).unwrap_or(day);
    (
        format!("{day}T00:15:00.000"),
        format!("{next}T00:00:00.000"),
    )
}

/// One day-resolution payload per connection, covering `range`.
pub fn collect_daily(
    client: &dyn ApiClient,
    user: &UserInfo,
    connections: &[Connection],
    range: &DateRange,
) -> Result<Vec<UsageRecord>> {
    let usage = ConnectionUsage::new(client);
    let mut records = Vec::with_capacity(connections.len());
    for connection in connections {
        records.push(usage.daily(user, connection, range)?);
    }
    Ok(records)
}

/// Hour-resolution payloads, one per connection and day in `range`,
/// fetched sequentially. The first failure aborts the sweep.
pub fn collect_hourly(
    client: &dyn ApiClient,
    user: &UserInfo,
    connections: &[Connection],
    range: &DateRange,
) -> Result<Vec<UsageRecord>> {
    let usage = ConnectionUsage::new(client);
    let mut records = Vec::new();
    for connection in connections {
        for day in range.days() {
            records.push(usage.hourly(user, connection, day)?);
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use reqwest::StatusCode;

    use super::*;

    struct MockClient {
        body: String,
        fail_from_call: Option<usize>,
        calls: RefCell<Vec<(String, Vec<(String, String)>)>>,
    }

    impl MockClient {
        fn new(body: &str) -> Self {
            Self {
                body: body.to_string(),
                fail_from_call: None,
                calls: RefCell::new(Vec::new()),
            }
        }

        fn failing_from(body: &str, call: usize) -> Self {
            Self {
                fail_from_call: Some(call),
                ..Self::new(body)
            }
        }
    }

    impl ApiClient for MockClient {
        fn http_get(&self, path: &str, query: &[(String, String)]) -> Result<String> {
            let mut calls = self.calls.borrow_mut();
            let index = calls.len();
            calls.push((path.to_string(), query.to_vec()));
            if self.fail_from_call.is_some_and(|from| index >= from) {
                return Err(ApiError::Transport {
                    status: StatusCode::BAD_GATEWAY,
                    body: "bad gateway".to_string(),
                });
            }
            Ok(self.body.clone())
        }
    }

    fn user() -> UserInfo {
        UserInfo {
            user_id: "user-1".to_string(),
            org_id: "org-1".to_string(),
        }
    }

    fn electricity() -> Connection {
        Connection {
            market_segment: "Electricity".to_string(),
            connection_id: "conn-e".to_string(),
        }
    }

    fn gas() -> Connection {
        Connection {
            market_segment: "Gas".to_string(),
            connection_id: "conn-g".to_string(),
        }
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    const BODY: &str = r#"{"values": [
        {"time": "2024-03-10T10:00:00Z", "consumptionPeak": 1.5, "consumptionOffPeak": 0.2}
    ]}"#;

    #[test]
    fn daily_requests_day_resolution_over_the_range() {
        let client = MockClient::new(BODY);
        let range = DateRange {
            start: date("2024-03-01"),
            end: date("2024-03-31"),
        };
        ConnectionUsage::new(&client)
            .daily(&user(), &electricity(), &range)
            .unwrap();

        let calls = client.calls.borrow();
        let (path, query) = &calls[0];
        assert_eq!(path, "/api/consumers/user-1/connections/conn-e/usage");
        assert_eq!(
            query.as_slice(),
            [
                ("resolution".to_string(), "Days".to_string()),
                ("startDate".to_string(), "2024-03-01".to_string()),
                ("endDate".to_string(), "2024-03-31".to_string()),
            ]
        );
    }

    #[test]
    fn hourly_requests_the_quarter_past_midnight_window() {
        let client = MockClient::new(BODY);
        ConnectionUsage::new(&client)
            .hourly(&user(), &electricity(), date("2024-03-10"))
            .unwrap();

        let calls = client.calls.borrow();
        let (_, query) = &calls[0];
        assert_eq!(
            query.as_slice(),
            [
                ("resolution".to_string(), "Hours".to_string()),
                (
                    "startDateTime".to_string(),
                    "2024-03-10T00:15:00.000".to_string()
                ),
                (
                    "endDateTime".to_string(),
                    "2024-03-11T00:00:00.000".to_string()
                ),
            ]
        );
    }

    #[test]
    fn records_are_tagged_with_the_connection_market() {
        let client = MockClient::new(BODY);
        let record = ConnectionUsage::new(&client)
            .hourly(&user(), &gas(), date("2024-03-10"))
            .unwrap();
        assert_eq!(record.market, "Gas");

        let serialized = serde_json::to_value(&record).unwrap();
        assert_eq!(serialized["market"], "Gas");
        assert!(serialized["values"].is_array());
    }

    #[test]
    fn buckets_are_read_out_of_the_payload() {
        let client = MockClient::new(BODY);
        let record = ConnectionUsage::new(&client)
            .hourly(&user(), &electricity(), date("2024-03-10"))
            .unwrap();
        assert_eq!(
            record.buckets().unwrap(),
            vec![UsageBucket {
                time: "2024-03-10T10:00:00Z".to_string(),
                consumption_peak: 1.5,
                consumption_off_peak: 0.2,
            }]
        );
    }

    #[test]
    fn payload_without_values_is_a_parse_error() {
        let record = UsageRecord {
            market: "Electricity".to_string(),
            payload: serde_json::json!({"unit": "kWh"}),
        };
        assert!(matches!(record.buckets(), Err(ApiError::Parse(_))));
    }

    #[test]
    fn hourly_sweep_crosses_connections_with_days() {
        let client = MockClient::new(BODY);
        let range = DateRange {
            start: date("2024-03-10"),
            end: date("2024-03-12"),
        };
        let records = collect_hourly(&client, &user(), &[electricity(), gas()], &range).unwrap();
        assert_eq!(records.len(), 6);

        let calls = client.calls.borrow();
        assert_eq!(calls.len(), 6);
        // Connection-major: all days for one connection before the next.
        assert!(calls[..3]
            .iter()
            .all(|(path, _)| path.contains("/conn-e/")));
        assert!(calls[3..].iter().all(|(path, _)| path.contains("/conn-g/")));
    }

    #[test]
    fn sweep_stops_at_the_first_failure() {
        let client = MockClient::failing_from(BODY, 2);
        let range = DateRange {
            start: date("2024-03-10"),
            end: date("2024-03-12"),
        };
        let result = collect_hourly(&client, &user(), &[electricity(), gas()], &range);
        assert!(matches!(result, Err(ApiError::Transport { .. })));
        // The failing call is the last one issued.
        assert_eq!(client.calls.borrow().len(), 3);
    }

    #[test]
    fn daily_sweep_issues_one_call_per_connection() {
        let client = MockClient::new(BODY);
        let range = DateRange {
            start: date("2024-03-01"),
            end: date("2024-03-31"),
        };
        let records = collect_daily(&client, &user(), &[electricity(), gas()], &range).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(client.calls.borrow().len(), 2);
        assert_eq!(records[0].market, "Electricity");
        assert_eq!(records[1].market, "Gas");
    }
}
