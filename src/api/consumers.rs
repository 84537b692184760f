use serde::Deserialize;

use crate::api::{Connection, UserInfo};
use crate::error::{ApiError, Result};
use crate::ApiClient;

/// Resolves the organization behind a login into its metering connections.
pub struct EnergyConsumers<'a> {
    client: &'a dyn ApiClient,
}

#[derive(Deserialize, Debug)]
struct EnergyConsumersReply {
    #[serde(rename = "shippingAddresses")]
    shipping_addresses: Vec<ShippingAddress>,
}

#[derive(Deserialize, Debug)]
struct ShippingAddress {
    connections: Vec<ConnectionEntry>,
}

#[derive(Deserialize, Debug)]
struct ConnectionEntry {
    #[serde(rename = "marketSegment")]
    market_segment: String,
    #[serde(rename = "connectionId")]
    connection_id: String,
}

impl<'a> EnergyConsumers<'a> {
    pub fn new(client: &'a dyn ApiClient) -> Self {
        Self { client }
    }

    /// All metering connections under the user's organization, in server
    /// order.
    ///
    /// Only organizations with exactly one shipping address are supported;
    /// anything else fails before any further call is made.
    pub fn connections(&self, user: &UserInfo) -> Result<Vec<Connection>> {
        let path = format!("/api/v1/energyConsumers/{}", user.org_id);
        let body = self.client.http_get(&path, &[])?;
        let reply: EnergyConsumersReply = serde_json::from_str(&body)?;

        let mut addresses = reply.shipping_addresses;
        if addresses.len() != 1 {
            return Err(ApiError::Precondition(format!(
                "expected exactly one shipping address, found {}",
                addresses.len()
            )));
        }

        let address = addresses.remove(0);
        Ok(address
            .connections
            .into_iter()
            .map(|entry| Connection {
                market_segment: entry.market_segment,
                connection_id: entry.connection_id,
            })
            .collect())
    }
}
