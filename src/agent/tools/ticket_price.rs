use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{object_schema, parse_args, Tool, TravelData};
use crate::error::ChatError;

pub struct TicketPriceTool {
    data: Arc<TravelData>,
}

impl TicketPriceTool {
    pub fn new(data: Arc<TravelData>) -> Self { Self { data } }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Args {
    destination_city: String,
}

#[async_trait]
impl Tool for TicketPriceTool {
    fn name(&self) -> &str { "get_ticket_price" }

    fn description(&self) -> &str { "Get the price of a return ticket to the destination city." }

    fn parameters(&self) -> Value {
        object_schema(&[("destination_city", "string", "The city that the customer wants to travel to")])
    }

    async fn run(&self, args: Value) -> Result<String, ChatError> {
        let Args { destination_city } = parse_args(self.name(), args)?;
        tracing::info!(city = %destination_city, "ticket price tool called");
        let price = self.data.ticket_price(&destination_city).unwrap_or("Unknown ticket price");
        Ok(format!("The price of a ticket to {} is {}", destination_city, price))
    }
}
