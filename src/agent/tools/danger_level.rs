use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::travel_data::DangerKey;
use super::{object_schema, parse_args, Tool, TravelData};
use crate::error::ChatError;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CityArgs {
    destination_city: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CountryArgs {
    country: String,
}

/// Danger lookup keyed only by location. Depending on the dataset it is
/// advertised as `get_danger_level(destination_city)` or
/// `get_country_danger(country)`.
pub struct DangerLevelTool {
    data: Arc<TravelData>,
}

impl DangerLevelTool {
    pub fn new(data: Arc<TravelData>) -> Self { Self { data } }

    fn param(&self) -> &'static str {
        match self.data.danger_key() {
            DangerKey::City => "destination_city",
            DangerKey::Country => "country",
        }
    }
}

#[async_trait]
impl Tool for DangerLevelTool {
    fn name(&self) -> &str {
        match self.data.danger_key() {
            DangerKey::City => "get_danger_level",
            DangerKey::Country => "get_country_danger",
        }
    }

    fn description(&self) -> &str {
        match self.data.danger_key() {
            DangerKey::City => "Get the danger level of a destination city.",
            DangerKey::Country => "Get the danger level of a country.",
        }
    }

    fn parameters(&self) -> Value {
        let description = match self.data.danger_key() {
            DangerKey::City => "The city that the customer wants to travel to",
            DangerKey::Country => "The country that the customer wants to travel to",
        };
        object_schema(&[(self.param(), "string", description)])
    }

    async fn run(&self, args: Value) -> Result<String, ChatError> {
        let place = match self.data.danger_key() {
            DangerKey::City => parse_args::<CityArgs>(self.name(), args)?.destination_city,
            DangerKey::Country => parse_args::<CountryArgs>(self.name(), args)?.country,
        };
        tracing::info!(place = %place, tool = self.name(), "danger tool called");
        let danger = self.data.danger_level(&place).unwrap_or("Unknown danger level");
        Ok(match self.data.danger_key() {
            DangerKey::City => format!("The danger level of {} is {}", place, danger),
            DangerKey::Country => format!("The danger level in {} is {}", place, danger),
        })
    }
}
