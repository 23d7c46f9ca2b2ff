use std::collections::HashMap;
use std::str::FromStr;

/// Which location the danger lookup is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DangerKey {
    City,
    Country,
}

/// Lookup tables behind the reference tools. Keys are stored lowercase.
#[derive(Debug, Clone)]
pub struct TravelData {
    ticket_prices: HashMap<String, String>,
    danger_levels: HashMap<String, String>,
    danger_key: DangerKey,
}

impl TravelData {
    pub fn new(prices: &[(&str, &str)], danger: &[(&str, &str)], danger_key: DangerKey) -> Self {
        let lower = |pairs: &[(&str, &str)]| pairs.iter().map(|(k, v)| (k.to_lowercase(), (*v).to_string())).collect();
        Self { ticket_prices: lower(prices), danger_levels: lower(danger), danger_key }
    }

    /// City-keyed dataset of the first travel assistant.
    pub fn legacy() -> Self {
        Self::new(
            &[("london", "$799"), ("paris", "$899"), ("tokyo", "$1400"), ("berlin", "$499")],
            &[("london", "3"), ("paris", "5"), ("tokyo", "1"), ("berlin", "4")],
            DangerKey::City,
        )
    }

    /// FlightAI dataset: prices by city, danger by country.
    pub fn flight_ai() -> Self {
        Self::new(
            &[("guadalajara", "$999"), ("new orleans", "$799"), ("prague", "$99"), ("berlin", "$199")],
            &[
                ("mexico", "5"),
                ("usa", "1000"),
                ("united states", "1000"),
                ("estados unidos", "1000"),
                ("czech republic", "2"),
                ("germany", "3"),
            ],
            DangerKey::Country,
        )
    }

    pub fn ticket_price(&self, city: &str) -> Option<&str> {
        self.ticket_prices.get(&city.trim().to_lowercase()).map(String::as_str)
    }

    pub fn danger_level(&self, place: &str) -> Option<&str> {
        self.danger_levels.get(&place.trim().to_lowercase()).map(String::as_str)
    }

    pub fn danger_key(&self) -> DangerKey { self.danger_key }
}

impl FromStr for TravelData {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "legacy" => Ok(Self::legacy()),
            "flight-ai" | "flight_ai" | "flightai" => Ok(Self::flight_ai()),
            other => anyhow::bail!("unknown dataset '{}', expected legacy or flight-ai", other),
        }
    }
}
