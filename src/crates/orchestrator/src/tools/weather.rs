//! `mock_weather`: deterministic weather, for tests and demos.

use super::{required_str, Tool, ToolInput, ToolOutput};
use crate::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

const CONDITIONS: [&str; 5] = ["sunny", "partly cloudy", "cloudy", "rainy", "windy"];

/// Weather tool that derives its answer from the location name
#[derive(Debug, Default, Clone, Copy)]
pub struct MockWeatherTool;

#[async_trait]
impl Tool for MockWeatherTool {
    fn name(&self) -> &str {
        "mock_weather"
    }

    fn description(&self) -> &str {
        "Returns the current weather for a location (test data)."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"location": {"type": "string"}},
            "required": ["location"]
        })
    }

    async fn execute(&self, input: ToolInput) -> Result<ToolOutput> {
        let location = required_str(&input, "location")?;
        let seed: u32 = location
            .to_lowercase()
            .bytes()
            .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));

        let temperature_c = (seed % 35) as i64 - 5;
        let conditions = CONDITIONS[(seed / 35) as usize % CONDITIONS.len()];

        Ok(json!({
            "location": location,
            "temperature_c": temperature_c,
            "conditions": conditions,
            "summary": format!("{}: {}°C, {}", location, temperature_c, conditions),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_weather_is_deterministic() {
        let tool = MockWeatherTool;
        let a = tool.execute(json!({"location": "Ankara"})).await.unwrap();
        let b = tool.execute(json!({"location": "ankara"})).await.unwrap();
        assert_eq!(a["temperature_c"], b["temperature_c"]);
        assert_eq!(a["conditions"], b["conditions"]);

        let t = a["temperature_c"].as_i64().unwrap();
        assert!((-5..30).contains(&t));
        assert!(a["summary"].as_str().unwrap().starts_with("Ankara: "));
    }

    #[tokio::test]
    async fn test_weather_requires_location() {
        assert!(MockWeatherTool.execute(json!({})).await.is_err());
    }
}
