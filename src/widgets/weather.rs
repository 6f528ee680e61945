use crate::cli::Args;
use crate::error::ApiError;
use log::warn;
use reqwest::Client as HttpClient;
use serde::{ Deserialize, Serialize };
use serde_json::Value as JsonValue;

const CURRENT_FIELDS: &str =
    "temperature_2m,weather_code,wind_speed_10m,relative_humidity_2m,apparent_temperature";

#[derive(Debug, Clone)]
pub struct WeatherConfig {
    pub api_url: String,
    pub latitude: String,
    pub longitude: String,
}

impl WeatherConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            api_url: args.weather_api_url.clone(),
            latitude: args.weather_lat.clone(),
            longitude: args.weather_lon.clone(),
        }
    }
}

#[derive(Deserialize, Default)]
struct ForecastResponse {
    #[serde(default)]
    current: Option<CurrentConditions>,
    #[serde(default)]
    hourly: Option<HourlyForecast>,
}

#[derive(Deserialize, Default)]
struct CurrentConditions {
    time: Option<String>,
    temperature_2m: Option<JsonValue>,
    apparent_temperature: Option<JsonValue>,
    relative_humidity_2m: Option<JsonValue>,
    wind_speed_10m: Option<JsonValue>,
    weather_code: Option<JsonValue>,
}

#[derive(Deserialize, Default)]
struct HourlyForecast {
    #[serde(default)]
    time: Option<Vec<String>>,
    #[serde(default)]
    precipitation_probability: Option<Vec<JsonValue>>,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WeatherReport {
    pub temp: Option<JsonValue>,
    pub feels: Option<JsonValue>,
    pub humidity: Option<JsonValue>,
    pub wind: Option<JsonValue>,
    pub weather_code: Option<JsonValue>,
    pub rain_prob: Option<JsonValue>,
    pub time: Option<String>,
}

pub struct WeatherClient {
    http: HttpClient,
    config: WeatherConfig,
}

impl WeatherClient {
    pub fn new(config: WeatherConfig) -> Self {
        Self { http: HttpClient::new(), config }
    }

    pub async fn current(&self) -> Result<WeatherReport, ApiError> {
        let resp = self.http
            .get(&self.config.api_url)
            .query(
                &[
                    ("latitude", self.config.latitude.as_str()),
                    ("longitude", self.config.longitude.as_str()),
                    ("current", CURRENT_FIELDS),
                    ("hourly", "precipitation_probability"),
                    ("timezone", "auto"),
                ]
            )
            .send().await
            .map_err(|e| {
                warn!("Weather request failed: {}", e);
                ApiError::Internal("Failed to load weather".into())
            })?;

        if !resp.status().is_success() {
            warn!("Weather upstream answered {}", resp.status());
            return Err(ApiError::Upstream("Weather upstream error".into()));
        }

        let forecast = resp.json::<ForecastResponse>().await.map_err(|e| {
            warn!("Weather response unreadable: {}", e);
            ApiError::Internal("Failed to load weather".into())
        })?;
        Ok(summarize(forecast))
    }
}

fn non_null(value: Option<JsonValue>) -> Option<JsonValue> {
    value.filter(|v| !v.is_null())
}

fn summarize(forecast: ForecastResponse) -> WeatherReport {
    let current = forecast.current.unwrap_or_default();
    let hourly = forecast.hourly.unwrap_or_default();
    let probabilities = hourly.precipitation_probability.unwrap_or_default();

    let at_current_hour = match (&current.time, &hourly.time) {
        (Some(now), Some(times)) => times
            .iter()
            .position(|t| t == now)
            .and_then(|idx| non_null(probabilities.get(idx).cloned())),
        _ => None,
    };
    let rain_prob = at_current_hour.or_else(|| non_null(probabilities.first().cloned()));

    WeatherReport {
        temp: non_null(current.temperature_2m),
        feels: non_null(current.apparent_temperature),
        humidity: non_null(current.relative_humidity_2m),
        wind: non_null(current.wind_speed_10m),
        weather_code: non_null(current.weather_code),
        rain_prob,
        time: current.time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: JsonValue) -> WeatherReport {
        summarize(serde_json::from_value(value).unwrap())
    }

    #[test]
    fn picks_rain_probability_for_current_hour() {
        let report = parse(
            json!({
            "current": {
                "time": "2026-10-19T14:00",
                "temperature_2m": 12.3,
                "apparent_temperature": 10.1,
                "relative_humidity_2m": 80,
                "wind_speed_10m": 14.2,
                "weather_code": 3
            },
            "hourly": {
                "time": ["2026-10-19T13:00", "2026-10-19T14:00"],
                "precipitation_probability": [5, 40]
            }
        })
        );
        assert_eq!(report.rain_prob, Some(json!(40)));
        assert_eq!(report.temp, Some(json!(12.3)));
        assert_eq!(report.weather_code, Some(json!(3)));
    }

    #[test]
    fn falls_back_to_first_hour() {
        let report = parse(
            json!({
            "current": { "time": "2026-10-19T14:15" },
            "hourly": {
                "time": ["2026-10-19T14:00"],
                "precipitation_probability": [25]
            }
        })
        );
        assert_eq!(report.rain_prob, Some(json!(25)));
    }

    #[test]
    fn missing_fields_serialize_as_null() {
        let report = parse(json!({}));
        assert_eq!(
            serde_json::to_value(report).unwrap(),
            json!({
                "temp": null, "feels": null, "humidity": null, "wind": null,
                "weatherCode": null, "rainProb": null, "time": null
            })
        );
    }
}
