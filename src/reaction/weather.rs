/// Weather lookup module
///
/// Fetches the forecast for a fixed location from the Dark Sky API (via
/// RapidAPI) and reduces it to a short sentence suitable for speech.

use super::ReactionError;
use chrono::{Local, TimeZone};
use serde::Deserialize;
use std::fmt::Display;
use std::time::Duration;
use tracing::debug;

pub const DARK_SKY_HOST: &str = "dark-sky.p.rapidapi.com";

/// Whole-request timeout used unless configured otherwise
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Weather service configuration
#[derive(Debug, Clone)]
pub struct WeatherConfig {
    /// RapidAPI key for the Dark Sky endpoint
    pub api_key: String,

    pub latitude: f64,
    pub longitude: f64,

    /// Base URL of the forecast endpoint
    pub base_url: String,

    /// Request timeout
    pub timeout: Duration,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            latitude: 42.42,
            longitude: -71.16,
            base_url: format!("https://{}", DARK_SKY_HOST),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Forecast {
    pub currently: Conditions,
    #[serde(default)]
    pub minutely: Option<Conditions>,
    pub hourly: HourlyForecast,
    pub daily: DailyForecast,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Conditions {
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HourlyForecast {
    #[serde(default)]
    pub summary: String,
    pub data: Vec<HourlyPoint>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyPoint {
    /// Unix timestamp
    pub time: i64,
    pub temperature: f64,
    pub apparent_temperature: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DailyForecast {
    #[serde(default)]
    pub summary: String,
    pub data: Vec<DailyPoint>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyPoint {
    pub temperature_high: f64,
    pub temperature_high_time: i64,
    pub temperature_low: f64,
    pub temperature_low_time: i64,
}

/// Dark Sky forecast client
pub struct WeatherClient {
    client: reqwest::Client,
    config: WeatherConfig,
}

impl WeatherClient {
    pub fn new(config: WeatherConfig) -> Result<Self, ReactionError> {
        if config.api_key.is_empty() {
            return Err(ReactionError::Weather("API key is required".to_string()));
        }

        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self { client, config })
    }

    pub fn forecast_url(&self) -> String {
        format!(
            "{}/{},{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.latitude,
            self.config.longitude
        )
    }

    pub async fn fetch(&self) -> Result<Forecast, ReactionError> {
        let url = self.forecast_url();
        debug!("Fetching forecast from {}", url);

        let response = self
            .client
            .get(&url)
            .query(&[("lang", "en"), ("units", "auto")])
            .header("x-rapidapi-key", &self.config.api_key)
            .header("x-rapidapi-host", DARK_SKY_HOST)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ReactionError::Weather(format!("{}: {}", status, body)));
        }

        Ok(response.json::<Forecast>().await?)
    }
}

/// Render the forecast in the local time zone
pub fn spoken_summary(forecast: &Forecast) -> Result<String, ReactionError> {
    spoken_summary_in(forecast, &Local)
}

/// Render the forecast with times shown in `tz`
pub fn spoken_summary_in<Tz>(forecast: &Forecast, tz: &Tz) -> Result<String, ReactionError>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let (now, next) = match forecast.hourly.data.as_slice() {
        [now, next, ..] => (now, next),
        _ => {
            return Err(ReactionError::Weather(
                "forecast has fewer than two hourly entries".to_string(),
            ))
        }
    };

    let today = forecast
        .daily
        .data
        .first()
        .ok_or_else(|| ReactionError::Weather("forecast has no daily entry".to_string()))?;

    let clock = |timestamp: i64| -> Result<String, ReactionError> {
        tz.timestamp_opt(timestamp, 0)
            .single()
            .map(|t| t.format("%I:%M %p").to_string())
            .ok_or_else(|| ReactionError::Weather(format!("invalid timestamp {}", timestamp)))
    };

    Ok(format!(
        "\nTemperature at {} is {:.1}. Feels like: {:.1}.\n\
         At {} it will be {:.1}. Feels like: {:.1}.\n\
         Today's high is: {:.1} at {}.\n\
         Today's low is: {:.1} at {}",
        clock(now.time)?,
        now.temperature,
        now.apparent_temperature,
        clock(next.time)?,
        next.temperature,
        next.apparent_temperature,
        today.temperature_high,
        clock(today.temperature_high_time)?,
        today.temperature_low,
        clock(today.temperature_low_time)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    // 2020-06-01 12:00:00 UTC and one hour later; high at 15:30, low at 04:05
    const SAMPLE: &str = r#"{
        "currently": { "summary": "Partly Cloudy" },
        "minutely": { "summary": "Partly cloudy for the hour." },
        "hourly": {
            "summary": "Mostly cloudy throughout the day.",
            "data": [
                { "time": 1591012800, "temperature": 68.24, "apparentTemperature": 67.96 },
                { "time": 1591016400, "temperature": 70.0, "apparentTemperature": 70.04 },
                { "time": 1591020000, "temperature": 71.3, "apparentTemperature": 71.3 }
            ]
        },
        "daily": {
            "summary": "Light rain on Thursday.",
            "data": [
                {
                    "temperatureHigh": 74.61,
                    "temperatureHighTime": 1591025400,
                    "temperatureLow": 55.17,
                    "temperatureLowTime": 1590984300
                }
            ]
        }
    }"#;

    #[test]
    fn test_forecast_parses_dark_sky_payload() {
        let forecast: Forecast = serde_json::from_str(SAMPLE).unwrap();

        assert_eq!(forecast.currently.summary, "Partly Cloudy");
        assert_eq!(forecast.hourly.data.len(), 3);
        assert_eq!(forecast.daily.data[0].temperature_low_time, 1590984300);
        assert!(forecast.minutely.is_some());
    }

    #[test]
    fn test_spoken_summary() {
        let forecast: Forecast = serde_json::from_str(SAMPLE).unwrap();

        let summary = spoken_summary_in(&forecast, &Utc).unwrap();
        assert_eq!(
            summary,
            "\nTemperature at 12:00 PM is 68.2. Feels like: 68.0.\n\
             At 01:00 PM it will be 70.0. Feels like: 70.0.\n\
             Today's high is: 74.6 at 03:30 PM.\n\
             Today's low is: 55.2 at 04:05 AM"
        );
    }

    #[test]
    fn test_summary_requires_two_hours() {
        let mut forecast: Forecast = serde_json::from_str(SAMPLE).unwrap();
        forecast.hourly.data.truncate(1);

        assert!(matches!(
            spoken_summary_in(&forecast, &Utc),
            Err(ReactionError::Weather(_))
        ));
    }

    #[test]
    fn test_forecast_url() {
        let client = WeatherClient::new(WeatherConfig {
            api_key: "key".to_string(),
            base_url: "http://localhost:8080/".to_string(),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(client.forecast_url(), "http://localhost:8080/42.42,-71.16");
    }

    #[test]
    fn test_missing_api_key_is_rejected() {
        assert!(WeatherClient::new(WeatherConfig::default()).is_err());
    }
}
