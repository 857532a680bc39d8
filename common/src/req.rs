use crate::led::LedState;

/// Payload handed to the radio relay. Field order is part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
pub struct LedCommand {
    pub led1: bool,
    pub led2: bool,
}

impl LedCommand {
    pub fn to_payload(&self) -> String {
        // two bools cannot fail to serialize
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// One sample of the dashboard chart, consumed by the page script as
/// `{time, temperature, humidity, led1, led2}`.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ChartPoint {
    pub time: String,
    pub temperature: Option<f64>, // °C
    pub humidity: Option<f64>,    // percent
    pub led1: Option<u8>,         // 0/1
    pub led2: Option<u8>,         // 0/1
}

impl ChartPoint {
    pub fn new(
        time: String,
        temperature: Option<f64>,
        humidity: Option<f64>,
        led1: LedState,
        led2: LedState,
    ) -> Self {
        Self {
            time,
            temperature,
            humidity,
            led1: led1.level(),
            led2: led2.level(),
        }
    }
}

/// One sample of the temperature/humidity graphs page.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ClimatePoint {
    pub time: String,
    pub temperature: Option<f64>, // °C
    pub humidity: Option<f64>,    // percent
}
