use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TripType {
    #[default]
    #[serde(rename = "oneway")]
    OneWay,
    #[serde(rename = "roundtrip")]
    RoundTrip,
}

impl TripType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripType::OneWay => "oneway",
            TripType::RoundTrip => "roundtrip",
        }
    }
}

/// Search input as typed by the user, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchForm {
    pub origin: String,
    pub destination: String,
    pub date: String,
    pub trip_type: TripType,
    pub return_date: Option<String>,
}

impl SearchForm {
    pub fn one_way(origin: &str, destination: &str, date: &str) -> Self {
        Self {
            origin: origin.to_string(),
            destination: destination.to_string(),
            date: date.to_string(),
            trip_type: TripType::OneWay,
            return_date: None,
        }
    }

    pub fn round_trip(origin: &str, destination: &str, date: &str, return_date: &str) -> Self {
        Self {
            origin: origin.to_string(),
            destination: destination.to_string(),
            date: date.to_string(),
            trip_type: TripType::RoundTrip,
            return_date: Some(return_date.to_string()),
        }
    }

    /// Normalizes city codes to uppercase and checks every field.
    ///
    /// Emptiness is checked before format so that a blank form reports the
    /// missing field rather than a malformed one.
    pub fn validate(&self) -> Result<SearchQuery, ValidationError> {
        let origin = self.origin.trim().to_ascii_uppercase();
        let destination = self.destination.trim().to_ascii_uppercase();
        let date = self.date.trim();

        if origin.is_empty() {
            return Err(ValidationError::MissingOrigin);
        }
        if destination.is_empty() {
            return Err(ValidationError::MissingDestination);
        }
        if date.is_empty() {
            return Err(ValidationError::MissingDate);
        }
        if origin == destination {
            return Err(ValidationError::SameCity(origin));
        }
        for code in [&origin, &destination] {
            if !is_city_code(code) {
                return Err(ValidationError::InvalidCityCode(code.clone()));
            }
        }

        let date = parse_date(date)?;
        let return_date = match (self.trip_type, self.return_date.as_deref().map(str::trim)) {
            (TripType::RoundTrip, Some(raw)) if !raw.is_empty() => {
                let return_date = parse_date(raw)?;
                if return_date < date {
                    return Err(ValidationError::ReturnBeforeDeparture);
                }
                Some(return_date)
            }
            _ => None,
        };

        Ok(SearchQuery {
            origin,
            destination,
            date,
            trip_type: self.trip_type,
            return_date,
        })
    }
}

impl From<&SearchQuery> for SearchForm {
    fn from(query: &SearchQuery) -> Self {
        Self {
            origin: query.origin.clone(),
            destination: query.destination.clone(),
            date: query.date.to_string(),
            trip_type: query.trip_type,
            return_date: query.return_date.map(|d| d.to_string()),
        }
    }
}

fn is_city_code(code: &str) -> bool {
    code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase())
}

fn parse_date(raw: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ValidationError::InvalidDate(raw.to_string()))
}

/// A validated search. City codes are uppercase and distinct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    #[serde(rename = "dcity")]
    pub origin: String,
    #[serde(rename = "acity")]
    pub destination: String,
    pub date: NaiveDate,
    #[serde(rename = "type", default)]
    pub trip_type: TripType,
    #[serde(
        rename = "returnDate",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub return_date: Option<NaiveDate>,
}

impl SearchQuery {
    /// Identity used to collapse repeated searches in the history.
    pub fn dedup_key(&self) -> (&str, &str, NaiveDate) {
        (&self.origin, &self.destination, self.date)
    }

    /// Query string for `GET /flights`.
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("dcity", self.origin.clone()),
            ("acity", self.destination.clone()),
            ("date", self.date.to_string()),
            ("flight_type", self.trip_type.as_str().to_string()),
        ];
        if let Some(return_date) = self.return_date {
            params.push(("return_date", return_date.to_string()));
        }
        params
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flight {
    pub airline: String,
    #[serde(rename = "flightNo")]
    pub flight_no: String,
    #[serde(rename = "plane", default)]
    pub aircraft: String,
    #[serde(rename = "departure")]
    pub origin: String,
    #[serde(rename = "arrival")]
    pub destination: String,
    #[serde(rename = "departureTime", with = "timestamp")]
    pub departure_time: NaiveDateTime,
    #[serde(rename = "arrivalTime", with = "timestamp")]
    pub arrival_time: NaiveDateTime,
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub punctuality: Option<String>,
    #[serde(deserialize_with = "non_negative")]
    pub price: f64,
    #[serde(default)]
    pub discount: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultPage {
    #[serde(default)]
    pub list: Vec<Flight>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub total: u32,
}

/// Envelope returned by `GET /flights`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlightResponse {
    #[serde(default)]
    pub reason: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub result: ResultPage,
    pub error_code: i64,
}

impl FlightResponse {
    pub fn success(list: Vec<Flight>) -> Self {
        let total = u32::try_from(list.len()).unwrap_or(u32::MAX);
        Self {
            reason: "success".to_string(),
            result: ResultPage {
                list,
                page: 1,
                total,
            },
            error_code: 0,
        }
    }

    pub fn failure(error_code: i64, reason: &str) -> Self {
        Self {
            reason: reason.to_string(),
            result: ResultPage::default(),
            error_code,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error_code == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn non_negative<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let price = f64::deserialize(deserializer)?;
    if !price.is_finite() || price < 0.0 {
        return Err(serde::de::Error::custom(format!(
            "price must be a non-negative number, got {price}"
        )));
    }
    Ok(price)
}

/// Provider timestamps come in several shapes; all are read as local wall
/// clock time and written back as `YYYY-MM-DD HH:MM`.
mod timestamp {
    use super::*;

    const FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
    ];

    pub fn parse(raw: &str) -> Option<NaiveDateTime> {
        let raw = raw.trim();
        FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .or_else(|| {
                DateTime::parse_from_rfc3339(raw)
                    .ok()
                    .map(|dt| dt.naive_local())
            })
    }

    pub fn serialize<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.format("%Y-%m-%d %H:%M").to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("bad timestamp {raw:?}")))
    }
}
