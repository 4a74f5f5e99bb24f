use crate::{CoreError, CoreResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use wayfare_offer::{CabinClass, PassengerType};
use wayfare_shared::Currency;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchPassenger {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub passenger_type: Option<PassengerType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u8>,
}

impl SearchPassenger {
    pub fn adult() -> Self {
        Self {
            passenger_type: Some(PassengerType::Adult),
            age: None,
        }
    }
}

/// A directed leg to search for
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SearchSlice {
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
}

/// Traveler search intent as received from the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchCriteria {
    pub origin: String,
    pub destination: String,
    pub departure_date: NaiveDate,
    #[serde(default)]
    pub return_date: Option<NaiveDate>,
    #[serde(default)]
    pub passengers: Vec<SearchPassenger>,
    #[serde(default)]
    pub cabin_class: Option<CabinClass>,
    #[serde(default)]
    pub max_connections: Option<u8>,
    #[serde(default)]
    pub currency: Option<Currency>,
}

impl SearchCriteria {
    pub fn one_way(origin: &str, destination: &str, departure_date: NaiveDate) -> Self {
        Self {
            origin: origin.to_string(),
            destination: destination.to_string(),
            departure_date,
            return_date: None,
            passengers: vec![],
            cabin_class: None,
            max_connections: None,
            currency: None,
        }
    }

    /// Validate and normalise the criteria. Runs before any network I/O.
    ///
    /// Airport codes are upper-cased and an empty passenger list becomes a single adult.
    pub fn normalized(mut self) -> CoreResult<Self> {
        self.origin = iata_code("origin", &self.origin)?;
        self.destination = iata_code("destination", &self.destination)?;

        if self.origin == self.destination {
            return Err(CoreError::Validation(
                "origin and destination must differ".to_string(),
            ));
        }

        if let Some(return_date) = self.return_date {
            if return_date < self.departure_date {
                return Err(CoreError::Validation(
                    "return_date is before departure_date".to_string(),
                ));
            }
        }

        if self.passengers.is_empty() {
            self.passengers.push(SearchPassenger::adult());
        }
        if self
            .passengers
            .iter()
            .any(|p| p.passenger_type.is_none() && p.age.is_none())
        {
            return Err(CoreError::Validation(
                "each passenger needs a type or an age".to_string(),
            ));
        }

        Ok(self)
    }

    /// Outbound slice, plus the swapped return slice when a return date is set.
    pub fn slices(&self) -> Vec<SearchSlice> {
        let mut slices = vec![SearchSlice {
            origin: self.origin.clone(),
            destination: self.destination.clone(),
            departure_date: self.departure_date,
        }];
        if let Some(return_date) = self.return_date {
            slices.push(SearchSlice {
                origin: self.destination.clone(),
                destination: self.origin.clone(),
                departure_date: return_date,
            });
        }
        slices
    }
}

fn iata_code(field: &str, raw: &str) -> CoreResult<String> {
    let code = raw.trim();
    if code.is_empty() {
        return Err(CoreError::Validation(format!("{} is required", field)));
    }
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(CoreError::Validation(format!(
            "{} must be a 3-letter IATA code",
            field
        )));
    }
    Ok(code.to_ascii_uppercase())
}
