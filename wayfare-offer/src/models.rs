use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use wayfare_shared::Money;

/// Cabin class requested at search time and reported on seat maps
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CabinClass {
    Economy,
    PremiumEconomy,
    Business,
    First,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PassengerType {
    Adult,
    Child,
    InfantWithoutSeat,
}

/// Airline reference as it appears on an offer or segment.
///
/// The provider guarantees only `id`; everything else may be missing and is filled in by
/// enrichment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Carrier {
    pub id: String,
    pub iata_code: Option<String>,
    pub name: Option<String>,
    pub logo_symbol_url: Option<String>,
    pub logo_lockup_url: Option<String>,
    pub conditions_of_carriage_url: Option<String>,
}

impl Carrier {
    pub fn reference(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Copy fields from a directory lookup into fields that are still empty.
    pub fn fill_missing(&mut self, looked_up: &Carrier) {
        fill(&mut self.iata_code, &looked_up.iata_code);
        fill(&mut self.name, &looked_up.name);
        fill(&mut self.logo_symbol_url, &looked_up.logo_symbol_url);
        fill(&mut self.logo_lockup_url, &looked_up.logo_lockup_url);
        fill(&mut self.conditions_of_carriage_url, &looked_up.conditions_of_carriage_url);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Aircraft {
    pub id: String,
    pub iata_code: Option<String>,
    pub name: Option<String>,
}

impl Aircraft {
    pub fn reference(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn fill_missing(&mut self, looked_up: &Aircraft) {
        fill(&mut self.iata_code, &looked_up.iata_code);
        fill(&mut self.name, &looked_up.name);
    }
}

fn fill(target: &mut Option<String>, source: &Option<String>) {
    if target.as_deref().map_or(true, |v| v.trim().is_empty()) {
        if let Some(value) = source {
            *target = Some(value.clone());
        }
    }
}

/// A single flown leg
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    pub id: String,
    pub origin: String,
    pub destination: String,
    /// Local time at the origin airport
    pub departing_at: NaiveDateTime,
    /// Local time at the destination airport
    pub arriving_at: NaiveDateTime,
    pub marketing_carrier: Carrier,
    pub operating_carrier: Carrier,
    pub marketing_carrier_flight_number: Option<String>,
    pub aircraft: Option<Aircraft>,
    pub duration: Option<String>,
}

/// One directed leg of an itinerary (outbound or return)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Slice {
    pub id: Option<String>,
    pub origin: String,
    pub destination: String,
    pub duration: Option<String>,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfferPassenger {
    pub id: String,
    #[serde(rename = "type")]
    pub passenger_type: Option<PassengerType>,
    pub age: Option<u8>,
}

/// A priced, time-boxed quote returned by a search. Read-only once received.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Offer {
    pub id: String,
    pub total: Money,
    pub owner: Carrier,
    pub slices: Vec<Slice>,
    pub passengers: Vec<OfferPassenger>,
    pub expires_at: DateTime<Utc>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Offer {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.slices.iter().flat_map(|s| s.segments.iter())
    }

    pub fn segments_mut(&mut self) -> impl Iterator<Item = &mut Segment> {
        self.slices.iter_mut().flat_map(|s| s.segments.iter_mut())
    }
}

/// Result of a search call: the provider's request id plus the offers it produced
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfferRequest {
    pub id: String,
    pub offers: Vec<Offer>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Seat {
    pub designator: String,
    pub available: bool,
    pub price: Option<Money>,
    pub disclosures: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeatMapCabin {
    pub cabin_class: Option<CabinClass>,
    pub deck: u8,
    pub rows: Vec<Vec<Seat>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeatMap {
    pub id: String,
    pub segment_id: String,
    pub slice_id: Option<String>,
    pub cabins: Vec<SeatMapCabin>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoyaltyProgramme {
    pub id: String,
    pub name: String,
    pub alliance: Option<String>,
    pub owner_airline_id: Option<String>,
    pub logo_url: Option<String>,
}

/// Airport or city suggestion from the places lookup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Place {
    pub id: String,
    pub place_type: String,
    pub iata_code: Option<String>,
    pub name: String,
    pub city_name: Option<String>,
    pub iata_country_code: Option<String>,
}
