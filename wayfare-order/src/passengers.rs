use chrono::{Datelike, NaiveDate};
use std::collections::HashSet;
use wayfare_core::content::Passenger;
use wayfare_core::{CoreError, CoreResult};
use wayfare_offer::Offer;

const MAX_AGE_YEARS: i32 = 120;

/// Check submitted passengers against the offer they are booking.
///
/// Errors name the field and passenger position only, never the submitted value.
pub fn validate_passengers(passengers: &[Passenger], offer: &Offer, today: NaiveDate) -> CoreResult<()> {
    if passengers.is_empty() {
        return Err(CoreError::Validation("at least one passenger is required".to_string()));
    }

    if !offer.passengers.is_empty() && passengers.len() != offer.passengers.len() {
        return Err(CoreError::Validation(format!(
            "offer is priced for {} passengers, got {}",
            offer.passengers.len(),
            passengers.len()
        )));
    }

    let known: HashSet<&str> = offer.passengers.iter().map(|p| p.id.as_str()).collect();
    let mut seen = HashSet::new();

    for (i, p) in passengers.iter().enumerate() {
        let at = |field: &str| CoreError::Validation(format!("passengers[{}].{} is required", i, field));

        if p.given_name.is_blank() {
            return Err(at("given_name"));
        }
        if p.family_name.is_blank() {
            return Err(at("family_name"));
        }
        if p.email.is_blank() {
            return Err(at("email"));
        }
        if !p.email.expose().contains('@') {
            return Err(CoreError::Validation(format!("passengers[{}].email is malformed", i)));
        }
        if p.phone_number.is_blank() {
            return Err(at("phone_number"));
        }

        if p.born_on > today {
            return Err(CoreError::Validation(format!(
                "passengers[{}].born_on is in the future",
                i
            )));
        }
        if age_in_years(p.born_on, today) > MAX_AGE_YEARS {
            return Err(CoreError::Validation(format!(
                "passengers[{}].born_on is more than {} years ago",
                i, MAX_AGE_YEARS
            )));
        }

        if !known.is_empty() && !known.contains(p.id.as_str()) {
            return Err(CoreError::Validation(format!(
                "passengers[{}].id does not belong to the offer",
                i
            )));
        }
        if !seen.insert(p.id.as_str()) {
            return Err(CoreError::Validation(format!("passengers[{}].id is repeated", i)));
        }
    }

    Ok(())
}

fn age_in_years(born_on: NaiveDate, today: NaiveDate) -> i32 {
    let mut age = today.year() - born_on.year();
    if (today.month(), today.day()) < (born_on.month(), born_on.day()) {
        age -= 1;
    }
    age
}
