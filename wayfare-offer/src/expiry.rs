use crate::models::Offer;
use chrono::{DateTime, Duration, Utc};

/// Decides whether an offer may still be turned into an order.
///
/// Checked at the instant of submission, never at selection time. `grace` is the minimum
/// validity the offer must still have so it cannot lapse while the provider call is in flight.
#[derive(Debug, Clone)]
pub struct ExpiryGuard {
    grace: Duration,
}

impl ExpiryGuard {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Reject an offer that is expired, or that expires within the grace window.
    pub fn ensure_bookable(&self, offer: &Offer, now: DateTime<Utc>) -> Result<(), ExpiryError> {
        if offer.is_expired_at(now) {
            return Err(ExpiryError::Expired(offer.id.clone()));
        }
        if offer.expires_at - now < self.grace {
            return Err(ExpiryError::ExpiringTooSoon(offer.id.clone()));
        }
        Ok(())
    }

    /// Time left before the offer lapses, `None` once it has.
    pub fn remaining(&self, offer: &Offer, now: DateTime<Utc>) -> Option<Duration> {
        (!offer.is_expired_at(now)).then(|| offer.expires_at - now)
    }

    /// Drop offers that have already lapsed from a search result.
    pub fn retain_live(&self, offers: Vec<Offer>, now: DateTime<Utc>) -> Vec<Offer> {
        let before = offers.len();
        let live: Vec<Offer> = offers.into_iter().filter(|o| !o.is_expired_at(now)).collect();
        if live.len() < before {
            tracing::debug!("Dropped {} expired offers from search result", before - live.len());
        }
        live
    }
}

impl Default for ExpiryGuard {
    fn default() -> Self {
        Self::new(Duration::zero())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ExpiryError {
    #[error("Offer expired: {0}")]
    Expired(String),

    #[error("Offer expires before it can be booked: {0}")]
    ExpiringTooSoon(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Carrier;
    use wayfare_shared::{Currency, Money};

    fn offer(expires_at: DateTime<Utc>) -> Offer {
        Offer {
            id: "off_0000AEdGRhtp5AUUdJqMxo".to_string(),
            total: Money::new(12345, Currency::parse("EUR").unwrap()),
            owner: Carrier::reference("arl_00009VME7DBKeMags5CliQ"),
            slices: vec![],
            passengers: vec![],
            expires_at,
            created_at: None,
        }
    }

    #[test]
    fn test_offer_expiry() {
        let guard = ExpiryGuard::default();
        let now = Utc::now();

        assert!(guard.ensure_bookable(&offer(now + Duration::minutes(10)), now).is_ok());
        assert_eq!(
            guard.ensure_bookable(&offer(now - Duration::minutes(1)), now),
            Err(ExpiryError::Expired("off_0000AEdGRhtp5AUUdJqMxo".to_string()))
        );
        // Expiry instant itself is already too late
        assert!(guard.ensure_bookable(&offer(now), now).is_err());
    }

    #[test]
    fn test_grace_window() {
        let guard = ExpiryGuard::new(Duration::seconds(30));
        let now = Utc::now();
        assert!(matches!(
            guard.ensure_bookable(&offer(now + Duration::seconds(10)), now),
            Err(ExpiryError::ExpiringTooSoon(_))
        ));
        assert!(guard.ensure_bookable(&offer(now + Duration::seconds(60)), now).is_ok());
    }

    #[test]
    fn test_retain_live() {
        let guard = ExpiryGuard::default();
        let now = Utc::now();
        let live = guard.retain_live(
            vec![offer(now - Duration::seconds(1)), offer(now + Duration::minutes(5))],
            now,
        );
        assert_eq!(live.len(), 1);
        assert!(guard.remaining(&live[0], now).is_some());
    }
}
