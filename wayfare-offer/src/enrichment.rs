use crate::models::{Aircraft, Carrier, Offer};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Lookup failed: {0}")]
    Failed(String),
}

/// Read-only metadata lookups used to decorate offers.
#[async_trait]
pub trait CarrierDirectory: Send + Sync {
    async fn airline(&self, id: &str) -> Result<Carrier, LookupError>;

    async fn aircraft(&self, id: &str) -> Result<Aircraft, LookupError>;
}

#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    /// Upper bound on lookups in flight at once
    pub max_in_flight: usize,
    /// Deadline for each lookup on its own, not for the batch
    pub lookup_timeout: Duration,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            lookup_timeout: Duration::from_secs(4),
        }
    }
}

/// Resolves the carrier and aircraft ids referenced by offer segments into display metadata.
///
/// Every distinct id is looked up once, concurrently, with a bounded fan-out. A lookup that
/// fails or times out leaves its segments as they were; it never fails the batch. Merging only
/// fills fields the provider left empty.
#[derive(Clone)]
pub struct EnrichmentPipeline {
    directory: Arc<dyn CarrierDirectory>,
    config: EnrichmentConfig,
}

impl EnrichmentPipeline {
    pub fn new(directory: Arc<dyn CarrierDirectory>, config: EnrichmentConfig) -> Self {
        Self { directory, config }
    }

    /// Carrier pass followed by aircraft pass.
    pub async fn enrich(&self, offers: Vec<Offer>) -> Vec<Offer> {
        let offers = self.enrich_with_carrier_info(offers).await;
        self.enrich_with_aircraft_info(offers).await
    }

    pub async fn enrich_with_carrier_info(&self, mut offers: Vec<Offer>) -> Vec<Offer> {
        let ids: BTreeSet<String> = offers
            .iter()
            .flat_map(|o| o.segments())
            .flat_map(|s| [s.marketing_carrier.id.clone(), s.operating_carrier.id.clone()])
            .filter(|id| !id.is_empty())
            .collect();

        if ids.is_empty() {
            return offers;
        }

        let directory = Arc::clone(&self.directory);
        let found = self
            .lookup_all("airline", ids, move |id| {
                let directory = Arc::clone(&directory);
                async move { directory.airline(&id).await }
            })
            .await;

        for segment in offers.iter_mut().flat_map(|o| o.segments_mut()) {
            if let Some(airline) = found.get(&segment.marketing_carrier.id) {
                segment.marketing_carrier.fill_missing(airline);
            }
            if let Some(airline) = found.get(&segment.operating_carrier.id) {
                segment.operating_carrier.fill_missing(airline);
            }
        }

        offers
    }

    pub async fn enrich_with_aircraft_info(&self, mut offers: Vec<Offer>) -> Vec<Offer> {
        let ids: BTreeSet<String> = offers
            .iter()
            .flat_map(|o| o.segments())
            .filter_map(|s| s.aircraft.as_ref().map(|a| a.id.clone()))
            .filter(|id| !id.is_empty())
            .collect();

        if ids.is_empty() {
            return offers;
        }

        let directory = Arc::clone(&self.directory);
        let found = self
            .lookup_all("aircraft", ids, move |id| {
                let directory = Arc::clone(&directory);
                async move { directory.aircraft(&id).await }
            })
            .await;

        for segment in offers.iter_mut().flat_map(|o| o.segments_mut()) {
            if let Some(aircraft) = segment.aircraft.as_mut() {
                if let Some(looked_up) = found.get(&aircraft.id) {
                    aircraft.fill_missing(looked_up);
                }
            }
        }

        offers
    }

    async fn lookup_all<T, F, Fut>(
        &self,
        kind: &'static str,
        ids: BTreeSet<String>,
        fetch: F,
    ) -> HashMap<String, T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, LookupError>>,
    {
        let requested = ids.len();
        let deadline = self.config.lookup_timeout;

        let found: HashMap<String, T> = stream::iter(ids)
            .map(|id| {
                let lookup = fetch(id.clone());
                async move { (id, tokio::time::timeout(deadline, lookup).await) }
            })
            .buffer_unordered(self.config.max_in_flight.max(1))
            .filter_map(|(id, outcome)| async move {
                match outcome {
                    Ok(Ok(value)) => Some((id, value)),
                    Ok(Err(e)) => {
                        tracing::debug!("Skipping {} enrichment for {}: {}", kind, id, e);
                        None
                    }
                    Err(_) => {
                        tracing::warn!("{} lookup for {} timed out after {:?}", kind, id, deadline);
                        None
                    }
                }
            })
            .collect()
            .await;

        tracing::debug!("Resolved {}/{} {} references", found.len(), requested, kind);
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Segment, Slice};
    use chrono::{NaiveDate, Utc};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use wayfare_shared::{Currency, Money};

    #[derive(Default)]
    struct CountingDirectory {
        airline_calls: Mutex<Vec<String>>,
        aircraft_calls: AtomicUsize,
        failing: HashSet<String>,
        slow: HashSet<String>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl CarrierDirectory for CountingDirectory {
        async fn airline(&self, id: &str) -> Result<Carrier, LookupError> {
            self.airline_calls.lock().unwrap().push(id.to_string());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let delay = if self.slow.contains(id) { 5_000 } else { 10 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.contains(id) {
                return Err(LookupError::Failed("upstream 500".to_string()));
            }
            Ok(Carrier {
                id: id.to_string(),
                iata_code: Some(format!("{}-code", id)),
                name: Some(format!("{} Airways", id)),
                ..Carrier::default()
            })
        }

        async fn aircraft(&self, id: &str) -> Result<Aircraft, LookupError> {
            self.aircraft_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Aircraft {
                id: id.to_string(),
                iata_code: Some("359".to_string()),
                name: Some("Airbus A350-900".to_string()),
            })
        }
    }

    fn segment(carrier: Carrier, aircraft: Option<&str>) -> Segment {
        let day = NaiveDate::from_ymd_opt(2026, 11, 15).unwrap();
        Segment {
            id: "seg_1".to_string(),
            origin: "MAD".to_string(),
            destination: "LHR".to_string(),
            departing_at: day.and_hms_opt(9, 0, 0).unwrap(),
            arriving_at: day.and_hms_opt(10, 35, 0).unwrap(),
            operating_carrier: carrier.clone(),
            marketing_carrier: carrier,
            marketing_carrier_flight_number: Some("3166".to_string()),
            aircraft: aircraft.map(Aircraft::reference),
            duration: None,
        }
    }

    fn offer(id: usize, segments: Vec<Segment>) -> Offer {
        Offer {
            id: format!("off_{}", id),
            total: Money::new(10_000, Currency::parse("EUR").unwrap()),
            owner: Carrier::reference("owner"),
            slices: vec![Slice {
                id: None,
                origin: "MAD".to_string(),
                destination: "LHR".to_string(),
                duration: None,
                segments,
            }],
            passengers: vec![],
            expires_at: Utc::now() + chrono::Duration::minutes(20),
            created_at: None,
        }
    }

    fn pipeline(directory: Arc<CountingDirectory>, timeout_ms: u64) -> EnrichmentPipeline {
        EnrichmentPipeline::new(
            directory,
            EnrichmentConfig {
                max_in_flight: 2,
                lookup_timeout: Duration::from_millis(timeout_ms),
            },
        )
    }

    #[tokio::test]
    async fn test_lookups_are_deduplicated() {
        let directory = Arc::new(CountingDirectory::default());
        let carriers = ["IB", "BA", "VY"];
        let offers: Vec<Offer> = (0..50)
            .map(|i| offer(i, vec![segment(Carrier::reference(carriers[i % 3]), Some("arc_1"))]))
            .collect();

        let enriched = pipeline(directory.clone(), 1_000).enrich(offers).await;

        let calls = directory.airline_calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 3);
        assert_eq!(directory.aircraft_calls.load(Ordering::SeqCst), 1);
        assert!(directory.max_in_flight.load(Ordering::SeqCst) <= 2);
        assert!(enriched
            .iter()
            .flat_map(|o| o.segments())
            .all(|s| s.marketing_carrier.name.is_some() && s.aircraft.as_ref().unwrap().name.is_some()));
    }

    #[tokio::test]
    async fn test_existing_fields_win() {
        let directory = Arc::new(CountingDirectory::default());
        let provided = Carrier {
            id: "IB".to_string(),
            name: Some("Iberia".to_string()),
            ..Carrier::default()
        };

        let enriched = pipeline(directory, 1_000)
            .enrich_with_carrier_info(vec![offer(1, vec![segment(provided, None)])])
            .await;

        let carrier = &enriched[0].slices[0].segments[0].marketing_carrier;
        assert_eq!(carrier.name.as_deref(), Some("Iberia"));
        assert_eq!(carrier.iata_code.as_deref(), Some("IB-code"));
    }

    #[tokio::test]
    async fn test_failed_lookup_keeps_reference() {
        let directory = Arc::new(CountingDirectory {
            failing: HashSet::from(["BA".to_string()]),
            ..CountingDirectory::default()
        });
        let offers = vec![
            offer(1, vec![segment(Carrier::reference("BA"), None)]),
            offer(2, vec![segment(Carrier::reference("IB"), None)]),
        ];

        let enriched = pipeline(directory, 1_000).enrich_with_carrier_info(offers).await;

        assert_eq!(enriched[0].slices[0].segments[0].marketing_carrier, Carrier::reference("BA"));
        assert_eq!(
            enriched[1].slices[0].segments[0].marketing_carrier.name.as_deref(),
            Some("IB Airways")
        );
    }

    #[tokio::test]
    async fn test_slow_lookup_times_out_alone() {
        let directory = Arc::new(CountingDirectory {
            slow: HashSet::from(["SLOW".to_string()]),
            ..CountingDirectory::default()
        });
        let offers = vec![
            offer(1, vec![segment(Carrier::reference("SLOW"), None)]),
            offer(2, vec![segment(Carrier::reference("FAST"), None)]),
        ];

        let started = std::time::Instant::now();
        let enriched = pipeline(directory, 100).enrich_with_carrier_info(offers).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(enriched[0].slices[0].segments[0].marketing_carrier.name.is_none());
        assert!(enriched[1].slices[0].segments[0].marketing_carrier.name.is_some());
    }

    #[tokio::test]
    async fn test_no_segments_no_lookups() {
        let directory = Arc::new(CountingDirectory::default());
        let enriched = pipeline(directory.clone(), 100).enrich(vec![offer(1, vec![])]).await;
        assert_eq!(enriched.len(), 1);
        assert!(directory.airline_calls.lock().unwrap().is_empty());
    }
}
