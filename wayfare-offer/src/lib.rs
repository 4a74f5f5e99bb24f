pub mod models;
pub mod expiry;
pub mod enrichment;

pub use models::{
    Aircraft, CabinClass, Carrier, LoyaltyProgramme, Offer, OfferPassenger, OfferRequest,
    PassengerType, Place, Seat, SeatMap, SeatMapCabin, Segment, Slice,
};
pub use expiry::{ExpiryError, ExpiryGuard};
pub use enrichment::{CarrierDirectory, EnrichmentConfig, EnrichmentPipeline, LookupError};
