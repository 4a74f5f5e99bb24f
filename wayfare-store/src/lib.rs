pub mod app_config;
pub mod database;
pub mod order_repo;
pub mod payment_repo;
pub mod webhook_repo;
pub mod loyalty_repo;
pub mod redis_repo;

pub use app_config::{Config, StorageBackend};
pub use database::DbClient;
pub use loyalty_repo::StoreLoyaltyRepository;
pub use order_repo::StoreOrderRepository;
pub use payment_repo::{StorePaymentRepository, StoreRefundRepository};
pub use redis_repo::RedisClient;
pub use webhook_repo::StoreWebhookRepository;
