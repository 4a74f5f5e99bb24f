pub mod money;
pub mod pii;

pub use money::{Currency, Money, MoneyError};
pub use pii::Masked;
