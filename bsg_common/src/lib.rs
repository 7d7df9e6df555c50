pub mod helpers;
pub mod op;
mod sqlite_text;

mod money;
mod secret;

pub use money::{round2, Money, MoneyError, Percentage, MONEY_DECIMAL_PLACES};
pub use secret::Secret;
