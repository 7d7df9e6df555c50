mod clock;
mod units;

pub use clock::{Clock, FixedClock, SharedClock, SystemClock};
pub use units::{base_units_to_money, money_to_base_units, UnitsError};
