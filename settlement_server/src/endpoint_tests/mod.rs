mod bookings;
mod helpers;
mod mocks;
mod monitor;
