//! Fixtures shared by unit tests, integration tests and the server's tests.
mod fake_chain;
mod memory_ledger;
#[cfg(feature = "sqlite")]
pub mod prepare_env;
mod samples;

pub use fake_chain::{FakeChainSource, FakeSubscription};
pub use memory_ledger::MemoryLedger;
pub use samples::{
    customer_wallet,
    default_policies,
    provider_wallet,
    sample_cancellation,
    sample_completion,
    sample_payment,
    sample_time,
    sample_tx_hash,
    seed_booking,
    seed_default_policies,
    SAMPLE_BLOCK,
};
