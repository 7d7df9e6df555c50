use std::{fmt::Display, str::FromStr};

use bsg_common::{sqlite_text_type, Money, Percentage};
use chrono::{DateTime, Utc};
use ethers::{
    types::{Address, H256, U256},
    utils::keccak256,
};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Conversion error: {0}")]
pub struct ConversionError(String);

//--------------------------------------      BookingId      ---------------------------------------------------------
/// The off-chain booking identifier, as issued by the marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct BookingId(pub String);

impl BookingId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for BookingId {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(ConversionError("Booking id cannot be empty".into()));
        }
        Ok(Self(s.to_string()))
    }
}

impl Display for BookingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

//--------------------------------------    ChainBookingId   ---------------------------------------------------------
/// The `bytes32` identifier the escrow contract knows a booking by.
///
/// It is always `keccak256(booking_id)`. Derive it with [`ChainBookingId::derive`] once, when the booking is first
/// stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainBookingId(pub H256);

impl ChainBookingId {
    pub fn derive(id: &BookingId) -> Self {
        Self(H256::from(keccak256(id.as_str().as_bytes())))
    }

    pub fn as_h256(&self) -> H256 {
        self.0
    }
}

impl From<H256> for ChainBookingId {
    fn from(value: H256) -> Self {
        Self(value)
    }
}

impl FromStr for ChainBookingId {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        H256::from_str(s).map(Self).map_err(|e| ConversionError(format!("Invalid on-chain booking id {s}: {e}")))
    }
}

impl Display for ChainBookingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

sqlite_text_type!(ChainBookingId);

//--------------------------------------    WalletAddress    ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletAddress(pub Address);

impl WalletAddress {
    pub fn as_address(&self) -> Address {
        self.0
    }
}

impl From<Address> for WalletAddress {
    fn from(value: Address) -> Self {
        Self(value)
    }
}

impl FromStr for WalletAddress {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::from_str(s.trim()).map(Self).map_err(|e| ConversionError(format!("Invalid wallet address {s}: {e}")))
    }
}

impl Display for WalletAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

sqlite_text_type!(WalletAddress);

//--------------------------------------        Nonce        ---------------------------------------------------------
/// A single-use authorization nonce. Persisted as its decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Nonce(pub U256);

impl Nonce {
    pub fn as_u256(&self) -> U256 {
        self.0
    }
}

impl FromStr for Nonce {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        U256::from_dec_str(s.trim()).map(Self).map_err(|e| ConversionError(format!("Invalid nonce {s}: {e}")))
    }
}

impl Display for Nonce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Nonce {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Nonce {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

sqlite_text_type!(Nonce);

//--------------------------------------    BookingStatus    ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Requested by the customer, awaiting the provider's acceptance.
    Pending,
    /// Accepted by the provider. The customer may now pay into escrow.
    PendingPayment,
    /// The escrow contract confirmed the payment.
    Paid,
    /// The session has started.
    InProgress,
    /// The contract released the escrowed funds.
    Completed,
    Cancelled,
    Rejected,
}

impl BookingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Rejected)
    }
}

impl Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::PendingPayment => "pending_payment",
            Self::Paid => "paid",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

impl FromStr for BookingStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "pending_payment" => Ok(Self::PendingPayment),
            "paid" => Ok(Self::Paid),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "rejected" => Ok(Self::Rejected),
            s => Err(ConversionError(format!("Invalid booking status: {s}"))),
        }
    }
}

//--------------------------------------       Booking       ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub chain_booking_id: ChainBookingId,
    pub customer_id: String,
    pub customer_wallet: Option<WalletAddress>,
    pub provider_id: String,
    pub provider_wallet: Option<WalletAddress>,
    pub referrer_id: Option<String>,
    pub referrer_wallet: Option<WalletAddress>,
    pub status: BookingStatus,
    pub scheduled_at: DateTime<Utc>,
    pub total_amount: Money,
    pub paid_amount: Option<Money>,
    /// Basis points, as confirmed on-chain
    pub platform_fee_rate: Option<i64>,
    /// Basis points, as confirmed on-chain
    pub referrer_fee_rate: Option<i64>,
    pub payment_tx_hash: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub completion_tx_hash: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancellation_tx_hash: Option<String>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub meeting_link: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn has_referrer(&self) -> bool {
        self.referrer_id.is_some() || self.referrer_wallet.is_some()
    }

    /// The ids of everyone with an interest in this booking, for notification routing.
    pub fn participant_ids(&self) -> Vec<String> {
        let mut ids = vec![self.customer_id.clone(), self.provider_id.clone()];
        if let Some(referrer) = &self.referrer_id {
            ids.push(referrer.clone());
        }
        ids
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBooking {
    pub id: BookingId,
    pub customer_id: String,
    pub customer_wallet: Option<WalletAddress>,
    pub provider_id: String,
    pub provider_wallet: Option<WalletAddress>,
    pub referrer_id: Option<String>,
    pub referrer_wallet: Option<WalletAddress>,
    pub scheduled_at: DateTime<Utc>,
    pub total_amount: Money,
    pub meeting_link: Option<String>,
}

impl NewBooking {
    pub fn new(
        id: BookingId,
        customer_id: &str,
        provider_id: &str,
        scheduled_at: DateTime<Utc>,
        total_amount: Money,
    ) -> Self {
        Self {
            id,
            customer_id: customer_id.to_string(),
            customer_wallet: None,
            provider_id: provider_id.to_string(),
            provider_wallet: None,
            referrer_id: None,
            referrer_wallet: None,
            scheduled_at,
            total_amount,
            meeting_link: None,
        }
    }

    pub fn with_customer_wallet(mut self, wallet: WalletAddress) -> Self {
        self.customer_wallet = Some(wallet);
        self
    }

    pub fn with_provider_wallet(mut self, wallet: WalletAddress) -> Self {
        self.provider_wallet = Some(wallet);
        self
    }

    pub fn with_referrer(mut self, referrer_id: &str, wallet: Option<WalletAddress>) -> Self {
        self.referrer_id = Some(referrer_id.to_string());
        self.referrer_wallet = wallet;
        self
    }

    pub fn with_meeting_link(mut self, link: &str) -> Self {
        self.meeting_link = Some(link.to_string());
        self
    }
}

/// A partial update to a booking record. Fields that are `None` are left untouched. All writes are absolute values,
/// so applying the same update twice leaves the record in the same state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingUpdate {
    pub status: Option<BookingStatus>,
    pub paid_amount: Option<Money>,
    pub platform_fee_rate: Option<i64>,
    pub referrer_fee_rate: Option<i64>,
    pub payment_tx_hash: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub completion_tx_hash: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancellation_tx_hash: Option<String>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub meeting_link: Option<String>,
}

impl BookingUpdate {
    pub fn with_status(mut self, status: BookingStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Applies the update to an in-memory booking record.
    pub fn apply_to(&self, booking: &mut Booking) {
        macro_rules! apply {
            ($($field:ident),+ $(,)?) => {
                $(if let Some(v) = &self.$field { booking.$field = v.clone(); })+
            };
        }
        macro_rules! apply_opt {
            ($($field:ident),+ $(,)?) => {
                $(if let Some(v) = &self.$field { booking.$field = Some(v.clone()); })+
            };
        }
        apply!(status);
        apply_opt!(
            paid_amount,
            platform_fee_rate,
            referrer_fee_rate,
            payment_tx_hash,
            paid_at,
            completion_tx_hash,
            completed_at,
            cancellation_tx_hash,
            cancellation_reason,
            cancelled_by,
            cancelled_at,
            meeting_link,
        );
    }
}

//--------------------------------------  AuthorizationKind  ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationKind {
    BookingPayment,
    Cancellation,
}

impl Display for AuthorizationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BookingPayment => write!(f, "booking_payment"),
            Self::Cancellation => write!(f, "cancellation"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct NonceRecord {
    pub nonce: Nonce,
    pub booking_id: BookingId,
    pub kind: AuthorizationKind,
    pub created_at: DateTime<Utc>,
}

impl NonceRecord {
    pub fn new(nonce: Nonce, booking_id: BookingId, kind: AuthorizationKind) -> Self {
        Self { nonce, booking_id, kind, created_at: Utc::now() }
    }
}

//-------------------------------------- CancellationPolicy  ---------------------------------------------------------
pub const CONDITION_BOOKING_STATUS: &str = "booking_status";
pub const CONDITION_MIN_TIME_BEFORE_START: &str = "min_time_before_start";
pub const CONDITION_MAX_TIME_BEFORE_START: &str = "max_time_before_start";
pub const CONDITION_TIME_BEFORE_START: &str = "time_before_start";

/// A single requirement a booking must meet for a cancellation policy to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PolicyCondition {
    BookingStatus(BookingStatus),
    /// At least this many minutes must remain before the session starts.
    MinTimeBeforeStart(i64),
    /// Fewer than this many minutes must remain before the session starts.
    MaxTimeBeforeStart(i64),
    /// Exactly this many minutes must remain before the session starts.
    TimeBeforeStart(i64),
    /// A stored condition that could not be understood. It never matches.
    Unrecognized { kind: String, value: String },
}

impl PolicyCondition {
    /// Builds a condition from its stored `(type, value)` pair. Anything unknown or unparsable becomes
    /// [`PolicyCondition::Unrecognized`].
    pub fn from_parts(kind: &str, value: &str) -> Self {
        let minutes = || value.trim().parse::<i64>().ok();
        let parsed = match kind {
            CONDITION_BOOKING_STATUS => value.trim().parse::<BookingStatus>().ok().map(Self::BookingStatus),
            CONDITION_MIN_TIME_BEFORE_START => minutes().map(Self::MinTimeBeforeStart),
            CONDITION_MAX_TIME_BEFORE_START => minutes().map(Self::MaxTimeBeforeStart),
            CONDITION_TIME_BEFORE_START => minutes().map(Self::TimeBeforeStart),
            _ => None,
        };
        parsed.unwrap_or_else(|| Self::Unrecognized { kind: kind.to_string(), value: value.to_string() })
    }

    /// The `(type, value)` pair this condition is stored as.
    pub fn to_parts(&self) -> (String, String) {
        match self {
            Self::BookingStatus(s) => (CONDITION_BOOKING_STATUS.into(), s.to_string()),
            Self::MinTimeBeforeStart(m) => (CONDITION_MIN_TIME_BEFORE_START.into(), m.to_string()),
            Self::MaxTimeBeforeStart(m) => (CONDITION_MAX_TIME_BEFORE_START.into(), m.to_string()),
            Self::TimeBeforeStart(m) => (CONDITION_TIME_BEFORE_START.into(), m.to_string()),
            Self::Unrecognized { kind, value } => (kind.clone(), value.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationPolicy {
    pub id: i64,
    pub key: String,
    pub name: String,
    pub description: String,
    pub active: bool,
    pub conditions: Vec<PolicyCondition>,
    pub customer_refund_pct: Percentage,
    pub provider_earnings_pct: Percentage,
    pub platform_fee_pct: Percentage,
}

/// The policy table row, without its conditions.
#[derive(Debug, Clone, FromRow)]
pub struct CancellationPolicyRow {
    pub id: i64,
    pub key: String,
    pub name: String,
    pub description: String,
    pub active: bool,
    pub customer_refund_pct: Percentage,
    pub provider_earnings_pct: Percentage,
    pub platform_fee_pct: Percentage,
}

impl CancellationPolicyRow {
    pub fn with_conditions(self, conditions: Vec<PolicyCondition>) -> CancellationPolicy {
        CancellationPolicy {
            id: self.id,
            key: self.key,
            name: self.name,
            description: self.description,
            active: self.active,
            conditions,
            customer_refund_pct: self.customer_refund_pct,
            provider_earnings_pct: self.provider_earnings_pct,
            platform_fee_pct: self.platform_fee_pct,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCancellationPolicy {
    pub key: String,
    pub name: String,
    pub description: String,
    pub active: bool,
    pub conditions: Vec<PolicyCondition>,
    pub customer_refund_pct: Percentage,
    pub provider_earnings_pct: Percentage,
    pub platform_fee_pct: Percentage,
}

impl NewCancellationPolicy {
    pub fn percentages_sum_to_100(&self) -> bool {
        let total = self.customer_refund_pct + self.provider_earnings_pct + self.platform_fee_pct;
        total.value() == rust_decimal::Decimal::ONE_HUNDRED
    }
}

//--------------------------------------     EventRecord     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Processed,
    Failed,
}

impl Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Processed => write!(f, "PROCESSED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// The durable record of an on-chain log, keyed by its dedup key.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct EventRecord {
    pub dedup_key: String,
    pub event_type: String,
    pub booking_chain_id: ChainBookingId,
    pub tx_hash: Option<String>,
    pub log_index: Option<i64>,
    pub block_number: Option<i64>,
    /// Canonical JSON form of the decoded event
    pub payload: String,
    pub status: EventStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEventRecord {
    pub dedup_key: String,
    pub event_type: String,
    pub booking_chain_id: ChainBookingId,
    pub tx_hash: Option<String>,
    pub log_index: Option<i64>,
    pub block_number: Option<i64>,
    pub payload: String,
}

//--------------------------------------  EarningsTransaction ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    ProviderEarnings,
}

impl Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProviderEarnings => write!(f, "provider_earnings"),
        }
    }
}

/// A ledger entry. Unique on `(tx_hash, kind)`.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct EarningsTransaction {
    pub id: i64,
    pub provider_id: String,
    pub booking_id: BookingId,
    pub tx_hash: String,
    pub kind: TransactionKind,
    pub amount: Money,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEarningsTransaction {
    pub provider_id: String,
    pub booking_id: BookingId,
    pub tx_hash: String,
    pub kind: TransactionKind,
    pub amount: Money,
}
