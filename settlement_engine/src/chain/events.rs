//! Canonical, typed form of the escrow contract's events.
//!
//! Logs from the live subscription and from historical queries are both normalized into a [`ChainEventEnvelope`]
//! here, so the processor only ever sees one schema.
use std::fmt::Display;

use chrono::{DateTime, Utc};
use ethers::{
    abi::{decode, ParamType, Token},
    types::{Address, Log, H256, U256},
    utils::keccak256,
};
use serde::{Deserialize, Serialize};

use crate::{chain::ChainError, db_types::ChainBookingId};

pub const PAYMENT_CONFIRMED_SIGNATURE: &str = "PaymentConfirmed(bytes32,address,address,address,uint256,uint256,uint256)";
pub const SERVICE_COMPLETED_SIGNATURE: &str = "ServiceCompleted(bytes32,address,uint256,uint256,uint256)";
pub const BOOKING_CANCELLED_SIGNATURE: &str =
    "BookingCancelled(bytes32,address,uint256,uint256,uint256,uint256,string)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainEventKind {
    PaymentConfirmed,
    ServiceCompleted,
    BookingCancelled,
}

impl ChainEventKind {
    pub const ALL: [ChainEventKind; 3] = [Self::PaymentConfirmed, Self::ServiceCompleted, Self::BookingCancelled];

    pub fn signature(&self) -> &'static str {
        match self {
            Self::PaymentConfirmed => PAYMENT_CONFIRMED_SIGNATURE,
            Self::ServiceCompleted => SERVICE_COMPLETED_SIGNATURE,
            Self::BookingCancelled => BOOKING_CANCELLED_SIGNATURE,
        }
    }

    /// The `topic0` of logs for this event.
    pub fn topic(&self) -> H256 {
        H256::from(keccak256(self.signature().as_bytes()))
    }

    pub fn from_topic(topic: &H256) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.topic() == *topic)
    }

    /// ABI types of the non-indexed fields, i.e. everything after the booking id.
    fn data_types(&self) -> Vec<ParamType> {
        use ParamType::*;
        match self {
            Self::PaymentConfirmed => vec![Address, Address, Address, Uint(256), Uint(256), Uint(256)],
            Self::ServiceCompleted => vec![Address, Uint(256), Uint(256), Uint(256)],
            Self::BookingCancelled => vec![Address, Uint(256), Uint(256), Uint(256), Uint(256), String],
        }
    }
}

impl Display for ChainEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PaymentConfirmed => write!(f, "PaymentConfirmed"),
            Self::ServiceCompleted => write!(f, "ServiceCompleted"),
            Self::BookingCancelled => write!(f, "BookingCancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainEvent {
    PaymentConfirmed {
        booking_id: ChainBookingId,
        customer: Address,
        provider: Address,
        referrer: Address,
        amount: U256,
        platform_fee_rate: U256,
        referrer_fee_rate: U256,
    },
    ServiceCompleted {
        booking_id: ChainBookingId,
        provider: Address,
        provider_amount: U256,
        platform_fee: U256,
        referrer_fee: U256,
    },
    BookingCancelled {
        booking_id: ChainBookingId,
        initiator: Address,
        customer_amount: U256,
        provider_amount: U256,
        platform_amount: U256,
        referrer_amount: U256,
        reason: String,
    },
}

impl ChainEvent {
    pub fn kind(&self) -> ChainEventKind {
        match self {
            Self::PaymentConfirmed { .. } => ChainEventKind::PaymentConfirmed,
            Self::ServiceCompleted { .. } => ChainEventKind::ServiceCompleted,
            Self::BookingCancelled { .. } => ChainEventKind::BookingCancelled,
        }
    }

    pub fn booking_id(&self) -> ChainBookingId {
        match self {
            Self::PaymentConfirmed { booking_id, .. } |
            Self::ServiceCompleted { booking_id, .. } |
            Self::BookingCancelled { booking_id, .. } => *booking_id,
        }
    }

    /// Decodes a raw contract log.
    pub fn decode(log: &Log) -> Result<Self, ChainError> {
        let topic0 = log.topics.first().ok_or_else(|| ChainError::Decode("Log has no topics".into()))?;
        let kind = ChainEventKind::from_topic(topic0).ok_or(ChainError::UnknownEvent(*topic0))?;
        let booking_id = log
            .topics
            .get(1)
            .map(|t| ChainBookingId::from(*t))
            .ok_or_else(|| ChainError::Decode(format!("{kind} log is missing its indexed booking id")))?;
        let tokens = decode(&kind.data_types(), log.data.as_ref())
            .map_err(|e| ChainError::Decode(format!("Could not decode {kind} data: {e}")))?;
        let mut fields = Fields { kind, tokens: tokens.into_iter() };
        let event = match kind {
            ChainEventKind::PaymentConfirmed => Self::PaymentConfirmed {
                booking_id,
                customer: fields.address()?,
                provider: fields.address()?,
                referrer: fields.address()?,
                amount: fields.uint()?,
                platform_fee_rate: fields.uint()?,
                referrer_fee_rate: fields.uint()?,
            },
            ChainEventKind::ServiceCompleted => Self::ServiceCompleted {
                booking_id,
                provider: fields.address()?,
                provider_amount: fields.uint()?,
                platform_fee: fields.uint()?,
                referrer_fee: fields.uint()?,
            },
            ChainEventKind::BookingCancelled => Self::BookingCancelled {
                booking_id,
                initiator: fields.address()?,
                customer_amount: fields.uint()?,
                provider_amount: fields.uint()?,
                platform_amount: fields.uint()?,
                referrer_amount: fields.uint()?,
                reason: fields.string()?,
            },
        };
        Ok(event)
    }
}

struct Fields {
    kind: ChainEventKind,
    tokens: std::vec::IntoIter<Token>,
}

impl Fields {
    fn next(&mut self, expected: &str) -> Result<Token, ChainError> {
        self.tokens.next().ok_or_else(|| ChainError::Decode(format!("{} log is missing a {expected}", self.kind)))
    }

    fn mismatch(&self, expected: &str, token: Token) -> ChainError {
        ChainError::Decode(format!("{} log: expected {expected}, found {token:?}", self.kind))
    }

    fn address(&mut self) -> Result<Address, ChainError> {
        let token = self.next("address")?;
        token.clone().into_address().ok_or_else(|| self.mismatch("address", token))
    }

    fn uint(&mut self) -> Result<U256, ChainError> {
        let token = self.next("uint256")?;
        token.clone().into_uint().ok_or_else(|| self.mismatch("uint256", token))
    }

    fn string(&mut self) -> Result<String, ChainError> {
        let token = self.next("string")?;
        token.clone().into_string().ok_or_else(|| self.mismatch("string", token))
    }
}

/// A decoded event plus where and when it was seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEventEnvelope {
    pub event: ChainEvent,
    pub tx_hash: Option<H256>,
    pub log_index: Option<u64>,
    pub block_number: Option<u64>,
    pub received_at: DateTime<Utc>,
}

impl ChainEventEnvelope {
    pub fn new(event: ChainEvent, received_at: DateTime<Utc>) -> Self {
        Self { event, tx_hash: None, log_index: None, block_number: None, received_at }
    }

    pub fn with_position(mut self, tx_hash: H256, log_index: u64, block_number: u64) -> Self {
        self.tx_hash = Some(tx_hash);
        self.log_index = Some(log_index);
        self.block_number = Some(block_number);
        self
    }

    pub fn from_log(log: &Log, received_at: DateTime<Utc>) -> Result<Self, ChainError> {
        let event = ChainEvent::decode(log)?;
        Ok(Self {
            event,
            tx_hash: log.transaction_hash,
            log_index: log.log_index.map(|i| i.low_u64()),
            block_number: log.block_number.map(|n| n.as_u64()),
            received_at,
        })
    }

    pub fn kind(&self) -> ChainEventKind {
        self.event.kind()
    }

    pub fn booking_id(&self) -> ChainBookingId {
        self.event.booking_id()
    }

    pub fn tx_hash_hex(&self) -> Option<String> {
        self.tx_hash.map(|h| format!("{h:#x}"))
    }

    /// Identifies the log uniquely: `tx_hash:log_index`.
    ///
    /// When the position is incomplete, the key degrades to `tx_hash:nolog`, or to
    /// `nohash:<kind>:<booking>:<received-at ms>` when there is no transaction hash at all.
    pub fn dedup_key(&self) -> String {
        match (self.tx_hash, self.log_index) {
            (Some(tx), Some(index)) => format!("{tx:#x}:{index}"),
            (Some(tx), None) => format!("{tx:#x}:nolog"),
            (None, _) => format!(
                "nohash:{}:{}:{}",
                self.kind(),
                self.booking_id(),
                self.received_at.timestamp_millis()
            ),
        }
    }

    pub fn to_json(&self) -> Result<String, ChainError> {
        serde_json::to_string(self).map_err(|e| ChainError::Decode(e.to_string()))
    }

    pub fn event_json(&self) -> Result<String, ChainError> {
        serde_json::to_string(&self.event).map_err(|e| ChainError::Decode(e.to_string()))
    }

    pub fn from_json(s: &str) -> Result<Self, ChainError> {
        serde_json::from_str(s).map_err(|e| ChainError::Decode(e.to_string()))
    }
}
