//! EIP-712 typed-data messages accepted by the escrow contract.
//!
//! The type strings below must match the contract's `TYPEHASH` constants byte for byte, or every signature will be
//! rejected on-chain.
use std::convert::Infallible;

use ethers::{
    abi::{encode, Token},
    types::{
        transaction::eip712::{EIP712Domain, Eip712},
        Address,
        H256,
        U256,
    },
    utils::keccak256,
};
use serde::Serialize;

use crate::db_types::AuthorizationKind;

pub const BOOKING_AUTHORIZATION_TYPE: &str = "BookingAuthorization(bytes32 bookingId,address customer,address \
                                              provider,address referrer,uint256 amount,uint256 platformFeeRate,\
                                              uint256 referrerFeeRate,uint256 expiry,uint256 nonce)";

pub const CANCELLATION_AUTHORIZATION_TYPE: &str = "CancellationAuthorization(bytes32 bookingId,uint256 \
                                                   customerAmount,uint256 providerAmount,uint256 platformAmount,\
                                                   uint256 referrerAmount,string reason,uint256 expiry,uint256 \
                                                   nonce)";

/// A struct that can be signed as the `message` part of an EIP-712 payload.
pub trait AuthorizationMessage: Clone + Send + Sync {
    const TYPE: &'static str;
    const KIND: AuthorizationKind;

    /// The ABI encoding of each member, in declaration order. Dynamic types are pre-hashed.
    fn encode_members(&self) -> Vec<Token>;

    fn booking_id(&self) -> H256;

    fn expiry(&self) -> U256;

    fn nonce(&self) -> U256;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingAuthorization {
    pub booking_id: H256,
    pub customer: Address,
    pub provider: Address,
    /// The zero address when the booking has no referrer
    pub referrer: Address,
    pub amount: U256,
    pub platform_fee_rate: U256,
    pub referrer_fee_rate: U256,
    pub expiry: U256,
    pub nonce: U256,
}

impl AuthorizationMessage for BookingAuthorization {
    const KIND: AuthorizationKind = AuthorizationKind::BookingPayment;
    const TYPE: &'static str = BOOKING_AUTHORIZATION_TYPE;

    fn encode_members(&self) -> Vec<Token> {
        vec![
            Token::FixedBytes(self.booking_id.as_bytes().to_vec()),
            Token::Address(self.customer),
            Token::Address(self.provider),
            Token::Address(self.referrer),
            Token::Uint(self.amount),
            Token::Uint(self.platform_fee_rate),
            Token::Uint(self.referrer_fee_rate),
            Token::Uint(self.expiry),
            Token::Uint(self.nonce),
        ]
    }

    fn booking_id(&self) -> H256 {
        self.booking_id
    }

    fn expiry(&self) -> U256 {
        self.expiry
    }

    fn nonce(&self) -> U256 {
        self.nonce
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationAuthorization {
    pub booking_id: H256,
    pub customer_amount: U256,
    pub provider_amount: U256,
    pub platform_amount: U256,
    pub referrer_amount: U256,
    pub reason: String,
    pub expiry: U256,
    pub nonce: U256,
}

impl AuthorizationMessage for CancellationAuthorization {
    const KIND: AuthorizationKind = AuthorizationKind::Cancellation;
    const TYPE: &'static str = CANCELLATION_AUTHORIZATION_TYPE;

    fn encode_members(&self) -> Vec<Token> {
        vec![
            Token::FixedBytes(self.booking_id.as_bytes().to_vec()),
            Token::Uint(self.customer_amount),
            Token::Uint(self.provider_amount),
            Token::Uint(self.platform_amount),
            Token::Uint(self.referrer_amount),
            Token::FixedBytes(keccak256(self.reason.as_bytes()).to_vec()),
            Token::Uint(self.expiry),
            Token::Uint(self.nonce),
        ]
    }

    fn booking_id(&self) -> H256 {
        self.booking_id
    }

    fn expiry(&self) -> U256 {
        self.expiry
    }

    fn nonce(&self) -> U256 {
        self.nonce
    }
}

/// A message bound to the signing domain. This is what actually gets hashed and signed.
#[derive(Debug, Clone)]
pub struct TypedAuthorization<M> {
    pub domain: EIP712Domain,
    pub message: M,
}

impl<M: AuthorizationMessage> Eip712 for TypedAuthorization<M> {
    type Error = Infallible;

    fn domain(&self) -> Result<EIP712Domain, Self::Error> {
        Ok(self.domain.clone())
    }

    fn type_hash() -> Result<[u8; 32], Self::Error> {
        Ok(keccak256(M::TYPE.as_bytes()))
    }

    fn struct_hash(&self) -> Result<[u8; 32], Self::Error> {
        let mut tokens = vec![Token::FixedBytes(Self::type_hash()?.to_vec())];
        tokens.extend(self.message.encode_members());
        Ok(keccak256(encode(&tokens)))
    }
}

impl<M: AuthorizationMessage> TypedAuthorization<M> {
    /// The EIP-712 digest, `keccak256(0x1901 ‖ domainSeparator ‖ structHash)`.
    pub fn digest(&self) -> H256 {
        let mut bytes = Vec::with_capacity(66);
        bytes.extend_from_slice(&[0x19, 0x01]);
        bytes.extend_from_slice(&self.domain.separator());
        let struct_hash = match self.struct_hash() {
            Ok(hash) => hash,
            Err(never) => match never {},
        };
        bytes.extend_from_slice(&struct_hash);
        H256::from(keccak256(bytes))
    }
}
