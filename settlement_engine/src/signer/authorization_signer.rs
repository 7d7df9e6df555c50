use bsg_common::{Money, Secret};
use chrono::{DateTime, Duration, Utc};
use ethers::{
    signers::{LocalWallet, Signer},
    types::{transaction::eip712::EIP712Domain, Address, Signature, H256, U256},
};
use log::*;
use rand::Rng;
use serde::Serialize;

use crate::{
    db_types::{ChainBookingId, Nonce},
    fees::FeeRates,
    helpers::{money_to_base_units, SharedClock},
    signer::{
        typed_data::{AuthorizationMessage, BookingAuthorization, CancellationAuthorization, TypedAuthorization},
        SignerError,
    },
};

pub const DEFAULT_AUTHORIZATION_WINDOW_SECS: i64 = 300;
const NONCE_RANDOM_RANGE: u64 = 1_000_000;

/// Everything the signer needs to know about the on-chain verifier.
#[derive(Debug, Clone)]
pub struct SignerConfig {
    pub domain_name: String,
    pub domain_version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
    pub token_decimals: u32,
    pub authorization_window: Duration,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            domain_name: "BookingEscrow".into(),
            domain_version: "1".into(),
            chain_id: 31337,
            verifying_contract: Address::zero(),
            token_decimals: 6,
            authorization_window: Duration::seconds(DEFAULT_AUTHORIZATION_WINDOW_SECS),
        }
    }
}

/// The financial terms of a booking payment, in off-chain units.
#[derive(Debug, Clone)]
pub struct BookingPaymentTerms {
    pub booking_id: ChainBookingId,
    pub customer: Address,
    pub provider: Address,
    pub referrer: Option<Address>,
    pub amount: Money,
    pub rates: FeeRates,
}

/// The split of escrowed funds for a cancellation, in off-chain units.
#[derive(Debug, Clone)]
pub struct CancellationTerms {
    pub booking_id: ChainBookingId,
    pub customer_amount: Money,
    pub provider_amount: Money,
    pub platform_amount: Money,
    pub referrer_amount: Money,
    pub reason: String,
}

/// A message together with its signature and the metadata needed to persist its nonce.
#[derive(Debug, Clone, Serialize)]
pub struct SignedAuthorization<M> {
    pub message: M,
    #[serde(serialize_with = "serialize_signature")]
    pub signature: Signature,
    pub digest: H256,
    pub signer: Address,
    pub nonce: Nonce,
    pub expires_at: DateTime<Utc>,
}

fn serialize_signature<S: serde::Serializer>(signature: &Signature, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("0x{signature}"))
}

impl<M> SignedAuthorization<M> {
    /// The 65-byte `r ‖ s ‖ v` signature as a `0x`-prefixed hex string, as the contract expects it.
    pub fn signature_hex(&self) -> String {
        format!("0x{}", self.signature)
    }

    pub fn ensure_unexpired(&self, now: DateTime<Utc>) -> Result<(), SignerError> {
        if now >= self.expires_at {
            return Err(SignerError::Expired { expired_at: self.expires_at, now });
        }
        Ok(())
    }

    /// Recovers the signing address from the signature and checks that it is the address that claims to have
    /// signed.
    pub fn verify_signer(&self) -> Result<Address, SignerError> {
        let recovered = self.signature.recover(self.digest).map_err(|e| SignerError::Recovery(e.to_string()))?;
        if recovered != self.signer {
            return Err(SignerError::SignerMismatch { expected: self.signer, recovered });
        }
        Ok(recovered)
    }
}

/// Signs booking-payment and cancellation authorizations with the platform's key.
///
/// The signer has no side effects. Callers must persist the returned nonce before handing the signature to anyone.
#[derive(Clone)]
pub struct AuthorizationSigner {
    wallet: Option<LocalWallet>,
    domain: EIP712Domain,
    token_decimals: u32,
    window: Duration,
    clock: SharedClock,
}

impl std::fmt::Debug for AuthorizationSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AuthorizationSigner({:?})", self.wallet.as_ref().map(|w| w.address()))
    }
}

impl AuthorizationSigner {
    /// Creates a new signer. A missing key is allowed here, but every signing attempt will then fail with
    /// [`SignerError::MissingSigningKey`].
    pub fn new(config: SignerConfig, key: Option<&Secret<String>>, clock: SharedClock) -> Result<Self, SignerError> {
        let wallet = match key.map(|k| k.reveal().trim()).filter(|k| !k.is_empty()) {
            Some(k) => {
                let wallet = k.parse::<LocalWallet>().map_err(|_| SignerError::InvalidSigningKey)?;
                info!("✍️ Authorization signer loaded for address {:#x}", wallet.address());
                Some(wallet.with_chain_id(config.chain_id))
            },
            None => {
                warn!("✍️ No signing key is configured. All authorization requests will be refused.");
                None
            },
        };
        let domain = EIP712Domain {
            name: Some(config.domain_name),
            version: Some(config.domain_version),
            chain_id: Some(U256::from(config.chain_id)),
            verifying_contract: Some(config.verifying_contract),
            salt: None,
        };
        Ok(Self { wallet, domain, token_decimals: config.token_decimals, window: config.authorization_window, clock })
    }

    pub fn address(&self) -> Option<Address> {
        self.wallet.as_ref().map(|w| w.address())
    }

    pub fn domain(&self) -> &EIP712Domain {
        &self.domain
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn sign_booking_payment(
        &self,
        terms: &BookingPaymentTerms,
    ) -> Result<SignedAuthorization<BookingAuthorization>, SignerError> {
        let wallet = self.wallet.as_ref().ok_or(SignerError::MissingSigningKey)?;
        let (expires_at, nonce) = self.issue();
        let message = BookingAuthorization {
            booking_id: terms.booking_id.as_h256(),
            customer: terms.customer,
            provider: terms.provider,
            referrer: terms.referrer.unwrap_or_else(Address::zero),
            amount: money_to_base_units(terms.amount, self.token_decimals)?,
            platform_fee_rate: U256::from(terms.rates.platform_bps),
            referrer_fee_rate: U256::from(terms.rates.referrer_bps),
            expiry: unix_seconds(expires_at),
            nonce: nonce.as_u256(),
        };
        self.sign(wallet, message, nonce, expires_at).await
    }

    pub async fn sign_cancellation(
        &self,
        terms: &CancellationTerms,
    ) -> Result<SignedAuthorization<CancellationAuthorization>, SignerError> {
        let wallet = self.wallet.as_ref().ok_or(SignerError::MissingSigningKey)?;
        let (expires_at, nonce) = self.issue();
        let message = CancellationAuthorization {
            booking_id: terms.booking_id.as_h256(),
            customer_amount: money_to_base_units(terms.customer_amount, self.token_decimals)?,
            provider_amount: money_to_base_units(terms.provider_amount, self.token_decimals)?,
            platform_amount: money_to_base_units(terms.platform_amount, self.token_decimals)?,
            referrer_amount: money_to_base_units(terms.referrer_amount, self.token_decimals)?,
            reason: terms.reason.clone(),
            expiry: unix_seconds(expires_at),
            nonce: nonce.as_u256(),
        };
        self.sign(wallet, message, nonce, expires_at).await
    }

    async fn sign<M: AuthorizationMessage>(
        &self,
        wallet: &LocalWallet,
        message: M,
        nonce: Nonce,
        expires_at: DateTime<Utc>,
    ) -> Result<SignedAuthorization<M>, SignerError> {
        let typed = TypedAuthorization { domain: self.domain.clone(), message };
        let signature = wallet.sign_typed_data(&typed).await.map_err(|e| SignerError::Signing(e.to_string()))?;
        let digest = typed.digest();
        debug!(
            "✍️ Signed {} authorization for booking {:#x}. Nonce {nonce}, expires {expires_at}",
            M::KIND,
            typed.message.booking_id()
        );
        let signer = wallet.address();
        Ok(SignedAuthorization { message: typed.message, signature, digest, signer, nonce, expires_at })
    }

    /// Stamps a new authorization with its expiry and a fresh nonce.
    ///
    /// The nonce is the issue time in milliseconds, shifted six decimal places, plus a random component. Two
    /// authorizations issued in the same millisecond collide with probability 10⁻⁶; the nonce record catches those.
    fn issue(&self) -> (DateTime<Utc>, Nonce) {
        let now = self.clock.now();
        let millis = u64::try_from(now.timestamp_millis()).unwrap_or_default();
        let random = rand::thread_rng().gen_range(0..NONCE_RANDOM_RANGE);
        let nonce = U256::from(millis) * U256::from(NONCE_RANDOM_RANGE) + U256::from(random);
        (now + self.window, Nonce(nonce))
    }
}

fn unix_seconds(t: DateTime<Utc>) -> U256 {
    U256::from(u64::try_from(t.timestamp()).unwrap_or_default())
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use chrono::TimeZone;

    use super::*;
    use crate::{
        db_types::BookingId,
        helpers::{Clock, FixedClock},
    };

    // The first well-known development account. Never use it for anything real.
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const DEV_ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

    fn frozen() -> (FixedClock, DateTime<Utc>) {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        (FixedClock::new(now), now)
    }

    fn signer(clock: &FixedClock) -> AuthorizationSigner {
        let key = Secret::new(DEV_KEY.to_string());
        AuthorizationSigner::new(SignerConfig::default(), Some(&key), clock.shared()).unwrap()
    }

    fn payment_terms() -> BookingPaymentTerms {
        BookingPaymentTerms {
            booking_id: ChainBookingId::derive(&BookingId::new("booking-1")),
            customer: Address::repeat_byte(0x01),
            provider: Address::repeat_byte(0x02),
            referrer: None,
            amount: Money::from_str("100.00").unwrap(),
            rates: FeeRates::for_booking(false),
        }
    }

    #[tokio::test]
    async fn signs_booking_payment() {
        let (clock, now) = frozen();
        let signer = signer(&clock);
        assert_eq!(signer.address().unwrap(), Address::from_str(DEV_ADDRESS).unwrap());
        let auth = signer.sign_booking_payment(&payment_terms()).await.unwrap();
        assert_eq!(auth.message.referrer, Address::zero());
        assert_eq!(auth.message.amount, U256::from(100_000_000u64));
        assert_eq!(auth.message.platform_fee_rate, U256::from(1000u64));
        assert_eq!(auth.message.referrer_fee_rate, U256::zero());
        assert_eq!(auth.expires_at, now + Duration::minutes(5));
        assert_eq!(auth.message.expiry, U256::from((now + Duration::minutes(5)).timestamp() as u64));
        assert_eq!(auth.verify_signer().unwrap(), signer.address().unwrap());
        assert!(auth.signature_hex().starts_with("0x"));
        assert_eq!(auth.signature_hex().len(), 132);
    }

    #[tokio::test]
    async fn nonce_embeds_the_issue_time() {
        let (clock, now) = frozen();
        let signer = signer(&clock);
        let auth = signer.sign_booking_payment(&payment_terms()).await.unwrap();
        let millis = U256::from(now.timestamp_millis() as u64);
        let nonce = auth.nonce.as_u256();
        assert_eq!(nonce / U256::from(1_000_000u64), millis);
        assert_eq!(auth.message.nonce, nonce);
    }

    #[tokio::test]
    async fn expiry_follows_the_frozen_clock() {
        let (clock, now) = frozen();
        let signer = signer(&clock);
        let auth = signer.sign_booking_payment(&payment_terms()).await.unwrap();
        assert!(auth.ensure_unexpired(now).is_ok());
        clock.advance(Duration::minutes(5));
        assert!(matches!(auth.ensure_unexpired(clock.now()), Err(SignerError::Expired { .. })));
    }

    #[tokio::test]
    async fn custom_window() {
        let (clock, now) = frozen();
        let key = Secret::new(DEV_KEY.to_string());
        let config = SignerConfig { authorization_window: Duration::seconds(90), ..Default::default() };
        let signer = AuthorizationSigner::new(config, Some(&key), clock.shared()).unwrap();
        let auth = signer.sign_booking_payment(&payment_terms()).await.unwrap();
        assert_eq!(auth.expires_at, now + Duration::seconds(90));
    }

    #[tokio::test]
    async fn signs_cancellation() {
        let (clock, _) = frozen();
        let signer = signer(&clock);
        let terms = CancellationTerms {
            booking_id: ChainBookingId::derive(&BookingId::new("booking-1")),
            customer_amount: Money::from_str("50").unwrap(),
            provider_amount: Money::from_str("40").unwrap(),
            platform_amount: Money::from_str("5").unwrap(),
            referrer_amount: Money::from_str("5").unwrap(),
            reason: "Provider unavailable".into(),
        };
        let auth = signer.sign_cancellation(&terms).await.unwrap();
        assert_eq!(auth.message.customer_amount, U256::from(50_000_000u64));
        assert_eq!(auth.message.referrer_amount, U256::from(5_000_000u64));
        assert_eq!(auth.message.reason, "Provider unavailable");
        assert_eq!(auth.verify_signer().unwrap(), signer.address().unwrap());
    }

    #[tokio::test]
    async fn fails_closed_without_a_key() {
        let (clock, _) = frozen();
        let signer = AuthorizationSigner::new(SignerConfig::default(), None, clock.shared()).unwrap();
        assert!(signer.address().is_none());
        let err = signer.sign_booking_payment(&payment_terms()).await.unwrap_err();
        assert!(matches!(err, SignerError::MissingSigningKey));
        let blank = Secret::new("  ".to_string());
        let signer = AuthorizationSigner::new(SignerConfig::default(), Some(&blank), clock.shared()).unwrap();
        assert!(matches!(signer.sign_booking_payment(&payment_terms()).await, Err(SignerError::MissingSigningKey)));
    }

    #[test]
    fn rejects_garbage_keys() {
        let (clock, _) = frozen();
        let key = Secret::new("not a key".to_string());
        let err = AuthorizationSigner::new(SignerConfig::default(), Some(&key), clock.shared()).unwrap_err();
        assert!(matches!(err, SignerError::InvalidSigningKey));
    }
}
