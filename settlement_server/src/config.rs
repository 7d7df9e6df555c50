use std::{env, fmt::Display, str::FromStr, time::Duration};

use bsg_common::{helpers::parse_boolean_flag, Secret};
use ethers::types::Address;
use log::*;
use settlement_engine::{
    pipeline::{BackoffPolicy, MonitorConfig, ReconcilerConfig, WorkerConfig},
    signer::SignerConfig,
};

const DEFAULT_BSG_HOST: &str = "127.0.0.1";
const DEFAULT_BSG_PORT: u16 = 8460;
const DEFAULT_CHAIN_WS_URL: &str = "ws://127.0.0.1:8545";
const DEFAULT_CHAIN_HTTP_URL: &str = "http://127.0.0.1:8545";

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub chain: ChainConfig,
    /// EIP-712 domain and authorization lifetime. The verifying contract is the escrow contract.
    pub signer: SignerConfig,
    /// When absent the server still runs, but refuses to issue authorizations.
    pub signer_key: Option<Secret<String>>,
    pub monitor: MonitorConfig,
    pub reconciler: ReconcilerConfig,
    /// Start the event monitor as soon as the server is up.
    pub autostart_monitor: bool,
}

#[derive(Clone, Debug)]
pub struct ChainConfig {
    pub ws_url: String,
    pub http_url: String,
    pub escrow_contract: Address,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_CHAIN_WS_URL.into(),
            http_url: DEFAULT_CHAIN_HTTP_URL.into(),
            escrow_contract: Address::zero(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BSG_HOST.to_string(),
            port: DEFAULT_BSG_PORT,
            database_url: String::default(),
            chain: ChainConfig::default(),
            signer: SignerConfig::default(),
            signer_key: None,
            monitor: MonitorConfig::default(),
            reconciler: ReconcilerConfig::default(),
            autostart_monitor: true,
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source. Invalid values are logged and replaced by the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where F: Fn(&str) -> Option<String> {
        let defaults = Self::default();
        let vars = EnvReader { lookup };
        let host = vars.string("BSG_HOST").unwrap_or(defaults.host);
        let port = vars.parse("BSG_PORT", defaults.port);
        let database_url = vars.string("BSG_DATABASE_URL").unwrap_or_else(|| {
            error!("🪛️ BSG_DATABASE_URL is not set. Please set it to the URL for the settlement database.");
            String::default()
        });
        let chain = ChainConfig {
            ws_url: vars.string("BSG_CHAIN_WS_URL").unwrap_or(defaults.chain.ws_url),
            http_url: vars.string("BSG_CHAIN_HTTP_URL").unwrap_or(defaults.chain.http_url),
            escrow_contract: vars.string("BSG_ESCROW_CONTRACT").and_then(|s| parse_address(&s)).unwrap_or_else(|| {
                warn!(
                    "🪛️ BSG_ESCROW_CONTRACT is not set to a valid address. Authorizations will name the zero address \
                     and no contract events will be seen."
                );
                Address::zero()
            }),
        };
        let signer = SignerConfig {
            domain_name: vars.string("BSG_EIP712_NAME").unwrap_or(defaults.signer.domain_name),
            domain_version: vars.string("BSG_EIP712_VERSION").unwrap_or(defaults.signer.domain_version),
            chain_id: vars.parse("BSG_CHAIN_ID", defaults.signer.chain_id),
            verifying_contract: chain.escrow_contract,
            token_decimals: vars.parse("BSG_TOKEN_DECIMALS", defaults.signer.token_decimals),
            authorization_window: chrono::Duration::seconds(vars.parse(
                "BSG_AUTHORIZATION_WINDOW_SECS",
                defaults.signer.authorization_window.num_seconds(),
            )),
        };
        let signer_key = vars.string("BSG_SIGNER_PRIVATE_KEY").map(Secret::new);
        if signer_key.is_none() {
            warn!("🪛️ BSG_SIGNER_PRIVATE_KEY is not set. The server will not be able to issue authorizations.");
        }
        let backoff = BackoffPolicy {
            base: vars.secs("BSG_RECONNECT_BASE_DELAY_SECS", defaults.monitor.backoff.base),
            max: vars.secs("BSG_RECONNECT_MAX_DELAY_SECS", defaults.monitor.backoff.max),
            max_attempts: vars.parse("BSG_RECONNECT_MAX_ATTEMPTS", defaults.monitor.backoff.max_attempts),
        };
        let worker = WorkerConfig {
            batch_size: vars.parse("BSG_QUEUE_BATCH_SIZE", defaults.monitor.worker.batch_size).max(1),
            idle_sweep: vars.secs("BSG_QUEUE_IDLE_SWEEP_SECS", defaults.monitor.worker.idle_sweep),
            claim_lease: defaults.monitor.worker.claim_lease,
        };
        let reconciler = ReconcilerConfig {
            attempts: vars.parse("BSG_RECONCILER_ATTEMPTS", defaults.reconciler.attempts),
            interval: vars.secs("BSG_RECONCILER_INTERVAL_SECS", defaults.reconciler.interval),
            block_range: vars.parse("BSG_RECONCILER_BLOCK_RANGE", defaults.reconciler.block_range),
        };
        let autostart_monitor = vars.flag("BSG_AUTOSTART_MONITOR", defaults.autostart_monitor);
        Self {
            host,
            port,
            database_url,
            chain,
            signer,
            signer_key,
            monitor: MonitorConfig { backoff, worker },
            reconciler,
            autostart_monitor,
        }
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where F: Fn(&str) -> Option<String>
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
    }

    fn parse<T>(&self, name: &str, default: T) -> T
    where
        T: FromStr + Display,
        T::Err: Display,
    {
        match self.string(name) {
            Some(s) => s.parse::<T>().unwrap_or_else(|e| {
                warn!("🪛️ {s} is not a valid value for {name}. {e} Using the default, {default}, instead.");
                default
            }),
            None => default,
        }
    }

    fn secs(&self, name: &str, default: Duration) -> Duration {
        Duration::from_secs(self.parse(name, default.as_secs()))
    }

    fn flag(&self, name: &str, default: bool) -> bool {
        parse_boolean_flag(self.string(name), default)
    }
}

fn parse_address(s: &str) -> Option<Address> {
    Address::from_str(s).map_err(|e| warn!("🪛️ Invalid contract address {s}. {e}")).ok()
}
