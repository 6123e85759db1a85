use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use derive_builder::Builder;
use serde::Serialize;

use crate::error::Error;
use crate::guard::GuardConfig;
use crate::pricing::DEFAULT_TOKEN_AMOUNT;
use crate::ratelimit::RateLimitPolicy;

/// String that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(***)")
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SolanaNetwork {
    #[default]
    Devnet,
    Testnet,
    MainnetBeta,
    Localnet,
}

impl SolanaNetwork {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolanaNetwork::Devnet => "devnet",
            SolanaNetwork::Testnet => "testnet",
            SolanaNetwork::MainnetBeta => "mainnet-beta",
            SolanaNetwork::Localnet => "localnet",
        }
    }
}

impl fmt::Display for SolanaNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SolanaNetwork {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "devnet" => Ok(SolanaNetwork::Devnet),
            "testnet" => Ok(SolanaNetwork::Testnet),
            "mainnet" | "mainnet-beta" => Ok(SolanaNetwork::MainnetBeta),
            "localnet" | "localhost" => Ok(SolanaNetwork::Localnet),
            other => Err(Error::InvalidConfig(format!(
                "unknown SOLANA_NETWORK {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupabaseConfig {
    pub url: String,
    pub key: SecretString,
}

/// Runtime configuration for the settlement service.
#[derive(Builder, Debug, Clone)]
#[builder(pattern = "owned")]
pub struct ServiceConfig {
    #[builder(default = "SocketAddr::from(([0, 0, 0, 0], 3000))")]
    pub bind_addr: SocketAddr,
    #[builder(setter(into))]
    pub private_key: SecretString,
    #[builder(setter(into))]
    pub admin_secret: SecretString,
    #[builder(default)]
    pub solana_network: SolanaNetwork,
    #[builder(default)]
    pub supabase: Option<SupabaseConfig>,
    #[builder(default = "DEFAULT_TOKEN_AMOUNT")]
    pub token_amount: u64,
    #[builder(default)]
    pub physical_prize_ids: HashSet<String>,
    #[builder(default)]
    pub guard: GuardConfig,
    #[builder(default = "RateLimitPolicy::general()")]
    pub general_limit: RateLimitPolicy,
    #[builder(default = "RateLimitPolicy::purchase()")]
    pub purchase_limit: RateLimitPolicy,
    #[builder(default = "RateLimitPolicy::admin()")]
    pub admin_limit: RateLimitPolicy,
    #[builder(default = "Duration::from_secs(600)")]
    pub replay_sweep_every: Duration,
    #[builder(default = "Duration::from_secs(60)")]
    pub rate_limit_sweep_every: Duration,
}

impl ServiceConfigBuilder {
    pub fn build_validated(self) -> Result<ServiceConfig, Error> {
        let config = self
            .build()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

impl ServiceConfig {
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.private_key.is_empty() {
            return Err(Error::InvalidConfig("PRIVATE_KEY must not be empty".into()));
        }
        if self.admin_secret.is_empty() {
            return Err(Error::InvalidConfig("ADMIN_SECRET must not be empty".into()));
        }
        if self.token_amount == 0 {
            return Err(Error::InvalidConfig("token_amount must be >= 1".into()));
        }
        if let Some(supabase) = &self.supabase {
            if !supabase.url.starts_with("http://") && !supabase.url.starts_with("https://") {
                return Err(Error::InvalidConfig(
                    "SUPABASE_URL must be an http(s) URL".into(),
                ));
            }
            if supabase.key.is_empty() {
                return Err(Error::InvalidConfig("SUPABASE_KEY must not be empty".into()));
            }
        }
        if self.replay_sweep_every.is_zero() || self.rate_limit_sweep_every.is_zero() {
            return Err(Error::InvalidConfig("sweep intervals must be non-zero".into()));
        }
        self.guard.validate()?;
        self.general_limit.validate()?;
        self.purchase_limit.validate()?;
        self.admin_limit.validate()?;
        Ok(())
    }

    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an environment-like lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut builder = Self::builder()
            .private_key(get("PRIVATE_KEY").ok_or(Error::MissingEnv("PRIVATE_KEY"))?)
            .admin_secret(get("ADMIN_SECRET").ok_or(Error::MissingEnv("ADMIN_SECRET"))?);

        if let Some(network) = get("SOLANA_NETWORK") {
            builder = builder.solana_network(network.parse()?);
        }

        builder = match (get("SUPABASE_URL"), get("SUPABASE_KEY")) {
            (Some(url), Some(key)) => builder.supabase(Some(SupabaseConfig {
                url: url.trim().to_owned(),
                key: key.into(),
            })),
            (None, None) => builder,
            (Some(_), None) => return Err(Error::MissingEnv("SUPABASE_KEY")),
            (None, Some(_)) => return Err(Error::MissingEnv("SUPABASE_URL")),
        };

        if let Some(addr) = get("BIND_ADDR") {
            let addr = addr
                .trim()
                .parse::<SocketAddr>()
                .map_err(|e| Error::InvalidConfig(format!("BIND_ADDR: {e}")))?;
            builder = builder.bind_addr(addr);
        }
        if let Some(amount) = get("TOKEN_AMOUNT") {
            builder = builder.token_amount(parse_number("TOKEN_AMOUNT", &amount)?);
        }
        if let Some(ids) = get("PHYSICAL_PRIZE_IDS") {
            builder = builder.physical_prize_ids(
                ids.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_owned)
                    .collect(),
            );
        }

        let mut guard = GuardConfig::default();
        if let Some(secs) = get("REPLAY_MAX_AGE_SECONDS") {
            guard.max_age = Duration::from_secs(parse_number("REPLAY_MAX_AGE_SECONDS", &secs)?);
        }
        if let Some(secs) = get("REPLAY_FUTURE_TOLERANCE_SECONDS") {
            guard.future_tolerance =
                Duration::from_secs(parse_number("REPLAY_FUTURE_TOLERANCE_SECONDS", &secs)?);
        }

        builder.guard(guard).build_validated()
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64, Error> {
    value
        .trim()
        .parse()
        .map_err(|e| Error::InvalidConfig(format!("{key}: {e}")))
}
