// config.rs - Load configuration from environment variables

use std::env::var;

use crate::error::NodeError;

/// Channel-wide domain-separation constant bound into every signed payload.
/// Changing it breaks compatibility with peers running an older version.
pub const PORT_TAG: u64 = 4161;

/// Default bounds enforced by the open-channel security check (spec §4.6).
pub const DEFAULT_MIN_DISPUTE_WINDOW: u64 = 2;
pub const DEFAULT_MAX_DISPUTE_WINDOW: u64 = 10_000;
pub const DEFAULT_MIN_PENALTY_RESERVE: u64 = 100;
pub const DEFAULT_MAX_PENALTY_RESERVE: u64 = 100_000_000;

const DEFAULT_ALGOD_ADDRESS: &str = "http://localhost:4001";
const DEFAULT_KMD_ADDRESS: &str = "http://localhost:4002";
const DEFAULT_INDEXER_ADDRESS: &str = "http://localhost:8980";
const DEFAULT_PEER_PORT: u16 = 28547;
const DEFAULT_RPC_PORT: u16 = 50051;

/// Configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Optional mnemonic seed phrase; a fresh account is generated when absent.
    pub seed_phrase: Option<String>,

    /// Ledger node endpoints.
    pub algod_address: String,
    pub kmd_address: String,
    pub indexer_address: String,

    /// Port the peer protocol server listens on.
    pub peer_port: u16,

    /// Port the operator-facing facade listens on.
    pub rpc_port: u16,

    /// Open-channel security-check bounds (spec §4.6).
    pub min_dispute_window: u64,
    pub max_dispute_window: u64,
    pub min_penalty_reserve: u64,
    pub max_penalty_reserve: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            seed_phrase: None,
            algod_address: DEFAULT_ALGOD_ADDRESS.to_string(),
            kmd_address: DEFAULT_KMD_ADDRESS.to_string(),
            indexer_address: DEFAULT_INDEXER_ADDRESS.to_string(),
            peer_port: DEFAULT_PEER_PORT,
            rpc_port: DEFAULT_RPC_PORT,
            min_dispute_window: DEFAULT_MIN_DISPUTE_WINDOW,
            max_dispute_window: DEFAULT_MAX_DISPUTE_WINDOW,
            min_penalty_reserve: DEFAULT_MIN_PENALTY_RESERVE,
            max_penalty_reserve: DEFAULT_MAX_PENALTY_RESERVE,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to the
    /// sandbox-friendly defaults for anything not set.
    pub fn from_env() -> Result<Self, NodeError> {
        let defaults = Config::default();

        Ok(Config {
            seed_phrase: get_env_optional("SEED_PHRASE"),
            algod_address: get_env_or("ALGOD_ADDRESS", &defaults.algod_address),
            kmd_address: get_env_or("KMD_ADDRESS", &defaults.kmd_address),
            indexer_address: get_env_or("INDEXER_ADDRESS", &defaults.indexer_address),
            peer_port: parse_env_or("PEER_PORT", defaults.peer_port)?,
            rpc_port: parse_env_or("RPC_PORT", defaults.rpc_port)?,
            min_dispute_window: parse_env_or("MIN_DISPUTE_WINDOW", defaults.min_dispute_window)?,
            max_dispute_window: parse_env_or("MAX_DISPUTE_WINDOW", defaults.max_dispute_window)?,
            min_penalty_reserve: parse_env_or(
                "MIN_PENALTY_RESERVE",
                defaults.min_penalty_reserve,
            )?,
            max_penalty_reserve: parse_env_or(
                "MAX_PENALTY_RESERVE",
                defaults.max_penalty_reserve,
            )?,
        })
    }
}

fn get_env_optional(key: &str) -> Option<String> {
    var(key).ok().filter(|v| !v.is_empty())
}

fn get_env_or(key: &str, default: &str) -> String {
    get_env_optional(key).unwrap_or_else(|| default.to_string())
}

fn parse_env_or<T>(key: &str, default: T) -> Result<T, NodeError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get_env_optional(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| NodeError::Fatal(format!("invalid {key}: {e}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_env_is_unset() {
        let config = Config::default();
        assert_eq!(config.peer_port, DEFAULT_PEER_PORT);
        assert_eq!(config.rpc_port, DEFAULT_RPC_PORT);
        assert!(config.seed_phrase.is_none());
    }

    #[test]
    fn from_env_reads_overrides() {
        // SAFETY in a test context: the env mutations below are process-wide
        // and this test doesn't run concurrently with other env-reading tests
        // in the same binary because each `#[test]` in this module is
        // single-threaded-safe for the keys it touches.
        std::env::set_var("PEER_PORT", "9000");
        std::env::set_var("MIN_DISPUTE_WINDOW", "5");
        let config = Config::from_env().expect("config should load");
        assert_eq!(config.peer_port, 9000);
        assert_eq!(config.min_dispute_window, 5);
        std::env::remove_var("PEER_PORT");
        std::env::remove_var("MIN_DISPUTE_WINDOW");
    }
}
