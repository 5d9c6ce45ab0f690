use crate::{
    address::Pubkey,
    remote::{
        ConfirmPolicy,
        rpc::websocket_url,
    },
    retry::RetryPolicy,
    simulation::RewardEffect,
};
use anyhow::{
    Context,
    Result,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
    time::Duration,
};
use tx_history::{
    Cluster,
    DEFAULT_CAPACITY,
};

pub const DEFAULT_RPC_URL: &str = "https://api.devnet.solana.com";
pub const DEFAULT_PROGRAM_ID: &str = "hirTPHnA6on8w2ATUku2bKJST2wqhdY5CdWt8SS7d93";
pub const DEFAULT_HISTORY_PATH: &str = "~/.pop-client/history";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ClientConfig {
    pub rpc_url: String,
    /// Derived from `rpc_url` when absent.
    pub ws_url: Option<String>,
    pub program_id: String,
    pub cluster: Cluster,
    pub owner: Option<String>,
    pub poll_interval_ms: u64,
    pub fetch_attempts: u32,
    pub fetch_base_delay_ms: u64,
    pub confirm_timeout_ms: u64,
    pub confirm_poll_ms: u64,
    pub history_path: String,
    pub history_capacity: usize,
    pub reward: RewardEffect,
    pub diagnostic_endpoints: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_owned(),
            ws_url: None,
            program_id: DEFAULT_PROGRAM_ID.to_owned(),
            cluster: Cluster::Devnet,
            owner: None,
            poll_interval_ms: 5_000,
            fetch_attempts: 3,
            fetch_base_delay_ms: 1_000,
            confirm_timeout_ms: 60_000,
            confirm_poll_ms: 500,
            history_path: DEFAULT_HISTORY_PATH.to_owned(),
            history_capacity: DEFAULT_CAPACITY,
            reward: RewardEffect::default(),
            diagnostic_endpoints: vec![
                DEFAULT_RPC_URL.to_owned(),
                "https://rpc.ankr.com/solana_devnet".to_owned(),
            ],
        }
    }
}

impl ClientConfig {
    /// Read a JSON config. Missing keys fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_slice(&data)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn ws_url(&self) -> String {
        self.ws_url
            .clone()
            .unwrap_or_else(|| websocket_url(&self.rpc_url))
    }

    pub fn program_id(&self) -> Result<Pubkey> {
        self.program_id
            .parse()
            .with_context(|| format!("Invalid program id {}", self.program_id))
    }

    pub fn owner(&self) -> Result<Option<Pubkey>> {
        self.owner
            .as_deref()
            .map(|owner| {
                owner
                    .parse()
                    .with_context(|| format!("Invalid owner {owner}"))
            })
            .transpose()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn fetch_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.fetch_attempts,
            Duration::from_millis(self.fetch_base_delay_ms),
        )
    }

    pub fn confirm_policy(&self) -> ConfirmPolicy {
        ConfirmPolicy {
            timeout: Duration::from_millis(self.confirm_timeout_ms),
            poll_interval: Duration::from_millis(self.confirm_poll_ms.max(1)),
            ..ConfirmPolicy::default()
        }
    }

    pub fn history_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.history_path).into_owned())
    }
}
