//! Health checks and user-facing error hints.
use crate::{
    address::{
        Pubkey,
        player_address,
    },
    error::{
        ClientError,
        PreconditionViolation,
        Result,
    },
    remote::{
        LAMPORTS_PER_SOL,
        ProgramTransport,
    },
};
use futures::future::join_all;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    Healthy,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub rpc_reachable: bool,
    pub rpc_version: Option<String>,
    pub program_deployed: bool,
    pub wallet_connected: bool,
    pub balance_sol: Option<f64>,
    /// `None` when no wallet is connected or the lookup failed.
    pub player_account_exists: Option<bool>,
    pub messages: Vec<String>,
}

impl HealthReport {
    fn new() -> Self {
        Self {
            status: HealthStatus::Healthy,
            rpc_reachable: false,
            rpc_version: None,
            program_deployed: false,
            wallet_connected: false,
            balance_sol: None,
            player_account_exists: None,
            messages: Vec::new(),
        }
    }

    fn degrade(&mut self, status: HealthStatus, message: String) {
        self.status = self.status.max(status);
        self.messages.push(message);
    }
}

fn short(key: &Pubkey) -> String {
    key.to_string().chars().take(8).collect()
}

/// Check the RPC node, the program deployment, and (with a wallet) its balance and player
/// account. Stops early when the node is unreachable.
pub async fn perform_health_check<T: ProgramTransport>(
    transport: &T,
    program_id: &Pubkey,
    wallet: Option<&Pubkey>,
) -> HealthReport {
    let mut report = HealthReport::new();

    match transport.version().await {
        Ok(version) => {
            report.rpc_reachable = true;
            report.messages.push(format!("RPC connected (version {version})"));
            report.rpc_version = Some(version);
        }
        Err(err) => {
            report.degrade(HealthStatus::Error, format!("RPC connection failed: {err}"));
            return report;
        }
    }

    match transport.account(program_id).await {
        Ok(Some(info)) if info.executable => {
            report.program_deployed = true;
            report
                .messages
                .push(format!("Program found at {}...", short(program_id)));
        }
        Ok(_) => report.degrade(
            HealthStatus::Error,
            "Program not found or not executable".into(),
        ),
        Err(err) => report.degrade(HealthStatus::Error, format!("Program check failed: {err}")),
    }

    let Some(wallet) = wallet else {
        report.degrade(HealthStatus::Warning, "Wallet not connected".into());
        return report;
    };
    report.wallet_connected = true;
    report
        .messages
        .push(format!("Wallet connected: {}...", short(wallet)));

    match transport.balance(wallet).await {
        Ok(0) => {
            report.balance_sol = Some(0.0);
            report.degrade(HealthStatus::Warning, "Wallet has 0 SOL. Airdrop needed.".into());
        }
        Ok(lamports) => {
            let sol = lamports as f64 / LAMPORTS_PER_SOL as f64;
            report.balance_sol = Some(sol);
            report.messages.push(format!("Balance: {sol:.4} SOL"));
        }
        Err(err) => report.degrade(HealthStatus::Warning, format!("Balance check failed: {err}")),
    }

    let address = player_address(wallet, program_id);
    let lookup = transport
        .account(&address)
        .await
        .map(|info| (address, info.is_some()));
    match lookup {
        Ok((address, true)) => {
            report.player_account_exists = Some(true);
            report
                .messages
                .push(format!("Player account exists at {}...", short(&address)));
        }
        Ok((_, false)) => {
            report.player_account_exists = Some(false);
            report
                .messages
                .push("Player account not initialized yet".into());
        }
        Err(err) => report.degrade(
            HealthStatus::Warning,
            format!("Player account check failed: {err}"),
        ),
    }

    report
}

#[derive(Debug, Clone, PartialEq)]
pub struct EndpointLatency {
    pub endpoint: String,
    /// `None` when the probe failed.
    pub latency: Option<Duration>,
}

impl EndpointLatency {
    pub fn is_ok(&self) -> bool {
        self.latency.is_some()
    }
}

/// Probe every endpoint concurrently and sort by latency, failed endpoints last.
pub async fn rank_endpoints<F, Fut>(endpoints: &[String], probe: F) -> Vec<EndpointLatency>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let probes = endpoints.iter().map(|endpoint| {
        let fut = probe(endpoint.clone());
        async move {
            let start = Instant::now();
            let latency = fut.await.ok().map(|_| start.elapsed());
            EndpointLatency {
                endpoint: endpoint.clone(),
                latency,
            }
        }
    });
    let mut ranked = join_all(probes).await;
    ranked.sort_by_key(|result| (result.latency.is_none(), result.latency));
    ranked
}

/// Hint for the player on what to do about `err`.
pub fn describe_error(err: &ClientError) -> String {
    match err {
        ClientError::Precondition(violation) => match violation {
            PreconditionViolation::NotInitialized => {
                "No player yet. Create one before playing.".into()
            }
            PreconditionViolation::NoPendingEncounter => {
                "You must explore before fighting. Explore first.".into()
            }
            PreconditionViolation::NothingToClaim => {
                "No reward available. Win a battle first.".into()
            }
            PreconditionViolation::PlayerDead => {
                "Your player is dead (HP = 0). Create a new player.".into()
            }
            PreconditionViolation::InvalidStats { .. } => {
                "Invalid stats. HP: 1-100, ATK: 1-50, DEF: 0-20.".into()
            }
        },
        ClientError::Unauthorized(_) => "You don't own this player account.".into(),
        ClientError::ProgramUnreachable(_) => {
            "The game program is not reachable on this cluster. Playing in local simulation.".into()
        }
        ClientError::Rejected { code: Some(6000), .. } => {
            "Your player is dead (HP = 0). Create a new player.".into()
        }
        ClientError::Rejected { code: Some(6001), .. } => {
            "You must explore before fighting. Explore first.".into()
        }
        ClientError::Rejected { code: Some(6002), .. } => {
            "No reward available. Win a battle first.".into()
        }
        ClientError::Transport(_) | ClientError::RetryExhausted { .. } => {
            "RPC timeout. Try again or use a different RPC endpoint.".into()
        }
        ClientError::Busy { running } => format!("Wait for {running} to finish."),
        ClientError::Unconfirmed { signature } => format!(
            "Transaction {} was not confirmed. Check the explorer before retrying.",
            format_signature(signature)
        ),
        other => describe_message(&other.to_string()),
    }
}

fn describe_message(message: &str) -> String {
    let lower = message.to_lowercase();
    if lower.contains("insufficient funds") || lower.contains("insufficient lamports") {
        "Not enough SOL. Request an airdrop from the faucet.".into()
    } else if lower.contains("already in use") {
        "Account already exists. Try a different wallet.".into()
    } else if lower.contains("simulation failed") {
        "Transaction would fail. Check your wallet balance and account state.".into()
    } else {
        let head: String = message.chars().take(100).collect();
        format!("Unknown error: {head}")
    }
}

/// `first8...last8`; short signatures are returned unchanged.
pub fn format_signature(signature: &str) -> String {
    let chars: Vec<char> = signature.chars().collect();
    if chars.len() <= 16 {
        return signature.to_owned();
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 8..].iter().collect();
    format!("{head}...{tail}")
}
