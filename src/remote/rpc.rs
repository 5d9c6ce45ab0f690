//! JSON-RPC transport over the Solana nonblocking client.
use crate::{
    address::{
        Pubkey,
        Signature,
    },
    error::{
        ClientError,
        Result,
    },
    remote::{
        AccountInfo,
        AccountUpdates,
        ProgramTransport,
        SignatureStatus,
        Submission,
        pubsub,
        transaction::build_transaction,
    },
};
use solana_client::{
    client_error::{
        ClientError as RpcClientError,
        ClientErrorKind,
    },
    nonblocking::rpc_client::RpcClient,
    rpc_request::{
        RpcError,
        RpcResponseErrorData,
    },
};
use solana_sdk::{
    commitment_config::CommitmentConfig,
    instruction::{
        Instruction,
        InstructionError,
    },
    signer::Signer,
    transaction::TransactionError,
};
use std::{
    sync::Arc,
    time::Duration,
};
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Anchor constraint failures that mean the signer does not own the account.
const AUTHORITY_CONSTRAINTS: [u32; 2] = [2001, 2006];

pub struct RpcTransport {
    client: RpcClient,
    ws_url: String,
    signer: Option<Arc<dyn Signer + Send + Sync>>,
}

impl RpcTransport {
    pub fn new(rpc_url: impl Into<String>, ws_url: Option<String>) -> Self {
        let rpc_url = rpc_url.into();
        let ws_url = ws_url.unwrap_or_else(|| websocket_url(&rpc_url));
        let client = RpcClient::new_with_timeout_and_commitment(
            rpc_url,
            REQUEST_TIMEOUT,
            CommitmentConfig::confirmed(),
        );
        Self {
            client,
            ws_url,
            signer: None,
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer + Send + Sync>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn rpc_url(&self) -> String {
        self.client.url()
    }
}

/// `http(s)://host` becomes `ws(s)://host`.
pub fn websocket_url(rpc_url: &str) -> String {
    if let Some(rest) = rpc_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = rpc_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        rpc_url.to_owned()
    }
}

/// Map an RPC client failure to a client error, preferring the structured payload over the
/// message text.
pub fn map_rpc_error(err: &RpcClientError) -> ClientError {
    match err.kind() {
        ClientErrorKind::RpcError(RpcError::RpcResponseError { message, data, .. }) => {
            match data {
                RpcResponseErrorData::SendTransactionPreflightFailure(result) => {
                    classify_preflight(result.err.as_ref(), message)
                }
                RpcResponseErrorData::NodeUnhealthy { .. } => {
                    ClientError::Transport(message.clone())
                }
                _ => ClientError::classify_message(message),
            }
        }
        ClientErrorKind::TransactionError(tx_err) => classify_transaction_error(tx_err),
        ClientErrorKind::Io(_) | ClientErrorKind::Reqwest(_) => {
            ClientError::Transport(err.to_string())
        }
        ClientErrorKind::SigningError(e) => ClientError::Signing(e.to_string()),
        _ => ClientError::classify_message(&err.to_string()),
    }
}

/// A transaction the node refused to simulate. The program cannot be run from here, unless
/// the refusal is an ownership constraint.
pub fn classify_preflight(err: Option<&TransactionError>, message: &str) -> ClientError {
    match err.and_then(custom_code) {
        Some(code) if AUTHORITY_CONSTRAINTS.contains(&code) => {
            ClientError::Unauthorized(format!("constraint violation {code}"))
        }
        _ => {
            let detail = err.map(|e| e.to_string()).unwrap_or_else(|| message.to_owned());
            ClientError::ProgramUnreachable(format!("transaction simulation failed: {detail}"))
        }
    }
}

fn custom_code(err: &TransactionError) -> Option<u32> {
    match err {
        TransactionError::InstructionError(_, InstructionError::Custom(code)) => Some(*code),
        _ => None,
    }
}

/// Classification of a transaction error reported outside of preflight.
pub fn classify_transaction_error(err: &TransactionError) -> ClientError {
    match err {
        TransactionError::ProgramAccountNotFound
        | TransactionError::InvalidProgramForExecution
        | TransactionError::InstructionError(
            _,
            InstructionError::UnsupportedProgramId | InstructionError::IncorrectProgramId,
        ) => ClientError::ProgramUnreachable(err.to_string()),
        TransactionError::BlockhashNotFound => ClientError::Transport(err.to_string()),
        _ => match custom_code(err) {
            Some(code) if AUTHORITY_CONSTRAINTS.contains(&code) => {
                ClientError::Unauthorized(format!("constraint violation {code}"))
            }
            Some(code) => ClientError::Rejected {
                code: Some(code),
                message: format!("custom program error {code:#x}"),
            },
            None => ClientError::Rejected {
                code: None,
                message: err.to_string(),
            },
        },
    }
}

fn rpc_err(err: RpcClientError) -> ClientError {
    map_rpc_error(&err)
}

impl ProgramTransport for RpcTransport {
    async fn account(&self, address: &Pubkey) -> Result<Option<AccountInfo>> {
        let response = self
            .client
            .get_account_with_commitment(address, CommitmentConfig::confirmed())
            .await
            .map_err(rpc_err)?;
        Ok(response.value.map(|account| AccountInfo {
            data: account.data,
            executable: account.executable,
            lamports: account.lamports,
        }))
    }

    async fn send(&self, instruction: &Instruction) -> Result<Submission> {
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| ClientError::Signing("no wallet connected".into()))?;
        let (blockhash, last_valid_block_height) = self
            .client
            .get_latest_blockhash_with_commitment(CommitmentConfig::confirmed())
            .await
            .map_err(rpc_err)?;
        let transaction = build_transaction(instruction, signer.as_ref(), blockhash)?;
        let signature = self
            .client
            .send_transaction(&transaction)
            .await
            .map_err(rpc_err)?;
        debug!(%signature, "transaction sent");
        Ok(Submission {
            signature,
            last_valid_block_height,
        })
    }

    async fn signature_status(&self, signature: &Signature) -> Result<Option<SignatureStatus>> {
        let response = self
            .client
            .get_signature_statuses_with_history(std::slice::from_ref(signature))
            .await
            .map_err(rpc_err)?;
        Ok(response.value.into_iter().next().flatten().map(|status| {
            match &status.err {
                Some(err) => SignatureStatus::Failed(err.to_string()),
                None if status.satisfies_commitment(CommitmentConfig::confirmed()) => {
                    SignatureStatus::Confirmed
                }
                None => SignatureStatus::Processed,
            }
        }))
    }

    async fn block_height(&self) -> Result<u64> {
        self.client.get_block_height().await.map_err(rpc_err)
    }

    async fn subscribe_account(&self, address: &Pubkey) -> Result<AccountUpdates> {
        pubsub::subscribe_account(&self.ws_url, address).await
    }

    async fn version(&self) -> Result<String> {
        let version = self.client.get_version().await.map_err(rpc_err)?;
        Ok(version.solana_core)
    }

    async fn balance(&self, address: &Pubkey) -> Result<u64> {
        self.client.get_balance(address).await.map_err(rpc_err)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    fn custom(code: u32) -> TransactionError {
        TransactionError::InstructionError(0, InstructionError::Custom(code))
    }

    #[test]
    fn classify_preflight__missing_program_account__is_unreachable() {
        let err = classify_preflight(
            Some(&TransactionError::ProgramAccountNotFound),
            "Transaction simulation failed",
        );

        assert!(matches!(err, ClientError::ProgramUnreachable(_)));
    }

    #[test]
    fn classify_preflight__unfunded_wallet__is_unreachable() {
        let err = classify_preflight(
            Some(&TransactionError::AccountNotFound),
            "Transaction simulation failed: Attempt to debit an account but found no record of a prior credit.",
        );

        assert!(err.is_program_unreachable());
    }

    #[test]
    fn classify_preflight__stale_blockhash__is_unreachable() {
        let err = classify_preflight(
            Some(&TransactionError::BlockhashNotFound),
            "Transaction simulation failed: Blockhash not found",
        );

        assert!(err.is_program_unreachable());
    }

    #[test]
    fn classify_preflight__seeds_constraint__is_unauthorized() {
        let err = classify_preflight(Some(&custom(2006)), "Transaction simulation failed");

        assert!(matches!(err, ClientError::Unauthorized(_)));
        assert!(!err.is_program_unreachable());
    }

    #[test]
    fn classify_preflight__no_structured_error__keeps_message() {
        let err = classify_preflight(None, "Transaction simulation failed: node said no");

        let ClientError::ProgramUnreachable(detail) = err else {
            panic!("expected unreachable, got {err:?}");
        };
        assert!(detail.contains("node said no"));
    }

    #[test]
    fn map_rpc_error__game_error_code__is_rejection_with_code() {
        let err = map_rpc_error(&RpcClientError::from(custom(6001)));

        assert!(matches!(
            err,
            ClientError::Rejected {
                code: Some(6001),
                ..
            }
        ));
    }

    #[test]
    fn map_rpc_error__expired_blockhash_outside_preflight__is_transient() {
        let err = map_rpc_error(&RpcClientError::from(TransactionError::BlockhashNotFound));

        assert!(err.is_transient());
    }

    #[test]
    fn map_rpc_error__custom_message__is_classified_by_text() {
        let err = map_rpc_error(&RpcClientError::from(ClientErrorKind::Custom(
            "Attempt to load a program that does not exist".into(),
        )));

        assert!(err.is_program_unreachable());
    }

    #[test]
    fn websocket_url__https_endpoint__uses_wss() {
        assert_eq!(
            websocket_url("https://api.devnet.solana.com"),
            "wss://api.devnet.solana.com"
        );
        assert_eq!(websocket_url("http://127.0.0.1:8899"), "ws://127.0.0.1:8899");
    }
}
