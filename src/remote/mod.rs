use crate::{
    address::{
        Pubkey,
        Signature,
        player_address,
    },
    codec::{
        self,
        PlayerState,
    },
    error::Result,
    retry::{
        RetryPolicy,
        with_retry,
    },
};
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time,
};
use tracing::{
    debug,
    warn,
};

pub mod pubsub;
pub mod rpc;
pub mod transaction;

pub use solana_sdk::instruction::Instruction;
pub use transaction::{
    ProgramInstruction,
    build_transaction,
    instruction_signer,
};

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub data: Vec<u8>,
    pub executable: bool,
    pub lamports: u64,
}

/// What the remote hands back when it accepts a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub signature: Signature,
    pub last_valid_block_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStatus {
    Processed,
    Confirmed,
    Failed(String),
}

/// Raw account bytes pushed by a live subscription. Dropping it tears the subscription
/// down.
#[derive(Debug)]
pub struct AccountUpdates {
    receiver: mpsc::UnboundedReceiver<Vec<u8>>,
    reader: Option<JoinHandle<()>>,
}

impl AccountUpdates {
    pub fn new(receiver: mpsc::UnboundedReceiver<Vec<u8>>, reader: Option<JoinHandle<()>>) -> Self {
        Self { receiver, reader }
    }

    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.receiver.recv().await
    }
}

impl Drop for AccountUpdates {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Everything the client needs from the chain.
pub trait ProgramTransport: Send + Sync + 'static {
    fn account(
        &self,
        address: &Pubkey,
    ) -> impl Future<Output = Result<Option<AccountInfo>>> + Send;

    fn send(&self, instruction: &Instruction) -> impl Future<Output = Result<Submission>> + Send;

    fn signature_status(
        &self,
        signature: &Signature,
    ) -> impl Future<Output = Result<Option<SignatureStatus>>> + Send;

    fn block_height(&self) -> impl Future<Output = Result<u64>> + Send;

    fn subscribe_account(
        &self,
        address: &Pubkey,
    ) -> impl Future<Output = Result<AccountUpdates>> + Send;

    fn version(&self) -> impl Future<Output = Result<String>> + Send;

    fn balance(&self, address: &Pubkey) -> impl Future<Output = Result<u64>> + Send;
}

#[derive(Debug, Clone, Copy)]
pub struct ConfirmPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub status_retry: RetryPolicy,
}

impl Default for ConfirmPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
            status_retry: RetryPolicy::default(),
        }
    }
}

/// Typed access to the game program for one owner.
pub struct RemoteClient<T> {
    transport: Arc<T>,
    program_id: Pubkey,
    owner: Pubkey,
    player_address: Pubkey,
    fetch_retry: RetryPolicy,
    confirm: ConfirmPolicy,
}

impl<T> Clone for RemoteClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            program_id: self.program_id,
            owner: self.owner,
            player_address: self.player_address,
            fetch_retry: self.fetch_retry,
            confirm: self.confirm,
        }
    }
}

impl<T: ProgramTransport> RemoteClient<T> {
    pub fn new(transport: T, program_id: Pubkey, owner: Pubkey) -> Self {
        Self {
            transport: Arc::new(transport),
            program_id,
            owner,
            player_address: player_address(&owner, &program_id),
            fetch_retry: RetryPolicy::default(),
            confirm: ConfirmPolicy::default(),
        }
    }

    pub fn with_fetch_retry(mut self, policy: RetryPolicy) -> Self {
        self.fetch_retry = policy;
        self
    }

    pub fn with_confirm_policy(mut self, policy: ConfirmPolicy) -> Self {
        self.confirm = policy;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn program_id(&self) -> Pubkey {
        self.program_id
    }

    pub fn owner(&self) -> Pubkey {
        self.owner
    }

    pub fn player_address(&self) -> Pubkey {
        self.player_address
    }

    /// Read and decode the account at `address`. `None` means it does not exist yet.
    pub async fn fetch_state(&self, address: &Pubkey) -> Result<Option<PlayerState>> {
        let account =
            with_retry(&self.fetch_retry, || self.transport.account(address)).await?;
        match account {
            Some(info) => Ok(Some(codec::decode(&info.data)?)),
            None => Ok(None),
        }
    }

    pub async fn fetch_player(&self) -> Result<Option<PlayerState>> {
        self.fetch_state(&self.player_address).await
    }

    /// Submit once. Writes are never retried.
    pub async fn submit(&self, instruction: ProgramInstruction) -> Result<Submission> {
        let ix = instruction.to_instruction(self.program_id, self.owner, self.player_address);
        self.transport.send(&ix).await
    }

    pub async fn subscribe(&self, address: &Pubkey) -> Result<AccountUpdates> {
        self.transport.subscribe_account(address).await
    }

    /// Wait for the submission to land. `false` on an explicit failure, on block-height
    /// expiry, or when the confirmation budget runs out.
    pub async fn confirm(&self, submission: &Submission) -> bool {
        match time::timeout(self.confirm.timeout, self.poll_confirmation(submission)).await {
            Ok(confirmed) => confirmed,
            Err(_) => {
                debug!(signature = %submission.signature, "confirmation timed out");
                false
            }
        }
    }

    async fn poll_confirmation(&self, submission: &Submission) -> bool {
        let signature = &submission.signature;
        loop {
            let status = with_retry(&self.confirm.status_retry, || {
                self.transport.signature_status(signature)
            })
            .await;
            match status {
                Ok(Some(SignatureStatus::Confirmed)) => return true,
                Ok(Some(SignatureStatus::Failed(err))) => {
                    debug!(%signature, %err, "transaction failed");
                    return false;
                }
                Ok(Some(SignatureStatus::Processed) | None) => {}
                Err(err) => warn!(%signature, %err, "signature status unavailable"),
            }

            match self.transport.block_height().await {
                Ok(height) if height > submission.last_valid_block_height => {
                    debug!(%signature, height, "blockhash expired before confirmation");
                    return false;
                }
                Ok(_) => {}
                Err(err) => debug!(%err, "block height unavailable"),
            }
            time::sleep(self.confirm.poll_interval).await;
        }
    }
}
