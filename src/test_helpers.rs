//! In-memory chain for exercising the client without a network.
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
    error::{
        ClientError,
        Result,
    },
    remote::{
        AccountInfo,
        AccountUpdates,
        ConfirmPolicy,
        Instruction,
        ProgramInstruction,
        ProgramTransport,
        RemoteClient,
        SignatureStatus,
        Submission,
        instruction_signer,
    },
    retry::RetryPolicy,
    simulation::{
        self,
        Entropy,
        RewardEffect,
    },
};
use sha2::{
    Digest,
    Sha256,
};
use std::{
    collections::{
        HashMap,
        VecDeque,
    },
    sync::{
        Arc,
        Mutex,
        MutexGuard,
    },
    time::Duration,
};
use tokio::sync::mpsc;

pub const TEST_PROGRAM_ID: Pubkey = Pubkey::new_from_array([42; 32]);
pub const ALICE: Pubkey = Pubkey::new_from_array([17; 32]);
pub const BOB: Pubkey = Pubkey::new_from_array([18; 32]);

/// Blocks a submission stays valid for.
const VALIDITY_WINDOW: u64 = 150;

pub fn sample_player(owner: Pubkey) -> PlayerState {
    PlayerState {
        owner,
        hp: 100,
        atk: 10,
        def: 5,
        level: 1,
        last_event: [0; 32],
        reward_available: false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmMode {
    /// Signatures confirm on the first status read.
    Immediate,
    /// Signatures stay unknown forever.
    Never,
    /// Signatures report an execution error.
    Fail,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub account_reads: usize,
    pub sends: usize,
    pub status_reads: usize,
    pub block_height_reads: usize,
    pub subscriptions: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.account_reads
            + self.sends
            + self.status_reads
            + self.block_height_reads
            + self.subscriptions
    }
}

struct ChainState {
    program_id: Pubkey,
    program_deployed: bool,
    accounts: HashMap<Pubkey, AccountInfo>,
    balances: HashMap<Pubkey, u64>,
    statuses: HashMap<Signature, SignatureStatus>,
    subscribers: HashMap<Pubkey, Vec<mpsc::UnboundedSender<Vec<u8>>>>,
    block_height: u64,
    confirm_mode: ConfirmMode,
    send_failures: VecDeque<ClientError>,
    read_failures: VecDeque<ClientError>,
    refuse_subscriptions: bool,
    nonce: u64,
    calls: CallCounts,
}

/// Shared handle to a fake chain running the game program's rules. Clones observe the same
/// chain.
#[derive(Clone)]
pub struct FakeChain {
    state: Arc<Mutex<ChainState>>,
}

impl FakeChain {
    pub fn new() -> Self {
        let mut accounts = HashMap::new();
        accounts.insert(
            TEST_PROGRAM_ID,
            AccountInfo {
                data: Vec::new(),
                executable: true,
                lamports: 1,
            },
        );
        Self {
            state: Arc::new(Mutex::new(ChainState {
                program_id: TEST_PROGRAM_ID,
                program_deployed: true,
                accounts,
                balances: HashMap::new(),
                statuses: HashMap::new(),
                subscribers: HashMap::new(),
                block_height: 1_000,
                confirm_mode: ConfirmMode::Immediate,
                send_failures: VecDeque::new(),
                read_failures: VecDeque::new(),
                refuse_subscriptions: false,
                nonce: 0,
                calls: CallCounts::default(),
            })),
        }
    }

    /// A chain where the game program was never deployed.
    pub fn without_program() -> Self {
        let chain = Self::new();
        {
            let mut state = chain.lock();
            state.program_deployed = false;
            state.accounts.remove(&TEST_PROGRAM_ID);
        }
        chain
    }

    fn lock(&self) -> MutexGuard<'_, ChainState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn player_address(owner: &Pubkey) -> Pubkey {
        player_address(owner, &TEST_PROGRAM_ID)
    }

    /// Write the player account directly and notify subscribers.
    pub fn set_player(&self, player: PlayerState) {
        let address = Self::player_address(&player.owner);
        self.write_account(&address, codec::encode(&player));
    }

    pub fn player(&self, owner: &Pubkey) -> Option<PlayerState> {
        let address = Self::player_address(owner);
        let state = self.lock();
        state
            .accounts
            .get(&address)
            .and_then(|info| codec::decode(&info.data).ok())
    }

    /// Push arbitrary bytes to subscribers of `address` without touching the stored account.
    pub fn notify_raw(&self, address: &Pubkey, data: Vec<u8>) {
        let mut state = self.lock();
        notify(&mut state, address, &data);
    }

    pub fn set_balance(&self, owner: &Pubkey, lamports: u64) {
        self.lock().balances.insert(*owner, lamports);
    }

    pub fn set_confirm_mode(&self, mode: ConfirmMode) {
        self.lock().confirm_mode = mode;
    }

    pub fn fail_next_send(&self, err: ClientError) {
        self.lock().send_failures.push_back(err);
    }

    pub fn fail_next_reads(&self, count: usize, err: ClientError) {
        let mut state = self.lock();
        for _ in 0..count {
            state.read_failures.push_back(err.clone());
        }
    }

    pub fn refuse_subscriptions(&self) {
        self.lock().refuse_subscriptions = true;
    }

    /// End every open subscription, as a node does when it drops the websocket.
    pub fn close_subscriptions(&self) {
        self.lock().subscribers.clear();
    }

    pub fn advance_block_height(&self, blocks: u64) {
        self.lock().block_height += blocks;
    }

    pub fn subscriber_count(&self, address: &Pubkey) -> usize {
        let mut state = self.lock();
        let Some(senders) = state.subscribers.get_mut(address) else {
            return 0;
        };
        senders.retain(|s| !s.is_closed());
        senders.len()
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    /// Remote client for `owner` with retry and confirmation delays shrunk for tests.
    pub fn client(&self, owner: Pubkey) -> RemoteClient<FakeChain> {
        RemoteClient::new(self.clone(), TEST_PROGRAM_ID, owner)
            .with_fetch_retry(RetryPolicy::new(3, Duration::from_millis(10)))
            .with_confirm_policy(ConfirmPolicy {
                timeout: Duration::from_secs(2),
                poll_interval: Duration::from_millis(50),
                status_retry: RetryPolicy::new(2, Duration::from_millis(10)),
            })
    }

    fn write_account(&self, address: &Pubkey, data: Vec<u8>) {
        let mut state = self.lock();
        write(&mut state, address, data);
    }
}

impl Default for FakeChain {
    fn default() -> Self {
        Self::new()
    }
}

fn write(state: &mut ChainState, address: &Pubkey, data: Vec<u8>) {
    notify(state, address, &data);
    state.accounts.insert(
        *address,
        AccountInfo {
            data,
            executable: false,
            lamports: 1_000_000,
        },
    );
}

fn notify(state: &mut ChainState, address: &Pubkey, data: &[u8]) {
    if let Some(senders) = state.subscribers.get_mut(address) {
        senders.retain(|sender| sender.send(data.to_vec()).is_ok());
    }
}

fn custom_error(code: u32, message: &str) -> ClientError {
    ClientError::Rejected {
        code: Some(code),
        message: message.to_owned(),
    }
}

/// Execute one instruction the way the deployed program would.
fn execute(state: &mut ChainState, ix: &Instruction) -> Result<()> {
    let kind = ProgramInstruction::decode(&ix.data)
        .ok_or_else(|| custom_error(101, "InstructionFallbackNotFound"))?;
    let authority = instruction_signer(ix)
        .ok_or_else(|| ClientError::Signing("missing signature".into()))?;
    let player_key = ix.accounts.first().map(|meta| meta.pubkey).unwrap_or_default();
    if player_key != player_address(&authority, &state.program_id) {
        return Err(ClientError::Unauthorized("constraint violation 2006".into()));
    }
    let current = state
        .accounts
        .get(&player_key)
        .and_then(|info| codec::decode(&info.data).ok());

    let next = match (kind, current) {
        (ProgramInstruction::InitPlayer(_), Some(_)) => {
            return Err(custom_error(0, "account already in use"));
        }
        (ProgramInstruction::InitPlayer(params), None) => simulation::init(authority, params)
            .map_err(|_| custom_error(6003, "InvalidStats"))?,
        (_, None) => return Err(custom_error(3012, "AccountNotInitialized")),
        (_, Some(player)) if player.owner != authority => {
            return Err(ClientError::Unauthorized("constraint violation 2001".into()));
        }
        (ProgramInstruction::Explore, Some(player)) => {
            state.nonce += 1;
            let digest: [u8; 32] = Sha256::digest(state.nonce.to_le_bytes()).into();
            let entropy =
                Entropy::new(digest).ok_or_else(|| custom_error(6004, "ZeroEntropy"))?;
            simulation::explore(&player, entropy).map_err(|_| custom_error(6000, "PlayerDead"))?
        }
        (ProgramInstruction::Fight, Some(player)) => simulation::fight(&player)
            .map(|(next, _)| next)
            .map_err(|_| custom_error(6001, "NoEventFound"))?,
        (ProgramInstruction::Claim, Some(player)) => {
            simulation::claim(&player, RewardEffect::default())
                .map_err(|_| custom_error(6002, "NoRewardInfo"))?
        }
        (
            ProgramInstruction::Equip {
                atk_bonus,
                def_bonus,
            },
            Some(player),
        ) => simulation::equip(&player, atk_bonus, def_bonus),
    };
    write(state, &player_key, codec::encode(&next));
    Ok(())
}

impl ProgramTransport for FakeChain {
    async fn account(&self, address: &Pubkey) -> Result<Option<AccountInfo>> {
        let mut state = self.lock();
        state.calls.account_reads += 1;
        if let Some(err) = state.read_failures.pop_front() {
            return Err(err);
        }
        Ok(state.accounts.get(address).cloned())
    }

    async fn send(&self, instruction: &Instruction) -> Result<Submission> {
        let mut state = self.lock();
        state.calls.sends += 1;
        if let Some(err) = state.send_failures.pop_front() {
            return Err(err);
        }
        if !state.program_deployed || instruction.program_id != state.program_id {
            return Err(ClientError::classify_message(
                "Transaction simulation failed: Attempt to load a program that does not exist",
            ));
        }
        execute(&mut state, instruction)?;

        state.nonce += 1;
        let mut bytes = [0u8; 64];
        bytes[..8].copy_from_slice(&state.nonce.to_le_bytes());
        bytes[8..40].copy_from_slice(instruction.program_id.as_ref());
        let signature = Signature::from(bytes);
        let status = match state.confirm_mode {
            ConfirmMode::Immediate => Some(SignatureStatus::Confirmed),
            ConfirmMode::Never => None,
            ConfirmMode::Fail => Some(SignatureStatus::Failed(
                r#"{"InstructionError":[0,{"Custom":6001}]}"#.into(),
            )),
        };
        if let Some(status) = status {
            state.statuses.insert(signature, status);
        }
        Ok(Submission {
            signature,
            last_valid_block_height: state.block_height + VALIDITY_WINDOW,
        })
    }

    async fn signature_status(&self, signature: &Signature) -> Result<Option<SignatureStatus>> {
        let mut state = self.lock();
        state.calls.status_reads += 1;
        Ok(state.statuses.get(signature).cloned())
    }

    async fn block_height(&self) -> Result<u64> {
        let mut state = self.lock();
        state.calls.block_height_reads += 1;
        Ok(state.block_height)
    }

    async fn subscribe_account(&self, address: &Pubkey) -> Result<AccountUpdates> {
        let mut state = self.lock();
        state.calls.subscriptions += 1;
        if state.refuse_subscriptions {
            return Err(ClientError::Transport("websocket connect: refused".into()));
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        state.subscribers.entry(*address).or_default().push(sender);
        Ok(AccountUpdates::new(receiver, None))
    }

    async fn version(&self) -> Result<String> {
        Ok("fake-1.18.0".into())
    }

    async fn balance(&self, address: &Pubkey) -> Result<u64> {
        Ok(self.lock().balances.get(address).copied().unwrap_or_default())
    }
}
