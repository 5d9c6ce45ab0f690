//! Single-flight execution of player actions against the remote program, with a sticky
//! fallback to local simulation.
use crate::{
    address::Signature,
    codec::PlayerState,
    error::{
        ClientError,
        PreconditionViolation,
        Result,
    },
    remote::{
        ProgramInstruction,
        ProgramTransport,
        RemoteClient,
    },
    simulation::{
        self,
        CombatReport,
        InitParams,
        Simulator,
    },
    sync::{
        MergeSource,
        SessionFlags,
        StateCell,
    },
};
use std::sync::{
    Arc,
    Mutex,
    MutexGuard,
};
use tracing::{
    debug,
    error,
    info,
    warn,
};
use tx_history::{
    KeyValueStore,
    TransactionHistory,
    TxAction,
    TxStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionRequest {
    Init(InitParams),
    Explore,
    Fight,
    Claim,
    Equip { atk_bonus: u8, def_bonus: u8 },
}

impl ActionRequest {
    pub fn action(&self) -> TxAction {
        self.instruction().action()
    }

    fn instruction(&self) -> ProgramInstruction {
        match *self {
            ActionRequest::Init(params) => ProgramInstruction::InitPlayer(params),
            ActionRequest::Explore => ProgramInstruction::Explore,
            ActionRequest::Fight => ProgramInstruction::Fight,
            ActionRequest::Claim => ProgramInstruction::Claim,
            ActionRequest::Equip {
                atk_bonus,
                def_bonus,
            } => ProgramInstruction::Equip {
                atk_bonus,
                def_bonus,
            },
        }
    }

    /// Local checks that must pass before anything is sent or simulated.
    pub fn check(&self, current: Option<&PlayerState>) -> Result<(), PreconditionViolation> {
        if let ActionRequest::Init(params) = self {
            return params.validate();
        }
        let player = current.ok_or(PreconditionViolation::NotInitialized)?;
        match self {
            ActionRequest::Explore if !player.is_alive() => Err(PreconditionViolation::PlayerDead),
            ActionRequest::Fight if !player.has_pending_encounter() => {
                Err(PreconditionViolation::NoPendingEncounter)
            }
            ActionRequest::Fight if !player.is_alive() => Err(PreconditionViolation::PlayerDead),
            ActionRequest::Claim if !player.reward_available => {
                Err(PreconditionViolation::NothingToClaim)
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionRoute {
    Remote { signature: Signature },
    Simulated { receipt: String },
}

#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub action: TxAction,
    pub route: ActionRoute,
    /// Canonical state once the action settled.
    pub state: Option<PlayerState>,
    /// Only simulated fights report their combat math.
    pub combat: Option<CombatReport>,
}

/// Clears the running slot on completion or cancellation.
struct FlightGuard<'a> {
    slot: &'a Mutex<Option<TxAction>>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        *lock(self.slot) = None;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// History failures are logged; they never fail the action itself.
fn update_history<S: KeyValueStore>(
    history: &Mutex<TransactionHistory<S>>,
    update: impl FnOnce(&mut TransactionHistory<S>) -> anyhow::Result<()>,
) {
    if let Err(err) = update(&mut lock(history)) {
        warn!(?err, "transaction history update failed");
    }
}

/// A pending ledger entry. Resolved as failed if dropped before the action settles it.
struct PendingRecord<'a, S: KeyValueStore> {
    history: &'a Mutex<TransactionHistory<S>>,
    signature: String,
    settled: bool,
}

impl<S: KeyValueStore> PendingRecord<'_, S> {
    fn resolve(mut self, status: TxStatus) {
        self.settled = true;
        update_history(self.history, |history| history.resolve(&self.signature, status));
    }
}

impl<S: KeyValueStore> Drop for PendingRecord<'_, S> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!(signature = %self.signature, "action abandoned before confirmation");
        update_history(self.history, |history| {
            history.resolve(&self.signature, TxStatus::Failed)
        });
    }
}

pub struct ActionOrchestrator<T, S> {
    remote: RemoteClient<T>,
    cell: StateCell,
    session: SessionFlags,
    history: Arc<Mutex<TransactionHistory<S>>>,
    simulator: Mutex<Simulator>,
    running: Mutex<Option<TxAction>>,
}

impl<T: ProgramTransport, S: KeyValueStore> ActionOrchestrator<T, S> {
    pub fn new(
        remote: RemoteClient<T>,
        cell: StateCell,
        session: SessionFlags,
        history: Arc<Mutex<TransactionHistory<S>>>,
        simulator: Simulator,
    ) -> Self {
        Self {
            remote,
            cell,
            session,
            history,
            simulator: Mutex::new(simulator),
            running: Mutex::new(None),
        }
    }

    pub fn session(&self) -> &SessionFlags {
        &self.session
    }

    pub fn cell(&self) -> &StateCell {
        &self.cell
    }

    pub fn running(&self) -> Option<TxAction> {
        *lock(&self.running)
    }

    /// Run one action to a terminal outcome. Rejected with [`ClientError::Busy`] while another
    /// action is in flight.
    pub async fn execute(&self, request: ActionRequest) -> Result<ActionOutcome> {
        let action = request.action();
        let result = match self.begin(action) {
            Ok(guard) => {
                let result = self.run(request).await;
                drop(guard);
                result
            }
            Err(err) => Err(err),
        };

        match &result {
            Ok(outcome) => match &outcome.route {
                ActionRoute::Remote { signature } => info!("{action} confirmed: {signature}"),
                ActionRoute::Simulated { receipt } => {
                    info!("{action} completed in local simulation: {receipt}")
                }
            },
            Err(err @ (ClientError::Precondition(_) | ClientError::Busy { .. })) => {
                warn!("{action} refused: {err}")
            }
            Err(err) => error!("{action} failed: {err}"),
        }
        result
    }

    /// Re-read the account without touching the single-flight slot. In simulation mode the
    /// local snapshot is authoritative and returned as is.
    pub async fn refresh(&self) -> Result<Option<PlayerState>> {
        if self.session.is_simulation() {
            return Ok(self.cell.player());
        }
        let state = self.remote.fetch_player().await?;
        self.cell.merge(state, MergeSource::Refresh);
        Ok(self.cell.player())
    }

    fn begin(&self, action: TxAction) -> Result<FlightGuard<'_>> {
        let mut running = lock(&self.running);
        if let Some(running) = *running {
            return Err(ClientError::Busy { running });
        }
        *running = Some(action);
        Ok(FlightGuard {
            slot: &self.running,
        })
    }

    async fn run(&self, request: ActionRequest) -> Result<ActionOutcome> {
        request.check(self.cell.player().as_ref())?;
        if self.session.is_simulation() {
            return self.simulate(request);
        }
        match self.run_remote(request).await {
            Err(err) if err.is_program_unreachable() => {
                if self.session.enter_simulation() {
                    debug!(%err, "program unreachable; switching to local simulation");
                }
                self.simulate(request)
            }
            other => other,
        }
    }

    async fn run_remote(&self, request: ActionRequest) -> Result<ActionOutcome> {
        let action = request.action();
        let submission = self.remote.submit(request.instruction()).await?;
        let signature = submission.signature;
        let pending = self.record_pending(signature.to_string(), action);

        if !self.remote.confirm(&submission).await {
            pending.resolve(TxStatus::Failed);
            return Err(ClientError::Unconfirmed {
                signature: signature.to_string(),
            });
        }

        match self.remote.fetch_player().await {
            Ok(state) => {
                self.cell.merge(state, MergeSource::Action);
            }
            Err(err) => warn!(%err, "refresh after confirmation failed"),
        }
        pending.resolve(TxStatus::Success);

        Ok(ActionOutcome {
            action,
            route: ActionRoute::Remote { signature },
            state: self.cell.player(),
            combat: None,
        })
    }

    fn simulate(&self, request: ActionRequest) -> Result<ActionOutcome> {
        let current = self.cell.player();
        request.check(current.as_ref())?;
        let mut simulator = lock(&self.simulator);
        let mut combat = None;
        let next = match (request, current) {
            (ActionRequest::Init(params), _) => simulation::init(self.remote.owner(), params)?,
            (_, None) => return Err(PreconditionViolation::NotInitialized.into()),
            (ActionRequest::Explore, Some(player)) => simulator.explore(&player)?,
            (ActionRequest::Fight, Some(player)) => {
                let (next, report) = simulation::fight(&player)?;
                combat = Some(report);
                next
            }
            (ActionRequest::Claim, Some(player)) => simulator.claim(&player)?,
            (
                ActionRequest::Equip {
                    atk_bonus,
                    def_bonus,
                },
                Some(player),
            ) => simulation::equip(&player, atk_bonus, def_bonus),
        };
        let receipt = simulator.receipt();
        drop(simulator);

        self.cell.merge(Some(next), MergeSource::Action);
        let action = request.action();
        self.with_history(|history| history.record_simulated(&receipt, action, TxStatus::Success));

        Ok(ActionOutcome {
            action,
            route: ActionRoute::Simulated { receipt },
            state: Some(next),
            combat,
        })
    }

    fn record_pending(&self, signature: String, action: TxAction) -> PendingRecord<'_, S> {
        update_history(&self.history, |history| history.record_pending(&signature, action));
        PendingRecord {
            history: &self.history,
            signature,
            settled: false,
        }
    }

    fn with_history(
        &self,
        update: impl FnOnce(&mut TransactionHistory<S>) -> anyhow::Result<()>,
    ) {
        update_history(&self.history, update);
    }
}
