//! Canonical player snapshot and the push/poll workers that keep it current.
use crate::{
    address::Pubkey,
    codec::{
        self,
        PlayerState,
    },
    remote::{
        AccountUpdates,
        ProgramTransport,
        RemoteClient,
    },
};
use chrono::{
    DateTime,
    Utc,
};
use std::{
    sync::{
        Arc,
        atomic::{
            AtomicBool,
            Ordering,
        },
    },
    time::Duration,
};
use tokio::{
    sync::{
        mpsc,
        watch,
    },
    task::JoinHandle,
    time::{
        self,
        MissedTickBehavior,
    },
};
use tracing::{
    debug,
    info,
    trace,
    warn,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalState {
    pub player: Option<PlayerState>,
    /// Time of the last merge that changed `player`.
    pub last_refresh: Option<DateTime<Utc>>,
    /// Incremented on every change.
    pub revision: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeSource {
    Push,
    Poll,
    Refresh,
    Action,
}

/// Single owner of the canonical snapshot. Every writer goes through [`StateCell::merge`].
#[derive(Clone)]
pub struct StateCell {
    sender: Arc<watch::Sender<CanonicalState>>,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(CanonicalState::default());
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn snapshot(&self) -> CanonicalState {
        self.sender.borrow().clone()
    }

    pub fn player(&self) -> Option<PlayerState> {
        self.sender.borrow().player
    }

    pub fn subscribe(&self) -> watch::Receiver<CanonicalState> {
        self.sender.subscribe()
    }

    /// Replace the snapshot if `incoming` differs. Returns whether subscribers were notified.
    pub fn merge(&self, incoming: Option<PlayerState>, source: MergeSource) -> bool {
        self.sender.send_if_modified(|current| {
            if current.player == incoming {
                trace!(?source, "merge is a no-op");
                return false;
            }
            current.player = incoming;
            current.last_refresh = Some(Utc::now());
            current.revision += 1;
            debug!(?source, revision = current.revision, "player state updated");
            true
        })
    }
}

/// Session-wide flags shared by the synchronizer and the orchestrator.
#[derive(Clone, Default)]
pub struct SessionFlags {
    simulation: Arc<AtomicBool>,
}

impl SessionFlags {
    pub fn is_simulation(&self) -> bool {
        self.simulation.load(Ordering::SeqCst)
    }

    /// Switch the session to local simulation. Returns `true` the first time only.
    pub fn enter_simulation(&self) -> bool {
        !self.simulation.swap(true, Ordering::SeqCst)
    }
}

enum SyncCommand {
    RefreshNow,
    Shutdown,
}

/// Merge path used by the background channels. Closed once the handle stops, and while the
/// session simulates locally.
#[derive(Clone)]
struct ChannelMerge {
    cell: StateCell,
    session: SessionFlags,
    active: Arc<AtomicBool>,
}

impl ChannelMerge {
    fn merge(&self, incoming: Option<PlayerState>, source: MergeSource) -> bool {
        if !self.active.load(Ordering::SeqCst) {
            return false;
        }
        if self.session.is_simulation() {
            trace!(?source, "simulation mode; remote update suppressed");
            return false;
        }
        self.cell.merge(incoming, source)
    }
}

pub struct StateSynchronizer<T> {
    remote: RemoteClient<T>,
    address: Pubkey,
    cell: StateCell,
    session: SessionFlags,
    poll_interval: Duration,
}

impl<T: ProgramTransport> StateSynchronizer<T> {
    pub fn new(
        remote: RemoteClient<T>,
        cell: StateCell,
        session: SessionFlags,
        poll_interval: Duration,
    ) -> Self {
        let address = remote.player_address();
        Self {
            remote,
            address,
            cell,
            session,
            poll_interval,
        }
    }

    /// Poll once, then run the poll and push channels until the handle is stopped. A failed
    /// push subscription leaves polling running on its own.
    pub async fn start(self) -> SyncHandle {
        let merger = ChannelMerge {
            cell: self.cell.clone(),
            session: self.session.clone(),
            active: Arc::new(AtomicBool::new(true)),
        };
        let active = merger.active.clone();

        if !self.session.is_simulation() {
            poll_once(&self.remote, &self.address, &merger).await;
        }

        let push_task = match self.remote.subscribe(&self.address).await {
            Ok(updates) => Some(tokio::spawn(push_worker(updates, merger.clone()))),
            Err(err) => {
                warn!(%err, "push subscription failed; continuing with polling only");
                None
            }
        };

        let (commands, command_rx) = mpsc::unbounded_channel();
        let poll_task = tokio::spawn(poll_worker(
            self.remote,
            self.address,
            merger,
            self.poll_interval,
            command_rx,
        ));
        info!(address = %self.address, "state synchronizer started");

        SyncHandle {
            active,
            commands,
            poll_task: Some(poll_task),
            push_task,
        }
    }
}

async fn poll_once<T: ProgramTransport>(
    remote: &RemoteClient<T>,
    address: &Pubkey,
    merger: &ChannelMerge,
) {
    match remote.fetch_state(address).await {
        Ok(state) => {
            merger.merge(state, MergeSource::Poll);
        }
        Err(err) => warn!(%err, "account poll failed"),
    }
}

async fn poll_worker<T: ProgramTransport>(
    remote: RemoteClient<T>,
    address: Pubkey,
    merger: ChannelMerge,
    poll_interval: Duration,
    mut command_rx: mpsc::UnboundedReceiver<SyncCommand>,
) {
    let mut ticker = time::interval_at(time::Instant::now() + poll_interval, poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if merger.session.is_simulation() {
                    trace!("simulation mode; poll skipped");
                    continue;
                }
                poll_once(&remote, &address, &merger).await;
            }
            command = command_rx.recv() => {
                match command {
                    Some(SyncCommand::RefreshNow) => {
                        poll_once(&remote, &address, &merger).await;
                    }
                    Some(SyncCommand::Shutdown) | None => break,
                }
            }
        }
    }
}

async fn push_worker(mut updates: AccountUpdates, merger: ChannelMerge) {
    while let Some(data) = updates.recv().await {
        match codec::decode(&data) {
            Ok(state) => {
                merger.merge(Some(state), MergeSource::Push);
            }
            Err(err) => warn!(%err, "ignoring undecodable account notification"),
        }
    }
    if merger.active.load(Ordering::SeqCst) {
        warn!("push channel ended; continuing with polling only");
    }
}

/// Running synchronizer. Dropping it aborts both channels; [`SyncHandle::stop`] also waits for
/// them to finish.
pub struct SyncHandle {
    active: Arc<AtomicBool>,
    commands: mpsc::UnboundedSender<SyncCommand>,
    poll_task: Option<JoinHandle<()>>,
    push_task: Option<JoinHandle<()>>,
}

impl SyncHandle {
    /// Ask the poll channel for an immediate read.
    pub fn refresh_now(&self) -> bool {
        self.commands.send(SyncCommand::RefreshNow).is_ok()
    }

    pub fn has_push_channel(&self) -> bool {
        self.push_task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// No merge from either channel happens after this returns.
    pub async fn stop(mut self) {
        self.active.store(false, Ordering::SeqCst);
        let _ = self.commands.send(SyncCommand::Shutdown);
        for task in [self.push_task.take(), self.poll_task.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
            let _ = task.await;
        }
        info!("state synchronizer stopped");
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        for task in [self.push_task.take(), self.poll_task.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use crate::test_helpers::sample_player;

    #[test]
    fn merge__identical_value__notifies_once() {
        // given
        let cell = StateCell::new();
        let mut rx = cell.subscribe();
        let player = sample_player(Pubkey::new_from_array([1; 32]));

        // when
        let first = cell.merge(Some(player), MergeSource::Poll);
        let stamp = cell.snapshot().last_refresh;
        let second = cell.merge(Some(player), MergeSource::Push);

        // then
        assert!(first);
        assert!(!second);
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();
        assert!(!rx.has_changed().unwrap());
        assert_eq!(cell.snapshot().last_refresh, stamp);
        assert_eq!(cell.snapshot().revision, 1);
    }

    #[test]
    fn merge__changed_value__replaces_snapshot() {
        let cell = StateCell::new();
        let mut player = sample_player(Pubkey::new_from_array([1; 32]));
        cell.merge(Some(player), MergeSource::Poll);

        player.hp = 12;
        let changed = cell.merge(Some(player), MergeSource::Action);

        assert!(changed);
        assert_eq!(cell.player().map(|p| p.hp), Some(12));
        assert_eq!(cell.snapshot().revision, 2);
    }

    #[test]
    fn merge__absent_on_fresh_cell__is_no_op() {
        let cell = StateCell::new();

        assert!(!cell.merge(None, MergeSource::Poll));
        assert!(cell.snapshot().last_refresh.is_none());
    }

    #[test]
    fn enter_simulation__second_call__reports_already_set() {
        let flags = SessionFlags::default();
        let observer = flags.clone();

        assert!(flags.enter_simulation());
        assert!(!flags.enter_simulation());
        assert!(observer.is_simulation());
    }

    #[test]
    fn channel_merge__simulation_mode__is_suppressed() {
        // given
        let cell = StateCell::new();
        let merger = ChannelMerge {
            cell: cell.clone(),
            session: SessionFlags::default(),
            active: Arc::new(AtomicBool::new(true)),
        };
        let player = sample_player(Pubkey::new_from_array([1; 32]));

        // when
        merger.session.enter_simulation();
        let while_simulating = merger.merge(Some(player), MergeSource::Push);

        // then
        assert!(!while_simulating);
        assert!(cell.player().is_none());
    }
}
