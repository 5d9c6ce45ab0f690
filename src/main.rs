use clap::{
    Parser,
    Subcommand,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use pop_client::{
    address::Pubkey,
    codec::PlayerState,
    config::ClientConfig,
    diagnostics::{
        HealthStatus,
        describe_error,
        format_signature,
        perform_health_check,
        rank_endpoints,
    },
    orchestrator::{
        ActionOrchestrator,
        ActionRequest,
    },
    remote::{
        ProgramTransport,
        RemoteClient,
        rpc::RpcTransport,
    },
    simulation::{
        InitParams,
        Simulator,
    },
    sync::{
        SessionFlags,
        StateCell,
        StateSynchronizer,
    },
};
use std::{
    path::PathBuf,
    sync::{
        Arc,
        Mutex,
        OnceLock,
    },
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};
use tx_history::{
    SledStore,
    TransactionHistory,
};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(version, about = "Proof-of-play game client", long_about = None)]
struct Cli {
    /// JSON config file; every key is optional.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    rpc_url: Option<String>,

    #[arg(long, global = true)]
    history_path: Option<String>,

    /// Also write logs to a daily rolling file in this directory.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow the player account and log every change until Ctrl-C.
    Watch {
        #[arg(long)]
        owner: Option<String>,
    },
    /// Check the RPC node, program and wallet, then rank the configured endpoints.
    Diagnose {
        #[arg(long)]
        owner: Option<String>,
    },
    /// Print the local transaction history.
    History {
        #[arg(long)]
        clear: bool,
    },
    /// Play an offline session against the local rules.
    Simulate {
        #[arg(long, default_value_t = 5)]
        rounds: u32,
        #[arg(long)]
        owner: Option<String>,
    },
}

fn init_logging(log_dir: Option<&PathBuf>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let result = match log_dir {
        Some(dir) => {
            let (writer, guard) = tracing_appender::non_blocking(rolling::daily(dir, "pop-client.log"));
            let _ = LOG_GUARD.set(guard);
            fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .try_init()
        }
        None => fmt().with_env_filter(filter).try_init(),
    };
    if let Err(err) = result {
        eprintln!("logging already initialized: {err}");
    }
}

fn resolve_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = ClientConfig::load_or_default(cli.config.as_deref())
        .map_err(|e| eyre!(e))?;
    if let Some(url) = &cli.rpc_url {
        config.rpc_url = url.clone();
        config.ws_url = None;
    }
    if let Some(path) = &cli.history_path {
        config.history_path = path.clone();
    }
    Ok(config)
}

fn resolve_owner(config: &ClientConfig, flag: Option<&str>) -> Result<Option<Pubkey>> {
    match flag {
        Some(owner) => owner
            .parse()
            .map(Some)
            .wrap_err_with(|| format!("invalid owner {owner}")),
        None => config.owner().map_err(|e| eyre!(e)),
    }
}

fn open_history(config: &ClientConfig) -> Result<TransactionHistory<SledStore>> {
    let path = config.history_path();
    let store = SledStore::open(&path).map_err(|e| eyre!(e))?;
    TransactionHistory::open(store, config.history_capacity, config.cluster)
        .map_err(|e| eyre!(e))
}

fn describe_player(player: Option<&PlayerState>) -> String {
    match player {
        None => "no player account".to_owned(),
        Some(p) => format!(
            "hp {} atk {} def {} level {} encounter {} reward {}",
            p.hp,
            p.atk,
            p.def,
            p.level,
            if p.has_pending_encounter() { "pending" } else { "none" },
            if p.reward_available { "ready" } else { "none" },
        ),
    }
}

async fn watch(config: ClientConfig, owner: Pubkey) -> Result<()> {
    let transport = RpcTransport::new(config.rpc_url.clone(), Some(config.ws_url()));
    let remote = RemoteClient::new(transport, config.program_id().map_err(|e| eyre!(e))?, owner)
        .with_fetch_retry(config.fetch_retry());
    let cell = StateCell::new();
    let mut changes = cell.subscribe();
    let handle = StateSynchronizer::new(remote, cell.clone(), SessionFlags::default(), config.poll_interval())
        .start()
        .await;
    println!("{}", describe_player(cell.player().as_ref()));

    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = changes.borrow_and_update().clone();
                println!("[rev {}] {}", snapshot.revision, describe_player(snapshot.player.as_ref()));
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    handle.stop().await;
    Ok(())
}

async fn diagnose(config: ClientConfig, owner: Option<Pubkey>) -> Result<()> {
    let transport = RpcTransport::new(config.rpc_url.clone(), Some(config.ws_url()));
    let program_id = config.program_id().map_err(|e| eyre!(e))?;
    let report = perform_health_check(&transport, &program_id, owner.as_ref()).await;
    let label = match report.status {
        HealthStatus::Healthy => "healthy",
        HealthStatus::Warning => "warning",
        HealthStatus::Error => "error",
    };
    println!("status: {label}");
    for message in &report.messages {
        println!("  {message}");
    }

    let ranked = rank_endpoints(&config.diagnostic_endpoints, |endpoint| async move {
        RpcTransport::new(endpoint, None).version().await
    })
    .await;
    println!("endpoints:");
    for entry in ranked {
        match entry.latency {
            Some(latency) => println!("  {:>6} ms  {}", latency.as_millis(), entry.endpoint),
            None => println!("  failed     {}", entry.endpoint),
        }
    }
    Ok(())
}

fn history(config: ClientConfig, clear: bool) -> Result<()> {
    let mut history = open_history(&config)?;
    if clear {
        history.clear().map_err(|e| eyre!(e))?;
        println!("history cleared");
        return Ok(());
    }
    for record in history.records() {
        let when = chrono::DateTime::from_timestamp_millis(record.timestamp)
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| record.timestamp.to_string());
        println!(
            "{when}  {:<7} {:<8} {}{}",
            record.action.name(),
            format!("{:?}", record.status).to_lowercase(),
            format_signature(&record.signature),
            if record.simulated { " (simulated)" } else { "" },
        );
    }
    let stats = history.stats();
    let counts = history.action_counts();
    println!(
        "total {} ok {} failed {} pending {} success rate {:.1}%",
        stats.total, stats.successful, stats.failed, stats.pending, stats.success_rate
    );
    println!(
        "init {} explore {} fight {} claim {} equip {}",
        counts.init, counts.explore, counts.fight, counts.claim, counts.equip
    );
    Ok(())
}

async fn simulate(config: ClientConfig, owner: Pubkey, rounds: u32) -> Result<()> {
    let transport = RpcTransport::new(config.rpc_url.clone(), Some(config.ws_url()));
    let remote = RemoteClient::new(transport, config.program_id().map_err(|e| eyre!(e))?, owner);
    let session = SessionFlags::default();
    session.enter_simulation();
    let history = Arc::new(Mutex::new(open_history(&config)?));
    let orchestrator = ActionOrchestrator::new(
        remote,
        StateCell::new(),
        session,
        history,
        Simulator::new(config.reward),
    );

    orchestrator
        .execute(ActionRequest::Init(InitParams::default()))
        .await?;
    for round in 1..=rounds {
        let explored = orchestrator.execute(ActionRequest::Explore).await;
        if let Err(err) = explored {
            println!("round {round}: {}", describe_error(&err));
            break;
        }
        let fight = orchestrator.execute(ActionRequest::Fight).await?;
        if let Some(report) = fight.combat {
            println!(
                "round {round}: monster hp {} atk {} def {} -> {:?} after {} rounds, lost {} hp",
                report.monster.hp,
                report.monster.atk,
                report.monster.def,
                report.outcome,
                report.rounds_to_kill.min(report.rounds_to_die),
                report.hp_lost,
            );
        }
        if fight.state.is_some_and(|p| p.reward_available) {
            orchestrator.execute(ActionRequest::Claim).await?;
        }
        println!("  {}", describe_player(orchestrator.cell().player().as_ref()));
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_logging(cli.log_dir.as_ref());
    tracing::info!("starting pop-client");
    let config = resolve_config(&cli)?;

    match cli.command {
        Command::Watch { ref owner } => {
            let owner = resolve_owner(&config, owner.as_deref())?
                .ok_or_else(|| eyre!("watch needs --owner or an owner in the config"))?;
            watch(config, owner).await
        }
        Command::Diagnose { ref owner } => {
            let owner = resolve_owner(&config, owner.as_deref())?;
            diagnose(config, owner).await
        }
        Command::History { clear } => history(config, clear),
        Command::Simulate { rounds, ref owner } => {
            let owner = resolve_owner(&config, owner.as_deref())?.unwrap_or_default();
            simulate(config, owner, rounds).await
        }
    }
}
