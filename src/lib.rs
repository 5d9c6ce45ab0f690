pub mod address;

pub mod codec;

pub mod config;

pub mod diagnostics;

pub mod error;

pub mod orchestrator;

pub mod remote;

pub mod retry;

pub mod simulation;

pub mod sync;

pub mod test_helpers;

pub use error::{
    ClientError,
    PreconditionViolation,
    Result,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .try_init();
}
