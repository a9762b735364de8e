pub mod authorization;
pub mod config;
pub mod db;
pub mod models;
pub mod pipeline; // stage → extract → validate → persist
pub mod review; // approve / reject

use tracing_subscriber::EnvFilter;

pub use config::IntakeConfig;
pub use models::{Actor, OcrResult, ReviewState, Role, TargetRecord};
pub use pipeline::{IntakeProcessor, PipelineError};
pub use review::{ApprovalOutcome, ReviewWorkflow};

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the
/// default filter. Logs go to stderr so stdout stays machine-readable.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
