// Tracing setup for the binary (and anything else embedding the mirror).

use std::io::IsTerminal;
use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

static INIT_GUARD: OnceLock<()> = OnceLock::new();

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
/// Calling it again is a no-op.
pub fn init_tracing() {
    INIT_GUARD.get_or_init(|| {
        let ansi = std::io::stdout().is_terminal();
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(true).with_ansi(ansi);
        // Another subscriber may already be installed (e.g. by a test harness); keep it.
        let _ = Registry::default().with(filter).with(fmt_layer).try_init();
    });
}
