use std::sync::OnceLock;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static PANIC_HOOK: OnceLock<()> = OnceLock::new();

/// Installs the tracing subscriber and the panic hook. Safe to call more than
/// once; later calls are no-ops, as are calls made when a subscriber is
/// already installed (tests set their own).
pub fn init(debug: bool) {
    let default_directive = if debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false));

    if subscriber.try_init().is_ok() {
        install_panic_hook();
    }
}

fn install_panic_hook() {
    PANIC_HOOK.get_or_init(|| {
        let default_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if let Some(location) = info.location() {
                tracing::error!(
                    target: "panic",
                    file = location.file(),
                    line = location.line(),
                    message = %info
                );
            } else {
                tracing::error!(target: "panic", message = %info);
            }
            default_hook(info);
        }));
    });
}
