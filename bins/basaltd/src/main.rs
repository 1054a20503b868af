use basalt_super::Supervisor;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;
use tracing_subscriber::EnvFilter;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(_sig: libc::c_int) {
    INTERRUPTED.store(true, Ordering::Release);
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("INFO")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: basaltd <config.json>"))?;
    let config = basalt_config::load_file(&config_path)?;

    let mut supervisor = Supervisor::from_json(&config)?;

    info!(
        "BASALTD: starting gateway {name} ({uuid}) from {config_path}",
        name = supervisor.name(),
        uuid = supervisor.uuid()
    );

    supervisor.check()?;
    supervisor.prepare()?;
    supervisor.start()?;

    let handler: extern "C" fn(libc::c_int) = on_signal;
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
    }

    // Park until a signal arrives or the graph winds itself down
    // (file sources with eof=stop request shutdown through the
    // supervisor flag).
    while !INTERRUPTED.load(Ordering::Acquire) && !supervisor.shutdown_requested() {
        let all_stopped = !supervisor.paths().is_empty()
            && supervisor
                .paths()
                .iter()
                .all(|p| p.state() == basalt_super::State::Stopped);
        if all_stopped {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    info!("BASALTD: shutting down");
    supervisor.stop()?;

    Ok(())
}
