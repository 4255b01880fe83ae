//! Signal handling: flags registered with signal-hook, drained at the top
//! of every reactor iteration.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::{SIGALRM, SIGHUP, SIGINT, SIGTERM, SIGUSR1, SIGUSR2};

pub struct Signals {
    shutdown: Arc<AtomicBool>,
    reload: Arc<AtomicBool>,
    full_restart: Arc<AtomicBool>,
    rotate: Arc<AtomicBool>,
}

impl Signals {
    pub fn register() -> io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let reload = Arc::new(AtomicBool::new(false));
        let full_restart = Arc::new(AtomicBool::new(false));
        let rotate = Arc::new(AtomicBool::new(false));

        signal_hook::flag::register(SIGTERM, Arc::clone(&shutdown))?;
        signal_hook::flag::register(SIGINT, Arc::clone(&shutdown))?;
        signal_hook::flag::register(SIGHUP, Arc::clone(&reload))?;
        // SIGUSR1 reloads configuration and restarts the helper processes
        signal_hook::flag::register(SIGUSR1, Arc::clone(&full_restart))?;
        signal_hook::flag::register(SIGALRM, Arc::clone(&full_restart))?;
        signal_hook::flag::register(SIGUSR2, Arc::clone(&rotate))?;

        Ok(Self {
            shutdown,
            reload,
            full_restart,
            rotate,
        })
    }

    pub fn take_shutdown(&self) -> bool {
        self.shutdown.swap(false, Ordering::Relaxed)
    }

    pub fn take_reload(&self) -> bool {
        self.reload.swap(false, Ordering::Relaxed)
    }

    pub fn take_full_restart(&self) -> bool {
        self.full_restart.swap(false, Ordering::Relaxed)
    }

    pub fn take_rotate(&self) -> bool {
        self.rotate.swap(false, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_drain_once() {
        let signals = Signals::register().unwrap();
        signals.shutdown.store(true, Ordering::Relaxed);
        assert!(signals.take_shutdown());
        assert!(!signals.take_shutdown());
    }
}
