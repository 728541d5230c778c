//! The background execution context of a server: a current-thread tokio runtime that is
//!  driven by one dedicated OS thread while running.
//!
//! Tasks spawned through `handle()` live in the runtime, not in the thread, so they survive a
//!  `shutdown()` and continue where they stopped after the next `run()`.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::oneshot;
use tracing::{debug, error};

struct RunningReactor {
    stop: oneshot::Sender<()>,
    thread: JoinHandle<()>,
}

pub struct Reactor {
    name: String,
    runtime: Arc<Runtime>,
    running: Mutex<Option<RunningReactor>>,
}

impl Reactor {
    pub fn new(name: &str) -> anyhow::Result<Reactor> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()?;

        Ok(Reactor {
            name: name.to_string(),
            runtime: Arc::new(runtime),
            running: Mutex::new(None),
        })
    }

    fn running(&self) -> MutexGuard<'_, Option<RunningReactor>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// for spawning tasks into this reactor, whether it is running or not
    pub fn handle(&self) -> Handle {
        self.runtime.handle().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    /// Starts the processing thread. Calling this while the reactor runs has no effect.
    pub fn run(&self) -> anyhow::Result<()> {
        let mut running = self.running();
        if running.is_some() {
            debug!("reactor {} is already running", self.name);
            return Ok(());
        }

        let (stop, stop_signal) = oneshot::channel::<()>();
        let runtime = self.runtime.clone();
        let thread = std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                // a dropped sender stops the reactor just like an explicit signal
                let _ = runtime.block_on(stop_signal);
            })?;

        *running = Some(RunningReactor { stop, thread });
        debug!("started reactor {}", self.name);
        Ok(())
    }

    /// Stops the processing thread and waits for it to finish. This is a no-op if the reactor
    ///  is not running, so it can be called any number of times.
    pub fn shutdown(&self) {
        let Some(running) = self.running().take() else {
            return;
        };

        let _ = running.stop.send(());
        if running.thread.join().is_err() {
            error!("reactor thread {} panicked", self.name);
        }
        debug!("stopped reactor {}", self.name);
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
