use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use parking_lot::Mutex;

use crate::models::audio_models::StreamDiagnostics;
use crate::models::error::AudioError;
use crate::models::format::WaveFormat;

use super::command_queue::{Command, CommandQueue};

/// Parameters of an initialized stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub format: WaveFormat,
    /// Endpoint buffer size in frames.
    pub buffer_frames: u32,
    pub device_period: Duration,
    /// `samples_per_sec * device_period`, rounded.
    pub frames_per_period: u32,
}

/// Pending result of an asynchronous activation.
///
/// The same outcome is also published as a state change
/// (`Initialized` or `InError`), so the handle may simply be dropped.
#[derive(Debug)]
pub struct ActivationHandle {
    rx: Receiver<Result<StreamInfo, AudioError>>,
}

impl ActivationHandle {
    pub fn wait(self) -> Result<StreamInfo, AudioError> {
        self.rx
            .recv()
            .map_err(|_| AudioError::Thread("activation thread exited without a result".into()))?
    }

    pub fn wait_timeout(self, timeout: Duration) -> Result<StreamInfo, AudioError> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(AudioError::Timeout),
            Err(RecvTimeoutError::Disconnected) => {
                Err(AudioError::Thread("activation thread exited without a result".into()))
            }
        }
    }
}

/// Run `activate` on a short-lived named thread.
pub(crate) fn spawn_activation<F>(name: &str, activate: F) -> Result<ActivationHandle, AudioError>
where
    F: FnOnce() -> Result<StreamInfo, AudioError> + Send + 'static,
{
    let (tx, rx) = bounded(1);
    thread::Builder::new()
        .name(name.into())
        .spawn(move || {
            let _ = tx.send(activate());
        })
        .map_err(|e| AudioError::Thread(format!("failed to spawn {}: {}", name, e)))?;
    Ok(ActivationHandle { rx })
}

/// Worker bookkeeping shared by the capture and render wrappers.
///
/// Each activation installs a fresh command queue; closing the previous
/// one is what tells the previous worker to exit.
pub(crate) struct StreamControl {
    commands: Mutex<Arc<CommandQueue>>,
    shutdown: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    info: Mutex<Option<StreamInfo>>,
    diagnostics: Mutex<StreamDiagnostics>,
}

impl StreamControl {
    pub(crate) fn new() -> Self {
        let commands = Arc::new(CommandQueue::new());
        commands.close();
        Self {
            commands: Mutex::new(commands),
            shutdown: AtomicBool::new(false),
            worker: Mutex::new(None),
            info: Mutex::new(None),
            diagnostics: Mutex::new(StreamDiagnostics::default()),
        }
    }

    pub(crate) fn enqueue(&self, command: Command) -> Result<(), AudioError> {
        let commands = Arc::clone(&self.commands.lock());
        commands.enqueue(command)
    }

    /// Replace the command queue for a new stream and publish its parameters.
    pub(crate) fn install(&self, info: StreamInfo) -> Result<Arc<CommandQueue>, AudioError> {
        let mut current = self.commands.lock();
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(AudioError::Thread("device wrapper is shutting down".into()));
        }
        current.close();
        let commands = Arc::new(CommandQueue::new());
        *current = Arc::clone(&commands);
        *self.info.lock() = Some(info);
        Ok(commands)
    }

    pub(crate) fn set_worker(&self, handle: JoinHandle<()>) {
        *self.worker.lock() = Some(handle);
    }

    /// Close the current queue and forget the stream without waiting.
    ///
    /// Safe to call from the worker itself.
    pub(crate) fn detach(&self) {
        self.commands.lock().close();
        *self.info.lock() = None;
    }

    /// Detach and wait for the worker to exit, unless called from it.
    pub(crate) fn stop_worker(&self) {
        self.detach();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                if handle.join().is_err() {
                    log::error!("stream worker panicked");
                }
            }
        }
    }

    /// Refuse further activations and stop the worker.
    pub(crate) fn shutdown(&self) {
        {
            let current = self.commands.lock();
            self.shutdown.store(true, Ordering::SeqCst);
            current.close();
        }
        self.stop_worker();
    }

    pub(crate) fn info(&self) -> Option<StreamInfo> {
        *self.info.lock()
    }

    pub(crate) fn diagnostics(&self) -> StreamDiagnostics {
        *self.diagnostics.lock()
    }

    pub(crate) fn record(&self, update: impl FnOnce(&mut StreamDiagnostics)) {
        update(&mut self.diagnostics.lock());
    }
}
