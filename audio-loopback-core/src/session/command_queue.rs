use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::models::error::AudioError;

use super::event::AudioEvent;

/// Asynchronous request serviced on a stream worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Pause,
}

/// FIFO of commands for one stream worker.
///
/// Any thread may enqueue; the worker drains the whole queue each time
/// the ready event fires. Closing the queue wakes the worker so it can exit.
#[derive(Debug, Default)]
pub struct CommandQueue {
    commands: Mutex<VecDeque<Command>>,
    ready: AudioEvent,
    closed: AtomicBool,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, command: Command) -> Result<(), AudioError> {
        if self.is_closed() {
            return Err(AudioError::Thread("command queue is closed".into()));
        }
        self.commands.lock().push_back(command);
        self.ready.signal();
        Ok(())
    }

    /// Take every pending command in arrival order.
    pub fn drain(&self) -> Vec<Command> {
        self.commands.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.commands.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.lock().is_empty()
    }

    /// Event signalled whenever a command is enqueued or the queue closes.
    pub fn ready_event(&self) -> &AudioEvent {
        &self.ready
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.ready.signal();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
