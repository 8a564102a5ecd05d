use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::select;

use crate::models::error::AudioError;

use super::command_queue::{Command, CommandQueue};
use super::event::AudioEvent;

/// Per-stream behavior driven by [`spawn_stream_worker`].
///
/// Returning `Break` from any callback ends the worker thread.
pub(crate) trait StreamHandler: Send + 'static {
    /// Runs once on the worker thread before the first wait.
    fn on_thread_start(&mut self) {}

    /// The device signalled that a buffer is ready.
    fn on_buffer_ready(&mut self) -> ControlFlow<()>;

    fn on_command(&mut self, command: Command) -> ControlFlow<()>;

    /// Nothing was signalled within the stall timeout.
    fn on_timeout(&mut self) -> ControlFlow<()>;

    /// The owner closed the command queue; the worker exits after this returns.
    fn on_close(&mut self) {}
}

pub(crate) struct WorkerContext {
    pub name: String,
    pub buffer_ready: AudioEvent,
    pub commands: Arc<CommandQueue>,
    pub stall_timeout: Duration,
}

/// Spawn the event loop servicing one audio stream.
///
/// The loop waits on the buffer-ready event, the command queue and the
/// stall timeout, and exits when the handler breaks or the queue is closed.
pub(crate) fn spawn_stream_worker<H: StreamHandler>(
    context: WorkerContext,
    handler: H,
) -> Result<JoinHandle<()>, AudioError> {
    let name = context.name.clone();
    thread::Builder::new()
        .name(name.clone())
        .spawn(move || run(context, handler))
        .map_err(|e| AudioError::Thread(format!("failed to spawn {}: {}", name, e)))
}

fn run<H: StreamHandler>(context: WorkerContext, mut handler: H) {
    handler.on_thread_start();
    log::debug!("{} started", context.name);

    let buffer_ready = context.buffer_ready.receiver();
    let command_ready = context.commands.ready_event().receiver();
    loop {
        if context.commands.is_closed() {
            handler.on_close();
            break;
        }
        let flow = select! {
            recv(buffer_ready) -> _ => handler.on_buffer_ready(),
            recv(command_ready) -> _ => dispatch(&context.commands, &mut handler),
            default(context.stall_timeout) => handler.on_timeout(),
        };
        if flow.is_break() {
            break;
        }
    }

    log::debug!("{} exiting", context.name);
}

fn dispatch<H: StreamHandler>(commands: &CommandQueue, handler: &mut H) -> ControlFlow<()> {
    for command in commands.drain() {
        if handler.on_command(command).is_break() {
            return ControlFlow::Break(());
        }
    }
    ControlFlow::Continue(())
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Seen {
        Started,
        Buffer,
        Command(Command),
        Timeout,
        Closed,
    }

    struct Recorder {
        seen: Arc<Mutex<Vec<Seen>>>,
        stop_on: Option<Command>,
    }

    impl StreamHandler for Recorder {
        fn on_thread_start(&mut self) {
            self.seen.lock().push(Seen::Started);
        }

        fn on_buffer_ready(&mut self) -> ControlFlow<()> {
            self.seen.lock().push(Seen::Buffer);
            ControlFlow::Continue(())
        }

        fn on_command(&mut self, command: Command) -> ControlFlow<()> {
            self.seen.lock().push(Seen::Command(command));
            if self.stop_on == Some(command) {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        }

        fn on_timeout(&mut self) -> ControlFlow<()> {
            self.seen.lock().push(Seen::Timeout);
            ControlFlow::Continue(())
        }

        fn on_close(&mut self) {
            self.seen.lock().push(Seen::Closed);
        }
    }

    fn start(stall: Duration, stop_on: Option<Command>) -> (AudioEvent, Arc<CommandQueue>, Arc<Mutex<Vec<Seen>>>, JoinHandle<()>) {
        let event = AudioEvent::new();
        let commands = Arc::new(CommandQueue::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handle = spawn_stream_worker(
            WorkerContext {
                name: "test-worker".into(),
                buffer_ready: event.clone(),
                commands: Arc::clone(&commands),
                stall_timeout: stall,
            },
            Recorder {
                seen: Arc::clone(&seen),
                stop_on,
            },
        )
        .unwrap();
        (event, commands, seen, handle)
    }

    fn wait_for(seen: &Mutex<Vec<Seen>>, predicate: impl Fn(&[Seen]) -> bool) {
        for _ in 0..500 {
            if predicate(&seen.lock()) {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("condition not reached: {:?}", seen.lock());
    }

    #[test]
    fn commands_run_in_order_and_break_ends_worker() {
        let (_event, commands, seen, handle) = start(Duration::from_secs(10), Some(Command::Stop));
        commands.enqueue(Command::Start).unwrap();
        commands.enqueue(Command::Pause).unwrap();
        commands.enqueue(Command::Stop).unwrap();
        handle.join().unwrap();

        let commands: Vec<_> = seen
            .lock()
            .iter()
            .filter_map(|s| match s {
                Seen::Command(c) => Some(*c),
                _ => None,
            })
            .collect();
        assert_eq!(commands, vec![Command::Start, Command::Pause, Command::Stop]);
        assert!(!seen.lock().contains(&Seen::Closed));
    }

    #[test]
    fn buffer_event_wakes_handler() {
        let (event, commands, seen, handle) = start(Duration::from_secs(10), None);
        event.signal();
        wait_for(&seen, |s| s.contains(&Seen::Buffer));

        commands.close();
        handle.join().unwrap();
        assert_eq!(seen.lock()[0], Seen::Started);
        assert_eq!(seen.lock().last(), Some(&Seen::Closed));
    }

    #[test]
    fn stall_timeout_fires_without_events() {
        let (_event, commands, seen, handle) = start(Duration::from_millis(10), None);
        wait_for(&seen, |s| s.iter().filter(|e| **e == Seen::Timeout).count() >= 2);

        commands.close();
        handle.join().unwrap();
    }
}
