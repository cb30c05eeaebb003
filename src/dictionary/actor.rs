//! Command Actor
//!
//! One dedicated thread owns the engine session and executes commands one
//! at a time, in the order it dequeues them.
//!
//! ## Lifecycle
//! ```text
//! Starting ──► Running ──► Draining ──► Stopped
//!     │           │         (Dispose)
//!     └───────────┴──► Faulted(err)   initialization or engine-fatal error
//! ```
//!
//! `Stopped` and `Faulted` are terminal. Once there, submissions fail fast:
//! with the captured fault for `Faulted`, with [`DictError::Disposed`] for
//! `Stopped`.

use std::any::Any;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::RwLock;

use crate::envelope::Codec;
use crate::error::{DictError, Result};
use crate::store::LogStore;

use super::command::{Command, Job};
use super::completion::{Completion, CompletionHandle, ReadResult};
use super::iterator::IterationSnapshot;

/// Externally visible actor state
#[derive(Debug, Clone)]
pub enum ActorState {
    /// The engine is being opened or recovered
    Starting,

    /// Serving commands
    Running,

    /// A Dispose command is executing
    Draining,

    /// Disposed; no further commands run
    Stopped,

    /// Initialization or an engine-fatal error stopped the actor
    Faulted(DictError),
}

impl ActorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActorState::Stopped | ActorState::Faulted(_))
    }
}

/// State shared between the actor thread and its mailboxes
pub(crate) struct Shared {
    state: RwLock<ActorState>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            state: RwLock::new(ActorState::Starting),
        }
    }

    pub(crate) fn state(&self) -> ActorState {
        self.state.read().clone()
    }

    fn set(&self, next: ActorState) {
        let mut state = self.state.write();
        if !state.is_terminal() {
            *state = next;
        }
    }

    /// Capture `err` as the terminal fault; the first fault wins
    pub(crate) fn fault(&self, err: DictError) {
        self.set(ActorState::Faulted(err));
    }

    /// The error reported to callers whose command can no longer run
    pub(crate) fn terminal_error(&self) -> DictError {
        match &*self.state.read() {
            ActorState::Faulted(err) => err.clone(),
            ActorState::Draining | ActorState::Stopped => DictError::Disposed,
            ActorState::Starting | ActorState::Running => {
                DictError::EngineFatal("command actor terminated unexpectedly".to_string())
            }
        }
    }
}

/// Producer side of the actor queue
pub(crate) struct Mailbox<K, V> {
    sender: Sender<Job<K, V>>,
    shared: Arc<Shared>,
}

impl<K, V> Clone for Mailbox<K, V> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K, V> Mailbox<K, V> {
    /// Queue `command`; never blocks
    pub(crate) fn submit(&self, command: Command<K, V>) -> Completion<K, V> {
        match self.shared.state() {
            ActorState::Faulted(err) => return Completion::failed(err),
            ActorState::Draining | ActorState::Stopped => {
                return match command {
                    Command::Dispose => Completion::ready(ReadResult::done()),
                    _ => Completion::failed(DictError::Disposed),
                };
            }
            ActorState::Starting | ActorState::Running => {}
        }

        let (handle, receiver) = CompletionHandle::new();
        if let Err(rejected) = self.sender.send(Job { command, handle }) {
            // The actor exited between the state check and the send
            reject(rejected.into_inner(), &self.shared);
        }
        Completion::waiting(receiver, Arc::clone(&self.shared))
    }

    pub(crate) fn state(&self) -> ActorState {
        self.shared.state()
    }
}

/// Start the actor thread; `opener` runs on it
pub(crate) fn spawn<K, V, S, F>(name: String, opener: F) -> Result<(Mailbox<K, V>, JoinHandle<()>)>
where
    K: Codec,
    V: Codec,
    S: LogStore,
    F: FnOnce() -> Result<S> + Send + 'static,
{
    let (sender, receiver) = channel::unbounded();
    let shared = Arc::new(Shared::new());

    let thread_shared = Arc::clone(&shared);
    let handle = thread::Builder::new()
        .name(format!("logdict-{}", name))
        .spawn(move || run::<K, V, S, F>(name, opener, receiver, thread_shared))?;

    Ok((Mailbox { sender, shared }, handle))
}

/// Marks the actor faulted if its thread ends without reaching a terminal state
struct ExitGuard {
    shared: Arc<Shared>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if self.shared.state().is_terminal() {
            return;
        }
        let reason = if thread::panicking() {
            "command actor panicked"
        } else {
            "command actor terminated unexpectedly"
        };
        tracing::error!("{}", reason);
        self.shared.fault(DictError::EngineFatal(reason.to_string()));
    }
}

fn run<K, V, S, F>(name: String, opener: F, receiver: Receiver<Job<K, V>>, shared: Arc<Shared>)
where
    K: Codec,
    V: Codec,
    S: LogStore,
    F: FnOnce() -> Result<S>,
{
    let _guard = ExitGuard {
        shared: Arc::clone(&shared),
    };

    // Step 1: Open (or recover) the engine
    let store = match opener() {
        Ok(store) => store,
        Err(err) => {
            let fault = match err {
                DictError::Initialization(_) => err,
                other => DictError::Initialization(other.to_string()),
            };
            tracing::error!("Dictionary {} failed to start: {}", name, fault);
            shared.fault(fault);
            drain(&receiver, &shared);
            return;
        }
    };

    let mut actor = Actor::<K, V, S>::new(name, store);
    shared.set(ActorState::Running);
    tracing::info!(
        "Dictionary {} running (resuming after serial {})",
        actor.name,
        actor.serial
    );

    // Step 2: Execute commands strictly one at a time
    while let Ok(Job {
        command,
        mut handle,
    }) = receiver.recv()
    {
        let disposing = matches!(command, Command::Dispose);
        if disposing {
            shared.set(ActorState::Draining);
        }

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| actor.execute(command))) {
            Ok(outcome) => outcome,
            Err(payload) => Err(DictError::EngineFatal(format!(
                "command actor panicked: {}",
                panic_message(&*payload)
            ))),
        };

        match outcome {
            Err(err) if err.is_fatal() => {
                let fault = match err {
                    DictError::EngineFatal(_) => err,
                    other => DictError::EngineFatal(other.to_string()),
                };
                tracing::error!("Dictionary {} faulted: {}", actor.name, fault);
                shared.fault(fault.clone());
                handle.complete(Err(fault));
                drain(&receiver, &shared);
                return;
            }
            result => handle.complete(result),
        }

        if disposing {
            shared.set(ActorState::Stopped);
            tracing::info!("Dictionary {} stopped", actor.name);
            drain(&receiver, &shared);
            return;
        }
    }

    // Step 3: Every mailbox is gone without a Dispose
    tracing::debug!("Dictionary {} abandoned, closing engine", actor.name);
    if let Err(err) = actor.shut_down() {
        tracing::warn!("Dictionary {} failed to close: {}", actor.name, err);
    }
    shared.set(ActorState::Stopped);
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

/// Fail every job still queued behind a terminal transition
fn drain<K, V>(receiver: &Receiver<Job<K, V>>, shared: &Shared) {
    while let Ok(job) = receiver.try_recv() {
        reject(job, shared);
    }
}

fn reject<K, V>(mut job: Job<K, V>, shared: &Shared) {
    let result = match (&job.command, shared.state()) {
        (Command::Dispose, ActorState::Draining | ActorState::Stopped) => Ok(ReadResult::done()),
        _ => Err(shared.terminal_error()),
    };
    job.handle.complete(result);
}

/// The state owned by the actor thread
pub(crate) struct Actor<K, V, S: LogStore> {
    pub(super) name: String,
    pub(super) store: S,

    /// Serial number of the last command executed
    pub(super) serial: u64,

    /// The one snapshot enumeration allowed at a time
    pub(super) iteration: Option<IterationSnapshot<S>>,

    _types: PhantomData<fn() -> (K, V)>,
}

impl<K, V, S> Actor<K, V, S>
where
    K: Codec,
    V: Codec,
    S: LogStore,
{
    fn new(name: String, store: S) -> Self {
        let serial = store.last_serial();
        Self {
            name,
            store,
            serial,
            iteration: None,
            _types: PhantomData,
        }
    }

    fn execute(&mut self, command: Command<K, V>) -> Result<ReadResult<K, V>> {
        self.serial += 1;
        let serial = self.serial;
        tracing::trace!(
            "Dictionary {} executing {:?} (serial {})",
            self.name,
            command.command_type(),
            serial
        );

        match command {
            Command::Get { key } => self.handle_get(key, serial),
            Command::Upsert { key, value } => self.handle_upsert(key, value, serial),
            Command::Remove { key } => self.handle_remove(key, serial),
            Command::Ping => Ok(ReadResult::done()),
            Command::Save => self.handle_save(),
            Command::Dispose => self.handle_dispose(),
            Command::AcquireIterator { iteration, mode } => {
                self.handle_acquire_iterator(iteration, mode)
            }
            Command::IterateNext { iteration } => self.handle_iterate_next(iteration),
            Command::ReleaseIterator { iteration } => self.handle_release_iterator(iteration),
        }
    }
}
