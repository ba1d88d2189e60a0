//! Trace event dispatch
//!
//! The teardown never writes to a console or file directly. It emits
//! [`TraceEvent`]s through a [`Tracer`] handed in by the caller, which fans
//! them out to an ordered chain of sinks. A sink may ask to be removed from
//! the chain by answering [`Disposition::Deregister`].

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

/// Severity of a trace event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TraceLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for TraceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceLevel::Debug => write!(f, "debug"),
            TraceLevel::Info => write!(f, "info"),
            TraceLevel::Warning => write!(f, "warning"),
            TraceLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub level: TraceLevel,
    pub message: String,
}

/// What a sink wants after receiving an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    Deregister,
}

/// Receiver of trace events
///
/// A sink may emit through a clone of the tracer that feeds it; such events
/// are queued and delivered to the whole chain once the current event has
/// been dispatched. Registering sinks or counting them from inside
/// `receive` blocks forever.
pub trait TraceSink: Send {
    fn receive(&mut self, event: &TraceEvent) -> Disposition;
}

impl<F> TraceSink for F
where
    F: FnMut(&TraceEvent) -> Disposition + Send,
{
    fn receive(&mut self, event: &TraceEvent) -> Disposition {
        self(event)
    }
}

/// Forwards events to the `tracing` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn receive(&mut self, event: &TraceEvent) -> Disposition {
        match event.level {
            TraceLevel::Debug => tracing::debug!("{}", event.message),
            TraceLevel::Info => tracing::info!("{}", event.message),
            TraceLevel::Warning => tracing::warn!("{}", event.message),
            TraceLevel::Error => tracing::error!("{}", event.message),
        }
        Disposition::Continue
    }
}

/// Ordered, lock-guarded chain of sinks
///
/// Cloning is cheap and every clone shares the same chain.
#[derive(Clone, Default)]
pub struct Tracer {
    sinks: Arc<Mutex<Vec<Box<dyn TraceSink>>>>,
    dispatch: Arc<Mutex<Dispatch>>,
}

/// Which thread is walking the chain, and what its sinks emitted meanwhile
#[derive(Default)]
struct Dispatch {
    thread: Option<ThreadId>,
    pending: VecDeque<TraceEvent>,
}

/// Clears the dispatching thread even if a sink panics
struct DispatchGuard<'a> {
    tracer: &'a Tracer,
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        let mut dispatch = self.tracer.dispatch();
        dispatch.thread = None;
        dispatch.pending.clear();
    }
}

impl Tracer {
    /// Tracer with no sinks; events are dropped
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracer forwarding to the `tracing` crate
    pub fn with_tracing() -> Self {
        let tracer = Self::new();
        tracer.register(TracingSink);
        tracer
    }

    /// Append a sink to the end of the chain
    pub fn register(&self, sink: impl TraceSink + 'static) {
        self.lock().push(Box::new(sink));
    }

    pub fn sink_count(&self) -> usize {
        self.lock().len()
    }

    /// Deliver an event to every sink in registration order
    pub fn emit(&self, level: TraceLevel, message: impl Into<String>) {
        let event = TraceEvent {
            level,
            message: message.into(),
        };
        let current = thread::current().id();

        {
            let mut dispatch = self.dispatch();
            if dispatch.thread == Some(current) {
                // Emitted by one of our own sinks; the chain lock is ours
                dispatch.pending.push_back(event);
                return;
            }
        }

        let mut sinks = self.lock();
        self.dispatch().thread = Some(current);
        let _guard = DispatchGuard { tracer: self };

        let mut next = Some(event);
        while let Some(event) = next {
            sinks.retain_mut(|sink| sink.receive(&event) == Disposition::Continue);
            next = self.dispatch().pending.pop_front();
        }
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.emit(TraceLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(TraceLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(TraceLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(TraceLevel::Error, message);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Box<dyn TraceSink>>> {
        // A panicking sink must not silence the rest of the teardown
        self.sinks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn dispatch(&self) -> MutexGuard<'_, Dispatch> {
        self.dispatch
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("sinks", &self.sink_count())
            .finish()
    }
}

/// Sink collecting events in memory, for tests and for reporting
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<TraceEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Messages at exactly `level`
    pub fn messages(&self, level: TraceLevel) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.level == level)
            .map(|e| e.message)
            .collect()
    }
}

impl TraceSink for MemorySink {
    fn receive(&mut self, event: &TraceEvent) -> Disposition {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
        Disposition::Continue
    }
}
