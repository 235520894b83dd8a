//! Cooperative discrete-event scheduler
//!
//! Processes are resumed one at a time on the caller's thread. A process
//! returns a [`Step`] telling the scheduler how long to sleep; the scheduler
//! keeps a single event queue ordered by `(time, priority, sequence)`.
//! Interrupts are urgent: at equal times they run before timeouts, and they
//! cancel the target's pending timeout.

use super::clock::{Clock, SimTime, TICK};
use super::error::{SimulationError, SimulationResult};
use std::any::Any;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, trace};

/// Handle of a registered process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(usize);

impl ProcessId {
    /// Position in registration order
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Interrupt delivered to a waiting process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interrupt {
    /// Free-form cause, e.g. `FAULT`
    pub cause: String,
}

impl Interrupt {
    /// Interrupt with the given cause
    pub fn new(cause: impl Into<String>) -> Self {
        Self { cause: cause.into() }
    }
}

/// Why a process is being resumed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wake {
    /// First activation
    Start,
    /// The requested wait elapsed
    Timeout,
    /// Another process interrupted the wait
    Interrupt(Interrupt),
}

/// What a process wants next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Resume after this much logical time, rounded to the nearest
    /// millisecond and never less than one
    Wait(Duration),
    /// Never resume again
    Finish,
}

/// Lifecycle of a registered process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Registered, start event pending
    Pending,
    /// Suspended on a timeout
    Waiting,
    /// Currently being resumed
    Running,
    /// Returned [`Step::Finish`]
    Finished,
}

/// A cooperatively scheduled activity
pub trait Process: Any {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Run until the next suspension point
    fn resume(&mut self, ctx: &mut ProcessContext<'_>, wake: Wake) -> SimulationResult<Step>;

    /// Called once after the run, whether or not the process finished
    fn end(&mut self) {}

    /// Downcast support
    fn as_any(&self) -> &dyn Any;

    /// Downcast support
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct Slot {
    name: String,
    process: Option<Box<dyn Process>>,
    state: ProcessState,
    generation: u64,
    ended: bool,
}

/// View of the scheduler handed to a running process
pub struct ProcessContext<'a> {
    now: SimTime,
    current: ProcessId,
    slots: &'a [Slot],
    interrupts: Vec<(ProcessId, Interrupt)>,
}

impl fmt::Debug for ProcessContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessContext")
            .field("now", &self.now)
            .field("current", &self.current)
            .field("interrupts", &self.interrupts)
            .finish()
    }
}

impl ProcessContext<'_> {
    /// Current logical time
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Id of the running process
    pub fn current(&self) -> ProcessId {
        self.current
    }

    /// Look a process up by name
    pub fn find(&self, name: &str) -> Option<ProcessId> {
        self.slots.iter().position(|slot| slot.name == name).map(ProcessId)
    }

    /// State of another process
    pub fn state_of(&self, pid: ProcessId) -> Option<ProcessState> {
        self.slots.get(pid.0).map(|slot| slot.state)
    }

    /// Interrupt `target`'s current wait at the current time
    ///
    /// The target must be suspended on a timeout.
    pub fn interrupt(&mut self, target: ProcessId, cause: impl Into<String>) -> SimulationResult<()> {
        let slot = self
            .slots
            .get(target.0)
            .ok_or_else(|| SimulationError::UnknownProcess(target.to_string()))?;
        if target == self.current {
            return Err(SimulationError::interrupt_not_deliverable(&slot.name, "a process cannot interrupt itself"));
        }
        if slot.state != ProcessState::Waiting {
            return Err(SimulationError::interrupt_not_deliverable(
                &slot.name,
                format!("process is {:?}, not waiting", slot.state),
            ));
        }
        self.interrupts.push((target, Interrupt::new(cause)));
        Ok(())
    }
}

#[derive(Debug)]
enum EventKind {
    Start,
    Timeout { generation: u64 },
    Interrupt(Interrupt),
}

#[derive(Debug)]
struct Event {
    at: SimTime,
    priority: u8,
    seq: u64,
    target: ProcessId,
    kind: EventKind,
}

const URGENT: u8 = 0;
const NORMAL: u8 = 1;

impl Event {
    fn key(&self) -> (SimTime, u8, u64) {
        (self.at, self.priority, self.seq)
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    // Reversed so the max-heap pops the earliest event
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

/// Event loop over registered processes
pub struct Scheduler {
    clock: Clock,
    queue: BinaryHeap<Event>,
    next_seq: u64,
    slots: Vec<Slot>,
    events_processed: u64,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("now", &self.clock.now())
            .field("queued", &self.queue.len())
            .field("processes", &self.slots.len())
            .finish()
    }
}

impl Scheduler {
    /// Empty scheduler driven by `clock`
    pub fn new(clock: Clock) -> Self {
        Self { clock, queue: BinaryHeap::new(), next_seq: 0, slots: Vec::new(), events_processed: 0 }
    }

    /// Current logical time
    pub fn now(&self) -> SimTime {
        self.clock.now()
    }

    /// The scheduler's clock
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Events resumed so far, stale timeouts excluded
    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    /// Register a process; it starts at the current time
    pub fn add<P: Process>(&mut self, process: P) -> ProcessId {
        self.add_boxed(Box::new(process))
    }

    /// Register an already boxed process
    pub fn add_boxed(&mut self, process: Box<dyn Process>) -> ProcessId {
        let pid = ProcessId(self.slots.len());
        debug!(process = process.name(), %pid, "Process registered");
        self.slots.push(Slot {
            name: process.name().to_string(),
            process: Some(process),
            state: ProcessState::Pending,
            generation: 0,
            ended: false,
        });
        self.push(self.now(), NORMAL, pid, EventKind::Start);
        pid
    }

    /// Look a process up by name
    pub fn find(&self, name: &str) -> Option<ProcessId> {
        self.slots.iter().position(|slot| slot.name == name).map(ProcessId)
    }

    /// State of a process
    pub fn state(&self, pid: ProcessId) -> Option<ProcessState> {
        self.slots.get(pid.0).map(|slot| slot.state)
    }

    /// Borrow a process as its concrete type
    pub fn process<P: Process>(&self, pid: ProcessId) -> Option<&P> {
        self.slots.get(pid.0)?.process.as_ref()?.as_any().downcast_ref()
    }

    /// Mutably borrow a process as its concrete type
    pub fn process_mut<P: Process>(&mut self, pid: ProcessId) -> Option<&mut P> {
        self.slots.get_mut(pid.0)?.process.as_mut()?.as_any_mut().downcast_mut()
    }

    /// Number of registered processes
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no process is registered
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn push(&mut self, at: SimTime, priority: u8, target: ProcessId, kind: EventKind) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Event { at, priority, seq, target, kind });
    }

    /// Process every event strictly before `end`, then move the clock to `end`
    ///
    /// The first process error aborts the run and is returned as is.
    pub fn run_until(&mut self, end: SimTime) -> SimulationResult<()> {
        while self.queue.peek().map_or(false, |event| event.at < end) {
            let Some(event) = self.queue.pop() else { break };
            self.clock.advance_to(event.at);
            self.dispatch(event)?;
        }
        self.clock.advance_to(end);
        debug!(now = %self.now(), events = self.events_processed, "Scheduler stopped");
        Ok(())
    }

    fn dispatch(&mut self, event: Event) -> SimulationResult<()> {
        let pid = event.target;
        let now = self.now();
        let slot = self
            .slots
            .get_mut(pid.0)
            .ok_or_else(|| SimulationError::UnknownProcess(pid.to_string()))?;

        let wake = match event.kind {
            EventKind::Start if slot.state == ProcessState::Pending => Wake::Start,
            EventKind::Timeout { generation } if slot.state == ProcessState::Waiting && generation == slot.generation => {
                Wake::Timeout
            }
            EventKind::Interrupt(interrupt) => {
                if slot.state != ProcessState::Waiting {
                    return Err(SimulationError::interrupt_not_deliverable(
                        &slot.name,
                        format!("process is {:?}, not waiting", slot.state),
                    ));
                }
                Wake::Interrupt(interrupt)
            }
            _ => {
                trace!(process = %slot.name, "Skipping stale event");
                return Ok(());
            }
        };

        // Any timeout still queued for this process is now stale
        slot.generation += 1;
        let generation = slot.generation;
        slot.state = ProcessState::Running;
        let mut process = slot
            .process
            .take()
            .ok_or_else(|| SimulationError::UnknownProcess(pid.to_string()))?;

        trace!(process = process.name(), ?wake, %now, "Resuming");
        let mut ctx = ProcessContext { now, current: pid, slots: &self.slots, interrupts: Vec::new() };
        let result = process.resume(&mut ctx, wake);
        let interrupts = ctx.interrupts;

        let slot = &mut self.slots[pid.0];
        slot.process = Some(process);
        self.events_processed += 1;

        match result {
            Ok(Step::Wait(delay)) => {
                // A wait below the clock resolution would never let time advance
                if delay < TICK {
                    trace!(process = %slot.name, delay_us = delay.as_micros() as u64, "Wait raised to one tick");
                }
                slot.state = ProcessState::Waiting;
                self.push(now + delay.max(TICK), NORMAL, pid, EventKind::Timeout { generation });
            }
            Ok(Step::Finish) => {
                slot.state = ProcessState::Finished;
                debug!(process = %slot.name, %now, "Process finished");
            }
            Err(err) => {
                slot.state = ProcessState::Finished;
                return Err(err);
            }
        }

        for (target, interrupt) in interrupts {
            self.push(now, URGENT, target, EventKind::Interrupt(interrupt));
        }
        Ok(())
    }

    /// Call [`Process::end`] on every process that has not ended yet
    pub fn end_all(&mut self) {
        for slot in &mut self.slots {
            if slot.ended {
                continue;
            }
            if let Some(process) = slot.process.as_mut() {
                process.end();
            }
            slot.ended = true;
        }
    }
}
