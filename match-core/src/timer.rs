//! Slot-based countdown timers on a logical clock.
//!
//! The service never reads a wall clock. The runtime calls
//! [`TimerService::advance`] once per time unit and routes the returned
//! [`TimerEvent`]s to whoever owns the slot.
//!
//! Each [`TimerSlot`] holds at most one running timer. Starting a timer in an
//! occupied slot cancels the occupant first, and every handle carries a
//! generation number, so a stopped timer can never fire again or be mistaken
//! for its successor.

/// A named countdown purpose. Holds at most one running timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerSlot {
    /// Per-turn move countdown.
    Move,
    /// Rematch offer window.
    Rematch,
}

impl TimerSlot {
    const COUNT: usize = 2;

    fn index(self) -> usize {
        match self {
            Self::Move => 0,
            Self::Rematch => 1,
        }
    }
}

/// Identifies one started timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    slot: TimerSlot,
    generation: u64,
}

impl TimerHandle {
    /// The slot this timer occupies.
    pub fn slot(&self) -> TimerSlot {
        self.slot
    }
}

/// Delivery from a running timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// Time remaining, fired once per unit including the initial value.
    Tick {
        /// The timer that ticked.
        handle: TimerHandle,
        /// Units left before expiry.
        remaining: u32,
    },
    /// Remaining time passed below zero. Fired exactly once.
    Expired {
        /// The timer that expired.
        handle: TimerHandle,
    },
}

impl TimerEvent {
    /// The timer this event belongs to.
    pub fn handle(&self) -> TimerHandle {
        match self {
            Self::Tick { handle, .. } | Self::Expired { handle } => *handle,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RunningTimer {
    handle: TimerHandle,
    remaining: u32,
}

/// Cancellable countdowns, one per slot.
#[derive(Debug, Default)]
pub struct TimerService {
    now: u64,
    next_generation: u64,
    slots: [Option<RunningTimer>; TimerSlot::COUNT],
}

impl TimerService {
    /// Create a service with no running timers at logical time 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a countdown of `duration` units in `slot`.
    ///
    /// Any timer already in the slot is cancelled first. Returns the new
    /// handle together with the initial tick (`remaining == duration`),
    /// which is delivered before any time elapses.
    pub fn start(&mut self, slot: TimerSlot, duration: u32) -> (TimerHandle, TimerEvent) {
        if let Some(previous) = self.slots[slot.index()].take() {
            tracing::trace!(?slot, generation = previous.handle.generation, "timer replaced");
        }

        self.next_generation += 1;
        let handle = TimerHandle {
            slot,
            generation: self.next_generation,
        };
        self.slots[slot.index()] = Some(RunningTimer {
            handle,
            remaining: duration,
        });

        (
            handle,
            TimerEvent::Tick {
                handle,
                remaining: duration,
            },
        )
    }

    /// Stop a timer. Idempotent: cancelling a finished, cancelled or
    /// replaced handle is a no-op.
    ///
    /// Returns `true` if a running timer was stopped.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        let slot = &mut self.slots[handle.slot.index()];
        match slot {
            Some(running) if running.handle == handle => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    /// Stop every running timer.
    pub fn cancel_all(&mut self) {
        self.slots = [None; TimerSlot::COUNT];
    }

    /// Check whether this exact timer is still running.
    pub fn is_running(&self, handle: TimerHandle) -> bool {
        matches!(self.slots[handle.slot.index()], Some(r) if r.handle == handle)
    }

    /// Units left for whatever occupies `slot`.
    pub fn remaining(&self, slot: TimerSlot) -> Option<u32> {
        self.slots[slot.index()].map(|r| r.remaining)
    }

    /// Current logical time.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Advance logical time by one unit.
    ///
    /// Every running timer yields exactly one event: a `Tick` with the new
    /// remaining value, or `Expired` when it was already at zero. Expired
    /// timers are removed. Events are ordered by slot (move first).
    pub fn advance(&mut self) -> Vec<TimerEvent> {
        self.now += 1;

        let mut events = Vec::new();
        for slot in self.slots.iter_mut() {
            let Some(running) = slot else { continue };
            if running.remaining == 0 {
                events.push(TimerEvent::Expired {
                    handle: running.handle,
                });
                *slot = None;
            } else {
                running.remaining -= 1;
                events.push(TimerEvent::Tick {
                    handle: running.handle,
                    remaining: running.remaining,
                });
            }
        }
        events
    }
}
