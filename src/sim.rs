//! Host side platform for tests and demos.
//!
//! GPIO levels are set by hand and every change runs the attached edge
//! handler right away, like an interrupt would. Timers run on a manual tick
//! clock that only moves when [`SimPlatform::advance`] is called. Semaphore
//! timeouts are measured in wall clock milliseconds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use crate::config::InterruptConfig;
use crate::error::Error;
use crate::platform::{CountingSemaphore, OneShotTimer, PinId, Platform, SlotId, Ticks, WAIT_FOREVER};
use crate::registry::Registry;

const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type Handler = (&'static Registry<SimPlatform>, SlotId);

#[derive(Default)]
struct Line {
    level: bool,
    config: Option<InterruptConfig>,
    handler: Option<Handler>,
}

#[derive(Default)]
struct ClockState {
    now: u64,
    timers: Vec<Weak<TimerState>>,
}

#[derive(Default)]
struct Clock {
    state: Mutex<ClockState>,
}

impl Clock {
    fn now(&self) -> u64 {
        lock(&self.state).now
    }
}

#[derive(Default)]
struct SimInner {
    lines: Mutex<HashMap<PinId, Line>>,
    clock: Arc<Clock>,
    wakes: Mutex<Vec<Weak<SemState>>>,
    fail_attach: AtomicBool,
    fail_timer: AtomicBool,
}

/// Simulated GPIO bank, tick clock and FreeRTOS style primitives
#[derive(Clone, Default)]
pub struct SimPlatform {
    inner: Arc<SimInner>,
}

impl SimPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry bound to this platform, living until the process exits
    pub fn leak_registry(self) -> &'static Registry<SimPlatform> {
        Box::leak(Box::new(Registry::new(self)))
    }

    /// Drive `pin` to `level`, running its edge handler if the level changed
    pub fn set_level(&self, pin: PinId, level: bool) {
        let handler = {
            let mut lines = lock(&self.inner.lines);
            let line = lines.entry(pin).or_default();
            if line.level == level {
                return;
            }
            line.level = level;
            line.handler
        };

        if let Some((registry, slot)) = handler {
            registry.on_edge(slot);
        }
    }

    pub fn level(&self, pin: PinId) -> bool {
        lock(&self.inner.lines)
            .get(&pin)
            .is_some_and(|line| line.level)
    }

    /// Configuration applied to `pin`, `None` once it was reset
    pub fn pin_config(&self, pin: PinId) -> Option<InterruptConfig> {
        lock(&self.inner.lines).get(&pin).and_then(|line| line.config)
    }

    pub fn has_handler(&self, pin: PinId) -> bool {
        lock(&self.inner.lines)
            .get(&pin)
            .is_some_and(|line| line.handler.is_some())
    }

    /// Make the next `attach_isr` fail
    pub fn fail_next_attach(&self) {
        self.inner.fail_attach.store(true, Ordering::Relaxed);
    }

    /// Make the next one shot timer creation fail
    pub fn fail_next_timer(&self) {
        self.inner.fail_timer.store(true, Ordering::Relaxed);
    }

    /// Daemon tasks whose wake semaphore is still alive, finished or not
    pub fn worker_wakes(&self) -> usize {
        lock(&self.inner.wakes)
            .iter()
            .filter(|wake| wake.strong_count() > 0)
            .count()
    }

    /// Move the tick clock forward, firing timers as their deadline passes
    pub fn advance(&self, ticks: Ticks) {
        for _ in 0..ticks {
            let due: Vec<Arc<TimerState>> = {
                let mut clock = lock(&self.inner.clock.state);
                clock.now += 1;
                let now = clock.now;
                clock.timers.retain(|timer| timer.strong_count() > 0);
                clock
                    .timers
                    .iter()
                    .filter_map(Weak::upgrade)
                    .filter(|timer| {
                        let mut deadline = lock(&timer.deadline);
                        match *deadline {
                            Some(at) if at <= now => {
                                *deadline = None;
                                true
                            }
                            _ => false,
                        }
                    })
                    .collect()
            };

            if !due.is_empty() {
                for timer in due {
                    timer.registry.on_timer_expiry(timer.slot);
                }
                self.settle();
            }
        }
    }

    /// Wait until every daemon task is blocked with no notification pending
    pub fn settle(&self) {
        let wakes: Vec<Arc<SemState>> = {
            let mut wakes = lock(&self.inner.wakes);
            wakes.retain(|wake| wake.strong_count() > 0);
            wakes.iter().filter_map(Weak::upgrade).collect()
        };
        for wake in wakes {
            wake.wait_idle(SETTLE_TIMEOUT);
        }
    }
}

struct SemCount {
    value: u32,
    waiters: u32,
}

struct SemState {
    count: Mutex<SemCount>,
    cond: Condvar,
    max: u32,
}

impl SemState {
    fn new(max: u32) -> Self {
        Self {
            count: Mutex::new(SemCount { value: 0, waiters: 0 }),
            cond: Condvar::new(),
            max,
        }
    }

    fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = lock(&self.count);
        loop {
            if count.waiters > 0 && count.value == 0 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            count = self
                .cond
                .wait_timeout(count, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

pub struct SimSemaphore(Arc<SemState>);

impl CountingSemaphore for SimSemaphore {
    fn give(&self) {
        let mut count = lock(&self.0.count);
        if count.value < self.0.max {
            count.value += 1;
        }
        self.0.cond.notify_all();
    }

    fn give_from_isr(&self) -> bool {
        self.give();
        false
    }

    fn take(&self, timeout: Ticks) -> bool {
        let deadline = (timeout != WAIT_FOREVER)
            .then(|| Instant::now() + Duration::from_millis(timeout.into()));
        let mut count = lock(&self.0.count);

        while count.value == 0 {
            let wait = match deadline {
                None => None,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    Some(deadline - now)
                }
            };

            count.waiters += 1;
            self.0.cond.notify_all();
            count = match wait {
                None => self.0.cond.wait(count).unwrap_or_else(PoisonError::into_inner),
                Some(wait) => {
                    self.0
                        .cond
                        .wait_timeout(count, wait)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
            count.waiters -= 1;
        }

        count.value -= 1;
        true
    }

    fn count(&self) -> u32 {
        lock(&self.0.count).value
    }
}

struct TimerState {
    deadline: Mutex<Option<u64>>,
    clock: Arc<Clock>,
    registry: &'static Registry<SimPlatform>,
    slot: SlotId,
}

pub struct SimTimer(Arc<TimerState>);

impl OneShotTimer for SimTimer {
    fn arm(&self, ticks: Ticks) {
        let at = self.0.clock.now() + u64::from(ticks);
        *lock(&self.0.deadline) = Some(at);
    }

    fn cancel(&self) {
        *lock(&self.0.deadline) = None;
    }
}

impl Platform for SimPlatform {
    type Semaphore = SimSemaphore;
    type Timer = SimTimer;

    fn counting_semaphore(&self) -> Result<SimSemaphore, Error> {
        Ok(SimSemaphore(Arc::new(SemState::new(u32::MAX))))
    }

    fn binary_semaphore(&self) -> Result<SimSemaphore, Error> {
        let state = Arc::new(SemState::new(1));
        lock(&self.inner.wakes).push(Arc::downgrade(&state));
        Ok(SimSemaphore(state))
    }

    fn one_shot_timer(
        &self,
        registry: &'static Registry<Self>,
        slot: SlotId,
    ) -> Result<SimTimer, Error> {
        if self.inner.fail_timer.swap(false, Ordering::Relaxed) {
            return Err(Error::TimerCreate);
        }
        let state = Arc::new(TimerState {
            deadline: Mutex::new(None),
            clock: self.inner.clock.clone(),
            registry,
            slot,
        });
        lock(&self.inner.clock.state).timers.push(Arc::downgrade(&state));
        Ok(SimTimer(state))
    }

    fn configure_input(&self, pin: PinId, config: &InterruptConfig) -> Result<(), Error> {
        let mut lines = lock(&self.inner.lines);
        let line = lines.entry(pin).or_insert_with(|| Line {
            level: config.pull_up,
            ..Line::default()
        });
        line.config = Some(*config);
        Ok(())
    }

    fn read_level(&self, pin: PinId) -> bool {
        self.level(pin)
    }

    fn attach_isr(
        &self,
        pin: PinId,
        registry: &'static Registry<Self>,
        slot: SlotId,
    ) -> Result<(), Error> {
        if self.inner.fail_attach.swap(false, Ordering::Relaxed) {
            return Err(Error::Platform(-1));
        }
        let mut lines = lock(&self.inner.lines);
        match lines.get_mut(&pin) {
            Some(line) if line.config.is_some() => {
                line.handler = Some((registry, slot));
                Ok(())
            }
            _ => Err(Error::Platform(-1)),
        }
    }

    fn detach_isr(&self, pin: PinId) {
        if let Some(line) = lock(&self.inner.lines).get_mut(&pin) {
            line.handler = None;
        }
    }

    fn reset_pin(&self, pin: PinId) {
        if let Some(line) = lock(&self.inner.lines).get_mut(&pin) {
            line.config = None;
            line.handler = None;
        }
    }

    fn yield_from_isr(&self) {}

    fn now(&self) -> Ticks {
        self.inner.clock.now() as Ticks
    }
}
