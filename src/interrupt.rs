use core::convert::Infallible;
use std::sync::atomic::{AtomicI8, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use embedded_hal::digital::v2::InputPin;
use log::{debug, info, trace};

use crate::config::InterruptConfig;
use crate::debounce::{Debouncer, SettleTimes, Step};
use crate::error::Error;
use crate::gpio_state::GpioState;
use crate::platform::{CountingSemaphore, OneShotTimer, PinId, Platform, SlotId, Ticks, NO_WAIT};
use crate::registry::Registry;

/// Instance state shared between the owner handle and the daemon task
pub(crate) struct Shared<P: Platform> {
    pin: PinId,
    slot: SlotId,
    inverse_logic: bool,
    go_high: AtomicU32,
    go_low: AtomicU32,
    fsm_state: AtomicI8,
    debouncer: Mutex<Debouncer>,
    semaphore: P::Semaphore,
    timer: P::Timer,
}

impl<P: Platform> Shared<P> {
    pub(crate) fn pin(&self) -> PinId {
        self.pin
    }

    fn settle_times(&self) -> SettleTimes {
        SettleTimes {
            go_high: self.go_high.load(Ordering::Relaxed),
            go_low: self.go_low.load(Ordering::Relaxed),
        }
    }

    fn last_state(&self) -> GpioState {
        GpioState::from_raw(self.fsm_state.load(Ordering::Acquire))
    }

    // only the daemon task locks this, the mutex is never contended
    fn debouncer(&self) -> MutexGuard<'_, Debouncer> {
        self.debouncer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one wake worth of notifications at tick `now`: a timer expiry, the
    /// latest raw level with its capture tick, or both
    pub(crate) fn on_batch(&self, expired: bool, edge: Option<(GpioState, Ticks)>, now: Ticks) {
        let settle = self.settle_times();
        self.debouncer()
            .batch(expired, edge, settle, now, |step| self.apply(step));
    }

    fn apply(&self, step: Step) {
        match step {
            Step::Discard => {
                trace!(target: "filtered_interrupt", "(GPIO {}) got same level again", self.pin);
            }
            Step::Stale => {
                trace!(target: "filtered_interrupt", "(GPIO {}) stale timer expiry", self.pin);
            }
            Step::Arm(ticks) => {
                trace!(target: "filtered_interrupt",
                    "(GPIO {}) leaving {} in {} ticks", self.pin, self.last_state(), ticks);
                self.timer.arm(ticks);
            }
            Step::Cancel => {
                trace!(target: "filtered_interrupt",
                    "(GPIO {}) remaining in {}", self.pin, self.last_state());
                self.timer.cancel();
            }
            Step::Seeded(state) | Step::Commit(state) => {
                // publish the state before waking anyone up
                self.fsm_state.store(state.to_raw(), Ordering::Release);
                self.semaphore.give();
                debug!(target: "filtered_interrupt", "(GPIO {}) state changed to {}", self.pin, state);
            }
        }
    }
}

/// A debounced any-edge interrupt on a single pin.
///
/// Every committed transition of the filtered level adds one to a counting
/// semaphore, which the wait functions consume. Committed transitions always
/// alternate between `Low` and `High`.
pub struct FilteredInterrupt<P: Platform> {
    registry: &'static Registry<P>,
    shared: Arc<Shared<P>>,
}

impl<P: Platform> FilteredInterrupt<P> {
    /// Start filtering edges of `pin`
    ///
    /// Configures the pin as an any-edge interrupt source, takes a slot in
    /// `registry` and starts the daemon task if no other pin is filtered yet.
    /// On error nothing stays allocated.
    ///
    /// # Example - a button with 20 ticks of debounce, driven by the simulation backend
    /// ```
    /// use esp_filtered_interrupt::sim::SimPlatform;
    /// use esp_filtered_interrupt::{FilteredInterrupt, GpioState, InterruptConfig, NO_WAIT};
    ///
    /// let sim = SimPlatform::new();
    /// let registry = sim.clone().leak_registry();
    ///
    /// let button = FilteredInterrupt::new(registry, 4, InterruptConfig::new().debounce(20)).unwrap();
    ///
    /// // the first edge seeds the state
    /// sim.set_level(4, true);
    /// sim.settle();
    /// assert!(button.wait_for_single_interrupt(NO_WAIT));
    /// assert_eq!(button.state(), GpioState::Low);
    /// ```
    pub fn new(
        registry: &'static Registry<P>,
        pin: PinId,
        config: InterruptConfig,
    ) -> Result<Self, Error> {
        config.validate(pin)?;

        let slot = registry.allocate(pin, config.inverse_logic)?;
        match Self::build(registry, slot, pin, &config) {
            Ok(this) => {
                info!(target: "filtered_interrupt", "(GPIO {}) filtered interrupt created", pin);
                Ok(this)
            }
            Err(err) => {
                registry.release(slot);
                Err(err)
            }
        }
    }

    fn build(
        registry: &'static Registry<P>,
        slot: SlotId,
        pin: PinId,
        config: &InterruptConfig,
    ) -> Result<Self, Error> {
        let platform = registry.platform();

        let shared = Arc::new(Shared {
            pin,
            slot,
            inverse_logic: config.inverse_logic,
            go_high: AtomicU32::new(config.go_high_ticks),
            go_low: AtomicU32::new(config.go_low_ticks),
            fsm_state: AtomicI8::new(GpioState::Undefined.to_raw()),
            debouncer: Mutex::new(Debouncer::new()),
            semaphore: platform.counting_semaphore()?,
            timer: platform.one_shot_timer(registry, slot)?,
        });
        registry.install(slot, shared.clone());

        platform.configure_input(pin, config)?;
        if let Err(err) = platform.attach_isr(pin, registry, slot) {
            platform.reset_pin(pin);
            return Err(err);
        }

        Ok(Self { registry, shared })
    }

    /// Block until a transition is committed or `timeout` ticks pass.
    /// Consumes exactly one pending transition on success.
    pub fn wait_for_single_interrupt(&self, timeout: Ticks) -> bool {
        self.shared.semaphore.take(timeout)
    }

    /// Like [`wait_for_single_interrupt`](Self::wait_for_single_interrupt), but
    /// coalesces bursts: after the wait succeeds, pairs of transitions that
    /// cancel out are consumed as well, leaving at most one pending.
    pub fn wait_for_last_interrupt(&self, timeout: Ticks) -> bool {
        if !self.shared.semaphore.take(timeout) {
            return false;
        }

        let queued = self.pending_interrupts() + 1;
        let extra = (queued - queued % 2).saturating_sub(1);
        for _ in 0..extra {
            if !self.shared.semaphore.take(NO_WAIT) {
                break;
            }
        }
        true
    }

    /// Committed transitions nobody waited for yet
    pub fn pending_interrupts(&self) -> u32 {
        self.shared.semaphore.count()
    }

    /// Pending transitions that cancel out in pairs
    pub fn redundant_interrupts(&self) -> u32 {
        let pending = self.pending_interrupts();
        pending - pending % 2
    }

    /// Level as seen by the consumer, i.e. the last committed state rolled
    /// back over the transitions still pending
    pub fn state(&self) -> GpioState {
        let last = self.last_state();
        if self.pending_interrupts() % 2 == 1 {
            !last
        } else {
            last
        }
    }

    /// Last committed state, ignoring pending transitions
    pub fn last_state(&self) -> GpioState {
        self.shared.last_state()
    }

    /// Unfiltered level captured by the last edge
    pub fn raw_state(&self) -> GpioState {
        self.registry.raw_state(self.shared.slot)
    }

    pub fn gpio_num(&self) -> PinId {
        self.shared.pin
    }

    pub fn slot(&self) -> SlotId {
        self.shared.slot
    }

    pub fn inverse_logic(&self) -> bool {
        self.shared.inverse_logic
    }

    pub fn go_high_time(&self) -> Ticks {
        self.shared.go_high.load(Ordering::Relaxed)
    }

    /// Takes effect on the next edge
    pub fn set_go_high_time(&self, ticks: Ticks) {
        self.shared.go_high.store(ticks, Ordering::Relaxed);
    }

    pub fn go_low_time(&self) -> Ticks {
        self.shared.go_low.load(Ordering::Relaxed)
    }

    /// Takes effect on the next edge
    pub fn set_go_low_time(&self, ticks: Ticks) {
        self.shared.go_low.store(ticks, Ordering::Relaxed);
    }
}

impl<P: Platform> Drop for FilteredInterrupt<P> {
    fn drop(&mut self) {
        let platform = self.registry.platform();
        let pin = self.shared.pin;

        platform.detach_isr(pin);
        self.shared.timer.cancel();
        self.registry.release(self.shared.slot);
        platform.reset_pin(pin);

        info!(target: "filtered_interrupt", "(GPIO {}) filtered interrupt destroyed", pin);
    }
}

/// Reads the debounced level, `Undefined` reads as low
impl<P: Platform> InputPin for FilteredInterrupt<P> {
    type Error = Infallible;

    fn is_high(&self) -> Result<bool, Self::Error> {
        Ok(self.state().is_high())
    }

    fn is_low(&self) -> Result<bool, Self::Error> {
        Ok(!self.state().is_high())
    }
}
