use crate::config::InterruptConfig;
use crate::error::Error;
use crate::registry::Registry;

/// GPIO number as the platform knows it
pub type PinId = i32;

/// Scheduler ticks
pub type Ticks = u32;

/// Index of a filtered interrupt in the registry, doubles as its notification bit
pub type SlotId = usize;

/// Block until the operation succeeds
pub const WAIT_FOREVER: Ticks = Ticks::MAX;

/// Return immediately
pub const NO_WAIT: Ticks = 0;

/// A counting semaphore, safe to give from interrupt context
pub trait CountingSemaphore: Send + Sync + 'static {
    fn give(&self);

    /// Give from an interrupt handler.
    /// Returns `true` when a task of higher priority than the interrupted one was woken.
    fn give_from_isr(&self) -> bool;

    /// Decrement, waiting up to `timeout` ticks. Returns `false` on timeout.
    fn take(&self, timeout: Ticks) -> bool;

    fn count(&self) -> u32;
}

/// A single shot timer. Arming a running timer restarts it.
pub trait OneShotTimer: Send + Sync + 'static {
    fn arm(&self, ticks: Ticks);
    fn cancel(&self);
}

/// Everything the filtered interrupts need from the hardware and the scheduler.
///
/// Handlers installed through `attach_isr` must call [`Registry::on_edge`] with
/// the slot they were installed for, and timers must call
/// [`Registry::on_timer_expiry`] when they fire.
pub trait Platform: Sized + Send + Sync + 'static {
    type Semaphore: CountingSemaphore;
    type Timer: OneShotTimer;

    /// Counting semaphore with no practical upper bound, starting at zero
    fn counting_semaphore(&self) -> Result<Self::Semaphore, Error>;

    /// Semaphore saturating at one, starting at zero
    fn binary_semaphore(&self) -> Result<Self::Semaphore, Error>;

    fn one_shot_timer(
        &self,
        registry: &'static Registry<Self>,
        slot: SlotId,
    ) -> Result<Self::Timer, Error>;

    /// Configure the pin as an any-edge interrupt source
    fn configure_input(&self, pin: PinId, config: &InterruptConfig) -> Result<(), Error>;

    /// Instantaneous electrical level, must be callable from interrupt context
    fn read_level(&self, pin: PinId) -> bool;

    fn attach_isr(
        &self,
        pin: PinId,
        registry: &'static Registry<Self>,
        slot: SlotId,
    ) -> Result<(), Error>;

    fn detach_isr(&self, pin: PinId);

    /// Put the pin back into its reset configuration
    fn reset_pin(&self, pin: PinId);

    /// Request a context switch when the current interrupt returns
    fn yield_from_isr(&self);

    /// Scheduler tick count, wrapping
    fn now(&self) -> Ticks;

    /// Tick count read from interrupt context
    fn now_from_isr(&self) -> Ticks {
        self.now()
    }
}
