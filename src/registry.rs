use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI8, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use log::{debug, error, info};

use crate::error::Error;
use crate::gate::IsrGate;
use crate::gpio_state::GpioState;
use crate::interrupt::Shared;
use crate::platform::{CountingSemaphore, PinId, Platform, SlotId, Ticks};
use crate::worker;

/// Number of pins that can be filtered at the same time, one notification bit each
pub const MAX_INTERRUPTS: usize = 32;

const WORKER_NAME: &str = "filtered-int";
const WORKER_STACK_SIZE: usize = 4 * 1024;

#[inline(always)]
pub(crate) const fn bit(slot: SlotId) -> u32 {
    1 << slot
}

/// Slot state the interrupt handler touches, all lock free
struct IsrSlot {
    pin: AtomicI32,
    inverse_logic: AtomicBool,
    raw: AtomicI8,
    /// Tick the level in `raw` was captured at
    at: AtomicU32,
}

impl IsrSlot {
    const fn new() -> Self {
        Self {
            pin: AtomicI32::new(-1),
            inverse_logic: AtomicBool::new(false),
            raw: AtomicI8::new(GpioState::Undefined.to_raw()),
            at: AtomicU32::new(0),
        }
    }

    fn reset(&self, pin: PinId, inverse_logic: bool) {
        self.pin.store(pin, Ordering::Relaxed);
        self.inverse_logic.store(inverse_logic, Ordering::Relaxed);
        self.raw.store(GpioState::Undefined.to_raw(), Ordering::Release);
    }
}

enum Entry<P: Platform> {
    Free,
    /// Slot handed out, instance still being built
    Reserved(PinId),
    Live(Arc<Shared<P>>),
}

impl<P: Platform> Entry<P> {
    fn pin(&self) -> Option<PinId> {
        match self {
            Entry::Free => None,
            Entry::Reserved(pin) => Some(*pin),
            Entry::Live(shared) => Some(shared.pin()),
        }
    }
}

struct Slots<P: Platform> {
    entries: [Entry<P>; MAX_INTERRUPTS],
    used: usize,
}

/// The running daemon task and the means to wake and stop it
pub(crate) struct WorkerLink<P: Platform> {
    wake: Arc<P::Semaphore>,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl<P: Platform> WorkerLink<P> {
    fn shutdown(self) {
        self.stop.store(true, Ordering::Release);
        self.wake.give();
        if self.handle.thread().id() == thread::current().id() {
            return;
        }
        if self.handle.join().is_err() {
            error!(target: "filtered_interrupt", "interrupt daemon task panicked");
        }
    }
}

/// Process wide table of filtered interrupts.
///
/// Maps slot ids to instances and owns the daemon task that runs their
/// debouncers. The task is started when the first slot is taken and stopped
/// when the last one is released.
pub struct Registry<P: Platform> {
    platform: P,
    /// Serializes allocate and release, including the daemon task's start and join
    lifecycle: Mutex<()>,
    slots: Mutex<Slots<P>>,
    isr: [IsrSlot; MAX_INTERRUPTS],
    edges: AtomicU32,
    expiries: AtomicU32,
    link: IsrGate<Option<WorkerLink<P>>>,
}

impl<P: Platform> Registry<P> {
    pub const fn new(platform: P) -> Self {
        Self {
            platform,
            lifecycle: Mutex::new(()),
            slots: Mutex::new(Slots {
                entries: [const { Entry::Free }; MAX_INTERRUPTS],
                used: 0,
            }),
            isr: [const { IsrSlot::new() }; MAX_INTERRUPTS],
            edges: AtomicU32::new(0),
            expiries: AtomicU32::new(0),
            link: IsrGate::new(None),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Number of slots in use
    pub fn len(&self) -> usize {
        self.slots().used
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the daemon task is running
    pub fn worker_running(&self) -> bool {
        let _slots = self.slots();
        self.link.with(|link| link.is_some())
    }

    /// Slot currently assigned to `pin`
    pub fn slot_of(&self, pin: PinId) -> Option<SlotId> {
        self.slots()
            .entries
            .iter()
            .position(|entry| entry.pin() == Some(pin))
    }

    fn lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn slots(&self) -> MutexGuard<'_, Slots<P>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve the lowest free slot for `pin`, starting the daemon task if this is the first one
    pub(crate) fn allocate(&'static self, pin: PinId, inverse_logic: bool) -> Result<SlotId, Error> {
        let _lifecycle = self.lifecycle();
        let mut slots = self.slots();

        if slots.entries.iter().any(|entry| entry.pin() == Some(pin)) {
            return Err(Error::PinInUse(pin));
        }
        let slot = slots
            .entries
            .iter()
            .position(|entry| matches!(entry, Entry::Free))
            .ok_or(Error::RegistryFull(MAX_INTERRUPTS))?;

        if slots.used == 0 {
            self.start_worker()?;
        }

        slots.entries[slot] = Entry::Reserved(pin);
        slots.used += 1;
        self.isr[slot].reset(pin, inverse_logic);

        debug!(target: "filtered_interrupt", "(GPIO {}) assigned slot {}", pin, slot);
        Ok(slot)
    }

    /// Publish a fully built instance in its reserved slot
    pub(crate) fn install(&self, slot: SlotId, shared: Arc<Shared<P>>) {
        let mut slots = self.slots();
        debug_assert!(matches!(slots.entries[slot], Entry::Reserved(_)));
        slots.entries[slot] = Entry::Live(shared);
    }

    pub(crate) fn resolve(&self, slot: SlotId) -> Option<Arc<Shared<P>>> {
        match &self.slots().entries[slot] {
            Entry::Live(shared) => Some(shared.clone()),
            _ => None,
        }
    }

    /// Return `slot` to the pool, stopping the daemon task if it was the last one.
    ///
    /// Returns once the stopped task has exited, so a following allocate never
    /// runs two of them at once.
    pub(crate) fn release(&self, slot: SlotId) {
        let _lifecycle = self.lifecycle();
        let link = {
            let mut slots = self.slots();
            debug_assert!(!matches!(slots.entries[slot], Entry::Free), "slot {} released twice", slot);
            if matches!(slots.entries[slot], Entry::Free) {
                return;
            }
            slots.entries[slot] = Entry::Free;
            slots.used -= 1;
            self.isr[slot].reset(-1, false);

            if slots.used == 0 {
                self.link.with(Option::take)
            } else {
                None
            }
        };

        if let Some(link) = link {
            link.shutdown();
            info!(target: "filtered_interrupt", "interrupt daemon task stopped");
        }
    }

    /// Must be called with the slots lock held
    fn start_worker(&'static self) -> Result<(), Error> {
        let wake = Arc::new(self.platform.binary_semaphore()?);
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let wake = wake.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name(WORKER_NAME.into())
                .stack_size(WORKER_STACK_SIZE)
                .spawn(move || worker::run(self, &wake, &stop))?
        };

        let previous = self.link.with(|link| link.replace(WorkerLink { wake, stop, handle }));
        debug_assert!(previous.is_none());
        Ok(())
    }

    /// Last level captured by the interrupt handler of `slot`
    pub(crate) fn raw_state(&self, slot: SlotId) -> GpioState {
        GpioState::from_raw(self.isr[slot].raw.load(Ordering::Acquire))
    }

    /// Last captured level of `slot` together with its capture tick
    pub(crate) fn edge(&self, slot: SlotId) -> (GpioState, Ticks) {
        let isr = &self.isr[slot];
        let raw = GpioState::from_raw(isr.raw.load(Ordering::Acquire));
        (raw, isr.at.load(Ordering::Relaxed))
    }

    /// Take and clear the pending notification bits as `(edges, expiries)`
    pub(crate) fn take_pending(&self) -> (u32, u32) {
        let expiries = self.expiries.swap(0, Ordering::AcqRel);
        let edges = self.edges.swap(0, Ordering::AcqRel);
        (edges, expiries)
    }

    /// Edge handler body, to be called by the platform from interrupt context.
    ///
    /// Captures the level and notifies the daemon task. Never blocks: if the
    /// registry is busy the notification is dropped and the next edge carries
    /// the latest level instead.
    #[inline(always)]
    pub fn on_edge(&self, slot: SlotId) {
        let Some(isr) = self.isr.get(slot) else {
            return;
        };
        let pin = isr.pin.load(Ordering::Relaxed);
        if pin < 0 {
            return;
        }

        let level = self.platform.read_level(pin);
        let state = GpioState::from_level(level, isr.inverse_logic.load(Ordering::Relaxed));
        isr.at.store(self.platform.now_from_isr(), Ordering::Relaxed);
        isr.raw.store(state.to_raw(), Ordering::Release);

        let woken = self
            .link
            .try_with(|link| match link {
                Some(link) => {
                    self.edges.fetch_or(bit(slot), Ordering::AcqRel);
                    link.wake.give_from_isr()
                }
                None => false,
            })
            .unwrap_or(false);

        if woken {
            self.platform.yield_from_isr();
        }
    }

    /// Timer expiry hook, to be called by the platform from task context.
    ///
    /// The commit itself happens on the daemon task.
    pub fn on_timer_expiry(&self, slot: SlotId) {
        if slot >= MAX_INTERRUPTS {
            return;
        }
        let _slots = self.slots();
        self.link.with(|link| {
            if let Some(link) = link {
                self.expiries.fetch_or(bit(slot), Ordering::AcqRel);
                link.wake.give();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InterruptConfig;
    use crate::interrupt::FilteredInterrupt;
    use crate::sim::SimPlatform;

    #[test]
    fn lowest_free_slot_first() {
        let registry = SimPlatform::new().leak_registry();
        assert_eq!(registry.allocate(10, false).unwrap(), 0);
        assert_eq!(registry.allocate(11, false).unwrap(), 1);
        assert_eq!(registry.allocate(12, false).unwrap(), 2);

        registry.release(1);
        assert_eq!(registry.slot_of(11), None);
        assert_eq!(registry.allocate(13, false).unwrap(), 1);
        assert_eq!(registry.slot_of(13), Some(1));
        assert_eq!(registry.len(), 3);

        for slot in 0..3 {
            registry.release(slot);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn pool_is_bounded() {
        let registry = SimPlatform::new().leak_registry();
        for pin in 0..MAX_INTERRUPTS as PinId {
            registry.allocate(pin, false).unwrap();
        }
        assert!(matches!(
            registry.allocate(100, false),
            Err(Error::RegistryFull(MAX_INTERRUPTS))
        ));
        for slot in 0..MAX_INTERRUPTS {
            registry.release(slot);
        }
    }

    #[test]
    fn pin_can_only_be_taken_once() {
        let registry = SimPlatform::new().leak_registry();
        let slot = registry.allocate(5, false).unwrap();
        assert!(matches!(registry.allocate(5, true), Err(Error::PinInUse(5))));
        registry.release(slot);
    }

    #[test]
    fn worker_follows_first_and_last_slot() {
        let registry = SimPlatform::new().leak_registry();
        assert!(!registry.worker_running());

        let a = registry.allocate(1, false).unwrap();
        assert!(registry.worker_running());
        let b = registry.allocate(2, false).unwrap();

        registry.release(a);
        assert!(registry.worker_running());
        registry.release(b);
        assert!(!registry.worker_running());

        let c = registry.allocate(3, false).unwrap();
        assert!(registry.worker_running());
        registry.release(c);
        assert!(!registry.worker_running());
    }

    #[test]
    fn edges_without_instance_only_record_level() {
        let sim = SimPlatform::new();
        let registry = sim.clone().leak_registry();
        let slot = registry.allocate(9, true).unwrap();

        sim.set_level(9, true);
        registry.on_edge(slot);
        assert_eq!(registry.raw_state(slot), GpioState::Low);

        // reserved slots are skipped by the worker
        sim.settle();
        assert_eq!(registry.take_pending(), (0, 0));
        registry.release(slot);
    }

    #[test]
    fn edge_keeps_its_capture_tick() {
        let sim = SimPlatform::new();
        let registry = sim.clone().leak_registry();
        let slot = registry.allocate(8, false).unwrap();

        // reserved slots have no handler attached yet, deliver the edge by hand
        sim.advance(12);
        sim.set_level(8, true);
        registry.on_edge(slot);
        sim.advance(3);
        assert_eq!(registry.edge(slot), (GpioState::High, 12));
        registry.release(slot);
    }

    #[test]
    fn busy_registry_drops_the_edge_but_keeps_the_level() {
        let sim = SimPlatform::new();
        let registry = sim.clone().leak_registry();
        let irq = FilteredInterrupt::new(registry, 6, InterruptConfig::new()).unwrap();
        let slot = irq.slot();

        sim.set_level(6, true);
        sim.settle();
        sim.set_level(6, false);
        sim.settle();
        assert_eq!(irq.pending_interrupts(), 1);
        assert_eq!(irq.last_state(), GpioState::Low);

        // a task holds the registry while the edge comes in
        {
            let _slots = registry.slots();
            registry.link.with(|_| sim.set_level(6, true));
        }
        sim.settle();
        assert_eq!(registry.raw_state(slot), GpioState::High);
        assert_eq!(irq.pending_interrupts(), 1);
        assert_eq!(irq.last_state(), GpioState::Low);

        // the next edge carries the level the dropped one captured
        registry.on_edge(slot);
        sim.settle();
        assert_eq!(irq.pending_interrupts(), 2);
        assert_eq!(irq.last_state(), GpioState::High);
    }

    #[test]
    fn release_joins_worker_before_next_allocate() {
        let sim = SimPlatform::new();
        let registry = sim.clone().leak_registry();

        thread::scope(|s| {
            for pin in [20, 21] {
                let sim = &sim;
                s.spawn(move || {
                    for _ in 0..200 {
                        let slot = registry.allocate(pin, false).unwrap();
                        assert_eq!(sim.worker_wakes(), 1);
                        registry.release(slot);
                    }
                });
            }
        });

        assert!(registry.is_empty());
        assert!(!registry.worker_running());
        assert_eq!(sim.worker_wakes(), 0);
    }
}
