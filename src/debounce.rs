use crate::gpio_state::GpioState;
use crate::platform::Ticks;

/// Settle times of a filtered interrupt, one per direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SettleTimes {
    pub go_high: Ticks,
    pub go_low: Ticks,
}

impl SettleTimes {
    pub fn toward(&self, target: GpioState) -> Ticks {
        match target {
            GpioState::High => self.go_high,
            _ => self.go_low,
        }
    }
}

/// What the owner of a [`Debouncer`] has to do after feeding it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Same raw level as last time, nothing to do
    Discard,
    /// First observation. The state was seeded and counts as one transition
    Seeded(GpioState),
    /// (Re)arm the state change timer
    Arm(Ticks),
    /// Stop the state change timer, the level went back before settling
    Cancel,
    /// A transition to the given state was committed
    Commit(GpioState),
    /// Timer expiry that no longer matters
    Stale,
}

impl Step {
    /// Whether consumers get a new pending transition out of this step
    pub fn signals(&self) -> bool {
        matches!(self, Step::Seeded(_) | Step::Commit(_))
    }
}

/// Whether tick `now` is at or past `deadline`, across counter wraparound
fn reached(now: Ticks, deadline: Ticks) -> bool {
    now.wrapping_sub(deadline) < Ticks::MAX / 2
}

/// Per pin state machine that turns raw edges into committed transitions.
///
/// It is driven by a single task, so it needs no locking of its own. Timer
/// expiries carry no identity, so the armed deadline decides whether one
/// still matters.
#[derive(Debug, Default)]
pub struct Debouncer {
    previous: GpioState,
    state: GpioState,
    deadline: Option<Ticks>,
}

impl Debouncer {
    pub const fn new() -> Self {
        Self {
            previous: GpioState::Undefined,
            state: GpioState::Undefined,
            deadline: None,
        }
    }

    /// Last committed state
    pub fn state(&self) -> GpioState {
        self.state
    }

    /// Tick at which the pending transition commits, if one is armed
    pub fn deadline(&self) -> Option<Ticks> {
        self.deadline
    }

    /// Feed a raw level as captured by the interrupt handler, at tick `now`
    pub fn observe(&mut self, raw: GpioState, settle: SettleTimes, now: Ticks) -> Step {
        if raw == self.previous || !raw.is_defined() {
            return Step::Discard;
        }
        self.previous = raw;

        if !self.state.is_defined() {
            self.state = !raw;
            return Step::Seeded(self.state);
        }

        if self.state != raw {
            match settle.toward(raw) {
                0 => {
                    self.deadline = None;
                    self.commit()
                }
                ticks => {
                    self.deadline = Some(now.wrapping_add(ticks));
                    Step::Arm(ticks)
                }
            }
        } else {
            self.deadline = None;
            Step::Cancel
        }
    }

    /// The state change timer fired, seen at tick `now`.
    ///
    /// An expiry with nothing armed is stale. One that shows up before the
    /// deadline belongs to an earlier window and re-arms for the rest of the
    /// current one.
    pub fn expire(&mut self, now: Ticks) -> Step {
        match self.deadline {
            None => Step::Stale,
            Some(deadline) if reached(now, deadline) => {
                self.deadline = None;
                self.commit()
            }
            Some(deadline) => Step::Arm(deadline.wrapping_sub(now)),
        }
    }

    /// Feed everything the daemon task collected for this pin in one wake.
    ///
    /// `edge` is the latest raw level with the tick it was captured at. An
    /// edge captured before the armed deadline is fed first, so it can still
    /// cancel the window. Otherwise the expiry goes first.
    pub fn batch(
        &mut self,
        expired: bool,
        edge: Option<(GpioState, Ticks)>,
        settle: SettleTimes,
        now: Ticks,
        mut apply: impl FnMut(Step),
    ) {
        let edge_first = match (edge, self.deadline) {
            (Some((_, at)), Some(deadline)) => !reached(at, deadline),
            _ => false,
        };

        if edge_first {
            if let Some((raw, _)) = edge {
                apply(self.observe(raw, settle, now));
            }
        }
        if expired {
            apply(self.expire(now));
        }
        if !edge_first {
            if let Some((raw, _)) = edge {
                apply(self.observe(raw, settle, now));
            }
        }
    }

    fn commit(&mut self) -> Step {
        self.state = !self.state;
        Step::Commit(self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use GpioState::{High, Low};

    /// Tick driven harness standing in for the timer service and the semaphore
    struct Harness {
        debouncer: Debouncer,
        settle: SettleTimes,
        now: Ticks,
        deadline: Option<Ticks>,
        signals: u32,
    }

    impl Harness {
        fn new(go_high: Ticks, go_low: Ticks) -> Self {
            Self {
                debouncer: Debouncer::new(),
                settle: SettleTimes { go_high, go_low },
                now: 0,
                deadline: None,
                signals: 0,
            }
        }

        /// Harness already resting at `Low`, with the seed transition consumed
        fn settled_low(go_high: Ticks, go_low: Ticks) -> Self {
            let mut harness = Self::new(go_high, go_low);
            harness.feed(High);
            harness.feed(Low);
            assert_eq!(harness.debouncer.state(), Low);
            harness.signals = 0;
            harness
        }

        fn apply(&mut self, step: Step) {
            match step {
                Step::Arm(ticks) => self.deadline = Some(self.now.wrapping_add(ticks)),
                Step::Commit(_) => self.deadline = None,
                Step::Cancel => self.deadline = None,
                _ => {}
            }
            if step.signals() {
                self.signals += 1;
            }
        }

        fn feed(&mut self, raw: GpioState) -> Step {
            let step = self.debouncer.observe(raw, self.settle, self.now);
            self.apply(step);
            step
        }

        /// Timer callback arriving now, whichever arm it belongs to
        fn fire(&mut self) -> Step {
            let step = self.debouncer.expire(self.now);
            self.apply(step);
            step
        }

        fn wait(&mut self, ticks: Ticks) {
            for _ in 0..ticks {
                self.now += 1;
                if self.deadline == Some(self.now) {
                    self.deadline = None;
                    self.fire();
                }
            }
        }

        /// One daemon wake at the current tick
        fn batch(&mut self, expired: bool, edge: Option<(GpioState, Ticks)>) -> Vec<Step> {
            let mut steps = Vec::new();
            self.debouncer
                .batch(expired, edge, self.settle, self.now, |step| steps.push(step));
            for step in &steps {
                self.apply(*step);
            }
            steps
        }
    }

    #[test]
    fn first_observation_seeds_the_opposite_state() {
        let mut harness = Harness::new(20, 20);
        assert_eq!(harness.feed(High), Step::Seeded(Low));
        assert_eq!(harness.debouncer.state(), Low);
        assert_eq!(harness.signals, 1);
    }

    #[test]
    fn repeated_level_is_discarded() {
        let mut harness = Harness::new(0, 0);
        harness.feed(High);
        assert_eq!(harness.feed(High), Step::Discard);
        assert_eq!(harness.feed(High), Step::Discard);
        assert_eq!(harness.signals, 1);
    }

    #[test]
    fn undefined_raw_is_ignored() {
        let mut harness = Harness::new(0, 0);
        assert_eq!(harness.feed(GpioState::Undefined), Step::Discard);
        assert_eq!(harness.debouncer.state(), GpioState::Undefined);
    }

    #[test]
    fn bounce_inside_window_is_filtered() {
        let mut harness = Harness::settled_low(20, 20);
        assert_eq!(harness.feed(High), Step::Arm(20));
        harness.wait(5);
        assert_eq!(harness.feed(Low), Step::Cancel);
        harness.wait(30);
        assert_eq!(harness.signals, 0);
        assert_eq!(harness.debouncer.state(), Low);
        assert_eq!(harness.debouncer.deadline(), None);
    }

    #[test]
    fn stable_level_commits_after_window() {
        let mut harness = Harness::settled_low(20, 20);
        harness.feed(High);
        harness.wait(19);
        assert_eq!(harness.signals, 0);
        harness.wait(11);
        assert_eq!(harness.signals, 1);
        assert_eq!(harness.debouncer.state(), High);
    }

    #[test]
    fn zero_window_commits_synchronously() {
        let mut harness = Harness::settled_low(0, 0);
        assert_eq!(harness.feed(High), Step::Commit(High));
        assert_eq!(harness.feed(Low), Step::Commit(Low));
        assert_eq!(harness.signals, 2);
        assert_eq!(harness.deadline, None);
    }

    #[test]
    fn asymmetric_windows() {
        // fast release, slow press
        let mut harness = Harness::settled_low(50, 0);
        assert_eq!(harness.feed(High), Step::Arm(50));
        harness.wait(50);
        assert_eq!(harness.debouncer.state(), High);
        assert_eq!(harness.feed(Low), Step::Commit(Low));
        assert_eq!(harness.signals, 2);
    }

    #[test]
    fn stale_expiry_after_cancel_is_ignored() {
        let mut harness = Harness::settled_low(10, 10);
        harness.feed(High);
        harness.feed(Low);
        assert_eq!(harness.fire(), Step::Stale);
        assert_eq!(harness.debouncer.state(), Low);
    }

    #[test]
    fn late_expiry_of_cancelled_window_rearms_the_current_one() {
        let mut harness = Harness::settled_low(10, 10);
        harness.feed(High);
        harness.wait(9);
        harness.feed(Low);
        assert_eq!(harness.feed(High), Step::Arm(10));
        assert_eq!(harness.debouncer.deadline(), Some(19));

        // the first window's callback was already on its way
        harness.wait(1);
        assert_eq!(harness.fire(), Step::Arm(9));
        assert_eq!(harness.signals, 0);
        assert_eq!(harness.debouncer.state(), Low);

        harness.wait(8);
        assert_eq!(harness.signals, 0);
        harness.wait(1);
        assert_eq!(harness.signals, 1);
        assert_eq!(harness.debouncer.state(), High);
    }

    #[test]
    fn deadline_survives_tick_wraparound() {
        let mut harness = Harness::settled_low(10, 10);
        harness.now = Ticks::MAX - 4;
        harness.feed(High);
        assert_eq!(harness.debouncer.deadline(), Some(5));
        assert_eq!(harness.debouncer.expire(Ticks::MAX), Step::Arm(6));
        assert_eq!(harness.debouncer.expire(5), Step::Commit(High));
    }

    #[test]
    fn edge_before_deadline_goes_first_in_a_batch() {
        let mut harness = Harness::settled_low(20, 20);
        harness.feed(High);
        harness.now = 25;

        // the level fell back at 15, the expiry at 20 is queued behind it
        let steps = harness.batch(true, Some((Low, 15)));
        assert_eq!(steps, [Step::Cancel, Step::Stale]);
        assert_eq!(harness.signals, 0);
        assert_eq!(harness.debouncer.state(), Low);
    }

    #[test]
    fn edge_after_deadline_goes_last_in_a_batch() {
        let mut harness = Harness::settled_low(20, 20);
        harness.feed(High);
        harness.now = 25;

        let steps = harness.batch(true, Some((Low, 22)));
        assert_eq!(steps, [Step::Commit(High), Step::Arm(20)]);
        assert_eq!(harness.signals, 1);
        assert_eq!(harness.debouncer.deadline(), Some(45));
    }

    #[test]
    fn committed_transitions_alternate() {
        let mut harness = Harness::settled_low(3, 3);
        let mut seen = Vec::new();
        for raw in [High, Low, High, Low] {
            harness.feed(raw);
            harness.wait(3);
            seen.push(harness.debouncer.state());
        }
        assert_eq!(seen, [High, Low, High, Low]);
        assert_eq!(harness.signals, 4);
    }
}
