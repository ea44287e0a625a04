mod config;
mod debounce;
mod error;
mod gate;
mod gpio_state;
mod interrupt;
mod platform;
mod registry;
mod worker;

pub mod sim;

#[cfg(target_os = "espidf")]
pub mod esp;

pub use config::*;
pub use debounce::*;
pub use error::Error;
pub use gpio_state::*;
pub use interrupt::FilteredInterrupt;
pub use platform::*;
pub use registry::{Registry, MAX_INTERRUPTS};

// Debounced any-edge interrupts for esp32.
// The interrupt handler only records the pin level and notifies a single daemon task,
// which runs a per pin state machine with separate settle times toward high and low.
// Committed transitions are counted in a semaphore that application tasks wait on.
