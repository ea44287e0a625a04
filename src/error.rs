use thiserror::Error;

use crate::platform::PinId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("gpio mode of pin {0} can not read input")]
    NotAnInput(PinId),
    #[error("pull-up and pull-down both requested on pin {0}")]
    ConflictingPulls(PinId),
    #[error("all {0} filtered interrupt slots are in use")]
    RegistryFull(usize),
    #[error("pin {0} is already monitored")]
    PinInUse(PinId),
    #[error("failed to create counting semaphore")]
    SemaphoreCreate,
    #[error("failed to create the state change timer")]
    TimerCreate,
    #[error("failed to spawn the interrupt daemon task: {0}")]
    WorkerSpawn(#[from] std::io::Error),
    #[error("platform call failed with code {0}")]
    Platform(i32),
}

#[cfg(target_os = "espidf")]
impl From<esp_idf_sys::EspError> for Error {
    fn from(err: esp_idf_sys::EspError) -> Self {
        Error::Platform(err.code())
    }
}
