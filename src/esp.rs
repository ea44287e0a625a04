//! ESP-IDF backend: FreeRTOS semaphores, `esp_timer` one-shots and the shared GPIO ISR service

use core::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

use esp_idf_hal::gpio::{InterruptType, Pin};
use esp_idf_sys::c_types::c_void;
use esp_idf_sys::{
    configTICK_RATE_HZ, esp, esp_err_t, esp_timer_create, esp_timer_create_args_t,
    esp_timer_delete, esp_timer_dispatch_t_ESP_TIMER_TASK, esp_timer_handle_t,
    esp_timer_start_once, esp_timer_stop, gpio_config, gpio_config_t, gpio_get_level,
    gpio_install_isr_service, gpio_isr_handler_add, gpio_isr_handler_remove,
    gpio_mode_t_GPIO_MODE_INPUT, gpio_mode_t_GPIO_MODE_INPUT_OUTPUT,
    gpio_mode_t_GPIO_MODE_INPUT_OUTPUT_OD, gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
    gpio_pulldown_t_GPIO_PULLDOWN_ENABLE, gpio_pullup_t_GPIO_PULLUP_DISABLE,
    gpio_pullup_t_GPIO_PULLUP_ENABLE, gpio_reset_pin, uxQueueMessagesWaiting, vQueueDelete,
    xQueueCreateCountingSemaphore, xQueueGenericCreate, xQueueGenericSend, xQueueGiveFromISR,
    xQueueSemaphoreTake, xTaskGetTickCount, xTaskGetTickCountFromISR, BaseType_t, QueueHandle_t,
    UBaseType_t, ESP_ERR_INVALID_STATE, ESP_OK,
};
use log::warn;

use crate::config::{InterruptConfig, PinMode};
use crate::error::Error;
use crate::interrupt::FilteredInterrupt;
use crate::platform::{CountingSemaphore, OneShotTimer, PinId, Platform, SlotId, Ticks};
use crate::registry::Registry;

const QUEUE_TYPE_BINARY_SEMAPHORE: u8 = 3;
const QUEUE_SEND_TO_BACK: BaseType_t = 0;

const OK: esp_err_t = ESP_OK as esp_err_t;
const INVALID_STATE: esp_err_t = ESP_ERR_INVALID_STATE as esp_err_t;

/// The registry every ESP filtered interrupt lives in
pub static REGISTRY: Registry<EspPlatform> = Registry::new(EspPlatform { _private: () });

pub type EspFilteredInterrupt = FilteredInterrupt<EspPlatform>;

impl FilteredInterrupt<EspPlatform> {
    /// Filter edges of `gpio` in the process wide [`REGISTRY`]
    ///
    /// # Example - bed sensor on pin 3, active low with pull-up, 20 ms each way
    /// ```ignore
    /// let pins = Peripherals::take().unwrap().pins;
    /// let bed = EspFilteredInterrupt::on_pin(
    ///     &pins.gpio3,
    ///     InterruptConfig::new().debounce(2).pull_up(true).inverse_logic(true),
    /// )?;
    ///
    /// loop {
    ///     if bed.wait_for_single_interrupt(1000) {
    ///         println!("bed is now {}", bed.state());
    ///     }
    /// }
    /// ```
    pub fn on_pin<T: Pin>(gpio: &T, config: InterruptConfig) -> Result<Self, Error> {
        Self::new(&REGISTRY, gpio.pin(), config)
    }
}

static ISR_SERVICE_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Install the shared GPIO ISR service once per process
fn install_isr_service() -> Result<(), Error> {
    if ISR_SERVICE_INSTALLED.load(Ordering::Acquire) {
        return Ok(());
    }

    match unsafe { gpio_install_isr_service(0) } {
        OK => {}
        INVALID_STATE => {
            warn!(target: "filtered_interrupt", "gpio isr service was installed by someone else");
        }
        err => return Err(Error::Platform(err)),
    }

    ISR_SERVICE_INSTALLED.store(true, Ordering::Release);
    Ok(())
}

fn ticks_to_micros(ticks: Ticks) -> u64 {
    u64::from(ticks) * 1_000_000 / u64::from(configTICK_RATE_HZ)
}

/// GPIO edge handler, the argument is the slot id
#[inline(always)]
#[link_section = ".iram1.filtered_interrupt"]
unsafe extern "C" fn edge_isr(arg: *mut c_void) {
    REGISTRY.on_edge(arg as SlotId);
}

unsafe extern "C" fn timer_expired(arg: *mut c_void) {
    REGISTRY.on_timer_expiry(arg as SlotId);
}

/// Hardware and FreeRTOS access. Only [`REGISTRY`] holds one.
pub struct EspPlatform {
    _private: (),
}

pub struct EspSemaphore(QueueHandle_t);

// FreeRTOS queues are safe to use from any task and from interrupts
unsafe impl Send for EspSemaphore {}
unsafe impl Sync for EspSemaphore {}

impl CountingSemaphore for EspSemaphore {
    fn give(&self) {
        unsafe {
            xQueueGenericSend(self.0, ptr::null(), 0, QUEUE_SEND_TO_BACK);
        }
    }

    #[inline(always)]
    #[link_section = ".iram1.filtered_interrupt"]
    fn give_from_isr(&self) -> bool {
        let mut higher_prio_task_woken: BaseType_t = Default::default();
        unsafe {
            xQueueGiveFromISR(self.0, &mut higher_prio_task_woken as *mut _);
        }
        higher_prio_task_woken != 0
    }

    fn take(&self, timeout: Ticks) -> bool {
        unsafe { xQueueSemaphoreTake(self.0, timeout) != 0 }
    }

    fn count(&self) -> u32 {
        unsafe { uxQueueMessagesWaiting(self.0) }
    }
}

impl Drop for EspSemaphore {
    fn drop(&mut self) {
        unsafe { vQueueDelete(self.0) }
    }
}

pub struct EspTimer(esp_timer_handle_t);

unsafe impl Send for EspTimer {}
unsafe impl Sync for EspTimer {}

impl OneShotTimer for EspTimer {
    fn arm(&self, ticks: Ticks) {
        unsafe {
            // fails harmlessly when the timer is not running
            esp_timer_stop(self.0);
            esp_timer_start_once(self.0, ticks_to_micros(ticks));
        }
    }

    fn cancel(&self) {
        unsafe {
            esp_timer_stop(self.0);
        }
    }
}

impl Drop for EspTimer {
    fn drop(&mut self) {
        unsafe {
            esp_timer_stop(self.0);
            esp_timer_delete(self.0);
        }
    }
}

impl Platform for EspPlatform {
    type Semaphore = EspSemaphore;
    type Timer = EspTimer;

    fn counting_semaphore(&self) -> Result<EspSemaphore, Error> {
        let handle = unsafe { xQueueCreateCountingSemaphore(UBaseType_t::MAX, 0) };
        if handle.is_null() {
            return Err(Error::SemaphoreCreate);
        }
        Ok(EspSemaphore(handle))
    }

    fn binary_semaphore(&self) -> Result<EspSemaphore, Error> {
        let handle = unsafe { xQueueGenericCreate(1, 0, QUEUE_TYPE_BINARY_SEMAPHORE) };
        if handle.is_null() {
            return Err(Error::SemaphoreCreate);
        }
        Ok(EspSemaphore(handle))
    }

    fn one_shot_timer(
        &self,
        registry: &'static Registry<Self>,
        slot: SlotId,
    ) -> Result<EspTimer, Error> {
        debug_assert!(ptr::eq(registry, &REGISTRY));

        let args = esp_timer_create_args_t {
            callback: Some(timer_expired),
            arg: slot as *mut c_void,
            dispatch_method: esp_timer_dispatch_t_ESP_TIMER_TASK,
            name: b"filtered-int\0".as_ptr() as *const _,
            skip_unhandled_events: false,
        };
        let mut handle: esp_timer_handle_t = ptr::null_mut();
        esp!(unsafe { esp_timer_create(&args, &mut handle) }).map_err(|_| Error::TimerCreate)?;

        Ok(EspTimer(handle))
    }

    fn configure_input(&self, pin: PinId, config: &InterruptConfig) -> Result<(), Error> {
        let mode = match config.mode {
            PinMode::Input => gpio_mode_t_GPIO_MODE_INPUT,
            PinMode::InputOutput => gpio_mode_t_GPIO_MODE_INPUT_OUTPUT,
            PinMode::InputOutputOpenDrain => gpio_mode_t_GPIO_MODE_INPUT_OUTPUT_OD,
            PinMode::Disabled | PinMode::Output => return Err(Error::NotAnInput(pin)),
        };

        let gpio = gpio_config_t {
            pin_bit_mask: 1u64 << pin,
            mode,
            pull_up_en: if config.pull_up {
                gpio_pullup_t_GPIO_PULLUP_ENABLE
            } else {
                gpio_pullup_t_GPIO_PULLUP_DISABLE
            },
            pull_down_en: if config.pull_down {
                gpio_pulldown_t_GPIO_PULLDOWN_ENABLE
            } else {
                gpio_pulldown_t_GPIO_PULLDOWN_DISABLE
            },
            intr_type: InterruptType::AnyEdge.into(),
        };

        esp!(unsafe { gpio_config(&gpio) })?;
        Ok(())
    }

    #[inline(always)]
    #[link_section = ".iram1.filtered_interrupt"]
    fn read_level(&self, pin: PinId) -> bool {
        unsafe { gpio_get_level(pin) != 0 }
    }

    fn attach_isr(
        &self,
        pin: PinId,
        registry: &'static Registry<Self>,
        slot: SlotId,
    ) -> Result<(), Error> {
        debug_assert!(ptr::eq(registry, &REGISTRY));

        install_isr_service()?;
        esp!(unsafe { gpio_isr_handler_add(pin, Some(edge_isr), slot as *mut c_void) })?;
        Ok(())
    }

    fn detach_isr(&self, pin: PinId) {
        unsafe {
            gpio_isr_handler_remove(pin);
        }
    }

    fn reset_pin(&self, pin: PinId) {
        unsafe {
            gpio_reset_pin(pin);
        }
    }

    #[inline(always)]
    fn yield_from_isr(&self) {
        unsafe { esp_idf_sys::vPortEvaluateYieldFromISR(0) }
    }

    fn now(&self) -> Ticks {
        unsafe { xTaskGetTickCount() }
    }

    #[inline(always)]
    #[link_section = ".iram1.filtered_interrupt"]
    fn now_from_isr(&self) -> Ticks {
        unsafe { xTaskGetTickCountFromISR() }
    }
}
