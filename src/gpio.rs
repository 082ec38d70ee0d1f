//! GPIO output for [`DeviceCommand`]s on the ESP32.
//!
//! Digital writes drive the pin directly. PWM and analog writes share the
//! LEDC peripheral: low-speed timer 0 at 5 kHz, 8-bit resolution, one
//! channel per pin on first use.

use crate::command::DeviceCommand;
use esp_idf_sys::{self as sys, esp, EspError};
use log::{debug, info};

const PWM_FREQUENCY_HZ: u32 = 5000;
const SPEED_MODE: sys::ledc_mode_t = sys::ledc_mode_t_LEDC_LOW_SPEED_MODE;
const TIMER: sys::ledc_timer_t = sys::ledc_timer_t_LEDC_TIMER_0;
const MAX_CHANNELS: usize = 8;

/// Applies device commands to real pins.
pub struct EspGpio {
    timer_ready: bool,
    /// Pin bound to each LEDC channel.
    channels: [Option<u8>; MAX_CHANNELS],
    next_evict: usize,
}

impl EspGpio {
    pub fn new() -> Self {
        Self {
            timer_ready: false,
            channels: [None; MAX_CHANNELS],
            next_evict: 0,
        }
    }

    pub fn apply(&mut self, command: &DeviceCommand) -> Result<(), EspError> {
        match *command {
            DeviceCommand::DigitalWrite { pin, high } => self.write_digital(pin, high),
            DeviceCommand::Led { on } => self.write_digital(command.pin(), on),
            DeviceCommand::PwmWrite { pin, duty } => self.write_duty(pin, duty),
            DeviceCommand::AnalogWrite { pin, value } => self.write_duty(pin, value),
        }
    }

    fn write_digital(&mut self, pin: u8, high: bool) -> Result<(), EspError> {
        let gpio = i32::from(pin);
        unsafe {
            esp!(sys::gpio_reset_pin(gpio))?;
            esp!(sys::gpio_set_direction(gpio, sys::gpio_mode_t_GPIO_MODE_OUTPUT))?;
            esp!(sys::gpio_set_level(gpio, u32::from(high)))?;
        }
        for slot in self.channels.iter_mut().filter(|p| **p == Some(pin)) {
            *slot = None;
        }
        debug!("GPIO {} -> {}", pin, if high { "HIGH" } else { "LOW" });
        Ok(())
    }

    fn write_duty(&mut self, pin: u8, duty: u8) -> Result<(), EspError> {
        let channel = self.channel_for(pin)?;
        unsafe {
            esp!(sys::ledc_set_duty(SPEED_MODE, channel, u32::from(duty)))?;
            esp!(sys::ledc_update_duty(SPEED_MODE, channel))?;
        }
        debug!("GPIO {} duty {}", pin, duty);
        Ok(())
    }

    fn channel_for(&mut self, pin: u8) -> Result<sys::ledc_channel_t, EspError> {
        if let Some(index) = self.channels.iter().position(|p| *p == Some(pin)) {
            return Ok(index as sys::ledc_channel_t);
        }

        if !self.timer_ready {
            let timer = sys::ledc_timer_config_t {
                speed_mode: SPEED_MODE,
                duty_resolution: sys::ledc_timer_bit_t_LEDC_TIMER_8_BIT,
                timer_num: TIMER,
                freq_hz: PWM_FREQUENCY_HZ,
                ..Default::default()
            };
            esp!(unsafe { sys::ledc_timer_config(&timer) })?;
            self.timer_ready = true;
        }

        // Free channel, else the one bound longest ago
        let index = match self.channels.iter().position(Option::is_none) {
            Some(free) => free,
            None => {
                let index = self.next_evict;
                self.next_evict = (index + 1) % MAX_CHANNELS;
                if let Some(old) = self.channels[index] {
                    info!("LEDC channels exhausted, releasing GPIO {}", old);
                }
                index
            }
        };
        self.channels[index] = Some(pin);
        let channel = index as sys::ledc_channel_t;

        let config = sys::ledc_channel_config_t {
            gpio_num: i32::from(pin),
            speed_mode: SPEED_MODE,
            channel,
            timer_sel: TIMER,
            duty: 0,
            hpoint: 0,
            ..Default::default()
        };
        esp!(unsafe { sys::ledc_channel_config(&config) })?;
        Ok(channel)
    }
}

impl Default for EspGpio {
    fn default() -> Self {
        Self::new()
    }
}
