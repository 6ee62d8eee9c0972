//! Lifesign LED: a short heartbeat that shows the firmware is running.
//!
//! Driven once per second from the slow callback table. The LED is lit for
//! one second out of every four.

use core::cell::RefCell;
use core::convert::Infallible;

use critical_section::Mutex;
use embedded_hal::digital::{OutputPin, PinState};

/// The board LED, as a type-erased infallible GPIO.
pub type LifesignLed = dyn OutputPin<Error = Infallible> + Send;

/// Seconds between the starts of two flashes.
const PERIOD_S: u32 = 4;

/// The node's heartbeat, ticked by [`on_second`].
pub static LIFESIGN: Lifesign = Lifesign::new();

/// Slow-table callback: one heartbeat second.
pub fn on_second(_status: u8) {
    LIFESIGN.tick();
}

struct LifesignState {
    led: Option<&'static mut LifesignLed>,
    seconds: u32,
    lit: bool,
}

/// Heartbeat state shared between the slow tick and background code.
pub struct Lifesign {
    state: Mutex<RefCell<LifesignState>>,
}

impl Lifesign {
    /// No LED attached, second counter at zero.
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(LifesignState {
                led: None,
                seconds: 0,
                lit: false,
            })),
        }
    }

    /// Drive `led` from now on. Returns the previously attached LED.
    ///
    /// The LED is set to the current state straight away.
    pub fn attach(&self, led: &'static mut LifesignLed) -> Option<&'static mut LifesignLed> {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            led.set_state(PinState::from(state.lit)).ok();
            state.led.replace(led)
        })
    }

    /// Stop driving the LED and hand it back.
    pub fn detach(&self) -> Option<&'static mut LifesignLed> {
        critical_section::with(|cs| self.state.borrow_ref_mut(cs).led.take())
    }

    /// Advance by one second and update the LED.
    pub fn tick(&self) {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            state.seconds = state.seconds.wrapping_add(1);
            let lit = state.seconds.wrapping_rem(PERIOD_S) == 0;
            state.lit = lit;
            if let Some(led) = state.led.as_deref_mut() {
                led.set_state(PinState::from(lit)).ok();
            }
        });
    }

    /// Restart the pattern with the LED off.
    pub fn reset(&self) {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            state.seconds = 0;
            state.lit = false;
            if let Some(led) = state.led.as_deref_mut() {
                led.set_low().ok();
            }
        });
    }

    /// `true` while the LED is on.
    pub fn is_lit(&self) -> bool {
        critical_section::with(|cs| self.state.borrow_ref(cs).lit)
    }

    /// Seconds counted since the last reset (wrapping).
    pub fn seconds(&self) -> u32 {
        critical_section::with(|cs| self.state.borrow_ref(cs).seconds)
    }
}

impl Default for Lifesign {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::boxed::Box;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use embedded_hal::digital::ErrorType;

    use super::*;

    struct Led(Arc<AtomicBool>);

    impl ErrorType for Led {
        type Error = Infallible;
    }

    impl OutputPin for Led {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.0.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn leaked_led() -> (Arc<AtomicBool>, &'static mut LifesignLed) {
        let level = Arc::new(AtomicBool::new(true));
        (level.clone(), Box::leak(Box::new(Led(level))))
    }

    #[test]
    fn lit_one_second_in_four() {
        let lifesign = Lifesign::new();
        let pattern: std::vec::Vec<bool> = (0..8)
            .map(|_| {
                lifesign.tick();
                lifesign.is_lit()
            })
            .collect();
        assert_eq!(
            pattern,
            [false, false, false, true, false, false, false, true]
        );
    }

    #[test]
    fn attached_led_follows_the_pattern() {
        let lifesign = Lifesign::new();
        let (level, led) = leaked_led();
        assert!(lifesign.attach(led).is_none());
        assert!(!level.load(Ordering::SeqCst), "set off on attach");

        for _ in 0..4 {
            lifesign.tick();
        }
        assert!(level.load(Ordering::SeqCst));
        lifesign.tick();
        assert!(!level.load(Ordering::SeqCst));
    }

    #[test]
    fn reset_turns_the_led_off() {
        let lifesign = Lifesign::new();
        let (level, led) = leaked_led();
        lifesign.attach(led);
        for _ in 0..4 {
            lifesign.tick();
        }
        lifesign.reset();
        assert!(!level.load(Ordering::SeqCst));
        assert_eq!(lifesign.seconds(), 0);
    }

    #[test]
    fn detached_led_is_left_alone() {
        let lifesign = Lifesign::new();
        let (level, led) = leaked_led();
        lifesign.attach(led);
        assert!(lifesign.detach().is_some());
        for _ in 0..4 {
            lifesign.tick();
        }
        assert!(lifesign.is_lit());
        assert!(!level.load(Ordering::SeqCst));
    }
}
