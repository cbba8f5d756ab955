pub mod status_led;

pub use status_led::StatusLed;
