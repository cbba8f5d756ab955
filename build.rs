use std::env;

fn main() {
    // Pass CPU frequency for timing calculations
    println!("cargo:rustc-env=MCU_FREQ_HZ=16000000");
    println!("cargo:rerun-if-changed=build.rs");

    // The scheduling core also builds on the host for unit tests; only the
    // device build needs the AVR linker setup.
    let target = env::var("TARGET").unwrap_or_default();
    if !target.contains("avr") {
        return;
    }

    println!("cargo:rustc-link-arg=-mmcu=atmega128");

    if env::var("CARGO_FEATURE_ATMEGA128").is_err() {
        println!("cargo:warning=Building for AVR without the `atmega128` feature, no device support will be linked");
    }
}
