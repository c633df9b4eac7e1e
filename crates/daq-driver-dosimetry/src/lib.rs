//! Dose-rate meter drivers.
//!
//! This crate provides drivers for two radiation survey instruments:
//! - PRM-9000 Geiger counter (RS-232, streams CPM records)
//! - Thermo RadEye G20 (RS-232, handshake then auto-send)
//!
//! # Usage
//!
//! Add to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! daq-driver-dosimetry = { path = "../daq-driver-dosimetry" }
//! ```
//!
//! Register the factories with your device registry:
//!
//! ```rust,ignore
//! use daq_driver_dosimetry::{Prm9000Factory, RadEyeG20Factory};
//!
//! registry.register_factory(Box::new(Prm9000Factory));
//! registry.register_factory(Box::new(RadEyeG20Factory));
//! ```

pub mod prm9000;
pub mod radeye_g20;

pub use prm9000::{Prm9000Config, Prm9000Driver, Prm9000Factory};
pub use radeye_g20::{RadEyeG20Config, RadEyeG20Driver, RadEyeG20Factory};

/// Force the linker to include this crate.
///
/// Call this function from main() to ensure the driver factories are
/// linked into the final binary and not stripped by the linker.
#[inline(never)]
pub fn link() {
    std::hint::black_box(std::any::TypeId::of::<Prm9000Factory>());
    std::hint::black_box(std::any::TypeId::of::<RadEyeG20Factory>());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_does_not_panic() {
        link();
    }
}
