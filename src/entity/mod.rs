//! Entity behaviors
//!
//! Devices and apps are scheduler processes. They reach the broker only
//! through the non-blocking ports in [`crate::messaging`], so a behavior never
//! waits on I/O while the logical clock is running.
//!
//! | Entity | Ports | Tick |
//! |--------|-------|------|
//! | [`DeviceBehavior`] | publish, receive-commands | 1s |
//! | [`AppBehavior`] | subscribe, send-commands | 0.5s |
//!
//! A device's readings come from its [`DeviceProfile`]; [`Streetlight`] models
//! the smart streetlight demo.

pub mod app;
pub mod device;
pub mod streetlight;

pub use app::*;
pub use device::*;
pub use streetlight::*;
