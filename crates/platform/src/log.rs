//! Logging macros shared by the core crates.
//!
//! The macros expand in the calling crate, so the `cfg(feature = ...)` checks
//! below test the *caller's* features. Every crate that logs declares:
//!
//! ```toml
//! [features]
//! defmt   = ["dep:defmt"]    # hardware: RTT via defmt
//! tracing = ["dep:tracing"]  # host simulation
//! ```
//!
//! With neither feature enabled the macros expand to nothing, which is what
//! the interrupt handlers want on a production image.
//!
//! Arguments must implement both `defmt::Format` and `core::fmt::Display`;
//! in practice that means integers, `bool` and `&str`. Stick to `{}` and
//! `{:#x}`, which both backends parse the same way.

/// Log at trace level.
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::trace!($($arg)*);
        #[cfg(feature = "tracing")]
        ::tracing::trace!($($arg)*);
    }};
}

/// Log at debug level.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::debug!($($arg)*);
        #[cfg(feature = "tracing")]
        ::tracing::debug!($($arg)*);
    }};
}

/// Log at info level.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::info!($($arg)*);
        #[cfg(feature = "tracing")]
        ::tracing::info!($($arg)*);
    }};
}

/// Log at warn level.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::warn!($($arg)*);
        #[cfg(feature = "tracing")]
        ::tracing::warn!($($arg)*);
    }};
}

/// Log at error level.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::error!($($arg)*);
        #[cfg(feature = "tracing")]
        ::tracing::error!($($arg)*);
    }};
}
