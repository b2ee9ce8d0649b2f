#[cfg(feature = "backend_linux")]
pub mod linux;

#[cfg(feature = "tether_http")]
pub mod http_settings;

pub mod mock;

pub mod utils;
