//! Thin proxies behind the profile page's widgets.

pub mod github;
pub mod spotify;
pub mod system;
pub mod weather;
