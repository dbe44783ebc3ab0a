//! Application services: the certificate pipeline and the seams it drives.

pub mod batch;
pub mod error;
pub mod export;
pub mod notify;
pub mod roster;
pub mod template;
