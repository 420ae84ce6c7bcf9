//! Chat domain: the color pool, the event bus and presence reporting.

pub mod broadcast;
pub mod colors;
pub mod presence;
