//! Session layer: background agent connections (C3), prompt queues (C4),
//! and the manager that owns both plus workspace routing (C5).

pub mod background;
pub mod manager;
pub mod queue;
