//! Scanner defense (C9): per-IP abuse tracking and blocking for the
//! externally reachable listener.

pub mod defense;
