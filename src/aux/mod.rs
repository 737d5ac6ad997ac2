//! Auxiliary agent (C7): a single shared utility `BackgroundSession`-like
//! connection used to synthesise titles, polished prompts, and follow-up
//! suggestions.

pub mod agent;
