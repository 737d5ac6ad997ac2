//! Message hooks pipeline (C10): discovery of YAML-declared external-command
//! hooks and their application to outbound user prompts.

pub mod discovery;
pub mod pipeline;
