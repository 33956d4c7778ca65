//! box CLI library: command definitions and dispatch.

pub mod commands;
