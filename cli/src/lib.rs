//! Mirrorpack CLI - incremental offline archives of mirrored images.

pub mod commands;
pub mod output;
