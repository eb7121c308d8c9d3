//! Operator console shared by every front-end.
//!
//! The grammar lives in [`grammar`] and is implemented with a token/parse
//! pipeline that stays compatible with `no_std`. [`commands`] turns parsed
//! lines into control requests and [`status`] renders snapshots.

pub mod commands;
pub mod grammar;
pub mod status;
