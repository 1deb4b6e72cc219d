//! Local tracking store

pub mod init;

pub use init::*;
