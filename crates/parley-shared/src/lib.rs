//! Types shared by the Parley sync engine and anything speaking its wire
//! protocol.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;
