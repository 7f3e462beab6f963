pub mod client;
pub mod protocol;
pub mod records;

#[cfg(test)]
mod model;

pub use client::{AmiClient, AmiReply, AmiSettings, SessionState};
pub use records::{
    ActiveCalls, CallRecord, Channel, Extension, ExtensionStatus, Peer, PeerStatistics,
};
