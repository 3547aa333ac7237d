//! Door policy: per-sender ingress control at the channel gateway.
//!
//! Deny-by-default where it matters: in `card` mode an unknown sender gets a
//! pairing challenge and their row flips to `pending` until an admin-issued
//! code is redeemed.

mod policy;
mod store;

pub use policy::{CheckOutcome, DoorMode, DoorPolicy, PairingOutcome};
pub use store::{DoorPolicyEntry, DoorStore, PairingChallenge, SenderStatus};
