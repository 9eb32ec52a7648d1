// Library crate for resetfs: namespace reset fixtures for pool/container-addressed
// distributed filesystems. Re-exports the endpoint, client contract and fixture modules.

pub mod client;
pub mod endpoint;
pub mod fixture;
