//! C2 (zone-transfer client) and C3 (update client): the two outbound
//! TSIG-signed exchanges Hive makes against a primary DNS server.

mod transfer;
mod update;

pub use transfer::read_zone;
pub use update::{write_update, Mapping};
