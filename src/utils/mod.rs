pub mod address;

pub use address::{AccountAddress, AddressError, Fingerprint};
