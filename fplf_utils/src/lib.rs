//! Small helpers shared between the controller and the offline tools.

mod mac_address;
pub mod unix_time;

pub use mac_address::{MacAddr, MacParseError};
