//! Clients for external collaborators.

pub mod vcenter;

pub use vcenter::{VcInventory, VimClient};
