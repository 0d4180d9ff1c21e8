//! Format component types.
//!
//! Contains the wire-exact page representation and the reassembled packet
//! value passed between the framing layer and codec-level consumers.

pub mod packet;
pub mod page;
