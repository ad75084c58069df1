//! Individual pipeline stage implementations, invoked in the order named by
//! a parsed pipeline spec.

pub mod build;
pub mod confidence;
pub mod fusion;
pub mod plane_validate;
pub mod spatial;
pub mod temporal;
