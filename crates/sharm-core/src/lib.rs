//! Spherical harmonic synthesis and analysis.
//!
//! Coefficients live in an order-major [`modules::Shc`] store that can be
//! split by order across the ranks of a [`modules::Communicator`]. Synthesis
//! ([`modules::shs`]) and analysis ([`modules::sha`]) sweep the orders in
//! blocks, so distributed stores and row-distributed grids need no global
//! copy of either.

pub mod common;
pub mod domain;
pub mod modules;
pub mod numerics;
