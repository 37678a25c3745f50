//! # Process Boundary Layer
//!
//! Everything that leaves the process lives here: running external commands
//! with a composed environment overlay (`executor`), and re-invoking the
//! program itself against another product/variant (`restart`).

pub mod executor;
pub mod restart;
