//! Small shared utilities for `esb`.
//!
//! Nothing in here knows about bundlers or type checkers, take care to keep it that way.

pub mod cancel;
pub mod env;
pub mod hash;
pub mod id_gen;
pub mod path;
