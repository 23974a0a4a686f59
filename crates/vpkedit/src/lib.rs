//! Command line front end for the `vpkedit_vpk` library.

pub mod commands;
