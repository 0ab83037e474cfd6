#![forbid(unsafe_code)]

//! # libhtc
//!
//! The core of htc: submit an HTCondor job description to a remote access
//! point and follow its log file. Encapsulates:
//!
//! - Locating the `log = ...` directive in a job description
//! - Copying files and running commands on the access point over OpenSSH
//! - A single long-lived remote `tail -f` mirrored into a local file
//! - The submission workflow tying the above together

pub mod config;
pub mod log;
pub mod submit;
pub mod tail;
pub mod transport;
