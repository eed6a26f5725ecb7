//! selfverify CLI Library
//!
//! Runs complete verification flows against simulated collaborators and
//! reports what the controller did.

pub mod output;
pub mod scenario;
