// Shared helpers for integration tests. Not every test binary uses all of them.
#![allow(dead_code)]

pub mod daemon_guard;
pub mod fakes;
pub mod polling;
