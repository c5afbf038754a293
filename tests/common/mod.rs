#![allow(dead_code)]

pub mod fakes;
pub mod mock_server;
pub mod tracing;
