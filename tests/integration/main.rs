//! Integration tests with mock HTTP server

mod adapters;
mod executors;
mod mock_server;
