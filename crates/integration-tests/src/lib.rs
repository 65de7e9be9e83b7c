//! Integration tests for the marketplace cart.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p marketplace-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `cart_http_source` - HTTP cart source against a mock cart API
//! - `cart_store_flow` - Cart store end to end over HTTP
//! - `analytics_collector` - Analytics events posted to a collector
//!
//! No external services are needed; every test starts its own
//! `wiremock` server.
