//! Integration Tests Module
//!
//! End-to-end tests for the annotation services. Providers are either a
//! scripted double (`support`) or real `HttpProvider`s pointed at a local
//! mock server.

// Scripted provider and response builders
mod support;

// Tool-calling loop, supersession and checkpoint restore
mod analyzer_test;

// Streaming block extraction and stream-end recovery
mod block_analysis_test;

// Vendor protocols over HTTP
mod http_provider_test;
