//! Integration-style tests that drive the full calendar generation pipeline
//! in-process, without network or registry access.

mod pipeline_tests;
