//! End-to-end tests through the public tree API.
//!
//! Each test file covers a specific scenario, using deterministic inputs
//! against file-backed or in-memory trees of degree 6 so that a handful of
//! keys already exercises splits and merges.

#![cfg(test)]

mod helpers;

mod test_concurrency;
mod test_model;
mod test_multimap_scenario;
mod test_persistence;
mod test_range;
mod test_root_split;
mod test_routes;
mod test_underflow;
