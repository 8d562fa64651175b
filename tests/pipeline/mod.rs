//! End-to-end pipeline runs.

mod dedup_scenarios;
mod extraction;
mod labeling;
mod partitions;
mod sanitize_scenarios;
