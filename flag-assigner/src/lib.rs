//! Assigns, across a fleet of weighted workers, which worker propagates the
//! ready flag for each distinct partition root.
//!
//! [`balancer::Balancer`] does the work: it reconciles recorded assignments
//! against the registered workers and the roots derived from partition
//! configuration, evicts from over-assigned workers, and hands unclaimed roots
//! to the least relatively loaded worker. Assignments live in etcd under
//! `{prefix}flag-assignments/{partition_id}`.

pub mod assigner;
pub mod balancer;
pub mod config;
pub mod error;
pub mod http;
pub mod memory;
pub mod metrics_consts;
pub mod query;
pub mod registry;
pub mod roots;
pub mod store;
pub mod types;
pub mod worker;
