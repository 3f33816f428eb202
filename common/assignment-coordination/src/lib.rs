//! etcd building blocks shared by services that hand out work across a fleet:
//! a prefixed store with JSON and raw-value helpers, leader election, and
//! identifier validation for keys built from user-supplied names.

pub mod error;
pub mod leader_election;
pub mod store;
pub mod util;
