//! Application layer coordinating the marketplace use cases.
//!
//! [`ledger::Ledger`] owns the persisted state and serializes every write.
//! [`orchestrator::Orchestrator`] drives payments and reviews on top of it,
//! talking to the outside world only through the ports in [`crate::domain::ports`].

pub mod ledger;
pub mod orchestrator;
pub mod rating;
