//! Race discovery: finding active rooms and reconciling the supervisor
//! against them

pub mod poller;
pub mod provider;

pub use poller::{DiscoveryDiff, DiscoveryPoller, DiscoveryTracker, PollReport};
pub use provider::{HttpRaceDiscovery, RaceDiscovery};

#[cfg(test)]
pub use provider::MockRaceDiscovery;
