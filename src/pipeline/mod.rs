pub mod delivery;
pub mod fetch;
pub mod intake;
pub mod task;

use crate::cli::config::QueueSettings;

// Re-export common types
pub use delivery::DeliveryStage;
pub use fetch::FetchStage;
pub use intake::IntakeState;
pub use task::Task;

/// Names of the two lanes connecting the stages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lanes {
    /// Intake -> fetch
    pub inbound: String,
    /// Fetch -> delivery
    pub outbound: String,
}

impl Lanes {
    pub fn from_settings(settings: &QueueSettings) -> Self {
        Self {
            inbound: settings.inbound_lane.clone(),
            outbound: settings.outbound_lane.clone(),
        }
    }
}

impl Default for Lanes {
    fn default() -> Self {
        Self::from_settings(&QueueSettings::default())
    }
}
