//! Launch strategy selection.
//!
//! Decides, once per process, whether to relaunch at all and whether the
//! relaunch goes through the registered-application launcher or executes
//! the packaged binary directly. Environment markers always supersede the
//! capability-based default.

use serde::Deserialize;
use tracing::{debug, info_span};

use crate::markers::EnvMarkers;
use crate::orchestrator::LaunchStrategy;

/// Protected resources an application may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Camera access.
    Camera,
    /// Microphone access.
    Microphone,
    /// Location services.
    Location,
    /// User file access outside the sandbox container.
    Files,
    /// Outbound network access.
    Network,
    /// App sandbox entitlement.
    Sandbox,
}

impl Capability {
    /// Whether the platform only grants this capability to a process that
    /// was started as a registered application.
    #[must_use]
    pub fn requires_registered_launch(self) -> bool {
        matches!(
            self,
            Self::Camera | Self::Microphone | Self::Location | Self::Files
        )
    }
}

/// Pick the launch strategy for this process.
///
/// Returns `None` when the no-relaunch marker is set: the process is
/// itself a relaunched child and must run in place.
#[must_use]
pub fn select_strategy(markers: &EnvMarkers, capabilities: &[Capability]) -> Option<LaunchStrategy> {
    let _span = info_span!("select_strategy", capabilities = capabilities.len()).entered();

    if markers.no_relaunch {
        debug!("no-relaunch marker set; running in place");
        return None;
    }

    if markers.force_direct {
        debug!("direct execution forced");
        return Some(LaunchStrategy::Direct);
    }

    if markers.force_launch_services {
        debug!("registered launch forced");
        return Some(LaunchStrategy::Indirect);
    }

    let strategy = if capabilities
        .iter()
        .any(|capability| capability.requires_registered_launch())
    {
        LaunchStrategy::Indirect
    } else {
        LaunchStrategy::Direct
    };
    debug!(?strategy, "strategy selected from capabilities");
    Some(strategy)
}
