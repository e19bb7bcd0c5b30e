use std::str::FromStr;

use serde::Deserialize;

/// Whether created resources are removed once a task stops.
///
/// - `Cleanup`: stop and remove everything the task created (default).
/// - `DontCleanup`: leave containers in place and print the commands needed
///   to remove them by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupOption {
    #[default]
    Cleanup,
    DontCleanup,
}

impl CleanupOption {
    pub fn from_disabled_flag(disabled: bool) -> Self {
        if disabled {
            CleanupOption::DontCleanup
        } else {
            CleanupOption::Cleanup
        }
    }
}

/// How container output is presented.
///
/// - `Quiet`: only the main container's output is shown.
/// - `Simple`: main container output plus progress lines for every step (default).
/// - `All`: output of every container, prefixed with the container name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStyle {
    Quiet,
    #[default]
    Simple,
    All,
}

impl FromStr for OutputStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "quiet" => Ok(OutputStyle::Quiet),
            "simple" => Ok(OutputStyle::Simple),
            "all" => Ok(OutputStyle::All),
            other => Err(format!(
                "invalid output style: {other} (expected \"quiet\", \"simple\" or \"all\")"
            )),
        }
    }
}
