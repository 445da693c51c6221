//! Calendar provider identifiers

use serde::{Deserialize, Serialize};

use crate::impl_status_conversions;

/// External calendar provider an integration talks to.
///
/// `Google` and `Microsoft` authenticate through OAuth 2.0; `Apple` speaks
/// CalDAV with an app-specific password.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalendarProvider {
    Google,
    Microsoft,
    Apple,
}

impl_status_conversions!(CalendarProvider {
    Google => "google",
    Microsoft => "microsoft",
    Apple => "apple",
});

impl CalendarProvider {
    /// All supported providers.
    pub const ALL: [Self; 3] = [Self::Google, Self::Microsoft, Self::Apple];

    /// Stable identifier used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Microsoft => "microsoft",
            Self::Apple => "apple",
        }
    }

    /// Whether the provider uses a browser redirect flow.
    pub fn uses_oauth(&self) -> bool {
        !matches!(self, Self::Apple)
    }
}
