//! Process elevation check
//!
//! Machine-wide uninstall records can only be deleted from an elevated
//! process. Without elevation the tool runs in "limited mode": scanning
//! works, HKLM removals fail with access denied.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Elevation {
    Elevated,
    Limited,
}

impl fmt::Display for Elevation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Elevation::Elevated => write!(f, "administrator"),
            Elevation::Limited => write!(f, "limited mode (HKLM removals will be denied)"),
        }
    }
}

#[cfg(windows)]
pub fn current() -> Elevation {
    use windows::Win32::UI::Shell::IsUserAnAdmin;

    if unsafe { IsUserAnAdmin() }.as_bool() {
        Elevation::Elevated
    } else {
        Elevation::Limited
    }
}

#[cfg(not(windows))]
pub fn current() -> Elevation {
    Elevation::Limited
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_does_not_panic() {
        let elevation = current();
        assert!(!elevation.to_string().is_empty());
    }
}
