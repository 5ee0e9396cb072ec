use std::env;
use std::time::{SystemTime, UNIX_EPOCH};

// Fingerprint source port ------------------------------------------------------------------------

///
/// Source of the data written as application software fingerprint.
///
/// Passed to the engine explicitly so that programming sequences stay deterministic under
/// test. Date is `[year % 100, month, day]`, time is `[hour, minute, second]`.
///
pub trait FingerprintSource {
    fn date(&self) -> [u8; 3];

    fn time(&self) -> [u8; 3];

    /// Name of the user performing the update; `None` if it cannot be determined
    fn user_name(&self) -> Option<String>;
}

// System implementation --------------------------------------------------------------------------

///
/// Fingerprint source using the local wall clock and the process environment.
///
pub struct SystemFingerprintSource;

impl SystemFingerprintSource {
    pub fn new() -> SystemFingerprintSource {
        SystemFingerprintSource
    }

    fn local_time() -> libc::tm {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as libc::time_t;

        let mut tm: libc::tm = unsafe { std::mem::zeroed() };
        unsafe {
            libc::localtime_r(&seconds, &mut tm);
        }
        tm
    }
}

impl Default for SystemFingerprintSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FingerprintSource for SystemFingerprintSource {
    fn date(&self) -> [u8; 3] {
        let tm = Self::local_time();
        [
            ((tm.tm_year + 1900) % 100) as u8,
            (tm.tm_mon + 1) as u8,
            tm.tm_mday as u8,
        ]
    }

    fn time(&self) -> [u8; 3] {
        let tm = Self::local_time();
        [tm.tm_hour as u8, tm.tm_min as u8, tm.tm_sec as u8]
    }

    fn user_name(&self) -> Option<String> {
        env::var("USER")
            .or_else(|_| env::var("USERNAME"))
            .ok()
            .filter(|name| !name.is_empty())
    }
}

// Fixed implementation ---------------------------------------------------------------------------

///
/// Fingerprint source with fixed values, for tests and reproducible runs.
///
pub struct FixedFingerprintSource {
    pub date: [u8; 3],
    pub time: [u8; 3],
    pub user_name: Option<String>,
}

impl FixedFingerprintSource {
    pub fn new(date: [u8; 3], time: [u8; 3], user_name: &str) -> FixedFingerprintSource {
        FixedFingerprintSource {
            date,
            time,
            user_name: Some(user_name.to_string()),
        }
    }

    /// Source without a user name (the engine substitutes "unknown" and reports a warning)
    pub fn without_user_name(date: [u8; 3], time: [u8; 3]) -> FixedFingerprintSource {
        FixedFingerprintSource {
            date,
            time,
            user_name: None,
        }
    }
}

impl FingerprintSource for FixedFingerprintSource {
    fn date(&self) -> [u8; 3] {
        self.date
    }

    fn time(&self) -> [u8; 3] {
        self.time
    }

    fn user_name(&self) -> Option<String> {
        self.user_name.clone()
    }
}

// Tests ------------------------------------------------------------------------------------------
