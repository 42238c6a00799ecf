//! Output quota for devices that are not registered with the service.
//!
//! This is an access policy, separate from the astronomical filter: the
//! processor asks the quota once per run and stops after the returned number
//! of kept records.

use std::collections::HashSet;

// ---

/// Decides how many kept records a run may emit.
pub trait OutputQuota: Send + Sync {
    /// Maximum kept records for `device_id`, or `None` for no limit.
    fn limit_for(&self, device_id: Option<&str>) -> Option<usize>;
}

/// Quota that never truncates.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unlimited;

impl OutputQuota for Unlimited {
    fn limit_for(&self, _device_id: Option<&str>) -> Option<usize> {
        None
    }
}

/// Registered devices run unlimited; everyone else gets `limit` records.
///
/// A `None` limit disables truncation altogether.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceAllowList {
    allowed: HashSet<String>,
    limit: Option<usize>,
}

impl DeviceAllowList {
    // ---
    pub fn new<I, S>(allowed: I, limit: Option<usize>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        // ---
        let allowed = allowed
            .into_iter()
            .map(|id| id.as_ref().trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();

        DeviceAllowList { allowed, limit }
    }

    /// Build from a comma-separated list such as `"2586, 2588,6849"`.
    pub fn parse(list: &str, limit: Option<usize>) -> Self {
        Self::new(list.split(','), limit)
    }

    pub fn is_registered(&self, device_id: &str) -> bool {
        self.allowed.contains(device_id.trim())
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}

impl OutputQuota for DeviceAllowList {
    // ---
    fn limit_for(&self, device_id: Option<&str>) -> Option<usize> {
        match device_id {
            Some(id) if self.is_registered(id) => None,
            _ => self.limit,
        }
    }
}
