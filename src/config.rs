use serde::{Deserialize, Serialize};

use crate::log::MEMBERS_PREFIX;
use crate::retry::RetryConfig;
use crate::SlotNum;

/// Tunables of a [`Manager`][crate::Manager].
///
/// All fields have defaults, so a host may deserialize a partial
/// configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identity of the local member, the last component of its membership
    /// path.
    pub self_id: String,

    /// Number of voters assumed while the log holds no membership yet.
    pub cluster_size_hint: usize,

    /// Slot the first local proposal goes to if the log is empty.
    pub start_slot: SlotNum,

    /// Distance between a slot and the log version its membership is read at.
    ///
    /// With the default of `1`, slot `n` waits for the decision of slot `n - 1`
    /// to be applied. Larger windows let that many slots be settled
    /// concurrently at the cost of membership changes taking effect later.
    pub window: u64,

    /// Path prefix of membership entries.
    pub members_prefix: String,

    /// Number of decided and applied instances kept to absorb late messages.
    pub retain_decided: u64,

    /// How far past the log version inbound messages may reach. Messages for
    /// later slots are dropped rather than parked until the log catches up.
    pub max_lookahead: u64,

    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            self_id: String::new(),
            cluster_size_hint: 1,
            start_slot: 1,
            window: 1,
            members_prefix: MEMBERS_PREFIX.to_owned(),
            retain_decided: 1024,
            max_lookahead: 1024,
            retry: RetryConfig::default(),
        }
    }
}
