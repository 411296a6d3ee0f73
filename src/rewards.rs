//! Block-reward accounting, ported from `DPos.AccumulateRewards`.

use crate::config::DbftConfig;

/// `base_reward >> year`, where `year = number / (halving_seconds / block_period)`.
/// Integer division throughout — this must match bit-for-bit or historical
/// state roots diverge.
pub fn accumulate_rewards(config: &DbftConfig, number: u64) -> u128 {
    let blocks_per_year = config.halving_seconds / config.block_period;
    let year = number / blocks_per_year;
    if year >= 128 {
        return 0;
    }
    config.base_reward >> year
}
