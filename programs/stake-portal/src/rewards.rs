//! Display-side estimate of staking points. The staking contract holds the
//! authoritative balance; this mirrors its integer arithmetic.

use crate::state::{
    MINTER_BONUS_POINTS, MULTIPLIER_NFT_THRESHOLD, POINTS_PER_NFT_PER_DAY, SECONDS_PER_DAY,
};

/// `nfts * 5 * days`, plus 1000 for minters, doubled when holding 10 or more.
pub fn calculate_staking_rewards(nfts: u64, days: u64, is_minter: bool) -> u64 {
    let mut points = nfts
        .saturating_mul(POINTS_PER_NFT_PER_DAY)
        .saturating_mul(days);
    if is_minter {
        points = points.saturating_add(MINTER_BONUS_POINTS);
    }
    if nfts >= MULTIPLIER_NFT_THRESHOLD {
        points = points.saturating_mul(2);
    }
    points
}

/// Whole days between two unix timestamps (seconds), never negative.
pub fn days_elapsed(since: i64, now: i64) -> u64 {
    if now <= since {
        return 0;
    }
    ((now - since) / SECONDS_PER_DAY) as u64
}

/// Points accrued by `nfts` staked at `staked_at` as of `now`.
pub fn estimate_accrued(nfts: u64, staked_at: i64, now: i64, is_minter: bool) -> u64 {
    calculate_staking_rewards(nfts, days_elapsed(staked_at, now), is_minter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documented_examples() {
        assert_eq!(calculate_staking_rewards(10, 30, false), 3000);
        assert_eq!(calculate_staking_rewards(3, 10, true), 1150);
    }

    #[test]
    fn base_formula_below_multiplier_threshold() {
        for nfts in 0..10 {
            for days in [0, 1, 7, 365] {
                assert_eq!(calculate_staking_rewards(nfts, days, false), nfts * 5 * days);
            }
        }
    }

    #[test]
    fn minter_bonus_is_added_before_doubling() {
        assert_eq!(calculate_staking_rewards(0, 100, true), 1000);
        assert_eq!(calculate_staking_rewards(12, 1, true), (12 * 5 + 1000) * 2);
        assert_eq!(
            calculate_staking_rewards(12, 4, true) - calculate_staking_rewards(12, 4, false),
            2000
        );
    }

    #[test]
    fn saturates_instead_of_wrapping() {
        assert_eq!(calculate_staking_rewards(u64::MAX, 2, true), u64::MAX);
    }

    #[test]
    fn partial_days_are_floored() {
        let start = 1_700_000_000;
        assert_eq!(days_elapsed(start, start + SECONDS_PER_DAY - 1), 0);
        assert_eq!(days_elapsed(start, start + 3 * SECONDS_PER_DAY + 5), 3);
        assert_eq!(days_elapsed(start, start - 10), 0);
        assert_eq!(estimate_accrued(10, start, start + 30 * SECONDS_PER_DAY, false), 3000);
    }
}
