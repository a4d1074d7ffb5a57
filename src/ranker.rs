//! Risk ranking
//!
//! Orders metric records by a weighted composite of VGS_proxy, MPI and BSI,
//! assigns risk tiers and attaches recommended actions.
//!
//! Ordering is total and deterministic: composite score descending, then
//! MPI and BSI descending, then district, state and period ascending.

use crate::config::{ActionThresholds, RankingConfig, TierBasis};
use crate::types::{MetricRecord, RankedDistrict, RiskTier};
use std::cmp::Ordering;

pub const ACTION_OUTREACH: &str = "Mobile enrolment + outreach camps";
pub const ACTION_DEMOGRAPHIC: &str = "Assisted demographic update drive (migration/churn)";
pub const ACTION_BIOMETRIC: &str = "Biometric recapture support + assisted verification";
pub const ACTION_MONITOR: &str = "Monitor (low risk)";

/// Ranker configured with weights, tier bands and action thresholds
#[derive(Debug, Clone, Default)]
pub struct RiskRanker {
    ranking: RankingConfig,
    actions: ActionThresholds,
}

impl RiskRanker {
    pub fn new(ranking: RankingConfig, actions: ActionThresholds) -> Self {
        Self { ranking, actions }
    }

    /// Weighted combination of the three indices
    pub fn composite(&self, metrics: &MetricRecord) -> f64 {
        let w = &self.ranking.weights;
        w.vgs_proxy * metrics.vgs_proxy + w.mpi * metrics.mpi + w.bsi * metrics.bsi
    }

    /// Tier for a record given its composite score
    pub fn tier(&self, metrics: &MetricRecord, composite: f64) -> RiskTier {
        let value = match self.ranking.tier_basis {
            TierBasis::VgsProxy => metrics.vgs_proxy,
            TierBasis::Composite => composite,
        };
        let tiers = &self.ranking.tiers;
        if value >= tiers.high {
            RiskTier::High
        } else if value >= tiers.medium {
            RiskTier::Medium
        } else {
            RiskTier::Low
        }
    }

    /// Recommended interventions; every record gets at least one
    pub fn recommend(&self, metrics: &MetricRecord) -> Vec<String> {
        let mut actions = Vec::new();
        if metrics.vgs_proxy > self.actions.vgs_proxy {
            actions.push(ACTION_OUTREACH.to_string());
        }
        if metrics.mpi > self.actions.mpi {
            actions.push(ACTION_DEMOGRAPHIC.to_string());
        }
        if metrics.bsi > self.actions.bsi {
            actions.push(ACTION_BIOMETRIC.to_string());
        }
        if actions.is_empty() {
            actions.push(ACTION_MONITOR.to_string());
        }
        actions
    }

    /// Rank all records, highest risk first
    pub fn rank(&self, metrics: &[MetricRecord]) -> Vec<RankedDistrict> {
        let mut scored: Vec<(&MetricRecord, f64)> =
            metrics.iter().map(|m| (m, self.composite(m))).collect();

        scored.sort_by(compare_ranked);

        scored
            .into_iter()
            .enumerate()
            .map(|(idx, (metrics, composite))| RankedDistrict {
                rank: idx + 1,
                metrics: metrics.clone(),
                composite_score: composite,
                tier: self.tier(metrics, composite),
                actions: self.recommend(metrics),
            })
            .collect()
    }
}

fn compare_ranked(a: &(&MetricRecord, f64), b: &(&MetricRecord, f64)) -> Ordering {
    // Primary: composite descending
    b.1.total_cmp(&a.1)
        // Secondary: mobility then biometric pressure, descending
        .then_with(|| b.0.mpi.total_cmp(&a.0.mpi))
        .then_with(|| b.0.bsi.total_cmp(&a.0.bsi))
        // Final: name ascending
        .then_with(|| a.0.district.cmp(&b.0.district))
        .then_with(|| a.0.state.cmp(&b.0.state))
        .then_with(|| a.0.period.cmp(&b.0.period))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ScoreWeights, TierThresholds};

    fn metric(district: &str, vgs: f64, mpi: f64, bsi: f64) -> MetricRecord {
        MetricRecord {
            district: district.to_string(),
            state: "Test".to_string(),
            period: None,
            enrolments: 0,
            demographic_updates: 0,
            biometric_updates: 0,
            vgs_proxy: vgs,
            mpi,
            bsi,
        }
    }

    fn names(ranked: &[RankedDistrict]) -> Vec<&str> {
        ranked.iter().map(|r| r.metrics.district.as_str()).collect()
    }

    #[test]
    fn test_default_ranks_by_vgs() {
        let ranker = RiskRanker::default();
        let ranked = ranker.rank(&[
            metric("D1", 0.0, 0.10, 0.05),
            metric("D2", 1.0, 0.0, 0.0),
        ]);

        assert_eq!(names(&ranked), vec!["D2", "D1"]);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[0].tier, RiskTier::High);
        assert_eq!(ranked[1].tier, RiskTier::Low);
    }

    #[test]
    fn test_mpi_then_bsi_break_vgs_ties() {
        let ranker = RiskRanker::default();
        let ranked = ranker.rank(&[
            metric("A", 0.5, 0.1, 0.9),
            metric("B", 0.5, 0.3, 0.0),
            metric("C", 0.5, 0.1, 0.2),
        ]);
        assert_eq!(names(&ranked), vec!["B", "A", "C"]);
    }

    #[test]
    fn test_full_ties_break_by_name() {
        let ranker = RiskRanker::default();
        let ranked = ranker.rank(&[
            metric("Zeta", 0.5, 0.1, 0.1),
            metric("Alpha", 0.5, 0.1, 0.1),
            metric("Mu", 0.5, 0.1, 0.1),
        ]);
        assert_eq!(names(&ranked), vec!["Alpha", "Mu", "Zeta"]);
    }

    #[test]
    fn test_weights_change_order() {
        let ranking = RankingConfig {
            weights: ScoreWeights {
                vgs_proxy: 1.0,
                mpi: 2.0,
                bsi: 0.0,
            },
            ..RankingConfig::default()
        };
        let ranker = RiskRanker::new(ranking, ActionThresholds::default());
        let ranked = ranker.rank(&[metric("Visible", 0.9, 0.0, 0.0), metric("Mobile", 0.2, 0.5, 0.0)]);

        assert_eq!(names(&ranked), vec!["Mobile", "Visible"]);
        assert!((ranked[0].composite_score - 1.2).abs() < 1e-12);
    }

    #[test]
    fn test_tier_bands() {
        let ranker = RiskRanker::default();
        let m = |vgs| metric("X", vgs, 0.0, 0.0);
        assert_eq!(ranker.tier(&m(0.8), 0.8), RiskTier::High);
        assert_eq!(ranker.tier(&m(0.79), 0.79), RiskTier::Medium);
        assert_eq!(ranker.tier(&m(0.5), 0.5), RiskTier::Medium);
        assert_eq!(ranker.tier(&m(0.49), 0.49), RiskTier::Low);
    }

    #[test]
    fn test_composite_tier_basis() {
        let ranking = RankingConfig {
            tiers: TierThresholds {
                high: 2.0,
                medium: 1.0,
            },
            tier_basis: TierBasis::Composite,
            ..RankingConfig::default()
        };
        let ranker = RiskRanker::new(ranking, ActionThresholds::default());
        let m = metric("X", 0.9, 0.0, 0.0);
        assert_eq!(ranker.tier(&m, 1.5), RiskTier::Medium);
    }

    #[test]
    fn test_recommendations() {
        let ranker = RiskRanker::default();

        let actions = ranker.recommend(&metric("X", 0.9, 0.6, 0.7));
        assert_eq!(
            actions,
            vec![ACTION_OUTREACH, ACTION_DEMOGRAPHIC, ACTION_BIOMETRIC]
        );

        let actions = ranker.recommend(&metric("Y", 0.1, 0.5, 0.0));
        assert_eq!(actions, vec![ACTION_MONITOR]);
    }
}
