//! Key-Figure Extractor and Consensus Validator
//!
//! Each replica's result tree is projected onto a small fixed vocabulary of
//! figures, then the figures are compared across replicas with a tolerance
//! profile. This is the point where engine decimals are narrowed to `f64`.

use crate::config::ToleranceProfile;
use crate::models::ReplicaId;
use crate::planner::paths;
use crate::replica::ReplicaReport;
use crate::result_tree::{Leaf, ResultTree};
use crate::tools::narrow;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum KeyFigure {
    CurrentAssets,
    TotalAssets,
    BalanceTotalAssets,
    BalanceTotalLiabEquity,
    TotalRevenue,
    TotalExpenses,
    NetIncome,
    OperatingCashFlow,
    NetCashFlow,
}

impl KeyFigure {
    pub const ALL: [KeyFigure; 9] = [
        KeyFigure::CurrentAssets,
        KeyFigure::TotalAssets,
        KeyFigure::BalanceTotalAssets,
        KeyFigure::BalanceTotalLiabEquity,
        KeyFigure::TotalRevenue,
        KeyFigure::TotalExpenses,
        KeyFigure::NetIncome,
        KeyFigure::OperatingCashFlow,
        KeyFigure::NetCashFlow,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            KeyFigure::CurrentAssets => paths::CURRENT_ASSETS,
            KeyFigure::TotalAssets => paths::TOTAL_ASSETS,
            KeyFigure::BalanceTotalAssets | KeyFigure::BalanceTotalLiabEquity => paths::BALANCING,
            KeyFigure::TotalRevenue => paths::TOTAL_REVENUE,
            KeyFigure::TotalExpenses => paths::TOTAL_EXPENSES,
            KeyFigure::NetIncome => paths::NET_INCOME,
            KeyFigure::OperatingCashFlow => paths::OPERATING_CASH_FLOW,
            KeyFigure::NetCashFlow => paths::NET_CASH_FLOW,
        }
    }

    /// Recorded value of the leaf; liabilities + equity is the balance
    /// check's computed side
    fn read(&self, leaf: &Leaf) -> FigureReading {
        if leaf.is_error() {
            return FigureReading::Errored;
        }

        let value = match self {
            KeyFigure::BalanceTotalLiabEquity => leaf.computed,
            _ => leaf.recorded,
        };

        match value {
            Some(v) => FigureReading::Value(narrow(v)),
            None => FigureReading::Errored,
        }
    }
}

/// A figure as one replica reports it
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum FigureReading {
    Value(f64),
    /// The leaf carries an error; agrees with nothing
    Errored,
}

impl FigureReading {
    pub fn value(&self) -> Option<f64> {
        match self {
            FigureReading::Value(v) => Some(*v),
            FigureReading::Errored => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct KeyFigureSet {
    figures: BTreeMap<KeyFigure, FigureReading>,
}

impl KeyFigureSet {
    pub fn insert(&mut self, figure: KeyFigure, reading: FigureReading) {
        self.figures.insert(figure, reading);
    }

    pub fn get(&self, figure: KeyFigure) -> Option<FigureReading> {
        self.figures.get(&figure).copied()
    }

    pub fn len(&self) -> usize {
        self.figures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.figures.is_empty()
    }
}

/// Project a result tree onto the key-figure vocabulary
pub fn extract_key_figures(tree: &ResultTree) -> KeyFigureSet {
    let mut set = KeyFigureSet::default();
    for figure in KeyFigure::ALL {
        if let Some(leaf) = tree.get(figure.path()) {
            set.insert(figure, figure.read(leaf));
        }
    }
    set
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservedValue {
    pub replica_id: ReplicaId,
    pub reading: FigureReading,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Discrepancy {
    pub figure: KeyFigure,
    pub baseline: Option<f64>,
    pub disagreeing_replicas: Vec<ReplicaId>,
    pub observed: Vec<ObservedValue>,
    pub tolerance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusOutcome {
    pub agreed: bool,
    /// Tree of the most confident replica; present only on agreement
    pub agreed_tree: Option<ResultTree>,
    pub chosen_replica: Option<ReplicaId>,
    pub discrepancies: Vec<Discrepancy>,
    pub failing_replicas: Vec<ReplicaId>,
    pub confidence: BTreeMap<ReplicaId, f64>,
}

/// Compares key figures across replicas under one tolerance profile
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsensusValidator {
    profile: ToleranceProfile,
}

impl ConsensusValidator {
    pub fn new(profile: ToleranceProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> ToleranceProfile {
        self.profile
    }

    /// Check agreement between replica reports, given in replica order
    pub fn validate(&self, reports: &[ReplicaReport]) -> ConsensusOutcome {
        let figures: Vec<(ReplicaId, KeyFigureSet)> = reports
            .iter()
            .map(|r| (r.replica_id.clone(), extract_key_figures(&r.tree)))
            .collect();

        let (discrepancies, failing_replicas) = self.compare_figures(&figures);
        let agreed = discrepancies.is_empty() && failing_replicas.is_empty();

        let confidence = reports
            .iter()
            .map(|r| (r.replica_id.clone(), r.confidence))
            .collect();

        let (agreed_tree, chosen_replica) = if agreed {
            match most_confident(reports) {
                Some(best) => (Some(best.tree.clone()), Some(best.replica_id.clone())),
                None => (None, None),
            }
        } else {
            (None, None)
        };

        if agreed {
            info!(
                replicas = reports.len(),
                chosen = chosen_replica.as_deref().unwrap_or_default(),
                "Consensus achieved"
            );
        } else {
            warn!(
                discrepancies = discrepancies.len(),
                failing = ?failing_replicas,
                "Consensus failed"
            );
        }

        ConsensusOutcome {
            agreed,
            agreed_tree,
            chosen_replica,
            discrepancies,
            failing_replicas,
            confidence,
        }
    }

    /// Compare per-replica figure sets.
    ///
    /// Only figures reported by at least two replicas are compared. The first
    /// numeric reading is the baseline; any replica outside the tolerance, or
    /// reporting an errored figure, disagrees.
    pub fn compare_figures(
        &self,
        figures: &[(ReplicaId, KeyFigureSet)],
    ) -> (Vec<Discrepancy>, Vec<ReplicaId>) {
        let mut discrepancies = Vec::new();
        let mut failing: Vec<ReplicaId> = Vec::new();

        for figure in KeyFigure::ALL {
            let observed: Vec<ObservedValue> = figures
                .iter()
                .filter_map(|(id, set)| {
                    set.get(figure).map(|reading| ObservedValue {
                        replica_id: id.clone(),
                        reading,
                    })
                })
                .collect();

            if observed.len() < 2 {
                continue;
            }

            let baseline = observed.iter().find_map(|o| o.reading.value());
            let tolerance = match baseline {
                Some(b) => self.profile.tolerance_for(b),
                None => self.profile.absolute_floor,
            };

            let disagreeing: Vec<ReplicaId> = observed
                .iter()
                .filter(|o| match (o.reading, baseline) {
                    (FigureReading::Value(v), Some(b)) => (v - b).abs() > tolerance,
                    _ => true,
                })
                .map(|o| o.replica_id.clone())
                .collect();

            if disagreeing.is_empty() {
                continue;
            }

            warn!(
                figure = ?figure,
                ?baseline,
                tolerance,
                disagreeing = ?disagreeing,
                "Key figure discrepancy"
            );

            for id in &disagreeing {
                if !failing.contains(id) {
                    failing.push(id.clone());
                }
            }

            discrepancies.push(Discrepancy {
                figure,
                baseline,
                disagreeing_replicas: disagreeing,
                observed,
                tolerance,
            });
        }

        (discrepancies, failing)
    }
}

/// Highest declared confidence; the earliest replica wins a tie
fn most_confident(reports: &[ReplicaReport]) -> Option<&ReplicaReport> {
    let mut best: Option<&ReplicaReport> = None;
    for report in reports {
        match best {
            Some(current) if report.confidence <= current.confidence => {}
            _ => best = Some(report),
        }
    }
    best
}
