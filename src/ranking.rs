//! Ranking computation for a box.
//!
//! Each route is ranked independently. Tied competitors share the average of
//! the positions their tie block spans. The overall total is the geometric
//! mean of the per-route rank points, lower is better, with absent routes
//! penalized as one place worse than the largest field seen on any route.

use crate::types::{BoxState, PodiumEntry, ScoreTable, TimeTable};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Rank points per competitor and the field size used for penalties
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankPoints {
    pub points: HashMap<String, Vec<Option<f64>>>,
    /// Most competitors with a defined score on any single route
    pub competitor_count: usize,
}

fn route_entry(table: &TimeTable, name: &str, route: usize) -> Option<f64> {
    table.get(name).and_then(|v| v.get(route).copied().flatten())
}

/// Compute per-route rank points for every scored competitor.
///
/// Missing times sort after every recorded time when the tiebreak is on.
/// Competitors still tied after the tiebreak share the average position.
pub fn compute_rank_points(
    scores: &ScoreTable,
    times: &TimeTable,
    route_count: usize,
    use_time_tiebreak: bool,
) -> RankPoints {
    let mut points: HashMap<String, Vec<Option<f64>>> = HashMap::new();
    let mut competitor_count = 0;

    for route in 0..route_count {
        let mut entries: Vec<(&str, f64, f64)> = scores
            .iter()
            .filter_map(|(name, per_route)| {
                let score = per_route.get(route).copied().flatten()?;
                let time = if use_time_tiebreak {
                    route_entry(times, name, route).unwrap_or(f64::INFINITY)
                } else {
                    0.0
                };
                Some((name.as_str(), score, time))
            })
            .collect();

        competitor_count = competitor_count.max(entries.len());

        entries.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| a.2.total_cmp(&b.2))
                .then_with(|| a.0.cmp(b.0))
        });

        let mut start = 0;
        while start < entries.len() {
            let mut end = start + 1;
            while end < entries.len()
                && entries[end].1 == entries[start].1
                && entries[end].2 == entries[start].2
            {
                end += 1;
            }
            // Positions start+1..=end, averaged
            let avg = (start + 1 + end) as f64 / 2.0;
            for (name, _, _) in &entries[start..end] {
                let slot = points
                    .entry((*name).to_string())
                    .or_insert_with(|| vec![None; route_count]);
                slot[route] = Some(avg);
            }
            start = end;
        }
    }

    RankPoints {
        points,
        competitor_count,
    }
}

pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Geometric mean of rank points, padded to `route_count` with the missing penalty
pub fn compute_total(rank_points: &[Option<f64>], route_count: usize, competitor_count: usize) -> f64 {
    if route_count == 0 {
        return 0.0;
    }
    let penalty = (competitor_count + 1) as f64;
    let product: f64 = (0..route_count)
        .map(|i| rank_points.get(i).copied().flatten().unwrap_or(penalty))
        .product();
    round3(product.powf(1.0 / route_count as f64))
}

/// Assign standard competition ranks to rows already sorted ascending by total
pub fn rank_rows<T>(rows: Vec<T>, total: impl Fn(&T) -> f64) -> Vec<(usize, T)> {
    let mut ranked: Vec<(usize, T)> = Vec::with_capacity(rows.len());
    let mut prev: Option<(f64, usize)> = None;
    for (index, row) in rows.into_iter().enumerate() {
        let value = total(&row);
        let rank = match prev {
            Some((prev_total, prev_rank)) if prev_total == value => prev_rank,
            _ => index + 1,
        };
        prev = Some((value, rank));
        ranked.push((rank, row));
    }
    ranked
}

/// A competitor's line in the ranking table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StandingRow {
    pub rank: usize,
    pub nume: String,
    pub club: Option<String>,
    pub scores: Vec<Option<f64>>,
    pub times: Vec<Option<f64>>,
    pub rank_points: Vec<Option<f64>>,
    pub total: f64,
}

/// Full ranking table for a box, best total first
pub fn standings(state: &BoxState, use_time_tiebreak: bool) -> Vec<StandingRow> {
    let route_count = usize::try_from(state.routes_count).unwrap_or(0);
    let computed = compute_rank_points(&state.scores, &state.times, route_count, use_time_tiebreak);

    let mut rows: Vec<StandingRow> = state
        .scores
        .iter()
        .filter(|(_, per_route)| per_route.iter().any(Option::is_some))
        .map(|(name, per_route)| {
            let rank_points = computed
                .points
                .get(name)
                .cloned()
                .unwrap_or_else(|| vec![None; route_count]);
            let total = compute_total(&rank_points, route_count, computed.competitor_count);
            StandingRow {
                rank: 0,
                nume: name.clone(),
                club: state.club_of(name),
                scores: per_route.clone(),
                times: state.times.get(name).cloned().unwrap_or_default(),
                rank_points,
                total,
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        a.total
            .partial_cmp(&b.total)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.nume.cmp(&b.nume))
    });

    rank_rows(rows, |row| row.total)
        .into_iter()
        .map(|(rank, mut row)| {
            row.rank = rank;
            row
        })
        .collect()
}

/// Top three placements
pub fn podium(state: &BoxState, use_time_tiebreak: bool) -> Vec<PodiumEntry> {
    standings(state, use_time_tiebreak)
        .into_iter()
        .take(3)
        .map(|row| PodiumEntry {
            rank: row.rank,
            nume: row.nume,
            club: row.club,
            total: row.total,
        })
        .collect()
}

/// A score equal to the route's hold count is displayed as "Top"
pub fn is_top(score: f64, holds_count: Option<u32>) -> bool {
    matches!(holds_count, Some(h) if h > 0 && score == f64::from(h))
}
