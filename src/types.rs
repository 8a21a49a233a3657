use crate::timer::TimerState;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Opaque ID types
pub type BoxId = String;
pub type TabId = String;

/// Competitor name -> per-route scores, indexed by `route_index - 1`
pub type ScoreTable = HashMap<String, Vec<Option<f64>>>;

/// Competitor name -> per-route completion times in seconds
pub type TimeTable = HashMap<String, Vec<Option<f64>>>;

/// Default lookahead size for the `preparing` partition
pub const DEFAULT_PREPARING_SIZE: usize = 1;

/// A competitor on the box roster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Competitor {
    pub nume: String,
    #[serde(default)]
    pub club: Option<String>,
    /// Has a recorded result for the current route
    #[serde(default)]
    pub marked: bool,
}

impl Competitor {
    pub fn new(nume: impl Into<String>, club: Option<String>) -> Self {
        Self {
            nume: nume.into(),
            club,
            marked: false,
        }
    }
}

/// The climbing order of a box, split in three disjoint partitions.
///
/// The union of all partitions is always the full roster. Advancing moves the
/// finished climber to the tail of `remaining`, so the size never changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CompetitorQueue {
    pub climbing: Option<String>,
    pub preparing: Vec<String>,
    pub remaining: Vec<String>,
}

impl CompetitorQueue {
    /// Build a queue from the route's predetermined order
    pub fn from_order(order: &[String], preparing_size: usize) -> Self {
        let mut iter = order.iter().cloned();
        let climbing = iter.next();
        let preparing: Vec<String> = iter.by_ref().take(preparing_size).collect();
        let remaining: Vec<String> = iter.collect();
        Self {
            climbing,
            preparing,
            remaining,
        }
    }

    /// Shift every partition left by one position
    pub fn advance(&mut self) {
        let preparing_size = self.preparing.len();
        let mut order: Vec<String> = self.iter().cloned().collect();
        if order.is_empty() {
            return;
        }
        order.rotate_left(1);
        *self = Self::from_order(&order, preparing_size);
    }

    pub fn len(&self) -> usize {
        usize::from(self.climbing.is_some()) + self.preparing.len() + self.remaining.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_climbing(&self, name: &str) -> bool {
        self.climbing.as_deref() == Some(name)
    }

    /// All names in climbing order
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.climbing
            .iter()
            .chain(self.preparing.iter())
            .chain(self.remaining.iter())
    }
}

/// A podium placement, derived once a box is finalized
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PodiumEntry {
    pub rank: usize,
    pub nume: String,
    pub club: Option<String>,
    pub total: f64,
}

/// Administrator configuration for a new box
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoxConfig {
    pub categorie: String,
    pub routes_count: u32,
    #[serde(default)]
    pub competitors: Vec<Competitor>,
    /// Box-specific timer preset in seconds, overriding the global default
    #[serde(default)]
    pub timer_preset: Option<u32>,
    #[serde(default)]
    pub use_time_tiebreak: Option<bool>,
}

impl BoxConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.routes_count == 0 {
            return Err("routes_count must be at least 1".to_string());
        }
        if let Some(name) = duplicate_name(&self.competitors) {
            return Err(format!("Competitor {} appears more than once", name));
        }
        Ok(())
    }
}

/// First name listed twice on a roster. Names key scores and the queue.
pub fn duplicate_name(competitors: &[Competitor]) -> Option<&str> {
    let mut seen = HashSet::new();
    competitors
        .iter()
        .map(|c| c.nume.as_str())
        .find(|name| !seen.insert(*name))
}

/// The single authoritative aggregate for one contest box
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoxState {
    pub box_id: BoxId,
    pub version: u64,
    pub categorie: String,
    /// 1-based current route number, 0 before the first route is initialized
    pub route_index: u32,
    pub routes_count: u32,
    pub holds_count: u32,
    /// Hold count per route, indexed by `route_index - 1`
    #[serde(default)]
    pub route_holds: Vec<Option<u32>>,
    pub hold_progress: f64,
    pub competitors: Vec<Competitor>,
    pub scores: ScoreTable,
    pub times: TimeTable,
    pub queue: CompetitorQueue,
    pub timer: TimerState,
    pub timer_preset: Option<u32>,
    pub use_time_tiebreak: bool,
    pub finalized: bool,
    #[serde(default)]
    pub podium: Vec<PodiumEntry>,
}

impl BoxState {
    pub fn new(box_id: BoxId, config: BoxConfig) -> Self {
        Self {
            box_id,
            version: 1,
            categorie: config.categorie,
            route_index: 0,
            routes_count: config.routes_count,
            holds_count: 0,
            route_holds: Vec::new(),
            hold_progress: 0.0,
            competitors: config.competitors,
            scores: ScoreTable::new(),
            times: TimeTable::new(),
            queue: CompetitorQueue::default(),
            timer: TimerState::Idle,
            timer_preset: config.timer_preset,
            use_time_tiebreak: config.use_time_tiebreak.unwrap_or(false),
            finalized: false,
            podium: Vec::new(),
        }
    }

    pub fn competitor(&self, nume: &str) -> Option<&Competitor> {
        self.competitors.iter().find(|c| c.nume == nume)
    }

    pub fn club_of(&self, nume: &str) -> Option<String> {
        self.competitor(nume).and_then(|c| c.club.clone())
    }

    pub fn all_marked(&self) -> bool {
        !self.competitors.is_empty() && self.competitors.iter().all(|c| c.marked)
    }

    /// Hold count recorded for a 1-based route number
    pub fn holds_for_route(&self, route_number: u32) -> Option<u32> {
        let idx = usize::try_from(route_number.checked_sub(1)?).ok()?;
        self.route_holds.get(idx).copied().flatten()
    }
}
