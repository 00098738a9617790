//! Load balancing across capable servers

use crate::config::LoadBalancingStrategy;
use crate::registry::RegisteredServer;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A capable server plus the facts the strategies need
#[derive(Debug, Clone)]
pub struct Candidate {
    pub server: RegisteredServer,
    /// The method is one of the server's declared capabilities verbatim
    pub exact_match: bool,
    /// The server's category matches the method's category
    pub category_match: bool,
    pub active_connections: usize,
    /// Weight for the weighted strategy (default 1)
    pub weight: u32,
}

impl Candidate {
    /// Capability-based score: 10×exact + 5×category + priority + health bonus
    pub fn score(&self) -> i64 {
        let mut score = 0i64;
        if self.exact_match {
            score += 10;
        }
        if self.category_match {
            score += 5;
        }
        score + self.server.priority as i64 + self.server.health.score_bonus()
    }
}

/// Load balancing algorithm trait
pub trait LoadBalancingAlgorithm: Send + Sync {
    /// Select a candidate; `None` only when the list is empty
    fn select(&self, candidates: &[Candidate]) -> Option<usize>;
}

/// Cyclic index over the candidate list
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancingAlgorithm for RoundRobin {
    fn select(&self, candidates: &[Candidate]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        Some(self.counter.fetch_add(1, Ordering::Relaxed) % candidates.len())
    }
}

/// Fewest active connections, ties keep list order
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LoadBalancingAlgorithm for LeastConnections {
    fn select(&self, candidates: &[Candidate]) -> Option<usize> {
        candidates
            .iter()
            .enumerate()
            .min_by_key(|(idx, c)| (c.active_connections, *idx))
            .map(|(idx, _)| idx)
    }
}

/// Weighted random draw
#[derive(Debug, Default)]
pub struct Weighted;

impl LoadBalancingAlgorithm for Weighted {
    fn select(&self, candidates: &[Candidate]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        let total: u64 = candidates.iter().map(|c| c.weight as u64).sum();
        if total == 0 {
            return Some(0);
        }

        let mut position = rand::thread_rng().gen_range(0..total);
        for (idx, candidate) in candidates.iter().enumerate() {
            let weight = candidate.weight as u64;
            if position < weight {
                return Some(idx);
            }
            position -= weight;
        }
        Some(0)
    }
}

/// Highest configured priority, ties keep list order
#[derive(Debug, Default)]
pub struct PriorityBased;

impl LoadBalancingAlgorithm for PriorityBased {
    fn select(&self, candidates: &[Candidate]) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (idx, candidate) in candidates.iter().enumerate() {
            match best {
                Some(b) if candidates[b].server.priority >= candidate.server.priority => {}
                _ => best = Some(idx),
            }
        }
        best
    }
}

/// Highest capability score, ties keep list order
#[derive(Debug, Default)]
pub struct CapabilityBased;

impl LoadBalancingAlgorithm for CapabilityBased {
    fn select(&self, candidates: &[Candidate]) -> Option<usize> {
        let mut best: Option<(usize, i64)> = None;
        for (idx, candidate) in candidates.iter().enumerate() {
            let score = candidate.score();
            match best {
                Some((_, best_score)) if best_score >= score => {}
                _ => best = Some((idx, score)),
            }
        }
        best.map(|(idx, _)| idx)
    }
}

/// Dispatches to the configured strategy; one round-robin counter per balancer
#[derive(Debug, Default)]
pub struct LoadBalancer {
    round_robin: RoundRobin,
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&self, strategy: LoadBalancingStrategy, candidates: &[Candidate]) -> Option<usize> {
        match strategy {
            LoadBalancingStrategy::RoundRobin => self.round_robin.select(candidates),
            LoadBalancingStrategy::LeastConnections => LeastConnections.select(candidates),
            LoadBalancingStrategy::Weighted => Weighted.select(candidates),
            LoadBalancingStrategy::Priority => PriorityBased.select(candidates),
            LoadBalancingStrategy::CapabilityBased => CapabilityBased.select(candidates),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::HealthStatus;

    fn candidate(name: &str, priority: i32) -> Candidate {
        Candidate {
            server: RegisteredServer {
                name: name.to_string(),
                capabilities: Vec::new(),
                category: None,
                priority,
                critical: false,
                health: HealthStatus::Healthy,
            },
            exact_match: false,
            category_match: false,
            active_connections: 0,
            weight: 1,
        }
    }

    #[test]
    fn test_round_robin_cycles() {
        let rr = RoundRobin::new();
        let candidates = vec![candidate("a", 1), candidate("b", 1), candidate("c", 1)];
        let picks: Vec<_> = (0..6).filter_map(|_| rr.select(&candidates)).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(rr.select(&[]), None);
    }

    #[test]
    fn test_least_connections() {
        let mut candidates = vec![candidate("a", 1), candidate("b", 1), candidate("c", 1)];
        candidates[0].active_connections = 2;
        candidates[1].active_connections = 0;
        candidates[2].active_connections = 0;
        assert_eq!(LeastConnections.select(&candidates), Some(1));
    }

    #[test]
    fn test_weighted_respects_zero_weight() {
        let mut candidates = vec![candidate("a", 1), candidate("b", 1)];
        candidates[0].weight = 0;
        candidates[1].weight = 5;
        for _ in 0..50 {
            assert_eq!(Weighted.select(&candidates), Some(1));
        }
    }

    #[test]
    fn test_priority_ties_keep_order() {
        let candidates = vec![candidate("a", 1), candidate("b", 7), candidate("c", 7)];
        assert_eq!(PriorityBased.select(&candidates), Some(1));
    }

    #[test]
    fn test_capability_score() {
        let mut exact = candidate("exact", 1);
        exact.exact_match = true;
        exact.server.health = HealthStatus::Unhealthy;
        let mut category = candidate("category", 4);
        category.category_match = true;
        // exact: 10 + 1 + 0 = 11; category: 5 + 4 + 3 = 12
        assert_eq!(exact.score(), 11);
        assert_eq!(category.score(), 12);
        assert_eq!(CapabilityBased.select(&[exact, category]), Some(1));
    }
}
