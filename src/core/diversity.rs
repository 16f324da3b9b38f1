use std::collections::{HashMap, HashSet};
use crate::core::rules::rank_order;
use crate::models::{domain::normalize, DiversityAllocation, ScoredCandidate};

/// Smallest rebalanced set worth returning instead of the plain ranking
const MIN_DIVERSE_RESULTS: usize = 3;

/// Default score penalty applied to forced source substitutions
pub const DEFAULT_SUBSTITUTION_PENALTY: u8 = 5;

/// Post-ranking city and source balancing
///
/// Best-effort: it never errors, and any allocation it cannot satisfy
/// degrades to the score-ranked list.
#[derive(Debug, Clone, Copy)]
pub struct DiversityRebalancer {
    substitution_penalty: u8,
}

impl Default for DiversityRebalancer {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSTITUTION_PENALTY)
    }
}

impl DiversityRebalancer {
    pub fn new(substitution_penalty: u8) -> Self {
        Self { substitution_penalty }
    }

    /// Select `result_count` members from `ranked` (best first)
    pub fn rebalance(
        &self,
        ranked: &[ScoredCandidate],
        result_count: usize,
        target_cities: &[String],
    ) -> Vec<ScoredCandidate> {
        let mut selected = select_by_city(ranked, result_count, target_cities);
        self.enforce_source_cap(&mut selected, ranked, result_count, target_cities.len());
        selected.sort_by(rank_order);
        selected
    }

    /// Cap any single source at ceil(n/2), substituting dominant-source
    /// members with the best unselected candidates from other sources.
    ///
    /// Members whose own city has an alternative are replaced first, so the
    /// city balance survives. Only when none has one is a member swapped for
    /// a candidate from another city, and never the last member of a city
    /// while another choice exists.
    fn enforce_source_cap(
        &self,
        selected: &mut [ScoredCandidate],
        ranked: &[ScoredCandidate],
        result_count: usize,
        city_count: usize,
    ) {
        if selected.len() < 2 {
            return;
        }
        let cap = result_count.div_ceil(2).max(1);
        let city_limit = if city_count >= 2 {
            result_count.div_ceil(city_count) + 1
        } else {
            usize::MAX
        };

        loop {
            let counts = source_counts(selected);
            let Some((dominant, count)) = counts
                .iter()
                .filter(|(_, count)| **count > cap)
                .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
                .map(|(source, count)| (source.clone(), *count))
            else {
                return;
            };

            tracing::debug!("Source {} supplies {} of {} results (cap {})", dominant, count, selected.len(), cap);

            let substitution = {
                let taken: HashSet<&str> = selected.iter().map(|s| s.candidate.id.as_str()).collect();
                let city_sizes = city_counts(selected);
                let eligible = |s: &&ScoredCandidate| {
                    let source = normalize(&s.candidate.source);
                    !taken.contains(s.candidate.id.as_str())
                        && source != dominant
                        && counts.get(&source).copied().unwrap_or(0) < cap
                };

                // Dominant-source members, weakest first
                let mut members: Vec<usize> = (0..selected.len())
                    .filter(|&idx| normalize(&selected[idx].candidate.source) == dominant)
                    .collect();
                members.sort_by(|&a, &b| rank_order(&selected[b], &selected[a]));

                let same_city = members.iter().find_map(|&idx| {
                    let city = normalize(&selected[idx].candidate.city);
                    ranked
                        .iter()
                        .filter(eligible)
                        .find(|s| normalize(&s.candidate.city) == city)
                        .map(|replacement| (idx, replacement.clone()))
                });

                same_city.or_else(|| {
                    let victim = members
                        .iter()
                        .copied()
                        .find(|&idx| city_sizes.get(&normalize(&selected[idx].candidate.city)).copied().unwrap_or(0) > 1)
                        .or_else(|| members.first().copied())?;
                    ranked
                        .iter()
                        .filter(eligible)
                        .find(|s| city_sizes.get(&normalize(&s.candidate.city)).copied().unwrap_or(0) < city_limit)
                        .or_else(|| ranked.iter().find(eligible))
                        .map(|replacement| (victim, replacement.clone()))
                })
            };

            let Some((victim_idx, mut replacement)) = substitution else {
                tracing::debug!("No alternative-source candidates for {}, accepting concentration", dominant);
                return;
            };

            replacement.match_score = replacement.match_score.saturating_sub(self.substitution_penalty);
            replacement.reason = format!(
                "{} (substituted for source diversity, replacing {} from {})",
                replacement.reason, selected[victim_idx].candidate.id, selected[victim_idx].candidate.source
            );
            selected[victim_idx] = replacement;
        }
    }
}

/// Split `result_count` slots over the cities: floor(n / cities) each, with
/// the remainder going to the first cities in declared order
pub fn allocate_cities(result_count: usize, target_cities: &[String]) -> Vec<DiversityAllocation> {
    if target_cities.is_empty() {
        return Vec::new();
    }
    let per_city = result_count / target_cities.len();
    let remainder = result_count % target_cities.len();

    target_cities
        .iter()
        .enumerate()
        .map(|(idx, city)| DiversityAllocation {
            city: city.clone(),
            target_count: per_city + usize::from(idx < remainder),
        })
        .collect()
}

fn select_by_city(
    ranked: &[ScoredCandidate],
    result_count: usize,
    target_cities: &[String],
) -> Vec<ScoredCandidate> {
    let top_n = || ranked.iter().take(result_count).cloned().collect::<Vec<_>>();

    if target_cities.len() < 2 || result_count < MIN_DIVERSE_RESULTS {
        return top_n();
    }

    let mut taken: HashSet<&str> = HashSet::new();
    let mut selected: Vec<ScoredCandidate> = Vec::with_capacity(result_count);

    for allocation in allocate_cities(result_count, target_cities) {
        let picks = ranked
            .iter()
            .filter(|s| !taken.contains(s.candidate.id.as_str()) && s.candidate.in_city(&allocation.city))
            .take(allocation.target_count)
            .collect::<Vec<_>>();

        if picks.len() < allocation.target_count {
            tracing::debug!(
                "City {} filled {} of {} slots",
                allocation.city,
                picks.len(),
                allocation.target_count
            );
        }

        for pick in picks {
            taken.insert(pick.candidate.id.as_str());
            selected.push(pick.clone());
        }
    }

    if selected.len() < MIN_DIVERSE_RESULTS {
        tracing::debug!("Diversity allocation yielded {} results, keeping score ranking", selected.len());
        return top_n();
    }

    // Fill any shortfall from the score ranking
    for candidate in ranked {
        if selected.len() >= result_count {
            break;
        }
        if taken.insert(candidate.candidate.id.as_str()) {
            selected.push(candidate.clone());
        }
    }
    selected.truncate(result_count);
    selected
}

fn city_counts(selected: &[ScoredCandidate]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for scored in selected {
        *counts.entry(normalize(&scored.candidate.city)).or_insert(0) += 1;
    }
    counts
}

fn source_counts(selected: &[ScoredCandidate]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for scored in selected {
        *counts.entry(normalize(&scored.candidate.source)).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobCandidate;

    fn scored(id: &str, city: &str, source: &str, score: u8) -> ScoredCandidate {
        ScoredCandidate {
            candidate: JobCandidate {
                id: id.to_string(),
                title: format!("Job {}", id),
                company: "Acme".to_string(),
                city: city.to_string(),
                location: None,
                source: source.to_string(),
                description: String::new(),
                posted_at: None,
                is_early_career: true,
                is_internship: false,
                is_graduate: false,
            },
            match_score: score,
            confidence_score: 70,
            reason: "test".to_string(),
            score_breakdown: None,
        }
    }

    fn cities(names: &[&str]) -> Vec<String> {
        names.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_allocation_remainder_goes_to_first_cities() {
        let allocation = allocate_cities(5, &cities(&["A", "B", "C"]));
        let counts: Vec<usize> = allocation.iter().map(|a| a.target_count).collect();
        assert_eq!(counts, vec![2, 2, 1]);
    }

    #[test]
    fn test_single_city_returns_top_n() {
        let ranked: Vec<_> = (0..6).map(|i| scored(&i.to_string(), "A", &format!("s{}", i), 90 - i as u8)).collect();
        let result = DiversityRebalancer::default().rebalance(&ranked, 3, &cities(&["A"]));
        let ids: Vec<_> = result.iter().map(|s| s.candidate.id.as_str()).collect();
        assert_eq!(ids, vec!["0", "1", "2"]);
    }

    #[test]
    fn test_city_balance() {
        let mut ranked = Vec::new();
        for i in 0..6 {
            ranked.push(scored(&format!("a{}", i), "A", &format!("s{}", i), 95 - i as u8));
        }
        for i in 0..6 {
            ranked.push(scored(&format!("b{}", i), "B", &format!("t{}", i), 60 - i as u8));
        }
        let result = DiversityRebalancer::default().rebalance(&ranked, 4, &cities(&["A", "B"]));
        assert_eq!(result.len(), 4);
        assert_eq!(result.iter().filter(|s| s.candidate.city == "B").count(), 2);
    }

    #[test]
    fn test_too_few_city_matches_keeps_ranking() {
        let mut ranked: Vec<_> = (0..5).map(|i| scored(&format!("x{}", i), "X", &format!("s{}", i), 90 - i as u8)).collect();
        ranked.push(scored("a0", "A", "z", 10));
        let result = DiversityRebalancer::default().rebalance(&ranked, 4, &cities(&["A", "B"]));
        let ids: Vec<_> = result.iter().map(|s| s.candidate.id.as_str()).collect();
        assert_eq!(ids, vec!["x0", "x1", "x2", "x3"]);
    }

    #[test]
    fn test_source_cap_substitutes_with_penalty() {
        let mut ranked: Vec<_> = (0..5).map(|i| scored(&format!("r{}", i), "A", "reed", 90 - i as u8)).collect();
        ranked.push(scored("o1", "A", "indeed", 40));
        ranked.push(scored("o2", "A", "adzuna", 30));
        let result = DiversityRebalancer::default().rebalance(&ranked, 4, &cities(&["A"]));
        assert_eq!(result.len(), 4);
        assert_eq!(result.iter().filter(|s| s.candidate.source == "reed").count(), 2);
        let sub = result.iter().find(|s| s.candidate.id == "o1").unwrap();
        assert_eq!(sub.match_score, 35);
        assert!(sub.reason.contains("source diversity"));
    }

    #[test]
    fn test_source_cap_keeps_every_city() {
        let mut ranked = Vec::new();
        for city in ["A", "B", "C"] {
            for i in 0..4 {
                ranked.push(scored(&format!("{}{}", city, i), city, "reed", 90 - i as u8));
            }
        }
        // Alternatives to the dominant source exist only in B
        for i in 0..4 {
            ranked.push(scored(&format!("b-alt{}", i), "B", "indeed", 40 - i as u8));
        }
        ranked.sort_by(rank_order);

        let result = DiversityRebalancer::default().rebalance(&ranked, 9, &cities(&["A", "B", "C"]));

        assert_eq!(result.len(), 9);
        assert_eq!(result.iter().filter(|s| s.candidate.source == "reed").count(), 5);
        for city in ["A", "B", "C"] {
            let count = result.iter().filter(|s| s.candidate.city == city).count();
            assert!((1..=4).contains(&count), "{} has {} results", city, count);
        }
    }

    #[test]
    fn test_source_cap_accepts_when_no_alternatives() {
        let ranked: Vec<_> = (0..5).map(|i| scored(&format!("r{}", i), "A", "reed", 90 - i as u8)).collect();
        let result = DiversityRebalancer::default().rebalance(&ranked, 4, &cities(&["A"]));
        assert_eq!(result.len(), 4);
        assert!(result.iter().all(|s| s.candidate.source == "reed"));
    }
}
