//! Army result reports and the team outcome resolver.

use crate::games::error::GameResolutionError;
use crate::models::{GameId, GameOutcome, PlayerId};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GameResultReport {
    pub reporter: PlayerId,
    pub army: i32,
    pub outcome: GameOutcome,
    pub score: i64,
}

/// Append-only ledger of per-army reports.
#[derive(Debug, Clone)]
pub struct GameResultReports {
    pub game_id: GameId,
    reports: HashMap<i32, Vec<GameResultReport>>,
}

impl GameResultReports {
    pub fn new(game_id: GameId) -> Self {
        Self {
            game_id,
            reports: HashMap::new(),
        }
    }

    pub fn add(&mut self, report: GameResultReport) {
        self.reports.entry(report.army).or_default().push(report);
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn has_army(&self, army: i32) -> bool {
        self.reports.contains_key(&army)
    }

    /// Resolved outcome for one army: any draw report wins; otherwise the
    /// most frequent of victory/defeat/unknown, with ties conflicting.
    pub fn outcome(&self, army: i32) -> GameOutcome {
        let Some(reports) = self.reports.get(&army) else {
            return GameOutcome::Unknown;
        };

        if reports
            .iter()
            .any(|r| matches!(r.outcome, GameOutcome::Draw | GameOutcome::MutualDraw))
        {
            return GameOutcome::Draw;
        }

        let mut counts: HashMap<GameOutcome, usize> = HashMap::new();
        for report in reports {
            *counts.entry(report.outcome).or_insert(0) += 1;
        }
        let best = counts.values().copied().max().unwrap_or(0);
        let leaders: Vec<GameOutcome> = counts
            .into_iter()
            .filter(|(_, count)| *count == best)
            .map(|(outcome, _)| outcome)
            .collect();
        match leaders.as_slice() {
            [only] => *only,
            [] => GameOutcome::Unknown,
            _ => GameOutcome::Conflicting,
        }
    }

    /// Median of the reported scores for an army.
    pub fn score(&self, army: i32) -> i64 {
        let Some(reports) = self.reports.get(&army) else {
            return 0;
        };
        let mut scores: Vec<i64> = reports.iter().map(|r| r.score).collect();
        if scores.is_empty() {
            return 0;
        }
        scores.sort_unstable();
        let mid = scores.len() / 2;
        if scores.len() % 2 == 1 {
            scores[mid]
        } else {
            (scores[mid - 1] + scores[mid]) / 2
        }
    }

    /// Ladder score collapse: 1 for a resolved victory, 0 otherwise.
    pub fn victory_only_score(&self, army: i32) -> i64 {
        if self.outcome(army) == GameOutcome::Victory {
            1
        } else {
            0
        }
    }

    /// True when every listed army has at least one draw report.
    pub fn is_mutually_agreed_draw(&self, armies: &HashSet<i32>) -> bool {
        if armies.is_empty() {
            return false;
        }
        armies.iter().all(|army| {
            self.reports
                .get(army)
                .map(|reports| {
                    reports.iter().any(|r| {
                        matches!(r.outcome, GameOutcome::Draw | GameOutcome::MutualDraw)
                    })
                })
                .unwrap_or(false)
        })
    }
}

fn team_outcome(outcomes: &HashSet<GameOutcome>) -> GameOutcome {
    if outcomes.contains(&GameOutcome::Victory) {
        GameOutcome::Victory
    } else if outcomes.contains(&GameOutcome::Draw)
        || outcomes.contains(&GameOutcome::MutualDraw)
    {
        GameOutcome::Draw
    } else if outcomes.contains(&GameOutcome::Defeat) {
        GameOutcome::Defeat
    } else {
        GameOutcome::Unknown
    }
}

/// Resolves per-team partial outcomes into one outcome per team.
///
/// Exactly one team may win; everyone else is defeated. With no victor the
/// game is either an all-draw or unresolvable.
pub fn resolve_game(
    team_partial_outcomes: &[HashSet<GameOutcome>],
) -> Result<Vec<GameOutcome>, GameResolutionError> {
    let resolved: Vec<GameOutcome> = team_partial_outcomes.iter().map(team_outcome).collect();

    let victors = resolved
        .iter()
        .filter(|o| **o == GameOutcome::Victory)
        .count();
    if victors > 1 {
        return Err(GameResolutionError(format!(
            "More than one team claims victory: {resolved:?}"
        )));
    }
    if victors == 1 {
        return Ok(resolved
            .iter()
            .map(|o| {
                if *o == GameOutcome::Victory {
                    GameOutcome::Victory
                } else {
                    GameOutcome::Defeat
                }
            })
            .collect());
    }
    if !resolved.is_empty() && resolved.iter().all(|o| *o == GameOutcome::Draw) {
        return Ok(vec![GameOutcome::Draw; resolved.len()]);
    }
    Err(GameResolutionError(format!(
        "No team claims victory and outcomes are not all draws: {resolved:?}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(reporter: PlayerId, army: i32, outcome: GameOutcome, score: i64) -> GameResultReport {
        GameResultReport {
            reporter,
            army,
            outcome,
            score,
        }
    }

    #[test]
    fn any_draw_report_resolves_to_draw() {
        let mut reports = GameResultReports::new(1);
        reports.add(report(1, 1, GameOutcome::Victory, 10));
        reports.add(report(2, 1, GameOutcome::Draw, 0));
        assert_eq!(reports.outcome(1), GameOutcome::Draw);
    }

    #[test]
    fn majority_wins_and_ties_conflict() {
        let mut reports = GameResultReports::new(1);
        reports.add(report(1, 1, GameOutcome::Victory, 10));
        reports.add(report(2, 1, GameOutcome::Victory, 10));
        reports.add(report(3, 1, GameOutcome::Defeat, 0));
        assert_eq!(reports.outcome(1), GameOutcome::Victory);

        let mut tied = GameResultReports::new(2);
        tied.add(report(1, 1, GameOutcome::Victory, 10));
        tied.add(report(2, 1, GameOutcome::Defeat, 0));
        assert_eq!(tied.outcome(1), GameOutcome::Conflicting);
    }

    #[test]
    fn score_is_the_median() {
        let mut reports = GameResultReports::new(1);
        reports.add(report(1, 1, GameOutcome::Victory, 10));
        reports.add(report(2, 1, GameOutcome::Victory, 100));
        reports.add(report(3, 1, GameOutcome::Victory, 30));
        assert_eq!(reports.score(1), 30);
        assert_eq!(reports.score(99), 0);
    }

    #[test]
    fn mutual_draw_needs_every_army() {
        let mut reports = GameResultReports::new(1);
        reports.add(report(1, 1, GameOutcome::Draw, 0));
        let armies: HashSet<i32> = [1, 2].into_iter().collect();
        assert!(!reports.is_mutually_agreed_draw(&armies));

        reports.add(report(2, 2, GameOutcome::Draw, 0));
        assert!(reports.is_mutually_agreed_draw(&armies));
        assert!(!reports.is_mutually_agreed_draw(&HashSet::new()));
    }

    #[test]
    fn resolver_single_victor() {
        let teams = vec![
            HashSet::from([GameOutcome::Victory]),
            HashSet::from([GameOutcome::Defeat, GameOutcome::Unknown]),
        ];
        assert_eq!(
            resolve_game(&teams).unwrap(),
            vec![GameOutcome::Victory, GameOutcome::Defeat]
        );
    }

    #[test]
    fn resolver_rejects_two_victors() {
        let teams = vec![
            HashSet::from([GameOutcome::Victory]),
            HashSet::from([GameOutcome::Victory]),
        ];
        assert!(resolve_game(&teams).is_err());
    }

    #[test]
    fn resolver_all_draw() {
        let teams = vec![
            HashSet::from([GameOutcome::Draw]),
            HashSet::from([GameOutcome::Draw]),
        ];
        assert_eq!(
            resolve_game(&teams).unwrap(),
            vec![GameOutcome::Draw, GameOutcome::Draw]
        );
    }

    #[test]
    fn resolver_unknown_is_an_error() {
        let teams = vec![
            HashSet::from([GameOutcome::Unknown]),
            HashSet::from([GameOutcome::Defeat]),
        ];
        assert!(resolve_game(&teams).is_err());
    }
}
