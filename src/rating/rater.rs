//! Skill-model invocation and the surrounding outcome math.
//!
//! The model itself is a library primitive (`rate(rating_groups, ranks)`);
//! this module owns grouping players into teams, the two-team rank vector,
//! the post-rate monotonicity override and the outcome likelihoods handed
//! to rating callbacks.

use crate::models::{
    EndedGamePlayerSummary, GameOutcome, OutcomeLikelihoods, PlayerId, Rating, TeamId,
};
use crate::rating::error::RatingError;
use itertools::Itertools;
use openskill::constant::KAPPA;
use openskill::model::model::Model;
use openskill::model::plackett_luce::PlackettLuce;
use openskill::rating::{Rating as SkillRating, TeamRating};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub struct RaterConfig {
    pub start_mean: f64,
    pub start_dev: f64,
    /// Performance spread; also drives the draw margin.
    pub beta: f64,
    pub draw_probability: f64,
}

impl RaterConfig {
    pub fn draw_margin(&self) -> f64 {
        norm_ppf(0.5 * (self.draw_probability + 1.0)) * std::f64::consts::SQRT_2 * self.beta
    }
}

fn gamma(_c: f64, k: f64, _team: &TeamRating) -> f64 {
    1.0 / k
}

pub struct GameRater;

impl GameRater {
    pub fn compute_rating(
        player_data: &[EndedGamePlayerSummary],
        ratings: &HashMap<PlayerId, Rating>,
        config: &RaterConfig,
    ) -> Result<
        (
            HashMap<PlayerId, Rating>,
            HashMap<TeamId, OutcomeLikelihoods>,
        ),
        RatingError,
    > {
        let team_ids: Vec<TeamId> = player_data
            .iter()
            .map(|pd| pd.team_id)
            .unique()
            .collect();

        let mut rating_groups: Vec<(TeamId, Vec<(PlayerId, Rating)>)> = Vec::new();
        let mut team_outcomes: HashMap<TeamId, GameOutcome> = HashMap::new();
        for team_id in &team_ids {
            let members: Vec<(PlayerId, Rating)> = player_data
                .iter()
                .filter(|pd| pd.team_id == *team_id)
                .map(|pd| {
                    ratings
                        .get(&pd.player_id)
                        .copied()
                        .map(|r| (pd.player_id, r))
                        .ok_or_else(|| {
                            RatingError::Rating(format!(
                                "missing rating for player {}",
                                pd.player_id
                            ))
                        })
                })
                .collect::<Result<_, _>>()?;

            let outcomes: Vec<GameOutcome> = player_data
                .iter()
                .filter(|pd| pd.team_id == *team_id)
                .map(|pd| pd.outcome)
                .unique()
                .collect();
            if outcomes.len() != 1 {
                return Err(RatingError::Rating(format!(
                    "Players/teams have inconsistent team outcomes: {player_data:?}"
                )));
            }
            team_outcomes.insert(*team_id, outcomes[0]);
            rating_groups.push((*team_id, members));
        }

        if team_ids.len() != 2 {
            return Err(RatingError::Rating(
                "multiteam/ffa rating not implemented".to_string(),
            ));
        }
        let ranks = ranks_from_two_team_outcomes([
            team_outcomes[&team_ids[0]],
            team_outcomes[&team_ids[1]],
        ])?;

        let model = PlackettLuce::new(config.beta, KAPPA, gamma);
        let input: Vec<Vec<SkillRating>> = rating_groups
            .iter()
            .map(|(_, members)| {
                members
                    .iter()
                    .map(|(_, r)| SkillRating {
                        mu: r.mean,
                        sigma: r.sigma,
                    })
                    .collect()
            })
            .collect();
        let output = model.rate(input, ranks.clone());

        let mut new_ratings: HashMap<PlayerId, Rating> = HashMap::new();
        for ((_, members), rated_team) in rating_groups.iter().zip(output.iter()) {
            for ((player_id, _), rated) in members.iter().zip(rated_team.iter()) {
                new_ratings.insert(*player_id, Rating::new(rated.mu, rated.sigma));
            }
        }

        // Winners and drawers never lose displayed rating; historical
        // leaderboards depend on this.
        for pd in player_data {
            if !matches!(pd.outcome, GameOutcome::Victory | GameOutcome::Draw) {
                continue;
            }
            let old = ratings[&pd.player_id];
            let entry = new_ratings.get_mut(&pd.player_id).unwrap();
            if entry.penis_points() < old.penis_points() {
                *entry = old;
            }
        }

        let aggregated: HashMap<TeamId, Rating> = rating_groups
            .iter()
            .map(|(team_id, members)| {
                let members: Vec<Rating> = members.iter().map(|(_, r)| *r).collect();
                (*team_id, aggregate_team_rating(&members))
            })
            .collect();
        let likelihoods = team_ids
            .iter()
            .map(|team_id| {
                let other = team_ids.iter().find(|t| *t != team_id).unwrap();
                let (own, opp) = (aggregated[team_id], aggregated[other]);
                (
                    *team_id,
                    OutcomeLikelihoods {
                        pwin: likelihood_win(&own, &opp, config),
                        pdraw: likelihood_draw(&own, &opp, config),
                        plose: likelihood_lose(&own, &opp, config),
                    },
                )
            })
            .collect();

        Ok((new_ratings, likelihoods))
    }
}

fn ranks_from_two_team_outcomes(
    outcomes: [GameOutcome; 2],
) -> Result<Vec<usize>, RatingError> {
    match outcomes {
        [GameOutcome::Draw, GameOutcome::Draw] => Ok(vec![0, 0]),
        [GameOutcome::Victory, GameOutcome::Defeat] => Ok(vec![0, 1]),
        [GameOutcome::Defeat, GameOutcome::Victory] => Ok(vec![1, 0]),
        other => Err(RatingError::Rating(format!(
            "Inconsistent outcomes {other:?}"
        ))),
    }
}

/// Mean of means; root-mean-square of the sigmas.
pub fn aggregate_team_rating(team: &[Rating]) -> Rating {
    if team.is_empty() {
        return Rating::new(0.0, 0.0);
    }
    let mean = team.iter().map(|r| r.mean).sum::<f64>() / team.len() as f64;
    let sigma =
        (team.iter().map(|r| r.sigma * r.sigma).sum::<f64>() / team.len() as f64).sqrt();
    Rating::new(mean, sigma)
}

fn pairwise_sigma(r1: &Rating, r2: &Rating, config: &RaterConfig) -> f64 {
    (r1.sigma * r1.sigma + r2.sigma * r2.sigma + 2.0 * config.beta * config.beta).sqrt()
}

pub fn likelihood_draw(r1: &Rating, r2: &Rating, config: &RaterConfig) -> f64 {
    let eps = config.draw_margin();
    let mu = r1.mean - r2.mean;
    let sigma = pairwise_sigma(r1, r2, config);
    norm_cdf((eps - mu) / sigma) - norm_cdf((-eps - mu) / sigma)
}

pub fn likelihood_win(r1: &Rating, r2: &Rating, config: &RaterConfig) -> f64 {
    let eps = config.draw_margin();
    let mu = r1.mean - r2.mean;
    let sigma = pairwise_sigma(r1, r2, config);
    1.0 - norm_cdf((eps - mu) / sigma)
}

pub fn likelihood_lose(r1: &Rating, r2: &Rating, config: &RaterConfig) -> f64 {
    let eps = config.draw_margin();
    let mu = r1.mean - r2.mean;
    let sigma = pairwise_sigma(r1, r2, config);
    norm_cdf((-eps - mu) / sigma)
}

/// Standard normal CDF via the Abramowitz–Stegun erf approximation.
pub fn norm_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.3275911 * x);
    let y = 1.0
        - (((((1.061405429 * t - 1.453152027) * t) + 1.421413741) * t - 0.284496736) * t
            + 0.254829592)
            * t
            * (-x * x).exp();
    sign * y
}

/// Inverse standard normal CDF (Acklam's rational approximation).
pub fn norm_ppf(p: f64) -> f64 {
    assert!(p > 0.0 && p < 1.0, "norm_ppf domain is (0, 1)");
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Faction;

    fn config() -> RaterConfig {
        RaterConfig {
            start_mean: 1500.0,
            start_dev: 500.0,
            beta: 250.0,
            draw_probability: 0.10,
        }
    }

    fn summary(
        player_id: PlayerId,
        team_id: TeamId,
        outcome: GameOutcome,
    ) -> EndedGamePlayerSummary {
        EndedGamePlayerSummary {
            player_id,
            team_id,
            faction: Faction::Arm,
            outcome,
        }
    }

    #[test]
    fn normal_helpers_are_sane() {
        assert!((norm_cdf(0.0) - 0.5).abs() < 1e-6);
        assert!((norm_cdf(1.96) - 0.975).abs() < 1e-3);
        assert!((norm_ppf(0.975) - 1.96).abs() < 1e-3);
        assert!((norm_ppf(0.5)).abs() < 1e-6);
    }

    #[test]
    fn rates_1v1_towards_the_winner() {
        let player_data = vec![
            summary(1, 1, GameOutcome::Victory),
            summary(2, 2, GameOutcome::Defeat),
        ];
        let ratings = HashMap::from([
            (1, Rating::new(1500.0, 500.0)),
            (2, Rating::new(1400.0, 400.0)),
        ]);
        let (new, likelihoods) =
            GameRater::compute_rating(&player_data, &ratings, &config()).unwrap();

        assert!(new[&1].mean > 1500.0);
        assert!(new[&2].mean < 1400.0);
        assert!(new[&1].sigma < 500.0);
        assert!(new[&2].sigma < 400.0);

        assert!(likelihoods[&1].pwin > likelihoods[&2].pwin);
        let total = likelihoods[&1].pwin + likelihoods[&1].pdraw + likelihoods[&1].plose;
        assert!((total - 1.0).abs() < 1e-3);
    }

    #[test]
    fn rates_2v2_teams_together() {
        let player_data = vec![
            summary(1, 1, GameOutcome::Victory),
            summary(2, 1, GameOutcome::Victory),
            summary(3, 2, GameOutcome::Defeat),
            summary(4, 2, GameOutcome::Defeat),
        ];
        let ratings = HashMap::from([
            (1, Rating::new(1500.0, 500.0)),
            (2, Rating::new(1400.0, 400.0)),
            (3, Rating::new(1300.0, 300.0)),
            (4, Rating::new(1200.0, 200.0)),
        ]);
        let (new, _) = GameRater::compute_rating(&player_data, &ratings, &config()).unwrap();
        assert!(new[&1].mean > 1500.0);
        assert!(new[&2].mean > 1400.0);
        assert!(new[&3].mean < 1300.0);
        assert!(new[&4].mean < 1200.0);
    }

    #[test]
    fn multi_team_is_rejected() {
        let player_data = vec![
            summary(1, 1, GameOutcome::Victory),
            summary(2, 2, GameOutcome::Defeat),
            summary(3, 3, GameOutcome::Defeat),
        ];
        let ratings = HashMap::from([
            (1, Rating::new(1500.0, 500.0)),
            (2, Rating::new(1500.0, 500.0)),
            (3, Rating::new(1500.0, 500.0)),
        ]);
        assert!(GameRater::compute_rating(&player_data, &ratings, &config()).is_err());
    }

    #[test]
    fn inconsistent_team_outcomes_are_rejected() {
        let player_data = vec![
            summary(1, 1, GameOutcome::Victory),
            summary(2, 1, GameOutcome::Defeat),
            summary(3, 2, GameOutcome::Defeat),
        ];
        let ratings = HashMap::from([
            (1, Rating::new(1500.0, 500.0)),
            (2, Rating::new(1500.0, 500.0)),
            (3, Rating::new(1500.0, 500.0)),
        ]);
        assert!(GameRater::compute_rating(&player_data, &ratings, &config()).is_err());
    }

    #[test]
    fn two_victors_are_rejected() {
        let player_data = vec![
            summary(1, 1, GameOutcome::Victory),
            summary(2, 2, GameOutcome::Victory),
        ];
        let ratings = HashMap::from([
            (1, Rating::new(1500.0, 500.0)),
            (2, Rating::new(1500.0, 500.0)),
        ]);
        assert!(GameRater::compute_rating(&player_data, &ratings, &config()).is_err());
    }

    #[test]
    fn drawing_favourite_keeps_displayed_rating() {
        let player_data = vec![
            summary(1, 1, GameOutcome::Draw),
            summary(2, 2, GameOutcome::Draw),
        ];
        let old = Rating::new(2000.0, 100.0);
        let ratings = HashMap::from([(1, old), (2, Rating::new(1000.0, 100.0))]);
        let (new, _) = GameRater::compute_rating(&player_data, &ratings, &config()).unwrap();

        // a draw against a much weaker opponent would normally cost skill
        assert!(new[&1].penis_points() >= old.penis_points());
        // the underdog still gains from the draw
        assert!(new[&2].mean > 1000.0);
    }

    #[test]
    fn equal_ratings_stay_roughly_zero_sum() {
        let player_data = vec![
            summary(1, 1, GameOutcome::Victory),
            summary(2, 2, GameOutcome::Defeat),
        ];
        let ratings = HashMap::from([
            (1, Rating::new(1500.0, 500.0)),
            (2, Rating::new(1500.0, 500.0)),
        ]);
        let (new, _) = GameRater::compute_rating(&player_data, &ratings, &config()).unwrap();
        let delta = (new[&1].mean - 1500.0) + (new[&2].mean - 1500.0);
        assert!(delta.abs() < 1.0, "mean sum drifted by {delta}");
    }

    #[test]
    fn aggregate_rating_averages_means() {
        let agg = aggregate_team_rating(&[Rating::new(1000.0, 300.0), Rating::new(2000.0, 400.0)]);
        assert_eq!(agg.mean, 1500.0);
        assert!((agg.sigma - (125000.0f64 * 2.0 / 2.0).sqrt()).abs() < 1e-9);
    }
}
