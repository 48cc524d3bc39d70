use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Which stake pricing the galactic war score update uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StakeStrategy {
    Rating,
    Rank,
}

impl StakeStrategy {
    fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "rank" => StakeStrategy::Rank,
            _ => StakeStrategy::Rating,
        }
    }
}

/// Server-wide tunables, loaded from the environment once at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: Option<String>,

    pub start_rating_mean: f64,
    pub start_rating_dev: f64,
    /// Spread parameter used for outcome likelihoods and the draw margin.
    pub rating_beta: f64,
    pub rating_draw_probability: f64,
    pub ladder_1v1_outcome_override: bool,
    pub strict_map_pool: bool,
    /// Publish ping-table updates as stripped-down game_info messages.
    pub publish_game_info_with_pings_only: bool,

    pub dirty_report_interval: Duration,
    pub ping_interval: Duration,
    pub game_setup_timeout: Duration,

    pub galactic_war: GalacticWarConfig,
}

#[derive(Debug, Clone)]
pub struct GalacticWarConfig {
    pub state_file: String,
    pub scenario_path: String,
    pub initial_scenario: String,
    /// Zero disables the periodic state update task.
    pub update_interval: Duration,
    pub max_score: f64,
    pub required_dominance_ratio: f64,
    pub default_planet_size: u32,
    pub default_mod: String,
    pub stake_strategy: StakeStrategy,
    pub rank_factor: f64,
    pub winner_takes_the_pot: bool,
    pub check_game_mod: bool,
    pub initialise_ensure_ranked_maps: bool,
    pub manual_capture: Option<String>,
}

impl Default for GalacticWarConfig {
    fn default() -> Self {
        Self {
            state_file: "galactic_war_state.json".to_string(),
            scenario_path: "scenarios".to_string(),
            initial_scenario: "scenario_0.json".to_string(),
            update_interval: Duration::ZERO,
            max_score: 20.0,
            required_dominance_ratio: 1.5,
            default_planet_size: 100,
            default_mod: "tacc:1".to_string(),
            stake_strategy: StakeStrategy::Rating,
            rank_factor: 0.25,
            winner_takes_the_pot: true,
            check_game_mod: true,
            initialise_ensure_ranked_maps: false,
            manual_capture: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            start_rating_mean: 1500.0,
            start_rating_dev: 500.0,
            rating_beta: 250.0,
            rating_draw_probability: 0.10,
            ladder_1v1_outcome_override: true,
            strict_map_pool: false,
            publish_game_info_with_pings_only: false,
            dirty_report_interval: Duration::from_secs(1),
            ping_interval: Duration::from_secs(45),
            game_setup_timeout: Duration::from_secs(60),
            galactic_war: GalacticWarConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = ServerConfig::default();
        let gw_defaults = GalacticWarConfig::default();

        Self {
            database_url: env_opt("DATABASE_URL"),
            start_rating_mean: env_or("START_RATING_MEAN", defaults.start_rating_mean),
            start_rating_dev: env_or("START_RATING_DEV", defaults.start_rating_dev),
            rating_beta: env_or("RATING_BETA", defaults.rating_beta),
            rating_draw_probability: env_or(
                "RATING_DRAW_PROBABILITY",
                defaults.rating_draw_probability,
            ),
            ladder_1v1_outcome_override: env_or(
                "LADDER_1V1_OUTCOME_OVERRIDE",
                defaults.ladder_1v1_outcome_override,
            ),
            strict_map_pool: env_or("STRICT_MAP_POOL", defaults.strict_map_pool),
            publish_game_info_with_pings_only: env_or(
                "PUBLISH_GAME_INFO_WITH_PINGS_ONLY",
                defaults.publish_game_info_with_pings_only,
            ),
            dirty_report_interval: Duration::from_millis(env_or(
                "DIRTY_REPORT_INTERVAL_MS",
                defaults.dirty_report_interval.as_millis() as u64,
            )),
            ping_interval: Duration::from_secs(env_or(
                "PING_INTERVAL_SECS",
                defaults.ping_interval.as_secs(),
            )),
            game_setup_timeout: Duration::from_secs(env_or(
                "GAME_SETUP_TIMEOUT_SECS",
                defaults.game_setup_timeout.as_secs(),
            )),
            galactic_war: GalacticWarConfig {
                state_file: env_or("GALACTIC_WAR_STATE_FILE", gw_defaults.state_file),
                scenario_path: env_or("GALACTIC_WAR_SCENARIO_PATH", gw_defaults.scenario_path),
                initial_scenario: env_or(
                    "GALACTIC_WAR_INITIAL_SCENARIO",
                    gw_defaults.initial_scenario,
                ),
                update_interval: Duration::from_secs(env_or(
                    "GALACTIC_WAR_UPDATE_INTERVAL_SECS",
                    0u64,
                )),
                max_score: env_or("GALACTIC_WAR_MAX_SCORE", gw_defaults.max_score),
                required_dominance_ratio: env_or(
                    "GALACTIC_WAR_REQUIRED_DOMINANCE_RATIO",
                    gw_defaults.required_dominance_ratio,
                ),
                default_planet_size: env_or(
                    "GALACTIC_WAR_DEFAULT_PLANET_SIZE",
                    gw_defaults.default_planet_size,
                ),
                default_mod: env_or(
                    "GALACTIC_WAR_INITIALISE_DEFAULT_MOD",
                    gw_defaults.default_mod,
                ),
                stake_strategy: env_opt("GALACTIC_WAR_STAKE_STRATEGY")
                    .map(|v| StakeStrategy::parse(&v))
                    .unwrap_or(gw_defaults.stake_strategy),
                rank_factor: env_or("GALACTIC_WAR_RANK_FACTOR", gw_defaults.rank_factor),
                winner_takes_the_pot: env_or(
                    "GALACTIC_WAR_WINNER_TAKES_THE_POT",
                    gw_defaults.winner_takes_the_pot,
                ),
                check_game_mod: env_or("GALACTIC_WAR_CHECK_GAME_MOD", gw_defaults.check_game_mod),
                initialise_ensure_ranked_maps: env_or(
                    "GALACTIC_WAR_INITIALISE_ENSURE_RANKED_MAPS",
                    gw_defaults.initialise_ensure_ranked_maps,
                ),
                manual_capture: env_opt("GALACTIC_WAR_MANUAL_CAPTURE"),
            },
        }
    }
}
