use serde::{Deserialize, Serialize};

use crate::record_store::{Role, StatKind, normalize_name};
use crate::series::{EarlySummary, SeriesSample};

pub const RECENT_WINDOW: usize = 5;
/// Most recent series fed to [`extract`], for training rows and live requests alike.
pub const HISTORY_WINDOW: usize = 20;
pub const FEATURE_COUNT: usize = 23;

pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "avg_stat",
    "std_dev_stat",
    "recent_avg_stat",
    "form_z_score",
    "form_deviation_ratio",
    "maps_played",
    "position_factor",
    "opponent_strength",
    "tournament_importance",
    "volatility",
    "coefficient_of_variation",
    "avg_deaths",
    "avg_damage_per_map",
    "avg_vision_per_map",
    "avg_cs_per_map",
    "gold_at_10",
    "xp_at_10",
    "cs_at_10",
    "gold_diff_15",
    "xp_diff_15",
    "cs_diff_15",
    "combo_size",
    "combo_penalty",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataQuality {
    High,
    Medium,
    Low,
    Fallback,
}

impl DataQuality {
    pub fn from_coverage(coverage: f64) -> Self {
        if coverage >= 0.8 {
            DataQuality::High
        } else if coverage >= 0.5 {
            DataQuality::Medium
        } else if coverage > 0.0 {
            DataQuality::Low
        } else {
            DataQuality::Fallback
        }
    }
}

/// Fixed-schema feature set. `to_array` is the only path to the model input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub avg_stat: f64,
    pub std_dev_stat: f64,
    pub recent_avg_stat: f64,
    pub form_z_score: f64,
    pub form_deviation_ratio: f64,
    pub maps_played: f64,
    pub position_factor: f64,
    pub opponent_strength: f64,
    pub tournament_importance: f64,
    pub volatility: f64,
    pub coefficient_of_variation: f64,
    pub avg_deaths: f64,
    pub avg_damage_per_map: f64,
    pub avg_vision_per_map: f64,
    pub avg_cs_per_map: f64,
    pub gold_at_10: f64,
    pub xp_at_10: f64,
    pub cs_at_10: f64,
    pub gold_diff_15: f64,
    pub xp_diff_15: f64,
    pub cs_diff_15: f64,
    pub combo_size: f64,
    pub combo_penalty: f64,
    pub early_game_quality: DataQuality,
}

impl FeatureVector {
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.avg_stat,
            self.std_dev_stat,
            self.recent_avg_stat,
            self.form_z_score,
            self.form_deviation_ratio,
            self.maps_played,
            self.position_factor,
            self.opponent_strength,
            self.tournament_importance,
            self.volatility,
            self.coefficient_of_variation,
            self.avg_deaths,
            self.avg_damage_per_map,
            self.avg_vision_per_map,
            self.avg_cs_per_map,
            self.gold_at_10,
            self.xp_at_10,
            self.cs_at_10,
            self.gold_diff_15,
            self.xp_diff_15,
            self.cs_diff_15,
            self.combo_size,
            self.combo_penalty,
        ]
    }

    pub fn named(&self) -> Vec<(&'static str, f64)> {
        FEATURE_NAMES.iter().copied().zip(self.to_array()).collect()
    }

    /// Sample count the statistics were computed from.
    pub fn sample_size(&self) -> usize {
        self.maps_played.max(0.0) as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchContext {
    pub stat: StatKind,
    pub roles: Vec<Role>,
    pub opponent: Option<String>,
    pub tournament: Option<String>,
    pub combo_size: usize,
}

pub fn position_factor(role: Role, stat: StatKind) -> f64 {
    match (stat, role) {
        (StatKind::Kills, Role::Top) => 0.95,
        (StatKind::Kills, Role::Jungle) => 1.0,
        (StatKind::Kills, Role::Mid) => 1.05,
        (StatKind::Kills, Role::Bot) => 1.12,
        (StatKind::Kills, Role::Support) => 0.85,
        (StatKind::Assists, Role::Top) => 0.92,
        (StatKind::Assists, Role::Jungle) => 1.05,
        (StatKind::Assists, Role::Mid) => 1.0,
        (StatKind::Assists, Role::Bot) => 0.95,
        (StatKind::Assists, Role::Support) => 1.12,
        (_, Role::Unknown) => 1.0,
    }
}

pub fn combined_position_factor(roles: &[Role], stat: StatKind) -> f64 {
    if roles.is_empty() {
        return 1.0;
    }
    roles.iter().map(|r| position_factor(*r, stat)).sum::<f64>() / roles.len() as f64
}

pub fn tournament_importance(tournament: &str) -> f64 {
    let t = normalize_name(tournament);
    let has = |k: &str| t.split('_').any(|tok| tok == k) || t.contains(k);
    if has("worlds") || t.contains("world_championship") {
        1.0
    } else if has("msi") || t.contains("mid_season_invitational") {
        0.9
    } else if t.contains("first_stand") || has("ewc") || t.contains("esports_world_cup") {
        0.85
    } else if has("playoffs") || has("finals") || has("final") {
        0.8
    } else if ["lck", "lpl", "lec", "lcs", "lta"]
        .iter()
        .any(|k| t.split('_').any(|tok| tok == *k))
    {
        0.7
    } else {
        0.6
    }
}

pub fn combo_penalty(combo_size: usize) -> f64 {
    (0.05 * combo_size.saturating_sub(1) as f64).min(0.25)
}

/// Role-aware early-game defaults used when no real observation exists.
pub fn early_fallback(role: Role) -> [f64; 6] {
    match role {
        Role::Support => [2600.0, 3100.0, 12.0, 0.0, 0.0, 0.0],
        Role::Jungle => [3300.0, 3600.0, 55.0, 0.0, 0.0, 0.0],
        _ => [3500.0, 4000.0, 80.0, 0.0, 0.0, 0.0],
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn population_std(values: &[f64], mu: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let var = values.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / values.len() as f64;
    var.max(0.0).sqrt()
}

fn per_map(samples: &[&SeriesSample]) -> Option<f64> {
    let maps: usize = samples.iter().map(|s| s.maps).sum();
    (maps > 0).then(|| samples.iter().map(|s| s.stat).sum::<f64>() / maps as f64)
}

/// How hard the opponent has been for this subject, 1.0 neutral, in [0.7, 1.3].
pub fn opponent_strength(samples: &[SeriesSample], opponent: Option<&str>) -> f64 {
    let Some(opp) = opponent.map(normalize_name).filter(|o| !o.is_empty()) else {
        return 1.0;
    };
    let all: Vec<&SeriesSample> = samples.iter().collect();
    let vs: Vec<&SeriesSample> = samples
        .iter()
        .filter(|s| normalize_name(&s.opponent) == opp)
        .collect();
    let (Some(overall), Some(against)) = (per_map(&all), per_map(&vs)) else {
        return 1.0;
    };
    if overall <= 0.0 {
        return 1.0;
    }
    let ratio = if against > 0.0 { overall / against } else { 1.3 };
    let n = vs.len() as f64;
    let shrunk = 1.0 + (ratio - 1.0) * n / (n + 3.0);
    shrunk.clamp(0.7, 1.3)
}

pub fn volatility(cv: f64, z: f64, n: usize, std: f64) -> f64 {
    if std <= 0.0 || !std.is_finite() {
        return 0.0;
    }
    let small_sample = ((10.0 - n as f64) / 10.0).max(0.0);
    (0.5 * cv.min(1.0) + 0.3 * (z.abs() / 2.0).min(1.0) + 0.2 * small_sample).clamp(0.0, 1.0)
}

fn finite(v: f64) -> f64 {
    if v.is_finite() { v } else { 0.0 }
}

/// Tail of a date-ordered sample that [`extract`] should see.
pub fn history_window(samples: &[SeriesSample]) -> &[SeriesSample] {
    &samples[samples.len().saturating_sub(HISTORY_WINDOW)..]
}

/// Builds the feature vector from date-ordered series samples.
pub fn extract(samples: &[SeriesSample], ctx: &MatchContext) -> FeatureVector {
    let stats: Vec<f64> = samples.iter().map(|s| s.stat).collect();
    let n = stats.len();
    let avg = mean(&stats);
    let std = population_std(&stats, avg);
    let recent = &stats[n.saturating_sub(RECENT_WINDOW)..];
    let recent_avg = mean(recent);
    let z = if std > 0.0 { (recent_avg - avg) / std } else { 0.0 };
    let deviation = if avg != 0.0 { (recent_avg - avg) / avg } else { 0.0 };
    let cv = if avg > 0.0 { std / avg } else { 0.0 };

    let avg_deaths = mean(&samples.iter().map(|s| s.deaths).collect::<Vec<_>>());

    let mut early = EarlySummary::default();
    for s in samples {
        early.merge(&s.early);
    }
    let fallback = role_fallback(&ctx.roles);
    let early_vals: [f64; 6] =
        std::array::from_fn(|i| early.mean(i).unwrap_or(fallback[i]));

    let combo_size = ctx.combo_size.max(1);
    let fv = FeatureVector {
        avg_stat: avg,
        std_dev_stat: std,
        recent_avg_stat: recent_avg,
        form_z_score: z,
        form_deviation_ratio: deviation,
        maps_played: n as f64,
        position_factor: combined_position_factor(&ctx.roles, ctx.stat),
        opponent_strength: opponent_strength(samples, ctx.opponent.as_deref()),
        tournament_importance: ctx
            .tournament
            .as_deref()
            .map(tournament_importance)
            .unwrap_or(0.6),
        volatility: volatility(cv, z, n, std),
        coefficient_of_variation: cv,
        avg_deaths,
        avg_damage_per_map: per_map_mean(samples, |s| s.damage),
        avg_vision_per_map: per_map_mean(samples, |s| s.vision),
        avg_cs_per_map: per_map_mean(samples, |s| s.cs),
        gold_at_10: early_vals[0],
        xp_at_10: early_vals[1],
        cs_at_10: early_vals[2],
        gold_diff_15: early_vals[3],
        xp_diff_15: early_vals[4],
        cs_diff_15: early_vals[5],
        combo_size: combo_size as f64,
        combo_penalty: combo_penalty(combo_size),
        early_game_quality: DataQuality::from_coverage(early.coverage()),
    };
    sanitize(fv)
}

fn per_map_mean(samples: &[SeriesSample], f: impl Fn(&SeriesSample) -> f64) -> f64 {
    let maps: usize = samples.iter().map(|s| s.maps).sum();
    if maps == 0 {
        return 0.0;
    }
    samples.iter().map(f).sum::<f64>() / maps as f64
}

fn role_fallback(roles: &[Role]) -> [f64; 6] {
    if roles.is_empty() {
        return early_fallback(Role::Unknown);
    }
    let mut acc = [0.0; 6];
    for r in roles {
        for (a, v) in acc.iter_mut().zip(early_fallback(*r)) {
            *a += v;
        }
    }
    acc.map(|v| v / roles.len() as f64)
}

fn sanitize(mut fv: FeatureVector) -> FeatureVector {
    for v in [
        &mut fv.avg_stat,
        &mut fv.std_dev_stat,
        &mut fv.recent_avg_stat,
        &mut fv.form_z_score,
        &mut fv.form_deviation_ratio,
        &mut fv.maps_played,
        &mut fv.position_factor,
        &mut fv.opponent_strength,
        &mut fv.tournament_importance,
        &mut fv.volatility,
        &mut fv.coefficient_of_variation,
        &mut fv.avg_deaths,
        &mut fv.avg_damage_per_map,
        &mut fv.avg_vision_per_map,
        &mut fv.avg_cs_per_map,
        &mut fv.gold_at_10,
        &mut fv.xp_at_10,
        &mut fv.cs_at_10,
        &mut fv.gold_diff_15,
        &mut fv.xp_diff_15,
        &mut fv.cs_diff_15,
        &mut fv.combo_size,
        &mut fv.combo_penalty,
    ] {
        *v = finite(*v);
    }
    fv
}
