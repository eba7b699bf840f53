use std::collections::HashSet;

use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, Poisson};

use crate::record_store::{EarlyGame, MatchRecord, Role};

/// Shape of the synthetic history.
#[derive(Debug, Clone, PartialEq)]
pub struct FakeLeagueConfig {
    pub seed: u64,
    pub leagues: Vec<FakeLeague>,
    pub years: Vec<i32>,
    /// Top teams per league sent to the yearly international event.
    pub international_slots: usize,
    /// Chance that a player-map carries early-game columns.
    pub early_game_coverage: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FakeLeague {
    pub code: String,
    pub splits: Vec<String>,
    pub teams: Vec<String>,
}

impl FakeLeagueConfig {
    /// Two four-team leagues over two years.
    pub fn small(seed: u64) -> Self {
        Self {
            seed,
            leagues: vec![
                FakeLeague {
                    code: "LCK".to_string(),
                    splits: vec!["Spring".to_string(), "Summer".to_string()],
                    teams: ["T1", "Gen.G", "Hanwha Life", "KT Rolster"]
                        .map(String::from)
                        .to_vec(),
                },
                FakeLeague {
                    code: "LEC".to_string(),
                    splits: vec!["Spring".to_string(), "Summer".to_string()],
                    teams: ["G2 Esports", "Fnatic", "Team Vitality", "MAD Lions"]
                        .map(String::from)
                        .to_vec(),
                },
            ],
            years: vec![2023, 2024],
            international_slots: 2,
            early_game_coverage: 0.8,
        }
    }

    pub fn standard(seed: u64) -> Self {
        let mut cfg = Self::small(seed);
        cfg.leagues[0].teams.extend(
            ["Dplus KIA", "DRX", "Kwangdong Freecs", "OKSavingsBank BRION"].map(String::from),
        );
        cfg.leagues[1].teams.extend(
            ["Team Heretics", "SK Gaming", "Rogue", "Karmine Corp"].map(String::from),
        );
        cfg.leagues.push(FakeLeague {
            code: "LPL".to_string(),
            splits: vec!["Spring".to_string(), "Summer".to_string()],
            teams: [
                "Bilibili Gaming",
                "JD Gaming",
                "Top Esports",
                "Weibo Gaming",
                "LNG Esports",
                "EDward Gaming",
            ]
            .map(String::from)
            .to_vec(),
        });
        cfg.years = vec![2022, 2023, 2024];
        cfg
    }
}

#[derive(Debug, Clone)]
struct FakePlayer {
    name: String,
    role: Role,
    skill: f64,
}

#[derive(Debug, Clone)]
struct FakeTeam {
    name: String,
    players: Vec<FakePlayer>,
}

impl FakeTeam {
    fn strength(&self) -> f64 {
        self.players.iter().map(|p| p.skill).sum::<f64>() / self.players.len().max(1) as f64
    }
}

const SYLLABLES: &[&str] = &[
    "ka", "zen", "ru", "vi", "mo", "lex", "tan", "shi", "dor", "ne", "ya", "pe", "ko", "ris",
    "bo", "gu", "mi", "fa", "lo", "chu", "ter", "ox", "sa", "wen",
];

fn player_name(rng: &mut StdRng, taken: &mut HashSet<String>) -> String {
    loop {
        let parts = rng.gen_range(2..=3);
        let mut name = String::new();
        for _ in 0..parts {
            name.push_str(SYLLABLES[rng.gen_range(0..SYLLABLES.len())]);
        }
        let mut chars = name.chars();
        let name = match chars.next() {
            Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
            None => continue,
        };
        if taken.insert(name.clone()) {
            return name;
        }
    }
}

fn build_team(name: &str, rng: &mut StdRng, taken: &mut HashSet<String>) -> FakeTeam {
    let skill = Normal::<f64>::new(1.0, 0.15).ok();
    let players = Role::PLAYABLE
        .iter()
        .map(|role| FakePlayer {
            name: player_name(rng, taken),
            role: *role,
            skill: skill
                .as_ref()
                .map(|d| d.sample(rng))
                .unwrap_or(1.0)
                .clamp(0.6, 1.5),
        })
        .collect();
    FakeTeam {
        name: name.to_string(),
        players,
    }
}

fn role_rates(role: Role) -> (f64, f64) {
    // (kills, assists) per map
    match role {
        Role::Top => (2.5, 4.5),
        Role::Jungle => (2.8, 6.5),
        Role::Mid => (3.4, 5.5),
        Role::Bot => (4.2, 5.0),
        Role::Support => (0.9, 8.5),
        Role::Unknown => (2.5, 5.0),
    }
}

fn poisson(rng: &mut StdRng, lambda: f64) -> u32 {
    match Poisson::new(lambda.max(0.05)) {
        Ok(dist) => {
            let v: f64 = dist.sample(rng);
            v.max(0.0) as u32
        }
        Err(_) => 0,
    }
}

fn jitter(rng: &mut StdRng, scale: f64) -> f64 {
    rng.gen_range(-scale..=scale)
}

fn early_game(rng: &mut StdRng, role: Role, won: bool, coverage: f64) -> EarlyGame {
    if !rng.gen_bool(coverage.clamp(0.0, 1.0)) {
        return EarlyGame::default();
    }
    let (gold, xp, cs) = match role {
        Role::Support => (2600.0, 3100.0, 12.0),
        Role::Jungle => (3300.0, 3600.0, 55.0),
        _ => (3500.0, 4000.0, 80.0),
    };
    let lead = if won { 1.0 } else { -1.0 };
    EarlyGame {
        gold_at_10: Some(gold + jitter(rng, 300.0) + lead * 120.0),
        xp_at_10: Some(xp + jitter(rng, 300.0) + lead * 100.0),
        cs_at_10: Some((cs + jitter(rng, 8.0)).max(0.0)),
        gold_diff_15: Some(lead * 400.0 + jitter(rng, 700.0)),
        xp_diff_15: Some(lead * 300.0 + jitter(rng, 600.0)),
        cs_diff_15: Some(lead * 6.0 + jitter(rng, 12.0)),
    }
}

/// Circle-method single round robin: rounds of (home, away) index pairs.
fn round_robin(n: usize) -> Vec<Vec<(usize, usize)>> {
    if n < 2 {
        return Vec::new();
    }
    let mut ids: Vec<Option<usize>> = (0..n).map(Some).collect();
    if n % 2 == 1 {
        ids.push(None);
    }
    let m = ids.len();
    let mut rounds = Vec::with_capacity(m - 1);
    for _ in 0..m - 1 {
        let mut round = Vec::new();
        for i in 0..m / 2 {
            if let (Some(a), Some(b)) = (ids[i], ids[m - 1 - i]) {
                round.push((a, b));
            }
        }
        rounds.push(round);
        ids[1..].rotate_right(1);
    }
    rounds
}

struct SeriesCtx<'a> {
    tournament: &'a str,
    series_id: String,
    date: NaiveDate,
    best_of: u8,
}

fn play_series(
    rng: &mut StdRng,
    a: &FakeTeam,
    b: &FakeTeam,
    ctx: &SeriesCtx<'_>,
    coverage: f64,
    out: &mut Vec<MatchRecord>,
) -> bool {
    let need = ctx.best_of / 2 + 1;
    let p_a = a.strength().powi(3) / (a.strength().powi(3) + b.strength().powi(3));
    let (mut wins_a, mut wins_b) = (0u8, 0u8);
    let mut map_index = 0u8;
    while wins_a < need && wins_b < need {
        map_index += 1;
        let a_won = rng.gen_bool(p_a.clamp(0.05, 0.95));
        if a_won {
            wins_a += 1;
        } else {
            wins_b += 1;
        }
        for (team, opp, won) in [(a, b, a_won), (b, a, !a_won)] {
            let pace = if won { 1.3 } else { 0.7 };
            for p in &team.players {
                let (k_rate, a_rate) = role_rates(p.role);
                let opp_factor = 1.0 / opp.strength().max(0.5);
                let kills = poisson(rng, k_rate * p.skill * pace * opp_factor);
                let assists = poisson(rng, a_rate * p.skill * pace * opp_factor);
                let deaths = poisson(rng, if won { 1.8 } else { 3.4 });
                let (damage_base, vision_base, cs_base) = match p.role {
                    Role::Support => (7_000.0, 75.0, 40.0),
                    Role::Jungle => (12_000.0, 40.0, 190.0),
                    _ => (18_000.0, 28.0, 260.0),
                };
                out.push(MatchRecord {
                    player: p.name.clone(),
                    team: team.name.clone(),
                    opponent: opp.name.clone(),
                    tournament: ctx.tournament.to_string(),
                    date: ctx.date,
                    series_id: ctx.series_id.clone(),
                    map_index,
                    role: p.role,
                    kills,
                    assists,
                    deaths,
                    damage: damage_base * p.skill * rng.gen_range(0.7..1.3),
                    vision: vision_base * rng.gen_range(0.7..1.3),
                    cs: cs_base * rng.gen_range(0.8..1.2),
                    early: early_game(rng, p.role, won, coverage),
                });
            }
        }
    }
    wins_a > wins_b
}

fn series_id(tournament: &str, round: usize, a: &FakeTeam, b: &FakeTeam) -> String {
    let tag = |s: &str| {
        s.chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase()
    };
    format!("{}-r{round}-{}-{}", tag(tournament), tag(&a.name), tag(&b.name))
}

/// Deterministic per-map records for every configured league, split and year.
pub fn generate(cfg: &FakeLeagueConfig) -> Vec<MatchRecord> {
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let mut taken = HashSet::new();
    let leagues: Vec<(&FakeLeague, Vec<FakeTeam>)> = cfg
        .leagues
        .iter()
        .map(|league| {
            let teams = league
                .teams
                .iter()
                .map(|name| build_team(name, &mut rng, &mut taken))
                .collect();
            (league, teams)
        })
        .collect();

    let mut out = Vec::new();
    for &year in &cfg.years {
        let mut qualified: Vec<&FakeTeam> = Vec::new();
        for (league, teams) in &leagues {
            let mut wins = vec![0usize; teams.len()];
            for (split_idx, split) in league.splits.iter().enumerate() {
                let tournament = format!("{} {} {year}", league.code, split);
                let Some(start) = NaiveDate::from_ymd_opt(year, 1 + 4 * split_idx as u32, 10)
                else {
                    continue;
                };
                let single = round_robin(teams.len());
                let double = single
                    .iter()
                    .cloned()
                    .chain(single.iter().map(|r| r.iter().map(|(a, b)| (*b, *a)).collect()));
                for (round, pairs) in double.enumerate() {
                    let date = start + Duration::days(4 * round as i64);
                    for (h, a) in pairs {
                        let ctx = SeriesCtx {
                            tournament: &tournament,
                            series_id: series_id(&tournament, round, &teams[h], &teams[a]),
                            date,
                            best_of: 3,
                        };
                        if play_series(
                            &mut rng,
                            &teams[h],
                            &teams[a],
                            &ctx,
                            cfg.early_game_coverage,
                            &mut out,
                        ) {
                            wins[h] += 1;
                        } else {
                            wins[a] += 1;
                        }
                    }
                }
            }
            let mut order: Vec<usize> = (0..teams.len()).collect();
            order.sort_by(|x, y| wins[*y].cmp(&wins[*x]).then_with(|| x.cmp(y)));
            qualified.extend(order.into_iter().take(cfg.international_slots).map(|i| &teams[i]));
        }

        if qualified.len() >= 2
            && let Some(start) = NaiveDate::from_ymd_opt(year, 10, 1)
        {
            let tournament = format!("Worlds {year}");
            for (round, pairs) in round_robin(qualified.len()).into_iter().enumerate() {
                let date = start + Duration::days(3 * round as i64);
                for (h, a) in pairs {
                    let ctx = SeriesCtx {
                        tournament: &tournament,
                        series_id: series_id(&tournament, round, qualified[h], qualified[a]),
                        date,
                        best_of: 5,
                    };
                    play_series(
                        &mut rng,
                        qualified[h],
                        qualified[a],
                        &ctx,
                        cfg.early_game_coverage,
                        &mut out,
                    );
                }
            }
        }
    }
    out
}
