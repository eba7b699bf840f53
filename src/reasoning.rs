use serde::Serialize;

use crate::predict::Prediction;
use crate::tiers::TierInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    High,
    Moderate,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "fact", rename_all = "snake_case")]
pub enum ReasoningFact {
    TierDisclosure {
        tier: u8,
        name: String,
        weight: f64,
        series: usize,
    },
    VolatilityWarning {
        volatility: f64,
        level: Level,
    },
    HistoricalRange {
        avg: f64,
        std: f64,
    },
    Form {
        z_score: f64,
        hot: bool,
    },
    SampleSize {
        series: usize,
        level: Level,
    },
    PositionFactor {
        factor: f64,
        favorable: bool,
    },
    GapMagnitude {
        gap: f64,
        level: Level,
    },
    Summary {
        prediction: Prediction,
        expected: f64,
        prop: f64,
        gap: f64,
    },
    ConfidenceTier {
        confidence: f64,
        level: Level,
    },
}

/// Inputs the explanation is built from. Same numbers the prediction used.
#[derive(Debug, Clone, Copy)]
pub struct ReasoningInput<'a> {
    pub tier: &'a TierInfo,
    pub avg: f64,
    pub std: f64,
    pub volatility: f64,
    pub form_z: f64,
    pub series: usize,
    pub position_factor: f64,
    pub prediction: Prediction,
    pub expected: f64,
    pub prop: f64,
    /// Final confidence on the 0-100 scale.
    pub confidence: f64,
}

pub fn build_facts(input: &ReasoningInput<'_>) -> Vec<ReasoningFact> {
    let mut facts = vec![ReasoningFact::TierDisclosure {
        tier: input.tier.tier,
        name: input.tier.name.clone(),
        weight: input.tier.weight,
        series: input.tier.series_used,
    }];

    if input.volatility >= 0.5 {
        facts.push(ReasoningFact::VolatilityWarning {
            volatility: input.volatility,
            level: Level::High,
        });
    } else if input.volatility >= 0.3 {
        facts.push(ReasoningFact::VolatilityWarning {
            volatility: input.volatility,
            level: Level::Moderate,
        });
    }

    facts.push(ReasoningFact::HistoricalRange {
        avg: input.avg,
        std: input.std,
    });

    if input.form_z.abs() > 1.0 {
        facts.push(ReasoningFact::Form {
            z_score: input.form_z,
            hot: input.form_z > 0.0,
        });
    }

    let sample_level = if input.series >= 20 {
        Level::High
    } else if input.series >= 10 {
        Level::Moderate
    } else {
        Level::Low
    };
    facts.push(ReasoningFact::SampleSize {
        series: input.series,
        level: sample_level,
    });

    if input.position_factor > 1.1 || input.position_factor < 0.9 {
        facts.push(ReasoningFact::PositionFactor {
            factor: input.position_factor,
            favorable: input.position_factor > 1.0,
        });
    }

    let gap = (input.expected - input.prop).abs();
    if gap >= 2.0 {
        facts.push(ReasoningFact::GapMagnitude {
            gap,
            level: Level::High,
        });
    } else if gap >= 1.0 {
        facts.push(ReasoningFact::GapMagnitude {
            gap,
            level: Level::Moderate,
        });
    }

    facts.push(ReasoningFact::Summary {
        prediction: input.prediction,
        expected: input.expected,
        prop: input.prop,
        gap,
    });

    let level = if input.confidence >= 70.0 {
        Level::High
    } else if input.confidence >= 50.0 {
        Level::Moderate
    } else {
        Level::Low
    };
    facts.push(ReasoningFact::ConfidenceTier {
        confidence: input.confidence,
        level,
    });
    facts
}

fn sentence(fact: &ReasoningFact) -> String {
    match fact {
        ReasoningFact::TierDisclosure {
            tier: 1,
            series,
            ..
        } => format!("Based on {series} series from this exact tournament."),
        ReasoningFact::TierDisclosure {
            tier,
            name,
            weight,
            series,
        } => format!(
            "Fallback data used: tier {tier} ({}) with {series} series, weighted {:.0}%.",
            name.replace('_', " "),
            weight * 100.0
        ),
        ReasoningFact::VolatilityWarning {
            volatility,
            level: Level::High,
        } => format!("High volatility ({volatility:.2}): results swing widely series to series."),
        ReasoningFact::VolatilityWarning { volatility, .. } => {
            format!("Moderate volatility ({volatility:.2}).")
        }
        ReasoningFact::HistoricalRange { avg, std } => {
            format!("Historical range {:.1} to {:.1} (avg {avg:.1} ± {std:.1}).", (avg - std).max(0.0), avg + std)
        }
        ReasoningFact::Form { z_score, hot: true } => {
            format!("Trending up: recent series run {z_score:.1} standard deviations above average.")
        }
        ReasoningFact::Form { z_score, .. } => format!(
            "Trending down: recent series run {:.1} standard deviations below average.",
            z_score.abs()
        ),
        ReasoningFact::SampleSize {
            series,
            level: Level::High,
        } => format!("Large sample of {series} series."),
        ReasoningFact::SampleSize {
            series,
            level: Level::Moderate,
        } => format!("Adequate sample of {series} series."),
        ReasoningFact::SampleSize { series, .. } => {
            format!("Small sample of {series} series; treat with caution.")
        }
        ReasoningFact::PositionFactor {
            factor,
            favorable: true,
        } => format!("Role is favorable for this stat (x{factor:.2})."),
        ReasoningFact::PositionFactor { factor, .. } => {
            format!("Role is unfavorable for this stat (x{factor:.2}).")
        }
        ReasoningFact::GapMagnitude {
            gap,
            level: Level::High,
        } => format!("Large gap of {gap:.1} between expectation and line."),
        ReasoningFact::GapMagnitude { gap, .. } => {
            format!("Moderate gap of {gap:.1} between expectation and line.")
        }
        ReasoningFact::Summary {
            prediction,
            expected,
            prop,
            gap,
        } => format!(
            "Expected {expected:.1} vs line {prop:.1} ({gap:.1} gap): {}.",
            prediction.as_str()
        ),
        ReasoningFact::ConfidenceTier { confidence, level } => {
            let label = match level {
                Level::High => "High",
                Level::Moderate => "Moderate",
                Level::Low => "Low",
            };
            format!("{label} confidence ({confidence:.1}%).")
        }
    }
}

pub fn render(facts: &[ReasoningFact]) -> String {
    facts.iter().map(sentence).collect::<Vec<_>>().join(" ")
}
