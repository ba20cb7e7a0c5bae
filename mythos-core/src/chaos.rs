//! Narrative chaos: a yes/no oracle with random twists.
//!
//! A chaos factor between 1 and 9 lives in each session's game state. When a
//! participant asks a yes/no question, or the scene moves to a new location,
//! a d10 is drawn. For questions the (plausibility-adjusted) draw picks an
//! [`OracleAnswer`]; in both cases a draw at or below the chaos factor means
//! a [`Twist`] happens and the narrative has to include it. The factor
//! drifts up as tension rises and down as threads resolve.

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::Mutex;

/// Abstraction over random number generation.
///
/// Production code uses [`ThreadRng`]; tests inject a fixed sequence.
pub trait DeterministicRng: Send + Sync {
    /// A uniformly drawn `u32` in `[min, max]` inclusive.
    fn next_u32_range(&self, min: u32, max: u32) -> u32;
}

/// Draws from the thread-local `rand` generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRng;

impl DeterministicRng for ThreadRng {
    fn next_u32_range(&self, min: u32, max: u32) -> u32 {
        if min >= max {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }
}

/// A seeded generator, for reproducible runs.
pub struct SeededRng(Mutex<rand::rngs::StdRng>);

impl SeededRng {
    pub fn new(seed: u64) -> Self {
        use rand::SeedableRng;
        Self(Mutex::new(rand::rngs::StdRng::seed_from_u64(seed)))
    }
}

impl DeterministicRng for SeededRng {
    fn next_u32_range(&self, min: u32, max: u32) -> u32 {
        if min >= max {
            return min;
        }
        match self.0.lock() {
            Ok(mut rng) => rng.gen_range(min..=max),
            Err(poisoned) => poisoned.into_inner().gen_range(min..=max),
        }
    }
}

// ============================================================================
// Chaos factor
// ============================================================================

/// How unpredictable the story currently is. Always within `1..=9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ChaosFactor(u8);

impl ChaosFactor {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 9;
    pub const INITIAL: u8 = 5;

    /// Clamp any integer into range.
    pub fn new(value: i64) -> Self {
        Self(value.clamp(Self::MIN as i64, Self::MAX as i64) as u8)
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn shifted(self, delta: i64) -> Self {
        Self::new(self.0 as i64 + delta)
    }
}

impl Default for ChaosFactor {
    fn default() -> Self {
        Self(Self::INITIAL)
    }
}

impl<'de> Deserialize<'de> for ChaosFactor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = f64::deserialize(deserializer)?;
        Ok(Self::new(raw.round() as i64))
    }
}

impl fmt::Display for ChaosFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction the story's tension moved during a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensionShift {
    Raised,
    Resolved,
    #[default]
    Steady,
}

impl TensionShift {
    /// Lenient parse of what a completion reported.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "raised" | "rising" | "rise" | "up" | "increased" => TensionShift::Raised,
            "resolved" | "favourable" | "favorable" | "down" | "decreased" => {
                TensionShift::Resolved
            }
            _ => TensionShift::Steady,
        }
    }

    pub fn apply(self, chaos: ChaosFactor) -> ChaosFactor {
        match self {
            TensionShift::Raised => chaos.shifted(1),
            TensionShift::Resolved => chaos.shifted(-1),
            TensionShift::Steady => chaos,
        }
    }
}

// ============================================================================
// Oracle
// ============================================================================

/// The answer to a yes/no question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OracleAnswer {
    No,
    NoBut,
    YesBut,
    Yes,
    YesAnd,
}

impl OracleAnswer {
    /// Map a d10 result (clamped into `1..=10`) onto an answer.
    pub fn from_roll(roll: u32) -> Self {
        match roll.clamp(1, 10) {
            1..=3 => OracleAnswer::No,
            4..=5 => OracleAnswer::NoBut,
            6..=7 => OracleAnswer::YesBut,
            8..=9 => OracleAnswer::Yes,
            _ => OracleAnswer::YesAnd,
        }
    }
}

impl fmt::Display for OracleAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OracleAnswer::No => "No",
            OracleAnswer::NoBut => "No, but",
            OracleAnswer::YesBut => "Yes, but",
            OracleAnswer::Yes => "Yes",
            OracleAnswer::YesAnd => "Yes, and",
        })
    }
}

/// How plausible the asked-about outcome is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Likelihood {
    Likely,
    #[default]
    Even,
    Unlikely,
}

const UNLIKELY_MARKERS: &[&str] = &[
    "unlikely",
    "improbable",
    "improvável",
    "improvavel",
    "dificilmente",
    "pouco provável",
];

const LIKELY_MARKERS: &[&str] = &["likely", "probably", "surely", "provavelmente", "certamente"];

impl Likelihood {
    /// Scan a question for plausibility markers.
    pub fn from_question(question: &str) -> Self {
        let lower = question.to_lowercase();
        if UNLIKELY_MARKERS.iter().any(|m| lower.contains(m)) {
            Likelihood::Unlikely
        } else if LIKELY_MARKERS.iter().any(|m| lower.contains(m)) {
            Likelihood::Likely
        } else {
            Likelihood::Even
        }
    }

    pub fn modifier(self) -> i64 {
        match self {
            Likelihood::Likely => 2,
            Likelihood::Even => 0,
            Likelihood::Unlikely => -2,
        }
    }
}

const YES_NO_OPENERS: &[&str] = &[
    // English
    "is", "are", "was", "were", "do", "does", "did", "can", "could", "will", "would", "should",
    "has", "have", "had", "may", "might", "must", "am",
    // Portuguese
    "é", "há", "tem", "será", "pode", "posso", "existe", "está",
];

/// True for inputs shaped like a yes/no question.
pub fn is_yes_no_question(input: &str) -> bool {
    let trimmed = input.trim();
    if !trimmed.ends_with('?') {
        return false;
    }
    let first = trimmed
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .split(|c: char| c.is_whitespace() || c == ',')
        .next()
        .unwrap_or_default()
        .to_lowercase();
    YES_NO_OPENERS.contains(&first.as_str())
}

/// Who or what a twist concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TwistFocus {
    Protagonist,
    Antagonist,
    PresentNpc,
    Location,
    ActiveObjective,
    PastEvent,
}

impl TwistFocus {
    pub const ALL: [TwistFocus; 6] = [
        TwistFocus::Protagonist,
        TwistFocus::Antagonist,
        TwistFocus::PresentNpc,
        TwistFocus::Location,
        TwistFocus::ActiveObjective,
        TwistFocus::PastEvent,
    ];

    pub fn describe(self) -> &'static str {
        match self {
            TwistFocus::Protagonist => "the protagonist",
            TwistFocus::Antagonist => "an antagonist",
            TwistFocus::PresentNpc => "an NPC who is present",
            TwistFocus::Location => "the current location",
            TwistFocus::ActiveObjective => "an active objective",
            TwistFocus::PastEvent => "a past event",
        }
    }
}

/// What kind of complication a twist is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TwistKind {
    AllyFails,
    UnexpectedObstacle,
    UnexpectedAid,
    EnvironmentShift,
    SomethingLost,
    Revelation,
}

impl TwistKind {
    pub const ALL: [TwistKind; 6] = [
        TwistKind::AllyFails,
        TwistKind::UnexpectedObstacle,
        TwistKind::UnexpectedAid,
        TwistKind::EnvironmentShift,
        TwistKind::SomethingLost,
        TwistKind::Revelation,
    ];

    pub fn describe(self) -> &'static str {
        match self {
            TwistKind::AllyFails => "an ally fails or betrays",
            TwistKind::UnexpectedObstacle => "an unexpected obstacle",
            TwistKind::UnexpectedAid => "unexpected aid",
            TwistKind::EnvironmentShift => "a drastic change in the environment",
            TwistKind::SomethingLost => "something is lost or stolen",
            TwistKind::Revelation => "an important revelation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Twist {
    pub focus: TwistFocus,
    pub kind: TwistKind,
}

impl fmt::Display for Twist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} involving {}", self.kind.describe(), self.focus.describe())
    }
}

/// Why the oracle is being consulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleTrigger {
    Question(String),
    SceneTransition,
}

/// Result of one oracle consultation; stored at `gameState/oracle/last`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    /// Raw d10 result.
    pub roll: u32,
    /// Roll after the plausibility modifier; compared against the chaos factor.
    pub adjusted_roll: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<OracleAnswer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twist: Option<Twist>,
    /// Chaos factor at the time of the draw.
    pub chaos_factor: ChaosFactor,
}

impl OracleOutcome {
    /// Short bracketed line appended to the plain narrative, if there is
    /// anything to report.
    pub fn narrative_line(&self) -> Option<String> {
        let head = match self.answer {
            Some(answer) => format!("Oracle: {answer}"),
            None => "Scene".to_string(),
        };
        match (&self.answer, &self.twist) {
            (_, Some(twist)) => Some(format!("[{head} | Twist: {twist}]")),
            (Some(_), None) => Some(format!("[{head}]")),
            (None, None) => None,
        }
    }

    /// Rich counterpart of [`narrative_line`](Self::narrative_line).
    pub fn rich_line(&self) -> Option<String> {
        self.narrative_line()
            .map(|line| format!("<div class='system-message'><p>{line}</p></div>"))
    }
}

/// Draw for `trigger` against `chaos`.
pub fn consult(
    trigger: &OracleTrigger,
    chaos: ChaosFactor,
    rng: &dyn DeterministicRng,
) -> OracleOutcome {
    let roll = rng.next_u32_range(1, 10);

    let (question, adjusted_roll, answer) = match trigger {
        OracleTrigger::Question(q) => {
            let modifier = Likelihood::from_question(q).modifier();
            let adjusted = (roll as i64 + modifier).clamp(1, 10) as u32;
            (Some(q.clone()), adjusted, Some(OracleAnswer::from_roll(adjusted)))
        }
        OracleTrigger::SceneTransition => (None, roll, None),
    };

    let twist = if adjusted_roll <= chaos.get() as u32 {
        let focus = TwistFocus::ALL[(rng.next_u32_range(1, 6) as usize).saturating_sub(1).min(5)];
        let kind = TwistKind::ALL[(rng.next_u32_range(1, 6) as usize).saturating_sub(1).min(5)];
        Some(Twist { focus, kind })
    } else {
        None
    };

    OracleOutcome {
        question,
        roll,
        adjusted_roll,
        answer,
        twist,
        chaos_factor: chaos,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SequenceRng;

    #[test]
    fn test_chaos_factor_clamps() {
        assert_eq!(ChaosFactor::new(-3).get(), 1);
        assert_eq!(ChaosFactor::new(42).get(), 9);
        assert_eq!(ChaosFactor::default().get(), 5);
        assert_eq!(ChaosFactor::new(9).shifted(1).get(), 9);
        assert_eq!(ChaosFactor::new(1).shifted(-1).get(), 1);
    }

    #[test]
    fn test_chaos_factor_deserializes_clamped() {
        let c: ChaosFactor = serde_json::from_str("0").unwrap();
        assert_eq!(c.get(), 1);
        let c: ChaosFactor = serde_json::from_str("6.4").unwrap();
        assert_eq!(c.get(), 6);
    }

    #[test]
    fn test_answer_table() {
        let answers: Vec<OracleAnswer> = (1..=10).map(OracleAnswer::from_roll).collect();
        use OracleAnswer::*;
        assert_eq!(
            answers,
            vec![No, No, No, NoBut, NoBut, YesBut, YesBut, Yes, Yes, YesAnd]
        );
    }

    #[test]
    fn test_yes_no_detection() {
        assert!(is_yes_no_question("Is the guard asleep?"));
        assert!(is_yes_no_question("  does she trust me ?"));
        assert!(is_yes_no_question("É seguro atravessar a ponte?"));
        assert!(is_yes_no_question("¿Há alguém na taverna?"));
        assert!(!is_yes_no_question("Where is the guard?"));
        assert!(!is_yes_no_question("Is the guard asleep"));
        assert!(!is_yes_no_question("I open the door."));
    }

    #[test]
    fn test_likelihood_markers() {
        assert_eq!(Likelihood::from_question("Is it likely guarded?"), Likelihood::Likely);
        assert_eq!(Likelihood::from_question("Is it unlikely to rain?"), Likelihood::Unlikely);
        assert_eq!(Likelihood::from_question("Is it raining?"), Likelihood::Even);
    }

    #[test]
    fn test_consult_question_with_twist() {
        let rng = SequenceRng::new(vec![3, 2, 6]);
        let outcome = consult(
            &OracleTrigger::Question("Is the guard asleep?".into()),
            ChaosFactor::new(5),
            &rng,
        );
        assert_eq!(outcome.answer, Some(OracleAnswer::No));
        assert_eq!(
            outcome.twist,
            Some(Twist {
                focus: TwistFocus::Antagonist,
                kind: TwistKind::Revelation
            })
        );
        assert_eq!(
            outcome.narrative_line().unwrap(),
            "[Oracle: No | Twist: an important revelation involving an antagonist]"
        );
    }

    #[test]
    fn test_consult_likely_shifts_answer_and_skips_twist() {
        let rng = SequenceRng::new(vec![4]);
        let outcome = consult(
            &OracleTrigger::Question("Is the door probably locked?".into()),
            ChaosFactor::new(5),
            &rng,
        );
        assert_eq!(outcome.roll, 4);
        assert_eq!(outcome.adjusted_roll, 6);
        assert_eq!(outcome.answer, Some(OracleAnswer::YesBut));
        assert_eq!(outcome.twist, None);
    }

    #[test]
    fn test_scene_transition_without_twist_is_silent() {
        let rng = SequenceRng::new(vec![10]);
        let outcome = consult(&OracleTrigger::SceneTransition, ChaosFactor::new(9), &rng);
        assert_eq!(outcome.answer, None);
        assert_eq!(outcome.twist, None);
        assert!(outcome.narrative_line().is_none());
    }

    #[test]
    fn test_tension_shift() {
        assert_eq!(TensionShift::parse("Raised"), TensionShift::Raised);
        assert_eq!(TensionShift::parse("resolved"), TensionShift::Resolved);
        assert_eq!(TensionShift::parse("???"), TensionShift::Steady);
        assert_eq!(TensionShift::Raised.apply(ChaosFactor::new(9)).get(), 9);
        assert_eq!(TensionShift::Resolved.apply(ChaosFactor::new(5)).get(), 4);
    }

    #[test]
    fn test_seeded_rng_stays_in_range() {
        let rng = SeededRng::new(7);
        for _ in 0..500 {
            let v = rng.next_u32_range(1, 10);
            assert!((1..=10).contains(&v));
        }
    }
}
