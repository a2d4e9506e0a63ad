//! Admission gate
//!
//! Validates and, when possible, repairs text encoding before any routing
//! or tool spend. The only admission-level termination point: input whose
//! corruption score stays above the fail-fast threshold short-circuits the
//! whole pipeline with a fixed message.

use crate::config::GateConfig;
use crate::models::{GateDecision, GateReport};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;

/// Fixed localized message returned on fail-fast.
pub const FAIL_FAST_MESSAGE: &str =
    "I couldn't read that message — it looks garbled. Please resend it as plain text.";

/// Weight of the replacement-character ratio in the corruption score.
const REPLACEMENT_WEIGHT: f64 = 0.7;
/// Weight of known corrupted-byte-sequence signatures.
const SIGNATURE_WEIGHT: f64 = 0.35;
/// Weight of disallowed control characters (newline/tab/CR excluded).
const CONTROL_WEIGHT: f64 = 0.25;

/// Byte-sequence signatures of UTF-8 text decoded under a single-byte
/// codepage. Ordered roughly by frequency in the wild.
const MOJIBAKE_SIGNATURES: &[&str] = &[
    "â€™", "â€œ", "â€\u{9d}", "â€“", "â€”", "â€¦", "â‚¬",
    "Ã©", "Ã¨", "Ã¼", "Ã¶", "Ã¤", "Ã±", "Ã§", "Ã ", "Ã¢", "Ãª", "Ã®", "Ã´",
    "Â£", "Â°", "Â·", "Â ", "ï»¿", "ï¿½",
];

/// Ordered reverse-encoding repair strategies. Selection among accepted
/// candidates is by (score, strategy name) ascending, so the order here
/// only controls attempt sequence, not the tie-break.
const REPAIR_STRATEGIES: &[(&str, &str)] = &[
    ("cp1252_reverse", "windows-1252"),
    ("latin1_reverse", "iso-8859-1"),
];

pub struct AdmissionGate {
    config: GateConfig,
}

/// What leaves the gate: the (possibly repaired) text plus the report.
pub struct GateOutcome {
    pub text: String,
    pub report: GateReport,
}

impl AdmissionGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    /// Run the gate on raw input text.
    pub fn admit(&self, raw: &str) -> GateOutcome {
        let normalized: String = raw.nfc().collect();
        let initial_score = corruption_score(&normalized);

        let mut reason_codes = component_reasons(&normalized);
        let mut text = normalized;
        let mut score = initial_score;
        let mut repair_applied = None;
        let mut encoding_guess = None;
        let mut decision = GateDecision::Pass;

        if initial_score >= self.config.repair_threshold {
            if let Some(candidate) = self.best_repair(&text, initial_score) {
                debug!(
                    strategy = candidate.strategy,
                    before = initial_score,
                    after = candidate.score,
                    "Admission gate repaired input"
                );
                reason_codes.push(format!("gate:repaired:{}", candidate.strategy));
                text = candidate.text;
                score = candidate.score;
                repair_applied = Some(candidate.strategy.to_string());
                encoding_guess = Some(candidate.encoding.to_string());
                decision = GateDecision::Repair;
            } else {
                reason_codes.push("gate:repair_unavailable".to_string());
            }
        }

        if score > self.config.fail_fast_threshold {
            warn!(score, "Admission gate fail-fast");
            reason_codes.push("gate:fail_fast".to_string());
            decision = GateDecision::FailFast;
        }

        let fingerprint = hex::encode(Sha256::digest(text.as_bytes()));

        GateOutcome {
            text,
            report: GateReport {
                decision,
                mojibake_score: score,
                repair_applied,
                encoding_guess,
                reason_codes,
                fingerprint,
            },
        }
    }

    /// Try every strategy; accept candidates that reduce the score by at
    /// least the configured delta; pick by (score, name) ascending.
    fn best_repair(&self, text: &str, current_score: f64) -> Option<RepairCandidate> {
        let mut accepted: Vec<RepairCandidate> = REPAIR_STRATEGIES
            .iter()
            .filter_map(|&(strategy, encoding)| {
                let repaired = apply_reverse_encoding(text, strategy)?;
                let repaired: String = repaired.nfc().collect();
                let score = corruption_score(&repaired);
                if current_score - score >= self.config.min_repair_delta {
                    Some(RepairCandidate {
                        strategy,
                        encoding,
                        score,
                        text: repaired,
                    })
                } else {
                    None
                }
            })
            .collect();

        accepted.sort_by(|a, b| {
            a.score
                .total_cmp(&b.score)
                .then_with(|| a.strategy.cmp(&b.strategy))
        });
        accepted.into_iter().next()
    }
}

struct RepairCandidate {
    strategy: &'static str,
    encoding: &'static str,
    score: f64,
    text: String,
}

/// Reinterpret the text's code points as bytes of the named single-byte
/// encoding, then decode those bytes as UTF-8. Fails when any character is
/// not representable in the source encoding or the bytes are not UTF-8.
fn apply_reverse_encoding(text: &str, strategy: &str) -> Option<String> {
    let bytes = match strategy {
        "cp1252_reverse" => {
            let (encoded, _, had_errors) = encoding_rs::WINDOWS_1252.encode(text);
            if had_errors {
                return None;
            }
            encoded.into_owned()
        }
        "latin1_reverse" => {
            let mut out = Vec::with_capacity(text.len());
            for ch in text.chars() {
                let cp = ch as u32;
                if cp > 0xFF {
                    return None;
                }
                out.push(cp as u8);
            }
            out
        }
        _ => return None,
    };

    String::from_utf8(bytes).ok()
}

/// Weighted corruption likelihood in [0,1].
fn corruption_score(text: &str) -> f64 {
    let (replacement, signature, control) = score_components(text);
    (REPLACEMENT_WEIGHT * replacement + SIGNATURE_WEIGHT * signature + CONTROL_WEIGHT * control)
        .min(1.0)
}

fn score_components(text: &str) -> (f64, f64, f64) {
    let char_count = text.chars().count();
    if char_count == 0 {
        return (0.0, 0.0, 0.0);
    }

    let replacement_chars = text.chars().filter(|&c| c == '\u{FFFD}').count();

    let mut signature_chars = 0usize;
    for sig in MOJIBAKE_SIGNATURES {
        let occurrences = text.matches(sig).count();
        signature_chars += occurrences * sig.chars().count();
    }

    let control_chars = text
        .chars()
        .filter(|&c| c.is_control() && !matches!(c, '\n' | '\t' | '\r'))
        .count();

    let total = char_count as f64;
    (
        replacement_chars as f64 / total,
        (signature_chars as f64 / total).min(1.0),
        control_chars as f64 / total,
    )
}

fn component_reasons(text: &str) -> Vec<String> {
    let (replacement, signature, control) = score_components(text);
    let mut codes = Vec::new();
    if replacement > 0.0 {
        codes.push("gate:replacement_chars".to_string());
    }
    if signature > 0.0 {
        codes.push("gate:mojibake_signatures".to_string());
    }
    if control > 0.0 {
        codes.push("gate:control_chars".to_string());
    }
    codes
}
