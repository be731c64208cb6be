//! PII redaction applied to every string leaving through the event sink
//! and the audit log.

use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
        .unwrap_or_else(|_| unreachable!("static pattern"))
});

// Secrets before cards: a Bearer token may contain long digit runs.
static SECRET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(sk-[A-Za-z0-9_-]{8,}|Bearer\s+[A-Za-z0-9._~+/=-]+|xox[baprs]-[A-Za-z0-9-]+)")
        .unwrap_or_else(|_| unreachable!("static pattern"))
});

// Candidate card numbers: 13-19 digits allowing space/dash delimiters.
// Luhn decides whether a candidate is actually redacted.
static CARD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b\d(?:[ -]?\d){12,18}\b").unwrap_or_else(|_| unreachable!("static pattern"))
});

/// Counts of what a redaction pass replaced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedactionStats {
    /// Email addresses replaced
    pub emails: usize,
    /// Luhn-valid card numbers replaced
    pub cards: usize,
    /// Bearer tokens and API keys replaced
    pub secrets: usize,
}

impl RedactionStats {
    /// Total replacements.
    pub fn total(&self) -> usize {
        self.emails + self.cards + self.secrets
    }
}

/// Shared redactor. Enabled by default; disabling requires an explicit
/// `PII_REDACTION_ENABLED=false`.
#[derive(Debug, Clone)]
pub struct PiiRedactor {
    enabled: bool,
}

impl PiiRedactor {
    /// Build a redactor.
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Whether redaction is active.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Redact a string, returning the clean text.
    pub fn redact(&self, input: &str) -> String {
        self.redact_counting(input).0
    }

    /// Redact a string and report what was replaced.
    pub fn redact_counting(&self, input: &str) -> (String, RedactionStats) {
        let mut stats = RedactionStats::default();
        if !self.enabled {
            return (input.to_string(), stats);
        }

        let mut out = SECRET_RE
            .replace_all(input, |_: &regex::Captures<'_>| {
                stats.secrets += 1;
                "<secret>"
            })
            .into_owned();

        out = EMAIL_RE
            .replace_all(&out, |_: &regex::Captures<'_>| {
                stats.emails += 1;
                "<email>"
            })
            .into_owned();

        out = CARD_RE
            .replace_all(&out, |caps: &regex::Captures<'_>| {
                let candidate = &caps[0];
                let digits: String = candidate.chars().filter(char::is_ascii_digit).collect();
                if luhn_valid(&digits) {
                    stats.cards += 1;
                    "<cc>".to_string()
                } else {
                    candidate.to_string()
                }
            })
            .into_owned();

        (out, stats)
    }

    /// Redact a header value. Authorization values are always replaced,
    /// even when general redaction is disabled.
    pub fn redact_header(&self, name: &str, value: &str) -> String {
        if name.eq_ignore_ascii_case("authorization") {
            return "<secret>".to_string();
        }
        self.redact(value)
    }
}

/// Standard Luhn checksum over a digit string.
fn luhn_valid(digits: &str) -> bool {
    if !(13..=19).contains(&digits.len()) {
        return false;
    }
    let mut sum = 0u32;
    for (i, c) in digits.chars().rev().enumerate() {
        let Some(d) = c.to_digit(10) else {
            return false;
        };
        let d = if i % 2 == 1 {
            let doubled = d * 2;
            if doubled > 9 {
                doubled - 9
            } else {
                doubled
            }
        } else {
            d
        };
        sum += d;
    }
    sum % 10 == 0
}
