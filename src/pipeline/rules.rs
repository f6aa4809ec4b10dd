//! Pre-LLM rules for fast pattern matching.
//!
//! Runs before the classifier to short-circuit messages that never warrant
//! a reply or moderation:
//! - bare acknowledgements ("ok", "thanks!", "lol")
//! - greetings addressed to nobody in particular ("Good morning everyone!")
//! - emoji / punctuation only
//!
//! Anything that names the coach skips the rules and goes to the model.

use regex::Regex;
use tracing::debug;

use crate::policy::Policy;

/// Why a rule matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub reason: &'static str,
}

struct QuietRule {
    regex: Regex,
    reason: &'static str,
}

/// Pre-LLM rules engine.
pub struct RulesEngine {
    rules: Vec<QuietRule>,
}

impl RulesEngine {
    /// Default acknowledgement and greeting patterns.
    pub fn default_rules() -> Self {
        let compile = |pattern: &str| Regex::new(pattern).expect("built-in rule pattern");
        Self {
            rules: vec![
                QuietRule {
                    regex: compile(
                        r"(?i)^\s*(ok(ay)?|k+|kk|thanks?( you)?|thx|ty|lol+|lmao|ha(ha)+|nice|cool|great|yes|yep|yeah|no|nope|sure|got it|sounds good|will do|done|same|\+1)\s*[!.]*\s*$",
                    ),
                    reason: "acknowledgement",
                },
                QuietRule {
                    regex: compile(
                        r"(?i)^\s*(good\s+(morning|afternoon|evening|night)|morning|hi|hello|hey|gm|gn)(\s+(everyone|everybody|all|team|guys|folks|fam|y'?all))?\s*[!.]*\s*$",
                    ),
                    reason: "greeting",
                },
            ],
        }
    }

    /// No patterns; only wordless messages are caught.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Returns a match if `body` needs neither a reply nor moderation.
    pub fn evaluate(&self, body: &str, policy: &Policy) -> Option<RuleMatch> {
        if policy.mentions_coach(body) {
            return None;
        }

        if !body.chars().any(char::is_alphanumeric) {
            debug!("Rules matched: no words");
            return Some(RuleMatch {
                reason: "no words",
            });
        }

        // Strip trailing emoji so "Good morning everyone! ☀️" still matches.
        let trimmed = body.trim_end_matches(|c: char| !c.is_alphanumeric() && !c.is_ascii());
        self.rules
            .iter()
            .find(|rule| rule.regex.is_match(trimmed))
            .map(|rule| {
                debug!(reason = rule.reason, "Rules matched");
                RuleMatch {
                    reason: rule.reason,
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> Policy {
        Policy {
            coach_name: "Coach Dana".into(),
            ..Policy::default()
        }
    }

    #[test]
    fn greetings_match() {
        let rules = RulesEngine::default_rules();
        for body in [
            "Good morning everyone!",
            "good morning",
            "Hey all",
            "gm fam ☀️",
            "Hello team!!",
        ] {
            assert!(rules.evaluate(body, &policy()).is_some(), "{body}");
        }
    }

    #[test]
    fn acknowledgements_match() {
        let rules = RulesEngine::default_rules();
        for body in ["ok", "Thanks!", "thank you.", "lol", "hahaha", "👍", "💪🔥", "+1"] {
            assert!(rules.evaluate(body, &policy()).is_some(), "{body}");
        }
    }

    #[test]
    fn substantive_messages_pass_through() {
        let rules = RulesEngine::default_rules();
        for body in [
            "How much protein should I eat after a workout?",
            "Good morning everyone! Hit a new deadlift PR today",
            "I need urgent help with my macros",
        ] {
            assert!(rules.evaluate(body, &policy()).is_none(), "{body}");
        }
    }

    #[test]
    fn naming_the_coach_bypasses_rules() {
        let rules = RulesEngine::default_rules();
        assert!(rules.evaluate("thanks Dana!", &policy()).is_none());
        assert!(rules.evaluate("Good morning coach", &policy()).is_none());
    }

    #[test]
    fn empty_engine_only_catches_wordless() {
        let rules = RulesEngine::empty();
        assert!(rules.evaluate("ok", &policy()).is_none());
        assert!(rules.evaluate("🙂", &policy()).is_some());
    }
}
