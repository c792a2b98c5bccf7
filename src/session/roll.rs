use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::session::player::ParticipantId;

/// A skill being tested by a roll (e.g. "perception").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillCheck {
    pub skill: String,
}

/// A named bonus/penalty applied to a roll.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollModifier {
    pub label: String,
    pub value: i32,
}

/// Parameters of a shared roll, relayed verbatim to every observer so all
/// clients present the same check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skill_check: Option<SkillCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty_class: Option<i32>,
    pub dice_type: String,
    #[serde(default)]
    pub modifiers: Vec<RollModifier>,
}

/// Outcome reported by the initiating client. The server never recomputes or
/// validates it; every observer sees exactly these numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollOutcome {
    pub result: i32,
    pub success: bool,
    pub is_critical_success: bool,
    pub is_critical_failure: bool,
}

/// An in-flight roll for one initiator.
#[derive(Debug, Clone)]
pub struct ActiveRoll {
    pub args: RollArgs,
    pub outcome: Option<RollOutcome>,
}

/// Tracks in-flight rolls per initiating participant.
///
/// Lifecycle per initiator: idle -> started -> resolved -> idle. At most one
/// roll is tracked per initiator; a second start supersedes the first.
#[derive(Debug, Default)]
pub struct RollBoard {
    rolls: HashMap<ParticipantId, ActiveRoll>,
}

impl RollBoard {
    pub fn new() -> Self {
        Self {
            rolls: HashMap::new(),
        }
    }

    /// Begin a roll for `initiator`, superseding any prior one.
    pub fn start(&mut self, initiator: &str, args: RollArgs) {
        self.rolls.insert(
            initiator.to_string(),
            ActiveRoll {
                args,
                outcome: None,
            },
        );
    }

    /// Record the reported outcome. Returns false when no roll was active
    /// for the initiator (the relay still goes out either way).
    pub fn resolve(&mut self, initiator: &str, outcome: RollOutcome) -> bool {
        match self.rolls.get_mut(initiator) {
            Some(roll) => {
                roll.outcome = Some(outcome);
                true
            }
            None => false,
        }
    }

    /// Discard the initiator's roll, returning to idle.
    pub fn close(&mut self, initiator: &str) -> Option<ActiveRoll> {
        self.rolls.remove(initiator)
    }

    pub fn get(&self, initiator: &str) -> Option<&ActiveRoll> {
        self.rolls.get(initiator)
    }

    pub fn active_count(&self) -> usize {
        self.rolls.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d20() -> RollArgs {
        RollArgs {
            title: Some("Perception check".to_string()),
            subtitle: None,
            skill_check: Some(SkillCheck {
                skill: "perception".to_string(),
            }),
            difficulty_class: Some(15),
            dice_type: "d20".to_string(),
            modifiers: vec![RollModifier {
                label: "WIS".to_string(),
                value: 3,
            }],
        }
    }

    fn seventeen() -> RollOutcome {
        RollOutcome {
            result: 17,
            success: true,
            is_critical_success: false,
            is_critical_failure: false,
        }
    }

    #[test]
    fn test_full_lifecycle() {
        let mut board = RollBoard::new();

        board.start("alice", d20());
        assert!(board.get("alice").unwrap().outcome.is_none());

        assert!(board.resolve("alice", seventeen()));
        assert_eq!(board.get("alice").unwrap().outcome.as_ref().unwrap().result, 17);

        let closed = board.close("alice");
        assert!(closed.is_some());
        assert!(board.get("alice").is_none());
        assert_eq!(board.active_count(), 0);
    }

    #[test]
    fn test_second_start_supersedes() {
        let mut board = RollBoard::new();
        board.start("alice", d20());
        board.resolve("alice", seventeen());

        let mut other = d20();
        other.difficulty_class = Some(10);
        board.start("alice", other);

        let roll = board.get("alice").unwrap();
        assert!(roll.outcome.is_none());
        assert_eq!(roll.args.difficulty_class, Some(10));
        assert_eq!(board.active_count(), 1);
    }

    #[test]
    fn test_resolve_without_start() {
        let mut board = RollBoard::new();
        assert!(!board.resolve("nobody", seventeen()));
    }

    #[test]
    fn test_independent_initiators() {
        let mut board = RollBoard::new();
        board.start("alice", d20());
        board.start("bob", d20());

        board.close("alice");
        assert!(board.get("bob").is_some());
    }

    #[test]
    fn test_args_wire_format() {
        let json = serde_json::to_value(d20()).unwrap();
        assert_eq!(json["diceType"], "d20");
        assert_eq!(json["difficultyClass"], 15);
        assert_eq!(json["skillCheck"]["skill"], "perception");
        assert_eq!(json["modifiers"][0]["value"], 3);
        assert!(json.get("subtitle").is_none());
    }

    #[test]
    fn test_outcome_wire_format() {
        let json = serde_json::to_value(seventeen()).unwrap();
        assert_eq!(json["result"], 17);
        assert_eq!(json["isCriticalSuccess"], false);
    }
}
