use std::fmt;

use tidechat_protocol::TopicId;

/// Monotonic counter bumped on every submit and topic switch.
///
/// Results tagged with an older generation belong to an abandoned turn and
/// must be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TurnGeneration(pub u64);

impl TurnGeneration {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for TurnGeneration {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Routing key for stale-result rejection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TurnTarget {
    pub topic: TopicId,
    pub generation: TurnGeneration,
}

impl TurnTarget {
    pub fn new(topic: TopicId, generation: TurnGeneration) -> Self {
        Self { topic, generation }
    }
}

/// Lifecycle of the turn owned by the active topic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TurnState {
    #[default]
    Idle,
    Streaming(TurnTarget),
    Committed(TurnTarget),
    Failed {
        target: TurnTarget,
        message: String,
    },
    Cancelled(TurnTarget),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnTransition {
    Start(TurnTarget),
    Commit(TurnTarget),
    Fail {
        target: TurnTarget,
        message: String,
    },
    Cancel(TurnTarget),
    ResetToIdle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnTransitionRejection {
    AlreadyStreaming {
        active: TurnTarget,
        attempted: TurnTarget,
    },
    NoActiveTurn,
    GenerationMismatch {
        active: TurnTarget,
        attempted: TurnTarget,
    },
}

impl fmt::Display for TurnTransitionRejection {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyStreaming { active, .. } => write!(
                formatter,
                "a turn is already streaming for topic '{}'",
                active.topic
            ),
            Self::NoActiveTurn => formatter.write_str("no turn is streaming"),
            Self::GenerationMismatch { active, attempted } => write!(
                formatter,
                "turn generation {} does not match active generation {}",
                attempted.generation, active.generation
            ),
        }
    }
}

pub type TurnTransitionResult = Result<TurnState, TurnTransitionRejection>;

impl TurnState {
    pub fn active_target(&self) -> Option<&TurnTarget> {
        match self {
            Self::Streaming(target) => Some(target),
            Self::Idle | Self::Committed(_) | Self::Failed { .. } | Self::Cancelled(_) => None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming(_))
    }

    /// True when results for `target` may still be shown or committed.
    pub fn accepts(&self, target: &TurnTarget) -> bool {
        matches!(self, Self::Streaming(active) if active == target)
    }

    pub fn failure_message(&self) -> Option<&str> {
        match self {
            Self::Failed { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Any terminal transition must name the streaming target exactly. A
    /// non-streaming state may start a new turn directly.
    pub fn apply(&self, transition: TurnTransition) -> TurnTransitionResult {
        match transition {
            TurnTransition::Start(target) => self.apply_start(target),
            TurnTransition::Commit(target) => self.finish(target, TurnState::Committed),
            TurnTransition::Fail { target, message } => {
                self.finish(target, |target| TurnState::Failed { target, message })
            }
            TurnTransition::Cancel(target) => self.finish(target, TurnState::Cancelled),
            TurnTransition::ResetToIdle => Ok(Self::Idle),
        }
    }

    fn apply_start(&self, target: TurnTarget) -> TurnTransitionResult {
        match self {
            Self::Streaming(active) if *active != target => {
                Err(TurnTransitionRejection::AlreadyStreaming {
                    active: active.clone(),
                    attempted: target,
                })
            }
            Self::Streaming(_) => Ok(self.clone()),
            Self::Idle | Self::Committed(_) | Self::Failed { .. } | Self::Cancelled(_) => {
                Ok(Self::Streaming(target))
            }
        }
    }

    fn finish(
        &self,
        target: TurnTarget,
        terminal: impl FnOnce(TurnTarget) -> TurnState,
    ) -> TurnTransitionResult {
        match self {
            Self::Streaming(active) if *active == target => Ok(terminal(target)),
            Self::Streaming(active) => Err(TurnTransitionRejection::GenerationMismatch {
                active: active.clone(),
                attempted: target,
            }),
            Self::Idle | Self::Committed(_) | Self::Failed { .. } | Self::Cancelled(_) => {
                Err(TurnTransitionRejection::NoActiveTurn)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn target(topic: &str, generation: u64) -> TurnTarget {
        TurnTarget::new(TopicId::from(topic), TurnGeneration::new(generation))
    }

    #[test]
    fn start_then_commit() {
        let streaming = TurnState::Idle
            .apply(TurnTransition::Start(target("theme_1", 1)))
            .unwrap();
        assert!(streaming.accepts(&target("theme_1", 1)));

        let committed = streaming
            .apply(TurnTransition::Commit(target("theme_1", 1)))
            .unwrap();
        assert_eq!(committed, TurnState::Committed(target("theme_1", 1)));
        assert!(!committed.is_streaming());
    }

    #[test]
    fn second_start_while_streaming_is_rejected() {
        let streaming = TurnState::Streaming(target("theme_1", 1));

        let rejection = streaming
            .apply(TurnTransition::Start(target("theme_1", 2)))
            .unwrap_err();

        assert_eq!(
            rejection,
            TurnTransitionRejection::AlreadyStreaming {
                active: target("theme_1", 1),
                attempted: target("theme_1", 2),
            }
        );
    }

    #[test]
    fn stale_generation_cannot_finish_turn() {
        let streaming = TurnState::Streaming(target("theme_2", 4));

        let rejection = streaming
            .apply(TurnTransition::Fail {
                target: target("theme_2", 3),
                message: "boom".to_string(),
            })
            .unwrap_err();

        assert!(matches!(
            rejection,
            TurnTransitionRejection::GenerationMismatch { .. }
        ));
        assert!(!streaming.accepts(&target("theme_2", 3)));
    }

    #[test]
    fn terminal_transitions_need_an_active_turn() {
        assert_eq!(
            TurnState::Idle.apply(TurnTransition::Cancel(target("theme_1", 1))),
            Err(TurnTransitionRejection::NoActiveTurn)
        );
    }

    #[test]
    fn failed_turn_keeps_message_and_can_restart() {
        let failed = TurnState::Streaming(target("theme_1", 1))
            .apply(TurnTransition::Fail {
                target: target("theme_1", 1),
                message: "An error happened".to_string(),
            })
            .unwrap();
        assert_eq!(failed.failure_message(), Some("An error happened"));

        let restarted = failed
            .apply(TurnTransition::Start(target("theme_1", 2)))
            .unwrap();
        assert_eq!(restarted.active_target(), Some(&target("theme_1", 2)));
    }
}
