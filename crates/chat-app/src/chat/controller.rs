use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use snafu::{OptionExt, ResultExt, ensure};
use tidechat_protocol::{ChatAnswer, CitationKey, TopicId, TopicRoute, TurnSettings};
use tidechat_storage::{ConversationEntry, ConversationHistory, ConversationStore};
use tokio::sync::Mutex;

use super::error::{
    EmptyQuestionSnafu, NothingToRetrySnafu, RejectedSnafu, StorageSnafu, TurnResult,
    UnknownTopicSnafu,
};
use super::selection::{AnalysisTab, SelectionState};
use super::state::{TurnGeneration, TurnState, TurnTarget, TurnTransition};
use super::turn::{TurnSession, TurnUpdate};
use crate::citation::{CitationCache, CitationHandle, CitationResult};

/// How a submitted turn ended for the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Committed(ChatAnswer),
    /// The topic was switched, reset or cancelled while the turn ran; its
    /// result was dropped without touching history.
    Abandoned,
}

struct ControllerState {
    active_topic: TopicId,
    generation: TurnGeneration,
    turn: TurnState,
    selection: SelectionState,
    history: ConversationHistory,
    last_question: Option<String>,
    failed_question: Option<String>,
}

impl ControllerState {
    fn transition(&mut self, transition: TurnTransition) -> TurnResult<()> {
        self.turn = self
            .turn
            .apply(transition)
            .map_err(|rejection| {
                RejectedSnafu {
                    stage: "controller-turn-transition",
                    rejection,
                }
                .build()
            })?;
        Ok(())
    }

    /// Abandons whatever turn is in flight for the current generation.
    fn bump_generation(&mut self, live: &AtomicU64) {
        self.generation = self.generation.next();
        live.store(self.generation.0, Ordering::SeqCst);
    }
}

/// Drives turns for one active topic at a time.
///
/// Every method takes `&self`, so a topic switch or reset can land while a
/// submit is still awaiting the backend. The in-flight turn then loses its
/// generation: its snapshots stop reaching the observer and its answer is
/// never appended.
pub struct ChatController {
    routes: Vec<TopicRoute>,
    settings: TurnSettings,
    session: TurnSession,
    store: Arc<ConversationStore>,
    citations: CitationCache,
    live_generation: AtomicU64,
    state: Mutex<ControllerState>,
}

impl ChatController {
    pub async fn open(
        routes: Vec<TopicRoute>,
        settings: TurnSettings,
        session: TurnSession,
        store: Arc<ConversationStore>,
        citations: CitationCache,
        topic: &TopicId,
    ) -> TurnResult<Self> {
        let controller = Self {
            routes,
            settings,
            session,
            store,
            citations,
            live_generation: AtomicU64::new(0),
            state: Mutex::new(ControllerState {
                active_topic: topic.clone(),
                generation: TurnGeneration::default(),
                turn: TurnState::Idle,
                selection: SelectionState::default(),
                history: ConversationHistory::new(),
                last_question: None,
                failed_question: None,
            }),
        };
        controller.switch_topic(topic).await?;
        Ok(controller)
    }

    pub fn routes(&self) -> &[TopicRoute] {
        &self.routes
    }

    pub fn settings(&self) -> &TurnSettings {
        &self.settings
    }

    pub fn citations(&self) -> &CitationCache {
        &self.citations
    }

    pub async fn active_topic(&self) -> TopicId {
        self.state.lock().await.active_topic.clone()
    }

    pub async fn history(&self) -> ConversationHistory {
        self.state.lock().await.history.clone()
    }

    pub async fn turn_state(&self) -> TurnState {
        self.state.lock().await.turn.clone()
    }

    pub async fn selection(&self) -> SelectionState {
        self.state.lock().await.selection.clone()
    }

    pub async fn last_question(&self) -> Option<String> {
        self.state.lock().await.last_question.clone()
    }

    pub async fn failed_question(&self) -> Option<String> {
        self.state.lock().await.failed_question.clone()
    }

    /// Loads `topic`'s stored history and abandons any turn in flight.
    pub async fn switch_topic(&self, topic: &TopicId) -> TurnResult<()> {
        self.route_for(topic)?;
        // Loaded under the lock so a concurrent commit cannot land between
        // the read and the swap.
        let mut state = self.state.lock().await;
        let history = self.store.load(topic).await.context(StorageSnafu {
            stage: "controller-load-history",
        })?;

        if let Some(active) = state.turn.active_target() {
            tracing::debug!(
                topic = %active.topic,
                generation = %active.generation,
                "abandoning turn on topic switch"
            );
        }
        state.bump_generation(&self.live_generation);
        state.active_topic = topic.clone();
        state.turn = TurnState::Idle;
        state.selection.clear();
        state.failed_question = None;
        state.last_question = history.last().map(|entry| entry.question.clone());
        state.history = history;

        tracing::info!(topic = %topic, turns = state.history.len(), "switched topic");
        Ok(())
    }

    pub async fn submit<F>(&self, question: &str, mut observer: F) -> TurnResult<TurnOutcome>
    where
        F: FnMut(TurnUpdate),
    {
        let question = question.trim();
        ensure!(
            !question.is_empty(),
            EmptyQuestionSnafu {
                stage: "controller-submit-question",
            }
        );

        let (route, target, history) = {
            let mut state = self.state.lock().await;
            let target = TurnTarget::new(state.active_topic.clone(), state.generation.next());
            let route = self.route_for(&target.topic)?.clone();
            state.transition(TurnTransition::Start(target.clone()))?;
            state.bump_generation(&self.live_generation);
            state.selection.clear();
            state.last_question = Some(question.to_string());
            state.failed_question = None;
            (route, target, state.history.clone())
        };

        let live = &self.live_generation;
        let result = self
            .session
            .submit(&route, question, &history, &self.settings, |update| {
                if live.load(Ordering::SeqCst) == target.generation.0 {
                    observer(update);
                }
            })
            .await;

        let mut state = self.state.lock().await;
        if !state.turn.accepts(&target) {
            tracing::debug!(
                topic = %target.topic,
                generation = %target.generation,
                "dropping result of abandoned turn"
            );
            return Ok(TurnOutcome::Abandoned);
        }

        let committed = match result {
            Ok(answer) => self.commit(&mut state, &target, question, answer).await,
            Err(error) => Err(error),
        };

        match committed {
            Ok(answer) => Ok(TurnOutcome::Committed(answer)),
            Err(error) => {
                tracing::error!(
                    topic = %target.topic,
                    generation = %target.generation,
                    error = %error,
                    "turn failed"
                );
                state.failed_question = Some(question.to_string());
                state.transition(TurnTransition::Fail {
                    target,
                    message: error.user_message(),
                })?;
                Err(error)
            }
        }
    }

    /// Resubmits the question whose turn last failed.
    pub async fn retry<F>(&self, observer: F) -> TurnResult<TurnOutcome>
    where
        F: FnMut(TurnUpdate),
    {
        let question = self
            .state
            .lock()
            .await
            .failed_question
            .clone()
            .context(NothingToRetrySnafu {
                stage: "controller-retry",
            })?;
        tracing::debug!(question = %question, "retrying failed turn");
        self.submit(&question, observer).await
    }

    /// Stops waiting on the in-flight turn. Its eventual result is dropped.
    pub async fn cancel(&self) -> bool {
        let mut state = self.state.lock().await;
        let Some(active) = state.turn.active_target().cloned() else {
            return false;
        };
        if state.transition(TurnTransition::Cancel(active.clone())).is_err() {
            return false;
        }
        state.bump_generation(&self.live_generation);
        tracing::info!(topic = %active.topic, generation = %active.generation, "cancelled turn");
        true
    }

    /// Clears the active topic's history along with every bit of transient
    /// state. Safe to call on a topic with nothing stored.
    pub async fn reset_topic(&self) -> TurnResult<()> {
        let mut state = self.state.lock().await;
        let topic = state.active_topic.clone();
        self.store.reset(&topic).await.context(StorageSnafu {
            stage: "controller-reset-history",
        })?;

        state.bump_generation(&self.live_generation);
        state.transition(TurnTransition::ResetToIdle)?;
        state.selection.clear();
        state.history = ConversationHistory::new();
        state.last_question = None;
        state.failed_question = None;
        self.citations.clear().await;

        tracing::info!(topic = %topic, "reset topic");
        Ok(())
    }

    pub async fn show_citation(&self, citation: &str, answer_index: usize) {
        self.state
            .lock()
            .await
            .selection
            .show_citation(citation, answer_index);
    }

    pub async fn toggle_tab(&self, tab: AnalysisTab, answer_index: usize) {
        self.state.lock().await.selection.toggle_tab(tab, answer_index);
    }

    pub async fn resolve_citation(&self, citation: &str) -> CitationResult<Arc<CitationHandle>> {
        self.citations.resolve(&CitationKey::parse(citation)).await
    }

    fn route_for(&self, topic: &TopicId) -> TurnResult<&TopicRoute> {
        self.routes
            .iter()
            .find(|route| &route.topic == topic)
            .context(UnknownTopicSnafu {
                stage: "controller-resolve-route",
                topic: topic.as_str(),
            })
    }

    async fn commit(
        &self,
        state: &mut ControllerState,
        target: &TurnTarget,
        question: &str,
        answer: ChatAnswer,
    ) -> TurnResult<ChatAnswer> {
        let history = self
            .store
            .append(&target.topic, ConversationEntry::new(question, answer.clone()))
            .await
            .context(StorageSnafu {
                stage: "controller-append-history",
            })?;
        state.history = history;
        state.transition(TurnTransition::Commit(target.clone()))?;

        tracing::info!(
            topic = %target.topic,
            generation = %target.generation,
            turns = state.history.len(),
            "committed turn"
        );
        Ok(answer)
    }
}

impl std::fmt::Debug for ChatController {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ChatController")
            .field("routes", &self.routes)
            .field("live_generation", &self.live_generation)
            .finish_non_exhaustive()
    }
}
