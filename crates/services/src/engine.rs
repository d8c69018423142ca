use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use quiz_core::model::{
    Answers, AttemptRecord, ModuleKey, ModuleProgress, ModuleQuizzes, ParticipantId, Question,
    QuizDefinition, QuizId, QuizKind,
};
use quiz_core::{
    AttemptGate, AttemptHistory, Clock, GateDecision, ParticipantMatching, ProgressEvaluator,
};
use storage::repository::{
    AttemptRepository, AttemptScope, QuizRepository, Storage, StorageError, TimerKey, TimerStore,
};

use crate::attempts::{AttemptTimer, QuestionSampler, ResultRecorder, SubmitTrigger, SubmittedAttempt};
use crate::config::EngineConfig;
use crate::confirm::{AttemptCommand, Confirmation};
use crate::error::EngineError;
use crate::reports::{self, ParticipantStats, TrainingHistoryItem};

//
// ─── RESULTS ───────────────────────────────────────────────────────────────────
//

/// Gate verdict for starting an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptAccess {
    pub decision: GateDecision,
    /// True when attempt history could not be read and the verdict was taken
    /// from the last known progress instead.
    pub stale: bool,
}

/// Pre-start summary of a quiz.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizOverview {
    pub quiz_id: QuizId,
    pub kind: QuizKind,
    pub module: ModuleKey,
    pub question_count: usize,
    pub time_limit_minutes: Option<u32>,
    pub minimum_pass_score: u8,
}

/// Result of one poll of an open attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Running { remaining: u64 },
    Untimed,
    /// Time ran out on this poll and the attempt was submitted.
    AutoSubmitted(SubmittedAttempt),
    /// The attempt was already submitted.
    Finished,
}

/// Result of executing a confirmed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Submitted(SubmittedAttempt),
    Exited { remaining: Option<u64> },
}

//
// ─── ATTEMPT CONTEXT ───────────────────────────────────────────────────────────
//

/// One open attempt: the sampled questions, answers so far and the countdown.
#[derive(Debug, Clone)]
pub struct AttemptContext {
    participant: ParticipantId,
    quiz: QuizDefinition,
    questions: Vec<Question>,
    answers: Answers,
    timer: Option<AttemptTimer>,
    finished: bool,
}

impl AttemptContext {
    #[must_use]
    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    #[must_use]
    pub fn quiz(&self) -> &QuizDefinition {
        &self.quiz
    }

    /// Questions in display order, options already shuffled.
    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    #[must_use]
    pub fn answers(&self) -> &Answers {
        &self.answers
    }

    /// Record an answer. Out-of-range positions or options are ignored.
    pub fn choose(&mut self, position: usize, option: usize) -> bool {
        let valid = self
            .questions
            .get(position)
            .is_some_and(|q| option < q.options().len());
        if valid {
            self.answers.choose(position, option);
        }
        valid
    }

    #[must_use]
    pub fn timer(&self) -> Option<&AttemptTimer> {
        self.timer.as_ref()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn timer_key(&self) -> Option<TimerKey> {
        self.timer.as_ref().map(|t| t.key().clone())
    }
}

//
// ─── ENGINE ────────────────────────────────────────────────────────────────────
//

type SnapshotKey = (ParticipantId, ModuleKey);

/// Entries kept before old snapshots are evicted.
pub const SNAPSHOT_CAPACITY: usize = 1024;

/// Last successfully evaluated progress per participant and module, used
/// only when attempt history cannot be read. Bounded: the oldest entry is
/// evicted once `capacity` is reached.
#[derive(Debug)]
struct ProgressSnapshots {
    capacity: usize,
    entries: Mutex<SnapshotEntries>,
}

#[derive(Debug, Default)]
struct SnapshotEntries {
    progress: HashMap<SnapshotKey, ModuleProgress>,
    order: VecDeque<SnapshotKey>,
}

impl ProgressSnapshots {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(SnapshotEntries::default()),
        }
    }

    fn remember(&self, participant: &ParticipantId, module: &ModuleKey, progress: &ModuleProgress) {
        let mut guard = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (participant.clone(), module.clone());
        if guard.progress.insert(key.clone(), progress.clone()).is_some() {
            return;
        }
        guard.order.push_back(key);
        while guard.order.len() > self.capacity {
            if let Some(oldest) = guard.order.pop_front() {
                guard.progress.remove(&oldest);
            }
        }
    }

    fn get(&self, participant: &ParticipantId, module: &ModuleKey) -> Option<ModuleProgress> {
        let guard = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .progress
            .get(&(participant.clone(), module.clone()))
            .cloned()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        let guard = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        guard.progress.len()
    }
}

/// Entry point of the attempt engine.
///
/// Gate checks and submissions are not serialised against each other: two
/// open sessions of one participant may both pass the gate and both submit.
#[derive(Clone)]
pub struct QuizEngine {
    clock: Clock,
    config: EngineConfig,
    quizzes: Arc<dyn QuizRepository>,
    attempts: Arc<dyn AttemptRepository>,
    timers: Arc<dyn TimerStore>,
    recorder: ResultRecorder,
    snapshots: Arc<ProgressSnapshots>,
}

impl QuizEngine {
    #[must_use]
    pub fn new(
        clock: Clock,
        quizzes: Arc<dyn QuizRepository>,
        attempts: Arc<dyn AttemptRepository>,
        timers: Arc<dyn TimerStore>,
    ) -> Self {
        let recorder = ResultRecorder::new(Arc::clone(&attempts), Arc::clone(&timers));
        Self {
            clock,
            config: EngineConfig::default(),
            quizzes,
            attempts,
            timers,
            recorder,
            snapshots: Arc::new(ProgressSnapshots::new(SNAPSHOT_CAPACITY)),
        }
    }

    #[must_use]
    pub fn from_storage(clock: Clock, storage: &Storage) -> Self {
        Self::new(
            clock,
            Arc::clone(&storage.quizzes),
            Arc::clone(&storage.attempts),
            Arc::clone(&storage.timers),
        )
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Same stores and snapshot cache, different clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn clock(&self) -> Clock {
        self.clock
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn gate(&self) -> AttemptGate {
        AttemptGate::new(self.config.lockout_failed_attempts)
    }

    // ─── progress ────────────────────────────────────────────────────────────

    /// Current progress of a participant in one module.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Infrastructure` if quizzes or attempts cannot be read.
    #[tracing::instrument(
        skip(self, participant, module),
        fields(participant = %participant, module = %module)
    )]
    pub async fn evaluate_progress(
        &self,
        participant: &ParticipantId,
        module: &ModuleKey,
    ) -> Result<ModuleProgress, EngineError> {
        let quizzes = self.module_quizzes(module).await?;
        let history = self
            .participant_history(participant, &AttemptScope::Module(module.clone()))
            .await?;
        let progress = ProgressEvaluator::evaluate(&history, quizzes.has_pre_test(), self.clock.now());
        self.remember(participant, module, &progress);
        Ok(progress)
    }

    /// Progress for every module of a training, in module order.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Infrastructure` on storage failures.
    pub async fn training_progress(
        &self,
        participant: &ParticipantId,
        training_title: &str,
    ) -> Result<Vec<(ModuleKey, ModuleProgress)>, EngineError> {
        let modules = self.quizzes.list_training_modules(training_title).await?;
        let mut out = Vec::with_capacity(modules.len());
        for module in modules {
            let progress = self.evaluate_progress(participant, &module).await?;
            out.push((module, progress));
        }
        Ok(out)
    }

    // ─── gate ────────────────────────────────────────────────────────────────

    /// Decide whether `participant` may start `quiz_id` now.
    ///
    /// If attempt history cannot be read, the decision is taken from the last
    /// progress evaluated for this module and marked stale. Without such a
    /// snapshot the attempt is allowed: an unreachable store never turns into
    /// a rule violation. Failures to read the quiz itself are returned.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Infrastructure` if the quiz definitions cannot be read.
    #[tracing::instrument(
        skip(self, participant, quiz_id),
        fields(participant = %participant, quiz = %quiz_id)
    )]
    pub async fn can_start_attempt(
        &self,
        participant: &ParticipantId,
        quiz_id: QuizId,
    ) -> Result<AttemptAccess, EngineError> {
        let quiz = self.quizzes.get_quiz(quiz_id).await?;
        if quiz.kind() == QuizKind::PreTest {
            return Ok(AttemptAccess {
                decision: GateDecision::Allowed,
                stale: false,
            });
        }

        let module = quiz.module().clone();
        let quizzes = self.module_quizzes(&module).await?;
        let scope = AttemptScope::Module(module.clone());

        let (decision, stale) = match self.participant_history(participant, &scope).await {
            Ok(history) => {
                let progress =
                    ProgressEvaluator::evaluate(&history, quizzes.has_pre_test(), self.clock.now());
                self.remember(participant, &module, &progress);
                (self.gate().decide(&quiz, &quizzes, &progress, &history), false)
            }
            Err(err) => {
                let snapshot = self.snapshots.get(participant, &module);
                tracing::warn!(
                    %err,
                    has_snapshot = snapshot.is_some(),
                    "attempt history unavailable, deciding from last known progress"
                );
                let decision = match snapshot {
                    Some(progress) => self.gate().decide(
                        &quiz,
                        &quizzes,
                        &progress,
                        &AttemptHistory::default(),
                    ),
                    None => GateDecision::Allowed,
                };
                (decision, true)
            }
        };

        tracing::debug!(?decision, stale, "gate decision");
        Ok(AttemptAccess { decision, stale })
    }

    // ─── attempts ────────────────────────────────────────────────────────────

    /// Sample questions and start (or resume) the countdown for an attempt.
    ///
    /// Does not consult the gate; see `prepare_attempt_checked`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Validation` for a quiz that cannot be played,
    /// before any countdown is stored, and `EngineError::Infrastructure` on
    /// storage failures.
    #[tracing::instrument(
        skip(self, participant, quiz_id),
        fields(participant = %participant, quiz = %quiz_id)
    )]
    pub async fn prepare_attempt(
        &self,
        participant: &ParticipantId,
        quiz_id: QuizId,
    ) -> Result<AttemptContext, EngineError> {
        let quiz = self.quizzes.get_quiz(quiz_id).await?;
        quiz.ensure_playable()?;
        let questions =
            QuestionSampler::thread_local().sample(quiz.questions(), quiz.questions_to_display())?;

        let timer = match quiz.time_limit_secs() {
            Some(secs) => {
                let key = TimerKey::new(quiz.id(), participant.clone());
                Some(AttemptTimer::resume_or_start(self.timers.as_ref(), key, secs, &self.clock).await?)
            }
            None => None,
        };

        Ok(AttemptContext {
            participant: participant.clone(),
            quiz,
            questions,
            answers: Answers::new(),
            timer,
            finished: false,
        })
    }

    /// Check the gate, then prepare the attempt.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Rule` when the gate blocks the attempt, otherwise
    /// as `prepare_attempt`.
    pub async fn prepare_attempt_checked(
        &self,
        participant: &ParticipantId,
        quiz_id: QuizId,
    ) -> Result<AttemptContext, EngineError> {
        let access = self.can_start_attempt(participant, quiz_id).await?;
        if let GateDecision::Blocked(reason) = access.decision {
            return Err(EngineError::Rule(reason));
        }
        self.prepare_attempt(participant, quiz_id).await
    }

    /// Score and record `answers` for the attempt.
    ///
    /// Every call appends a new record, including calls on an attempt that was
    /// already submitted.
    ///
    /// # Errors
    ///
    /// Returns `EngineError` if the attempt cannot be scored or stored.
    pub async fn submit_attempt(
        &self,
        context: &mut AttemptContext,
        answers: Answers,
    ) -> Result<SubmittedAttempt, EngineError> {
        context.answers = answers;
        self.finalize(context, SubmitTrigger::Participant).await
    }

    /// Poll an open attempt. Submits it once when its countdown reaches zero.
    ///
    /// # Errors
    ///
    /// Returns `EngineError` if the automatic submission fails; the next poll
    /// does not retry it.
    pub async fn tick(&self, context: &mut AttemptContext) -> Result<TickOutcome, EngineError> {
        if context.finished {
            return Ok(TickOutcome::Finished);
        }
        let Some(timer) = context.timer.as_mut() else {
            return Ok(TickOutcome::Untimed);
        };

        let remaining = timer.remaining(&self.clock);
        if remaining > 0 {
            return Ok(TickOutcome::Running { remaining });
        }
        if !timer.expire(&self.clock) {
            return Ok(TickOutcome::Finished);
        }

        tracing::info!(
            quiz = %context.quiz.id(),
            participant = %context.participant,
            "time limit reached, submitting attempt"
        );
        let submitted = self.finalize(context, SubmitTrigger::TimeLimit).await?;
        Ok(TickOutcome::AutoSubmitted(submitted))
    }

    /// Seconds left on the countdown, for display. `None` when untimed.
    #[must_use]
    pub fn tick_remaining(&self, context: &AttemptContext) -> Option<u64> {
        context.timer.as_ref().map(|t| t.remaining(&self.clock))
    }

    async fn finalize(
        &self,
        context: &mut AttemptContext,
        trigger: SubmitTrigger,
    ) -> Result<SubmittedAttempt, EngineError> {
        let key = context.timer_key();
        // Marked before storing so a failed auto-submit is not retried by the next tick.
        context.finished = true;
        self.recorder
            .finalize(
                &context.participant,
                &context.quiz,
                &context.questions,
                context.answers.clone(),
                key.as_ref(),
                trigger,
                self.clock.now(),
            )
            .await
    }

    // ─── confirmations ───────────────────────────────────────────────────────

    /// Prompt guarding submission, reporting unanswered questions.
    #[must_use]
    pub fn request_submit(&self, context: &AttemptContext) -> Confirmation<AttemptCommand> {
        let total = context.questions.len();
        let unanswered = context.answers.unanswered(total).len();
        let message = if unanswered == 0 {
            format!("All {total} questions are answered. Submit your answers?")
        } else {
            format!(
                "{unanswered} of {total} questions are unanswered and will be scored as wrong. Submit anyway?"
            )
        };
        Confirmation::new(
            format!("Submit {}", context.quiz.kind()),
            message,
            AttemptCommand::Submit,
        )
    }

    /// Prompt guarding leaving a timed attempt. `None` when leaving is harmless.
    #[must_use]
    pub fn request_exit(&self, context: &AttemptContext) -> Option<Confirmation<AttemptCommand>> {
        if context.finished {
            return None;
        }
        let remaining = self.tick_remaining(context)?;
        Some(Confirmation::new(
            format!("Leave {}", context.quiz.kind()),
            format!(
                "The countdown keeps running while you are away ({} remaining). Nothing is submitted.",
                format_remaining(remaining)
            ),
            AttemptCommand::Exit,
        ))
    }

    /// Run a confirmed command.
    ///
    /// # Errors
    ///
    /// Returns `EngineError` if a submission fails.
    pub async fn execute(
        &self,
        context: &mut AttemptContext,
        command: AttemptCommand,
    ) -> Result<CommandOutcome, EngineError> {
        match command {
            AttemptCommand::Submit => {
                let submitted = self.finalize(context, SubmitTrigger::Participant).await?;
                Ok(CommandOutcome::Submitted(submitted))
            }
            AttemptCommand::Exit => Ok(CommandOutcome::Exited {
                remaining: self.tick_remaining(context),
            }),
        }
    }

    // ─── reporting ───────────────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns `EngineError::Infrastructure` if the quiz cannot be read.
    pub async fn overview(&self, quiz_id: QuizId) -> Result<QuizOverview, EngineError> {
        let quiz = self.quizzes.get_quiz(quiz_id).await?;
        Ok(QuizOverview {
            quiz_id: quiz.id(),
            kind: quiz.kind(),
            module: quiz.module().clone(),
            question_count: quiz.displayed_question_count(),
            time_limit_minutes: quiz.time_limit_minutes(),
            minimum_pass_score: quiz.minimum_pass_score(),
        })
    }

    /// # Errors
    ///
    /// Returns `EngineError::Infrastructure` if attempts cannot be read.
    pub async fn participant_stats(
        &self,
        participant: &ParticipantId,
    ) -> Result<ParticipantStats, EngineError> {
        let history = self.participant_history(participant, &AttemptScope::All).await?;
        Ok(ParticipantStats::from_records(history.records()))
    }

    /// # Errors
    ///
    /// Returns `EngineError::Infrastructure` if attempts cannot be read.
    pub async fn training_history(
        &self,
        participant: &ParticipantId,
    ) -> Result<Vec<TrainingHistoryItem>, EngineError> {
        let history = self.participant_history(participant, &AttemptScope::All).await?;
        Ok(reports::training_history(history.records()))
    }

    /// The attempt a certificate may currently be issued for.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Infrastructure` if attempts cannot be read.
    pub async fn current_certificate(
        &self,
        participant: &ParticipantId,
        module: &ModuleKey,
    ) -> Result<Option<AttemptRecord>, EngineError> {
        let history = self
            .participant_history(participant, &AttemptScope::Module(module.clone()))
            .await?;
        Ok(reports::current_certificate(&history, self.clock.now()).cloned())
    }

    // ─── helpers ─────────────────────────────────────────────────────────────

    async fn module_quizzes(&self, module: &ModuleKey) -> Result<ModuleQuizzes, StorageError> {
        let quizzes = self.quizzes.list_module_quizzes(module).await?;
        Ok(ModuleQuizzes::from_quizzes(quizzes))
    }

    async fn participant_history(
        &self,
        participant: &ParticipantId,
        scope: &AttemptScope,
    ) -> Result<AttemptHistory, StorageError> {
        let matching = self.config.participant_matching;
        let records = if matching == ParticipantMatching::Exact {
            self.attempts.list_attempts(Some(participant), scope).await?
        } else {
            self.attempts
                .list_attempts(None, scope)
                .await?
                .into_iter()
                .filter(|record| matching.matches(participant, record.participant()))
                .collect()
        };
        Ok(AttemptHistory::new(records))
    }

    fn remember(&self, participant: &ParticipantId, module: &ModuleKey, progress: &ModuleProgress) {
        self.snapshots.remember(participant, module, progress);
    }
}

fn format_remaining(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
