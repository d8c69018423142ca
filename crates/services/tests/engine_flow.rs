use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Duration;
use quiz_core::model::{
    Answers, AttemptId, AttemptRecord, ModuleKey, ParticipantId, Question, QuizDefinition,
    QuizDraft, QuizId, QuizKind,
};
use quiz_core::time::fixed_now;
use quiz_core::{BlockReason, GateDecision, ParticipantMatching};
use services::{
    AttemptCommand, AttemptContext, Clock, CommandOutcome, EngineConfig, EngineError, QuizEngine,
    SubmitTrigger, TickOutcome,
};
use storage::repository::{
    AttemptRepository, AttemptScope, InMemoryRepository, QuizRepository, StorageError, TimerKey,
    TimerStore,
};

const PRE: u64 = 1;
const POST: u64 = 2;

fn module() -> ModuleKey {
    ModuleKey::new("BAIM", "BAIM 1").unwrap()
}

fn bank(size: usize) -> Vec<Question> {
    (0..size)
        .map(|i| {
            Question::new(
                format!("Question {i}"),
                vec![format!("right {i}"), format!("wrong {i}"), format!("other {i}")],
                0,
            )
            .unwrap()
        })
        .collect()
}

fn quiz(
    id: u64,
    kind: QuizKind,
    size: usize,
    setup: impl FnOnce(&mut QuizDraft),
) -> QuizDefinition {
    let mut draft = QuizDraft::new(module(), kind, bank(size));
    setup(&mut draft);
    draft.validate(QuizId::new(id)).unwrap()
}

async fn seeded(quizzes: &[QuizDefinition]) -> InMemoryRepository {
    let repo = InMemoryRepository::new();
    for quiz in quizzes {
        repo.upsert_quiz(quiz).await.unwrap();
    }
    repo
}

async fn standard_module() -> InMemoryRepository {
    seeded(&[
        quiz(PRE, QuizKind::PreTest, 10, |_| {}),
        quiz(POST, QuizKind::PostTest, 10, |d| {
            d.certificate_validity_days = Some(7);
        }),
    ])
    .await
}

fn engine(repo: &InMemoryRepository, clock: Clock) -> QuizEngine {
    QuizEngine::new(
        clock,
        Arc::new(repo.clone()),
        Arc::new(repo.clone()),
        Arc::new(repo.clone()),
    )
}

/// Answers the first `correct` displayed questions right and the rest wrong.
fn answers_with(ctx: &AttemptContext, correct: usize) -> Answers {
    ctx.questions()
        .iter()
        .enumerate()
        .map(|(i, q)| {
            let right = q.correct_option();
            let option = if i < correct { right } else { (right + 1) % q.options().len() };
            (i, option)
        })
        .collect()
}

async fn take(
    engine: &QuizEngine,
    participant: &ParticipantId,
    quiz: u64,
    correct: usize,
) -> AttemptRecord {
    let mut ctx = engine
        .prepare_attempt(participant, QuizId::new(quiz))
        .await
        .unwrap();
    let answers = answers_with(&ctx, correct);
    engine.submit_attempt(&mut ctx, answers).await.unwrap().record
}

#[tokio::test]
async fn pre_test_passes_exactly_at_minimum_score() {
    let repo = seeded(&[
        quiz(PRE, QuizKind::PreTest, 100, |_| {}),
        quiz(POST, QuizKind::PostTest, 10, |_| {}),
    ])
    .await;
    let engine = engine(&repo, Clock::fixed(fixed_now()));
    let ana = ParticipantId::new("Ana");
    let budi = ParticipantId::new("Budi");

    let record = take(&engine, &ana, PRE, 70).await;
    assert_eq!(record.percentage(), 70);
    assert!(engine.evaluate_progress(&ana, &module()).await.unwrap().pre_test_passed);

    let record = take(&engine, &budi, PRE, 69).await;
    assert_eq!(record.percentage(), 69);
    let progress = engine.evaluate_progress(&budi, &module()).await.unwrap();
    assert!(!progress.pre_test_passed);
    assert_eq!(progress.pre_test_score, Some(69));
}

#[tokio::test]
async fn post_test_needs_a_passed_pre_test() {
    let repo = standard_module().await;
    let engine = engine(&repo, Clock::fixed(fixed_now()));
    let ana = ParticipantId::new("Ana");

    let access = engine.can_start_attempt(&ana, QuizId::new(POST)).await.unwrap();
    assert!(!access.stale);
    assert_eq!(
        access.decision,
        GateDecision::Blocked(BlockReason::NeedsPreTest {
            minimum_score: 70,
            latest_pre_test_score: None,
        })
    );

    take(&engine, &ana, PRE, 5).await;
    let err = engine
        .prepare_attempt_checked(&ana, QuizId::new(POST))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Rule(BlockReason::NeedsPreTest {
            latest_pre_test_score: Some(50),
            ..
        })
    ));
    assert!(!err.is_retryable());

    take(&engine, &ana, PRE, 8).await;
    assert!(engine
        .prepare_attempt_checked(&ana, QuizId::new(POST))
        .await
        .is_ok());
}

#[tokio::test]
async fn two_failed_post_tests_lock_until_a_new_passing_pre_test() {
    let repo = standard_module().await;
    let ana = ParticipantId::new("Ana");
    let mut clock = Clock::fixed(fixed_now());

    take(&engine(&repo, clock), &ana, PRE, 9).await;
    for _ in 0..2 {
        clock.advance(Duration::minutes(30));
        let record = take(&engine(&repo, clock), &ana, POST, 3).await;
        assert!(!record.passed());
    }

    clock.advance(Duration::minutes(30));
    let access = engine(&repo, clock)
        .can_start_attempt(&ana, QuizId::new(POST))
        .await
        .unwrap();
    assert_eq!(
        access.decision,
        GateDecision::Blocked(BlockReason::PostTestLocked { failed_attempts: 2 })
    );

    // A failed Pre Test retake does not release the lock.
    take(&engine(&repo, clock), &ana, PRE, 2).await;
    clock.advance(Duration::minutes(1));
    take(&engine(&repo, clock), &ana, PRE, 10).await;

    clock.advance(Duration::minutes(1));
    let access = engine(&repo, clock)
        .can_start_attempt(&ana, QuizId::new(POST))
        .await
        .unwrap();
    assert_eq!(access.decision, GateDecision::Allowed);
}

#[tokio::test]
async fn lockout_threshold_comes_from_config() {
    let repo = standard_module().await;
    let ana = ParticipantId::new("Ana");
    let mut clock = Clock::fixed(fixed_now());
    let config = EngineConfig::default().with_lockout_failed_attempts(3);

    take(&engine(&repo, clock), &ana, PRE, 9).await;
    for _ in 0..2 {
        clock.advance(Duration::minutes(5));
        take(&engine(&repo, clock), &ana, POST, 1).await;
    }

    let access = engine(&repo, clock)
        .with_config(config)
        .can_start_attempt(&ana, QuizId::new(POST))
        .await
        .unwrap();
    assert!(access.decision.is_allowed());
}

#[tokio::test]
async fn passed_post_test_expires_and_requires_pre_test_again() {
    let repo = standard_module().await;
    let ana = ParticipantId::new("Ana");
    let day = fixed_now();
    let engine = engine(&repo, Clock::fixed(day));

    take(&engine, &ana, PRE, 9).await;
    let post = take(&engine, &ana, POST, 10).await;
    assert_eq!(post.expiry_at(), Some(day + Duration::days(7)));

    let progress = engine.evaluate_progress(&ana, &module()).await.unwrap();
    assert!(progress.is_complete());
    assert!(engine.current_certificate(&ana, &module()).await.unwrap().is_some());

    let later = engine.clone().with_clock(Clock::fixed(day + Duration::days(8)));
    let progress = later.evaluate_progress(&ana, &module()).await.unwrap();
    assert!(progress.post_test_expired);
    assert!(!progress.post_test_passed);
    assert!(!progress.pre_test_passed);
    assert!(later.current_certificate(&ana, &module()).await.unwrap().is_none());

    let access = later.can_start_attempt(&ana, QuizId::new(POST)).await.unwrap();
    assert!(matches!(
        access.decision,
        GateDecision::Blocked(BlockReason::NeedsPreTest { .. })
    ));
}

#[tokio::test]
async fn module_without_pre_test_opens_post_test() {
    let repo = seeded(&[quiz(POST, QuizKind::PostTest, 4, |_| {})]).await;
    let engine = engine(&repo, Clock::fixed(fixed_now()));
    let ana = ParticipantId::new("Ana");

    let access = engine.can_start_attempt(&ana, QuizId::new(POST)).await.unwrap();
    assert_eq!(access.decision, GateDecision::Allowed);
    assert!(engine.evaluate_progress(&ana, &module()).await.unwrap().pre_test_passed);
}

#[tokio::test]
async fn sampled_attempt_shows_display_count_with_valid_answers() {
    let repo = seeded(&[quiz(PRE, QuizKind::PreTest, 20, |d| {
        d.questions_to_display = Some(10);
    })])
    .await;
    let engine = engine(&repo, Clock::fixed(fixed_now()));
    let ctx = engine
        .prepare_attempt(&ParticipantId::new("Ana"), QuizId::new(PRE))
        .await
        .unwrap();

    assert_eq!(ctx.questions().len(), 10);
    for question in ctx.questions() {
        let correct = question.correct_text().unwrap();
        assert!(correct.starts_with("right "));
    }
    assert!(ctx.timer().is_none());

    let overview = engine.overview(QuizId::new(PRE)).await.unwrap();
    assert_eq!(overview.question_count, 10);
    assert_eq!(overview.time_limit_minutes, None);
}

#[tokio::test]
async fn timer_auto_submits_exactly_once() {
    let repo = seeded(&[quiz(PRE, QuizKind::PreTest, 5, |d| {
        d.time_limit_minutes = Some(10);
    })])
    .await;
    let ana = ParticipantId::new("Ana");
    let start = Clock::fixed(fixed_now());
    let engine = engine(&repo, start);

    let mut ctx = engine.prepare_attempt(&ana, QuizId::new(PRE)).await.unwrap();
    assert!(ctx.choose(0, ctx.questions()[0].correct_option()));
    assert!(!ctx.choose(99, 0));
    assert_eq!(
        engine.tick(&mut ctx).await.unwrap(),
        TickOutcome::Running { remaining: 600 }
    );

    let late = engine.clone().with_clock(Clock::fixed(fixed_now() + Duration::seconds(601)));
    assert_eq!(late.tick_remaining(&ctx), Some(0));
    let TickOutcome::AutoSubmitted(submitted) = late.tick(&mut ctx).await.unwrap() else {
        panic!("expected automatic submission");
    };
    assert_eq!(submitted.trigger, SubmitTrigger::TimeLimit);
    assert_eq!(submitted.record.score(), 1);
    assert_eq!(late.tick(&mut ctx).await.unwrap(), TickOutcome::Finished);
    assert!(ctx.is_finished());

    let stored = repo
        .list_attempts(Some(&ana), &AttemptScope::Quiz(QuizId::new(PRE)))
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    let key = TimerKey::new(QuizId::new(PRE), ana);
    assert_eq!(repo.get_timer_start(&key).await.unwrap(), None);
}

#[tokio::test]
async fn reload_resumes_the_stored_countdown() {
    let repo = seeded(&[quiz(PRE, QuizKind::PreTest, 5, |d| {
        d.time_limit_minutes = Some(5);
    })])
    .await;
    let ana = ParticipantId::new("Ana");
    let first = engine(&repo, Clock::fixed(fixed_now()));
    let ctx = first.prepare_attempt(&ana, QuizId::new(PRE)).await.unwrap();
    assert_eq!(first.tick_remaining(&ctx), Some(300));

    let reloaded = engine(&repo, Clock::fixed(fixed_now() + Duration::seconds(100)));
    let ctx = reloaded.prepare_attempt(&ana, QuizId::new(PRE)).await.unwrap();
    assert_eq!(reloaded.tick_remaining(&ctx), Some(200));
    assert_eq!(ctx.timer().unwrap().started_at(), fixed_now());
}

#[tokio::test]
async fn reentering_after_the_deadline_submits_once_on_first_tick() {
    let repo = seeded(&[quiz(PRE, QuizKind::PreTest, 5, |d| {
        d.time_limit_minutes = Some(10);
    })])
    .await;
    let ana = ParticipantId::new("Ana");
    let first = engine(&repo, Clock::fixed(fixed_now()));
    let ctx = first.prepare_attempt(&ana, QuizId::new(PRE)).await.unwrap();
    drop(ctx);

    let late = engine(&repo, Clock::fixed(fixed_now() + Duration::seconds(601)));
    let mut ctx = late.prepare_attempt(&ana, QuizId::new(PRE)).await.unwrap();
    assert_eq!(ctx.timer().unwrap().started_at(), fixed_now());
    assert_eq!(late.tick_remaining(&ctx), Some(0));

    let TickOutcome::AutoSubmitted(submitted) = late.tick(&mut ctx).await.unwrap() else {
        panic!("expected automatic submission");
    };
    assert_eq!(submitted.trigger, SubmitTrigger::TimeLimit);
    assert_eq!(submitted.record.score(), 0);
    assert_eq!(late.tick(&mut ctx).await.unwrap(), TickOutcome::Finished);

    let stored = repo
        .list_attempts(Some(&ana), &AttemptScope::Quiz(QuizId::new(PRE)))
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    let key = TimerKey::new(QuizId::new(PRE), ana.clone());
    assert_eq!(repo.get_timer_start(&key).await.unwrap(), None);

    let next = late.prepare_attempt(&ana, QuizId::new(PRE)).await.unwrap();
    assert_eq!(late.tick_remaining(&next), Some(600));
}

#[tokio::test]
async fn every_submission_appends_a_record() {
    let repo = standard_module().await;
    let ana = ParticipantId::new("Ana");
    let engine = engine(&repo, Clock::fixed(fixed_now()));

    let mut ctx = engine.prepare_attempt(&ana, QuizId::new(PRE)).await.unwrap();
    let answers = answers_with(&ctx, 10);
    let first = engine.submit_attempt(&mut ctx, answers.clone()).await.unwrap();
    let second = engine.submit_attempt(&mut ctx, answers).await.unwrap();
    assert_ne!(first.id, second.id);

    let stats = engine.participant_stats(&ana).await.unwrap();
    assert_eq!(stats.attempts, 2);
    assert_eq!(stats.passed_count, 2);
    assert_eq!(stats.average_percentage, 100);
}

#[tokio::test]
async fn confirmations_carry_the_command_to_execute() {
    let repo = seeded(&[quiz(PRE, QuizKind::PreTest, 4, |d| {
        d.time_limit_minutes = Some(10);
    })])
    .await;
    let ana = ParticipantId::new("Ana");
    let engine = engine(&repo, Clock::fixed(fixed_now()));
    let mut ctx = engine.prepare_attempt(&ana, QuizId::new(PRE)).await.unwrap();
    ctx.choose(0, 0);

    let prompt = engine.request_submit(&ctx);
    assert!(prompt.message().starts_with("3 of 4 questions are unanswered"));
    prompt.cancel();
    assert!(repo
        .list_attempts(Some(&ana), &AttemptScope::All)
        .await
        .unwrap()
        .is_empty());

    let exit = engine.request_exit(&ctx).expect("timed attempt warns on exit");
    let outcome = engine.execute(&mut ctx, exit.confirm()).await.unwrap();
    assert_eq!(outcome, CommandOutcome::Exited { remaining: Some(600) });
    assert!(!ctx.is_finished());

    let submit = engine.request_submit(&ctx).confirm();
    assert_eq!(submit, AttemptCommand::Submit);
    let CommandOutcome::Submitted(submitted) = engine.execute(&mut ctx, submit).await.unwrap() else {
        panic!("expected submission");
    };
    assert_eq!(submitted.trigger, SubmitTrigger::Participant);
    assert!(engine.request_exit(&ctx).is_none());
}

#[tokio::test]
async fn malformed_stored_quiz_fails_before_timer_starts() {
    let broken = QuizDefinition::from_persisted(
        QuizId::new(PRE),
        module(),
        QuizKind::PreTest,
        Vec::new(),
        None,
        None,
        Some(10),
        None,
    );
    let repo = seeded(&[broken]).await;
    let ana = ParticipantId::new("Ana");
    let engine = engine(&repo, Clock::fixed(fixed_now()));

    let err = engine.prepare_attempt(&ana, QuizId::new(PRE)).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    let key = TimerKey::new(QuizId::new(PRE), ana);
    assert_eq!(repo.get_timer_start(&key).await.unwrap(), None);
}

#[tokio::test]
async fn legacy_fuzzy_matching_is_opt_in() {
    let repo = standard_module().await;
    let engine = engine(&repo, Clock::fixed(fixed_now()));
    take(&engine, &ParticipantId::new("Ana Putri"), PRE, 9).await;

    let ana = ParticipantId::new("ana");
    assert!(!engine.evaluate_progress(&ana, &module()).await.unwrap().pre_test_passed);

    let fuzzy = engine
        .clone()
        .with_config(EngineConfig::default().with_participant_matching(ParticipantMatching::LegacyFuzzy));
    assert!(fuzzy.evaluate_progress(&ana, &module()).await.unwrap().pre_test_passed);
}

#[tokio::test]
async fn training_reports_cover_every_module() {
    let second = ModuleKey::new("BAIM", "BAIM 2").unwrap();
    let other = QuizDraft::new(second, QuizKind::PostTest, bank(4));
    let repo = standard_module().await;
    repo.upsert_quiz(&other.validate(QuizId::new(3)).unwrap())
        .await
        .unwrap();

    let ana = ParticipantId::new("Ana");
    let engine = engine(&repo, Clock::fixed(fixed_now()));
    take(&engine, &ana, PRE, 10).await;
    take(&engine, &ana, POST, 10).await;

    let progress = engine.training_progress(&ana, "BAIM").await.unwrap();
    let titles: Vec<&str> = progress.iter().map(|(m, _)| m.module_title()).collect();
    assert_eq!(titles, vec!["BAIM 1", "BAIM 2"]);
    assert_eq!(services::reports::training_completion_percentage(&progress), 50);

    let history = engine.training_history(&ana).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].attempts, 2);
}

//
// ─── FAIL-OPEN ─────────────────────────────────────────────────────────────────
//

/// Attempt store that can be switched into failing reads.
#[derive(Clone)]
struct FlakyAttempts {
    inner: InMemoryRepository,
    failing: Arc<AtomicBool>,
}

#[async_trait]
impl AttemptRepository for FlakyAttempts {
    async fn append_attempt(&self, record: &AttemptRecord) -> Result<AttemptId, StorageError> {
        self.inner.append_attempt(record).await
    }

    async fn list_attempts(
        &self,
        participant: Option<&ParticipantId>,
        scope: &AttemptScope,
    ) -> Result<Vec<AttemptRecord>, StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("attempt store offline".into()));
        }
        self.inner.list_attempts(participant, scope).await
    }
}

#[tokio::test]
async fn gate_falls_back_to_last_known_progress_when_history_fails() {
    let repo = standard_module().await;
    let failing = Arc::new(AtomicBool::new(false));
    let attempts = FlakyAttempts {
        inner: repo.clone(),
        failing: Arc::clone(&failing),
    };
    let engine = QuizEngine::new(
        Clock::fixed(fixed_now()),
        Arc::new(repo.clone()),
        Arc::new(attempts),
        Arc::new(repo.clone()),
    );
    let ana = ParticipantId::new("Ana");
    let budi = ParticipantId::new("Budi");

    take(&engine, &ana, PRE, 9).await;
    assert!(engine.evaluate_progress(&ana, &module()).await.unwrap().pre_test_passed);

    failing.store(true, Ordering::SeqCst);
    let access = engine.can_start_attempt(&ana, QuizId::new(POST)).await.unwrap();
    assert!(access.stale);
    assert_eq!(access.decision, GateDecision::Allowed);

    let access = engine.can_start_attempt(&budi, QuizId::new(POST)).await.unwrap();
    assert!(access.stale);
    assert_eq!(access.decision, GateDecision::Allowed);

    let err = engine.evaluate_progress(&ana, &module()).await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn gate_allows_when_history_fails_before_any_progress_was_seen() {
    let repo = standard_module().await;
    let ana = ParticipantId::new("Ana");
    take(&engine(&repo, Clock::fixed(fixed_now())), &ana, PRE, 9).await;

    let failing = Arc::new(AtomicBool::new(true));
    let restarted = QuizEngine::new(
        Clock::fixed(fixed_now()),
        Arc::new(repo.clone()),
        Arc::new(FlakyAttempts {
            inner: repo.clone(),
            failing: Arc::clone(&failing),
        }),
        Arc::new(repo.clone()),
    );

    for quiz in [PRE, POST] {
        let access = restarted.can_start_attempt(&ana, QuizId::new(quiz)).await.unwrap();
        assert!(access.stale);
        assert_eq!(access.decision, GateDecision::Allowed);
    }

    failing.store(false, Ordering::SeqCst);
    let access = restarted.can_start_attempt(&ana, QuizId::new(POST)).await.unwrap();
    assert!(!access.stale);
    assert_eq!(access.decision, GateDecision::Allowed);
}
