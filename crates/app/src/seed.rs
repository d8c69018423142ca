use quiz_core::model::{ModuleKey, Question, QuizDefinition, QuizDraft, QuizError, QuizId, QuizKind};
use storage::repository::Storage;

pub const SAMPLE_TRAINING: &str = "BAIM";

struct SampleQuestion {
    prompt: &'static str,
    options: &'static [&'static str],
    correct: usize,
}

const MODULE_ONE: &[SampleQuestion] = &[
    SampleQuestion {
        prompt: "Which document lists the items that may be inoperative for dispatch?",
        options: &["Minimum Equipment List", "Weight and balance manual", "Flight log"],
        correct: 0,
    },
    SampleQuestion {
        prompt: "Who signs the certificate of release to service?",
        options: &["The captain", "An authorised certifying engineer", "The operator's CEO"],
        correct: 1,
    },
    SampleQuestion {
        prompt: "A torque value is given in the maintenance manual as 25 Nm. What do you use?",
        options: &["A calibrated torque wrench", "Hand feel", "An impact driver"],
        correct: 0,
    },
    SampleQuestion {
        prompt: "When is a tool control check performed?",
        options: &["Once a year", "Before and after each task", "Only after an incident"],
        correct: 1,
    },
    SampleQuestion {
        prompt: "Where is a deferred defect recorded?",
        options: &["On a sticky note", "In the technical log", "In the crew briefing"],
        correct: 1,
    },
];

const MODULE_TWO: &[SampleQuestion] = &[
    SampleQuestion {
        prompt: "What does FOD stand for?",
        options: &["Foreign object debris", "Flight operations data", "Fuel on demand"],
        correct: 0,
    },
    SampleQuestion {
        prompt: "Which extinguisher suits an electrical fire?",
        options: &["Water", "CO2", "Foam"],
        correct: 1,
    },
    SampleQuestion {
        prompt: "What must be fitted before towing an aircraft?",
        options: &["Engine covers", "Steering bypass pin", "Pitot covers"],
        correct: 1,
    },
    SampleQuestion {
        prompt: "Who may marshal an aircraft on the apron?",
        options: &["Any staff member", "A trained marshaller", "The fueller"],
        correct: 1,
    },
];

fn bank(samples: &[SampleQuestion]) -> Result<Vec<Question>, QuizError> {
    samples
        .iter()
        .map(|s| {
            let options = s.options.iter().map(|o| (*o).to_owned()).collect();
            Question::new(s.prompt, options, s.correct)
        })
        .collect()
}

fn module_quizzes(
    first_id: u64,
    module_title: &str,
    samples: &[SampleQuestion],
) -> Result<[QuizDefinition; 2], QuizError> {
    let module = ModuleKey::new(SAMPLE_TRAINING, module_title)?;

    let pre = QuizDraft::new(module.clone(), QuizKind::PreTest, bank(samples)?);

    let mut post = QuizDraft::new(module, QuizKind::PostTest, bank(samples)?);
    post.questions_to_display = Some(u32::try_from(samples.len().saturating_sub(1)).unwrap_or(1));
    post.time_limit_minutes = Some(10);
    post.certificate_validity_days = Some(365);

    Ok([
        pre.validate(QuizId::new(first_id))?,
        post.validate(QuizId::new(first_id + 1))?,
    ])
}

/// Upsert the sample training. Returns the quizzes written.
pub async fn seed(storage: &Storage) -> Result<Vec<QuizDefinition>, Box<dyn std::error::Error>> {
    let mut written = Vec::new();
    for quiz in module_quizzes(1, "BAIM 1", MODULE_ONE)?
        .into_iter()
        .chain(module_quizzes(3, "BAIM 2", MODULE_TWO)?)
    {
        storage.quizzes.upsert_quiz(&quiz).await?;
        tracing::debug!(quiz = %quiz.id(), module = %quiz.module(), "upserted sample quiz");
        written.push(quiz);
    }
    Ok(written)
}
