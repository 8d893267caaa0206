//! Quiz session state machine.
//!
//! One `Session` per authorized user while a quiz is active: the sampled
//! question set, the progress index, recorded answers, and the explanation
//! quota. The session itself is a plain state machine with no IO; the
//! dispatcher owns adapter calls and persistence. `SessionStore` keeps the
//! live sessions keyed by identity with a lock per identity, so two
//! concurrent messages from the same user can never race an index advance
//! or a quota increment.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::model::{is_valid_choice, normalize_answer, AnswerRecord, Question};

/// Explanation requests allowed per session.
pub const EXPLANATION_QUOTA: u32 = 3;

/// Outcome of submitting one line of input as an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// Input did not normalize to A/B/C/D; index unchanged.
    Invalid,
    /// Answer recorded; here is the next question prompt.
    Next(String),
    /// Answer recorded and the set is finished; here is the summary.
    Completed(String),
}

/// Live quiz state for one user.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub subject: String,
    pub locator: String,
    questions: Vec<Question>,
    current: usize,
    answers: Vec<AnswerRecord>,
    explanations_used: u32,
}

impl Session {
    pub fn new(subject: &str, locator: &str, questions: Vec<Question>) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject: subject.to_string(),
            locator: locator.to_string(),
            questions,
            current: 0,
            answers: Vec::new(),
            explanations_used: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.questions.len()
    }

    /// Progress index never exceeds the set size; equality means complete,
    /// and only explanation requests are serviced from then on.
    pub fn is_complete(&self) -> bool {
        self.current >= self.questions.len()
    }

    pub fn explanations_used(&self) -> u32 {
        self.explanations_used
    }

    /// The opening message: subject confirmation plus question 1.
    pub fn first_prompt(&self) -> String {
        format!(
            "✅ 已選擇『{}』科目，開始測驗：\n{}",
            self.subject,
            format_question(&self.questions[0])
        )
    }

    /// Record one submitted answer, advancing on a valid choice token.
    pub fn submit(&mut self, raw: &str) -> AnswerOutcome {
        debug_assert!(!self.is_complete());
        let submitted = normalize_answer(raw);
        if !is_valid_choice(&submitted) {
            return AnswerOutcome::Invalid;
        }

        let question = &self.questions[self.current];
        let correct = normalize_answer(&question.answer);
        self.answers.push(AnswerRecord {
            seq: question.seq,
            is_correct: submitted == correct,
            submitted,
            correct,
            image: question.image.clone(),
        });
        self.current += 1;

        if self.is_complete() {
            AnswerOutcome::Completed(self.summary())
        } else {
            AnswerOutcome::Next(format_question(&self.questions[self.current]))
        }
    }

    /// Scoring summary: totals, percentage to one decimal, wrong answers.
    pub fn summary(&self) -> String {
        let total = self.answers.len();
        let wrong: Vec<&AnswerRecord> = self.answers.iter().filter(|a| !a.is_correct).collect();
        let correct_count = total - wrong.len();
        let rate = correct_count as f64 / total as f64 * 100.0;

        let mut summary = format!(
            "📩 測驗已完成\n共 {total} 題，正確 {correct_count} 題，正確率 {rate:.1}%\n\n錯題如下：\n"
        );
        if wrong.is_empty() {
            summary.push_str("全部答對！");
        } else {
            let lines: Vec<String> = wrong
                .iter()
                .map(|a| format!("題號 {}（你選 {}） 正解 {}", a.seq, a.submitted, a.correct))
                .collect();
            summary.push_str(&lines.join("\n"));
        }
        summary.push_str("\n\n💡 想查看解析請輸入：題號3");
        summary
    }

    /// Look up a question and its recorded answer by sequence number.
    /// `None` until the question has actually been answered.
    pub fn lookup(&self, seq: u32) -> Option<(&Question, &AnswerRecord)> {
        let question = self.questions.iter().find(|q| q.seq == seq)?;
        let answer = self.answers.iter().find(|a| a.seq == seq)?;
        Some((question, answer))
    }

    /// Consume one unit of explanation quota. Call only after a successful
    /// adapter reply; failed attempts are free.
    pub fn note_explanation(&mut self) {
        self.explanations_used += 1;
    }
}

/// Render one question: sequence header, text, options, optional image URL.
pub fn format_question(q: &Question) -> String {
    let mut text = format!("第 {} 題：{}\n{}", q.seq, q.text, q.options.join("\n"));
    if let Some(image) = &q.image {
        text.push_str("\n\n");
        text.push_str(image);
    }
    text
}

/// Live sessions keyed by identity, one lock per identity.
///
/// The outer mutex only guards slot creation; each turn locks the inner
/// per-identity slot for its whole duration, serializing concurrent
/// messages from the same user without blocking other users.
#[derive(Default)]
pub struct SessionStore {
    slots: Mutex<HashMap<String, Arc<Mutex<Option<Session>>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch (or create) the session slot for an identity.
    pub async fn slot(&self, user_id: &str) -> Arc<Mutex<Option<Session>>> {
        let mut slots = self.slots.lock().await;
        Arc::clone(slots.entry(user_id.to_string()).or_default())
    }
}
