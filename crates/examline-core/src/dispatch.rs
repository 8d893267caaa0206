//! Message dispatcher.
//!
//! Routes each inbound `(identity, text)` pair through the access-control
//! workflow first, then the quiz session state machine. Precedence: admin
//! commands (including self-promotion), then the pending-registration flow,
//! then quiz dispatch — so a pending identity never trips quiz parsing and
//! an admin keeps command access even while registered as a quiz subject.
//! Every inbound message yields at least one outbound reply; no error
//! escapes past `handle`.

use std::sync::Arc;

use chrono::NaiveDate;

use crate::access::AccessControl;
use crate::error::{AccessDenial, BotError};
use crate::select::{self, SelectionError};
use crate::session::{AnswerOutcome, Session, SessionStore};
use crate::store::RecordStore;
use crate::subject::SubjectCatalog;
use crate::traits::{ExplanationService, QuestionSource};

/// Questions sampled into each session.
const DEFAULT_QUESTIONS_PER_SESSION: usize = 5;

/// One outbound text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: String,
    pub text: String,
}

impl Outbound {
    pub fn to(to: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            text: text.into(),
        }
    }
}

type Clock = Box<dyn Fn() -> NaiveDate + Send + Sync>;

pub struct Dispatcher {
    access: AccessControl,
    sessions: SessionStore,
    catalog: SubjectCatalog,
    source: Arc<dyn QuestionSource>,
    explainer: Arc<dyn ExplanationService>,
    questions_per_session: usize,
    explanation_quota: u32,
    clock: Clock,
}

impl Dispatcher {
    pub fn new(
        store: Arc<RecordStore>,
        catalog: SubjectCatalog,
        source: Arc<dyn QuestionSource>,
        explainer: Arc<dyn ExplanationService>,
    ) -> Self {
        Self {
            access: AccessControl::new(store),
            sessions: SessionStore::new(),
            catalog,
            source,
            explainer,
            questions_per_session: DEFAULT_QUESTIONS_PER_SESSION,
            explanation_quota: crate::session::EXPLANATION_QUOTA,
            clock: Box::new(|| chrono::Local::now().date_naive()),
        }
    }

    /// Override the sampled set size. Zero is clamped to one; a session
    /// must always have a first question to prompt.
    pub fn with_questions_per_session(mut self, n: usize) -> Self {
        self.questions_per_session = n.max(1);
        self
    }

    /// Override the per-session explanation cap.
    pub fn with_explanation_quota(mut self, quota: u32) -> Self {
        self.explanation_quota = quota;
        self
    }

    /// Inject the calendar-date source, for window-boundary tests.
    pub fn with_clock(mut self, clock: impl Fn() -> NaiveDate + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Handle one inbound message, producing the outbound replies.
    pub async fn handle(&self, user_id: &str, text: &str) -> Vec<Outbound> {
        let input = text.trim();
        match self.dispatch(user_id, input).await {
            Ok(replies) => replies,
            Err(e) => {
                match &e {
                    BotError::Storage(msg) => tracing::error!(user_id, %msg, "storage failure"),
                    other => tracing::debug!(user_id, error = %other, "turn denied"),
                }
                vec![Outbound::to(user_id, render_error(&e))]
            }
        }
    }

    async fn dispatch(&self, user_id: &str, input: &str) -> Result<Vec<Outbound>, BotError> {
        if let Some(replies) = self.access.try_admin_command(user_id, input).await? {
            return Ok(replies);
        }
        if let Some(replies) = self.access.try_registration(user_id, input).await? {
            return Ok(replies);
        }
        self.quiz_turn(user_id, input).await
    }

    /// Quiz flow for a whitelisted identity. The per-identity slot lock is
    /// held for the whole turn, including adapter calls, so concurrent
    /// messages from one user are fully serialized.
    async fn quiz_turn(&self, user_id: &str, input: &str) -> Result<Vec<Outbound>, BotError> {
        let slot = self.sessions.slot(user_id).await;
        let mut guard = slot.lock().await;

        if let Some(rest) = input.strip_prefix("題號") {
            return match guard.as_mut() {
                Some(session) => self.explain(user_id, session, rest).await,
                None => Ok(vec![Outbound::to(
                    user_id,
                    "⚠️ 目前沒有測驗紀錄，輸入科目名稱開始測驗。",
                )]),
            };
        }

        match guard.as_mut() {
            Some(session) if !session.is_complete() => {
                let reply = match session.submit(input) {
                    AnswerOutcome::Invalid => "⚠️ 請填入 A / B / C / D 作為答案。".to_string(),
                    AnswerOutcome::Next(prompt) => prompt,
                    AnswerOutcome::Completed(summary) => {
                        tracing::info!(user_id, session = %session.id, "quiz completed");
                        summary
                    }
                };
                Ok(vec![Outbound::to(user_id, reply)])
            }
            _ => {
                if let Some(subject) = self.catalog.resolve(input).cloned() {
                    // A fresh subject match replaces a completed session,
                    // explanation quota included.
                    let session = self.start_session(user_id, &subject.name, &subject.locator).await?;
                    let prompt = session.first_prompt();
                    *guard = Some(session);
                    return Ok(vec![Outbound::to(user_id, prompt)]);
                }
                let reply = if guard.is_some() {
                    "📩 測驗已結束，輸入科目名稱開始新測驗，或輸入 題號3 查看解析。".to_string()
                } else {
                    let names: Vec<&str> = self.catalog.names().collect();
                    format!("🔍 請輸入欲測驗的科目名稱：\n{}", names.join("\n"))
                };
                Ok(vec![Outbound::to(user_id, reply)])
            }
        }
    }

    /// Authorize, fetch the candidate pool, and draw a fresh working set.
    async fn start_session(
        &self,
        user_id: &str,
        subject: &str,
        locator: &str,
    ) -> Result<Session, BotError> {
        let user = self.access.authorize(user_id, (self.clock)()).await?;

        let pool = match self.source.fetch(locator).await {
            Ok(pool) => pool,
            Err(e) => {
                tracing::warn!(locator, error = %e, "question bank fetch failed");
                Vec::new()
            }
        };

        let questions = select::draw(pool, self.questions_per_session).map_err(|e| match e {
            SelectionError::BankUnavailable => {
                BotError::AdapterUnavailable("題庫載入失敗，請稍後再試。".into())
            }
            SelectionError::Insufficient { need, have } => {
                tracing::warn!(locator, need, have, "insufficient questions after filtering");
                BotError::AdapterUnavailable("題庫題數不足，無法開始測驗。".into())
            }
        })?;

        let session = Session::new(subject, locator, questions);
        tracing::info!(
            user_id,
            user = %user.name,
            subject,
            session = %session.id,
            "quiz session started"
        );
        Ok(session)
    }

    /// `題號<n>`: rate-limited explanation request against a recorded answer.
    async fn explain(
        &self,
        user_id: &str,
        session: &mut Session,
        rest: &str,
    ) -> Result<Vec<Outbound>, BotError> {
        let Ok(seq) = rest.trim().parse::<u32>() else {
            return Err(BotError::Format("題號3".into()));
        };

        let Some((question, answer)) = session.lookup(seq) else {
            return Err(BotError::NotFound(format!("題號 {seq} 的作答紀錄")));
        };
        if session.explanations_used() >= self.explanation_quota {
            return Err(BotError::QuotaExceeded {
                limit: self.explanation_quota,
            });
        }

        let question = question.clone();
        let submitted = answer.submitted.clone();
        match self.explainer.explain(&question, &submitted).await {
            Ok(text) if !text.trim().is_empty() => {
                session.note_explanation();
                let mut reply = format!("📘 題號 {seq} 解析：\n{}", text.trim());
                if let Some(image) = &question.image {
                    reply.push_str(&format!("\n\n🔗 圖片：{image}"));
                }
                Ok(vec![Outbound::to(user_id, reply)])
            }
            Ok(_) | Err(_) => {
                // Failed attempts are free: the counter only moves on a
                // delivered explanation.
                Err(BotError::AdapterUnavailable(format!(
                    "題號 {seq}：目前無法提供解析，請稍後再試。"
                )))
            }
        }
    }
}

/// Render a recovered error as the user-facing reply.
fn render_error(e: &BotError) -> String {
    match e {
        BotError::Format(usage) => format!("⚠️ 請輸入正確格式：{usage}"),
        BotError::NotFound(target) => format!("⚠️ 查無{target}。"),
        BotError::AdapterUnavailable(msg) => format!("⚠️ {msg}"),
        BotError::QuotaExceeded { limit } => {
            format!("⚠️ 你已達到本次測驗解析上限（{limit}題）。")
        }
        BotError::AccessDenied(AccessDenial::NeverRegistered) => {
            "⚠️ 尚未註冊，請先完成註冊流程。".to_string()
        }
        BotError::AccessDenied(AccessDenial::Pending) => "⏳ 帳號審核中，請稍候。".to_string(),
        BotError::AccessDenied(AccessDenial::Expired) => {
            "⚠️ 使用期限已過，請聯繫管理者延長權限。".to_string()
        }
        BotError::Storage(_) => "⚠️ 系統暫時無法處理，請稍後再試。".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use crate::model::{parse_date, Question};

    const ADMIN: &str = "Uadmin";
    const USER: &str = "U1";

    /// Scripted question source: a fixed pool, or failure.
    struct StubSource {
        pool: Vec<Question>,
        fail: bool,
        calls: AtomicU32,
    }

    impl StubSource {
        fn with_pool(count: usize) -> Self {
            let pool = (0..count)
                .map(|i| Question {
                    text: format!("第{i}題：主題代號{i}{i}{i}，請選出正確敘述{i}"),
                    options: vec![
                        "A. 甲".into(),
                        "B. 乙".into(),
                        "C. 丙".into(),
                        "D. 丁".into(),
                    ],
                    answer: "A".into(),
                    image: None,
                    seq: 0,
                })
                .collect();
            Self {
                pool,
                fail: false,
                calls: AtomicU32::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                pool: Vec::new(),
                fail: true,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl QuestionSource for StubSource {
        async fn fetch(&self, _locator: &str) -> anyhow::Result<Vec<Question>> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                anyhow::bail!("network down");
            }
            Ok(self.pool.clone())
        }
    }

    /// Scripted explanation service with a call counter.
    struct StubExplainer {
        reply: Option<String>,
        calls: AtomicU32,
    }

    impl StubExplainer {
        fn answering(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Some(text.to_string()),
                calls: AtomicU32::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: None,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl ExplanationService for StubExplainer {
        async fn explain(&self, _q: &Question, _submitted: &str) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            match &self.reply {
                Some(text) => Ok(text.clone()),
                None => anyhow::bail!("explanation service timeout"),
            }
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        dispatcher: Dispatcher,
        explainer: Arc<StubExplainer>,
    }

    async fn fixture(source: StubSource, explainer: Arc<StubExplainer>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordStore::new(dir.path()));
        let dispatcher = Dispatcher::new(
            store,
            SubjectCatalog::default(),
            Arc::new(source),
            Arc::clone(&explainer) as Arc<dyn crate::traits::ExplanationService>,
        )
        .with_clock(|| parse_date("2025-07-01").unwrap());

        // Seed admin and an approved member (validity 2025-06-01..2025-09-30).
        dispatcher.handle(ADMIN, "admin").await;
        dispatcher.handle(USER, "hi").await;
        dispatcher
            .handle(USER, "國立醫學大學 王小明 123456 2025-06-01 2025-09-30")
            .await;
        dispatcher.handle(ADMIN, "approve 123456").await;

        Fixture {
            _dir: dir,
            dispatcher,
            explainer,
        }
    }

    /// Run a full five-question quiz, answering B on `wrong_at` (1-based)
    /// and A elsewhere. Returns the final summary text.
    async fn run_quiz(dispatcher: &Dispatcher, wrong_at: usize) -> String {
        let start = dispatcher.handle(USER, "免疫").await;
        assert!(start[0].text.contains("已選擇『臨床血清免疫學』科目"), "{}", start[0].text);
        assert!(start[0].text.contains("第 1 題："));

        let mut last = String::new();
        for k in 1..=5 {
            let answer = if k == wrong_at { "B" } else { "A" };
            let replies = dispatcher.handle(USER, answer).await;
            last = replies[0].text.clone();
        }
        last
    }

    #[tokio::test]
    async fn registration_then_approval_then_quiz() {
        let fx = fixture(StubSource::with_pool(40), StubExplainer::answering("解析內容")).await;
        let summary = run_quiz(&fx.dispatcher, 3).await;
        assert!(summary.contains("共 5 題，正確 4 題，正確率 80.0%"), "{summary}");
        assert!(summary.contains("題號 3（你選 B） 正解 A"));
    }

    #[tokio::test]
    async fn pending_identity_never_reaches_quiz_parsing() {
        let fx = fixture(StubSource::with_pool(40), StubExplainer::answering("x")).await;
        fx.dispatcher.handle("U2", "hello").await;

        // Subject names and choice tokens from a pending identity go to the
        // registration flow, not the quiz.
        let replies = fx.dispatcher.handle("U2", "免疫").await;
        assert!(replies[0].text.contains("格式錯誤"), "{}", replies[0].text);
    }

    #[tokio::test]
    async fn expired_window_is_denied_distinctly() {
        let fx = fixture(StubSource::with_pool(40), StubExplainer::answering("x")).await;
        let expired = fx.dispatcher.handle(USER, "免疫").await;
        assert!(!expired[0].text.contains("尚未註冊"));

        // Same member, day after the window closes.
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordStore::new(dir.path()));
        let dispatcher = Dispatcher::new(
            store,
            SubjectCatalog::default(),
            Arc::new(StubSource::with_pool(40)),
            StubExplainer::answering("x"),
        )
        .with_clock(|| parse_date("2025-10-01").unwrap());
        dispatcher.handle(ADMIN, "admin").await;
        dispatcher.handle(USER, "hi").await;
        dispatcher
            .handle(USER, "國立醫學大學 王小明 123456 2025-06-01 2025-09-30")
            .await;
        dispatcher.handle(ADMIN, "approve 123456").await;

        let replies = dispatcher.handle(USER, "免疫").await;
        assert!(replies[0].text.contains("使用期限已過"), "{}", replies[0].text);
    }

    #[tokio::test]
    async fn boundary_day_still_grants_access() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordStore::new(dir.path()));
        let dispatcher = Dispatcher::new(
            store,
            SubjectCatalog::default(),
            Arc::new(StubSource::with_pool(40)),
            StubExplainer::answering("x"),
        )
        .with_clock(|| parse_date("2025-09-30").unwrap());
        dispatcher.handle(ADMIN, "admin").await;
        dispatcher.handle(USER, "hi").await;
        dispatcher
            .handle(USER, "國立醫學大學 王小明 123456 2025-06-01 2025-09-30")
            .await;
        dispatcher.handle(ADMIN, "approve 123456").await;

        let replies = dispatcher.handle(USER, "免疫").await;
        assert!(replies[0].text.contains("第 1 題："), "{}", replies[0].text);
    }

    #[tokio::test]
    async fn bank_failure_and_thin_pool_prevent_sessions() {
        let fx = fixture(StubSource::failing(), StubExplainer::answering("x")).await;
        let replies = fx.dispatcher.handle(USER, "免疫").await;
        assert!(replies[0].text.contains("題庫載入失敗"), "{}", replies[0].text);

        let fx = fixture(StubSource::with_pool(3), StubExplainer::answering("x")).await;
        let replies = fx.dispatcher.handle(USER, "免疫").await;
        assert!(replies[0].text.contains("題庫題數不足"), "{}", replies[0].text);

        // No session was created either way.
        let replies = fx.dispatcher.handle(USER, "A").await;
        assert!(replies[0].text.contains("請輸入欲測驗的科目名稱"), "{}", replies[0].text);
    }

    #[tokio::test]
    async fn invalid_choice_reprompts_without_advancing() {
        let fx = fixture(StubSource::with_pool(40), StubExplainer::answering("x")).await;
        fx.dispatcher.handle(USER, "免疫").await;

        let replies = fx.dispatcher.handle(USER, "E").await;
        assert!(replies[0].text.contains("請填入 A / B / C / D"));

        // Still on question 1.
        let replies = fx.dispatcher.handle(USER, "A").await;
        assert!(replies[0].text.contains("第 2 題："), "{}", replies[0].text);
    }

    #[tokio::test]
    async fn explanation_quota_caps_successful_calls_only() {
        let fx = fixture(StubSource::with_pool(40), StubExplainer::answering("因為……")).await;
        run_quiz(&fx.dispatcher, 2).await;

        for seq in 1..=3 {
            let replies = fx.dispatcher.handle(USER, &format!("題號{seq}")).await;
            assert!(replies[0].text.contains(&format!("📘 題號 {seq} 解析")), "{}", replies[0].text);
        }
        assert_eq!(fx.explainer.calls(), 3);

        // Fourth request refused without touching the adapter.
        let replies = fx.dispatcher.handle(USER, "題號4").await;
        assert!(replies[0].text.contains("解析上限（3題）"), "{}", replies[0].text);
        assert_eq!(fx.explainer.calls(), 3);
    }

    #[tokio::test]
    async fn failed_explanations_do_not_consume_quota() {
        let fx = fixture(StubSource::with_pool(40), StubExplainer::failing()).await;
        run_quiz(&fx.dispatcher, 1).await;

        for _ in 0..5 {
            let replies = fx.dispatcher.handle(USER, "題號1").await;
            assert!(replies[0].text.contains("目前無法提供解析"), "{}", replies[0].text);
        }
        // Every attempt reached the adapter: nothing was rationed away.
        assert_eq!(fx.explainer.calls(), 5);
    }

    #[tokio::test]
    async fn explanation_requests_validate_sequence_numbers() {
        let fx = fixture(StubSource::with_pool(40), StubExplainer::answering("x")).await;
        fx.dispatcher.handle(USER, "免疫").await;
        fx.dispatcher.handle(USER, "A").await;

        // Mid-session: question 1 answered, question 2 not yet.
        let replies = fx.dispatcher.handle(USER, "題號1").await;
        assert!(replies[0].text.contains("📘 題號 1 解析"));
        let replies = fx.dispatcher.handle(USER, "題號2").await;
        assert!(replies[0].text.contains("查無"), "{}", replies[0].text);
        let replies = fx.dispatcher.handle(USER, "題號99").await;
        assert!(replies[0].text.contains("查無"));
        let replies = fx.dispatcher.handle(USER, "題號三").await;
        assert!(replies[0].text.contains("請輸入正確格式：題號3"), "{}", replies[0].text);
    }

    #[tokio::test]
    async fn new_subject_replaces_completed_session_and_quota() {
        let fx = fixture(StubSource::with_pool(40), StubExplainer::answering("x")).await;
        run_quiz(&fx.dispatcher, 1).await;

        for seq in 1..=3 {
            fx.dispatcher.handle(USER, &format!("題號{seq}")).await;
        }

        // Restart with a new subject; the quota is fresh again.
        let replies = fx.dispatcher.handle(USER, "生化").await;
        assert!(replies[0].text.contains("臨床生物化學"), "{}", replies[0].text);
        run_quiz_from_started(&fx.dispatcher).await;
        let replies = fx.dispatcher.handle(USER, "題號1").await;
        assert!(replies[0].text.contains("📘 題號 1 解析"), "{}", replies[0].text);
    }

    async fn run_quiz_from_started(dispatcher: &Dispatcher) {
        for _ in 0..5 {
            dispatcher.handle(USER, "A").await;
        }
    }

    #[tokio::test]
    async fn concurrent_answers_from_one_identity_are_serialized() {
        let fx = fixture(StubSource::with_pool(40), StubExplainer::answering("x")).await;
        fx.dispatcher.handle(USER, "免疫").await;

        // Two simultaneous submissions: the per-identity slot lock is held
        // for the whole turn, so each one sees a consistent index and the
        // progress advances exactly twice.
        let dispatcher = &fx.dispatcher;
        let (a, b) = tokio::join!(dispatcher.handle(USER, "A"), dispatcher.handle(USER, "A"));
        let texts = [a[0].text.as_str(), b[0].text.as_str()];
        assert!(texts.iter().any(|t| t.contains("第 2 題：")), "{texts:?}");
        assert!(texts.iter().any(|t| t.contains("第 3 題：")), "{texts:?}");

        let replies = dispatcher.handle(USER, "A").await;
        assert!(replies[0].text.contains("第 4 題："), "{}", replies[0].text);
    }

    #[tokio::test]
    async fn zero_question_configuration_still_yields_a_quiz() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordStore::new(dir.path()));
        let dispatcher = Dispatcher::new(
            store,
            SubjectCatalog::default(),
            Arc::new(StubSource::with_pool(40)),
            StubExplainer::answering("x"),
        )
        .with_questions_per_session(0)
        .with_clock(|| parse_date("2025-07-01").unwrap());
        dispatcher.handle(ADMIN, "admin").await;
        dispatcher.handle(USER, "hi").await;
        dispatcher
            .handle(USER, "國立醫學大學 王小明 123456 2025-06-01 2025-09-30")
            .await;
        dispatcher.handle(ADMIN, "approve 123456").await;

        // Clamped to a one-question session rather than an unpromptable
        // empty one.
        let replies = dispatcher.handle(USER, "免疫").await;
        assert!(replies[0].text.contains("第 1 題："), "{}", replies[0].text);
        let replies = dispatcher.handle(USER, "A").await;
        assert!(replies[0].text.contains("共 1 題"), "{}", replies[0].text);
    }

    #[tokio::test]
    async fn every_message_yields_a_reply() {
        let fx = fixture(StubSource::with_pool(40), StubExplainer::answering("x")).await;

        for input in ["免疫", "A", "嗯", "題號1", "show whitelist", ""] {
            let replies = fx.dispatcher.handle(USER, input).await;
            assert!(!replies.is_empty(), "no reply for {input:?}");
        }
    }

    #[tokio::test]
    async fn admin_retains_commands_while_quizzing() {
        let fx = fixture(StubSource::with_pool(40), StubExplainer::answering("x")).await;
        fx.dispatcher.handle(ADMIN, "免疫").await;

        let replies = fx.dispatcher.handle(ADMIN, "show whitelist").await;
        assert!(replies[0].text.contains("白名單使用者"), "{}", replies[0].text);
    }
}
