//! Mock adapters for testing without real network calls.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use examline_core::model::Question;
use examline_core::traits::{ExplanationService, QuestionSource};

/// A scriptable question source: a fixed pool or a hard failure.
pub struct MockQuestionBank {
    pool: Vec<Question>,
    fail: bool,
    call_count: AtomicU32,
    last_locator: Mutex<Option<String>>,
}

impl MockQuestionBank {
    /// A bank that returns the given pool for every locator.
    pub fn with_pool(pool: Vec<Question>) -> Self {
        Self {
            pool,
            fail: false,
            call_count: AtomicU32::new(0),
            last_locator: Mutex::new(None),
        }
    }

    /// A bank with `count` generated, pairwise-distinct questions, all
    /// keyed to answer "A".
    pub fn with_generated(count: usize) -> Self {
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
        Self::with_pool(pool)
    }

    /// A bank whose every fetch fails.
    pub fn failing() -> Self {
        Self {
            pool: Vec::new(),
            fail: true,
            call_count: AtomicU32::new(0),
            last_locator: Mutex::new(None),
        }
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn last_locator(&self) -> Option<String> {
        self.last_locator.lock().unwrap().clone()
    }
}

#[async_trait]
impl QuestionSource for MockQuestionBank {
    async fn fetch(&self, locator: &str) -> anyhow::Result<Vec<Question>> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        *self.last_locator.lock().unwrap() = Some(locator.to_string());
        if self.fail {
            anyhow::bail!("mock bank failure");
        }
        Ok(self.pool.clone())
    }
}

/// A scriptable explanation service with a call counter.
pub struct MockExplainer {
    response: Option<String>,
    call_count: AtomicU32,
}

impl MockExplainer {
    /// Always answers with the same text.
    pub fn with_fixed_response(text: &str) -> Self {
        Self {
            response: Some(text.to_string()),
            call_count: AtomicU32::new(0),
        }
    }

    /// Every call fails, as if the remote timed out.
    pub fn failing() -> Self {
        Self {
            response: None,
            call_count: AtomicU32::new(0),
        }
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ExplanationService for MockExplainer {
    async fn explain(&self, _question: &Question, _submitted: &str) -> anyhow::Result<String> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        match &self.response {
            Some(text) => Ok(text.clone()),
            None => anyhow::bail!("mock explanation failure"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bank_records_calls_and_locators() {
        let bank = MockQuestionBank::with_generated(3);
        let pool = bank.fetch("examimmun").await.unwrap();
        assert_eq!(pool.len(), 3);
        assert_eq!(bank.call_count(), 1);
        assert_eq!(bank.last_locator().as_deref(), Some("examimmun"));
    }

    #[tokio::test]
    async fn failing_adapters_fail() {
        let bank = MockQuestionBank::failing();
        assert!(bank.fetch("x").await.is_err());

        let explainer = MockExplainer::failing();
        let q = MockQuestionBank::with_generated(1).pool[0].clone();
        assert!(explainer.explain(&q, "A").await.is_err());
        assert_eq!(explainer.call_count(), 1);
    }
}
