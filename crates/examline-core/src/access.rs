//! Access-control workflow.
//!
//! Per-identity state machine: unknown identities are parked as pending
//! applicants, complete applications wait for an administrator, and the
//! admin command surface (`admin`, `approve`, `input`, `delet`, `show …`)
//! mutates the whitelist. Authorization for quiz sessions is a check-time
//! predicate over the validity window; expiry never mutates storage.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::dispatch::Outbound;
use crate::error::{AccessDenial, BotError};
use crate::model::{parse_date, Applicant, Role, UserRecord};
use crate::store::{RecordSet, RecordStore};

const REGISTRATION_PROMPT: &str =
    "👋 歡迎使用，請先完成註冊。\n請依格式輸入資料：\n學校 姓名 學號 起始日 結束日\n（日期格式 YYYY-MM-DD）";
const REGISTRATION_FORMAT_ERROR: &str =
    "⚠️ 格式錯誤，請依格式輸入：\n學校 姓名 學號 起始日 結束日\n（日期格式 YYYY-MM-DD，起始日不得晚於結束日）";
const REGISTRATION_SUBMITTED: &str = "✅ 已送出申請，請等待管理者審核。";
const REGISTRATION_WAITING: &str = "⏳ 資料已送出，審核中，請稍候。";
const APPROVED_NOTICE: &str = "✅ 你的帳號已審核通過，輸入科目名稱即可開始測驗。";

pub struct AccessControl {
    store: Arc<RecordStore>,
}

impl AccessControl {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }

    /// Try to interpret the input as an admin command.
    ///
    /// `Ok(None)` means "not an admin command for this identity" and the
    /// message falls through to the registration/quiz flow. Commands match
    /// by case-insensitive prefix; everything except `admin` itself
    /// requires the sender to hold the admin role.
    pub async fn try_admin_command(
        &self,
        user_id: &str,
        input: &str,
    ) -> Result<Option<Vec<Outbound>>, BotError> {
        let lower = input.to_lowercase();

        if lower.starts_with("admin") {
            return Ok(Some(self.self_promote(user_id).await?));
        }

        let whitelist: HashMap<String, UserRecord> =
            self.store.load(RecordSet::Whitelist).await?;
        let is_admin = whitelist
            .get(user_id)
            .map(|u| u.role == Role::Admin)
            .unwrap_or(false);
        if !is_admin {
            return Ok(None);
        }

        let tokens: Vec<&str> = input.split_whitespace().collect();
        let result = if lower == "show pending" {
            self.show_pending(user_id).await
        } else if lower == "show whitelist" {
            Ok(render_whitelist(user_id, &whitelist))
        } else if lower.starts_with("approve") {
            self.approve(user_id, &tokens).await
        } else if lower.starts_with("input") {
            self.direct_input(user_id, &tokens).await
        } else if lower.starts_with("delet") {
            self.delete(user_id, &tokens).await
        } else {
            return Ok(None);
        };

        // Format and not-found failures are answered, never propagated;
        // state is untouched by construction of the handlers above.
        match result {
            Ok(replies) => Ok(Some(replies)),
            Err(BotError::Format(usage)) => Ok(Some(vec![Outbound::to(
                user_id,
                format!("⚠️ 請使用格式：{usage}"),
            )])),
            Err(BotError::NotFound(target)) => Ok(Some(vec![Outbound::to(
                user_id,
                format!("⚠️ 查無 {target}。"),
            )])),
            Err(e) => Err(e),
        }
    }

    /// `admin`: self-promote an unlisted identity to the admin role with an
    /// unrestricted validity window. Idempotent for anyone already listed.
    async fn self_promote(&self, user_id: &str) -> Result<Vec<Outbound>, BotError> {
        let promoted = self
            .store
            .update(RecordSet::Whitelist, |whitelist: &mut HashMap<String, UserRecord>| {
                if whitelist.contains_key(user_id) {
                    (false, false)
                } else {
                    whitelist.insert(user_id.to_string(), UserRecord::admin(user_id));
                    (true, true)
                }
            })
            .await?;
        if promoted {
            tracing::info!(user_id, "self-promoted to admin");
        }
        Ok(vec![Outbound::to(user_id, "✅ 管理者登入成功。")])
    }

    /// `approve <token>`: promote a complete pending applicant, matched by
    /// identity token or student id, to a whitelist member.
    async fn approve(&self, admin_id: &str, tokens: &[&str]) -> Result<Vec<Outbound>, BotError> {
        let [_, target] = tokens else {
            return Err(BotError::Format("approve LINE_ID".into()));
        };
        let target = target.to_string();

        let found = self
            .store
            .update(RecordSet::PendingRegister, |pending: &mut HashMap<String, Applicant>| {
                let key = pending
                    .iter()
                    .find(|(k, v)| **k == target || v.student_id == target)
                    .map(|(k, _)| k.clone());
                (false, key.and_then(|k| pending.get(&k).cloned().map(|a| (k, a))))
            })
            .await?;

        let Some((key, applicant)) = found else {
            return Err(BotError::NotFound(format!("{target} 於待審核區")));
        };
        let Some(user) = applicant.into_user(Role::Member) else {
            // Incomplete shells are not approvable.
            return Err(BotError::NotFound(format!("{target} 的完整註冊資料")));
        };

        let approved_id = user.line_id.clone();
        let window = format!("{}~{}", user.start_date, user.end_date);
        self.store
            .update(RecordSet::Whitelist, |whitelist: &mut HashMap<String, UserRecord>| {
                whitelist.insert(approved_id.clone(), user);
                (true, ())
            })
            .await?;
        self.store
            .update(RecordSet::PendingRegister, |pending: &mut HashMap<String, Applicant>| {
                (pending.remove(&key).is_some(), ())
            })
            .await?;

        tracing::info!(approved = %approved_id, %window, "applicant approved");
        Ok(vec![
            Outbound::to(admin_id, "✅ 已成功審核並加入白名單。"),
            Outbound::to(&approved_id, APPROVED_NOTICE),
        ])
    }

    /// `input <school> <name> <id> <start> <end> <token>`: direct whitelist
    /// add; re-adding a token overwrites.
    async fn direct_input(&self, admin_id: &str, tokens: &[&str]) -> Result<Vec<Outbound>, BotError> {
        const USAGE: &str = "input 學校 姓名 學號 起始 結束 LINE_ID";
        let [_, school, name, student_id, start, end, target_id] = tokens else {
            return Err(BotError::Format(USAGE.into()));
        };
        let (Some(start_date), Some(end_date)) = (parse_date(start), parse_date(end)) else {
            return Err(BotError::Format(USAGE.into()));
        };
        if start_date > end_date {
            return Err(BotError::Format(USAGE.into()));
        }

        let user = UserRecord {
            line_id: target_id.to_string(),
            role: Role::Member,
            school: school.to_string(),
            name: name.to_string(),
            student_id: student_id.to_string(),
            start_date,
            end_date,
        };
        self.store
            .update(RecordSet::Whitelist, |whitelist: &mut HashMap<String, UserRecord>| {
                whitelist.insert(user.line_id.clone(), user);
                (true, ())
            })
            .await?;

        Ok(vec![Outbound::to(
            admin_id,
            format!("✅ 已手動新增 {name} 至白名單。"),
        )])
    }

    /// `delet <token-or-id>`: remove a whitelist record, matched by
    /// identity token or student id.
    async fn delete(&self, admin_id: &str, tokens: &[&str]) -> Result<Vec<Outbound>, BotError> {
        let [_, target] = tokens else {
            return Err(BotError::Format("delet LINE_ID 或 delet 學號".into()));
        };
        let target = target.to_string();

        let removed = self
            .store
            .update(RecordSet::Whitelist, |whitelist: &mut HashMap<String, UserRecord>| {
                let key = whitelist
                    .iter()
                    .find(|(k, v)| **k == target || v.student_id == target)
                    .map(|(k, _)| k.clone());
                match key {
                    Some(k) => {
                        whitelist.remove(&k);
                        (true, true)
                    }
                    None => (false, false),
                }
            })
            .await?;

        if !removed {
            return Err(BotError::NotFound(target));
        }
        Ok(vec![Outbound::to(admin_id, format!("🗑️ 已移除 {target}。"))])
    }

    async fn show_pending(&self, admin_id: &str) -> Result<Vec<Outbound>, BotError> {
        let pending: HashMap<String, Applicant> =
            self.store.load(RecordSet::PendingRegister).await?;
        let text = if pending.is_empty() {
            "📭 目前無待審核名單。".to_string()
        } else {
            let mut lines: Vec<String> = pending.values().map(Applicant::summary_line).collect();
            lines.sort();
            format!("📋 尚待審核名單：\n{}", lines.join("\n"))
        };
        Ok(vec![Outbound::to(admin_id, text)])
    }

    /// Registration flow for identities that are not yet whitelisted.
    ///
    /// `Ok(None)` means the identity is whitelisted and the message belongs
    /// to the quiz flow.
    pub async fn try_registration(
        &self,
        user_id: &str,
        input: &str,
    ) -> Result<Option<Vec<Outbound>>, BotError> {
        let whitelist: HashMap<String, UserRecord> =
            self.store.load(RecordSet::Whitelist).await?;
        if whitelist.contains_key(user_id) {
            return Ok(None);
        }

        let reply = self
            .store
            .update(RecordSet::PendingRegister, |pending: &mut HashMap<String, Applicant>| {
                match pending.get_mut(user_id) {
                    None => {
                        // First contact: park a shell, prompt once.
                        pending.insert(user_id.to_string(), Applicant::shell(user_id));
                        (true, REGISTRATION_PROMPT.to_string())
                    }
                    Some(applicant) if applicant.is_complete() => {
                        (false, REGISTRATION_WAITING.to_string())
                    }
                    Some(applicant) => match parse_registration(input) {
                        Some(fields) => {
                            applicant.school = fields.school;
                            applicant.name = fields.name;
                            applicant.student_id = fields.student_id;
                            applicant.start_date = Some(fields.start_date);
                            applicant.end_date = Some(fields.end_date);
                            (true, REGISTRATION_SUBMITTED.to_string())
                        }
                        None => (false, REGISTRATION_FORMAT_ERROR.to_string()),
                    },
                }
            })
            .await?;

        Ok(Some(vec![Outbound::to(user_id, reply)]))
    }

    /// Authorization check run on every session start.
    pub async fn authorize(&self, user_id: &str, today: NaiveDate) -> Result<UserRecord, BotError> {
        let whitelist: HashMap<String, UserRecord> =
            self.store.load(RecordSet::Whitelist).await?;
        match whitelist.get(user_id) {
            Some(user) if user.is_valid_on(today) => Ok(user.clone()),
            Some(_) => Err(BotError::AccessDenied(AccessDenial::Expired)),
            None => {
                let pending: HashMap<String, Applicant> =
                    self.store.load(RecordSet::PendingRegister).await?;
                if pending.contains_key(user_id) {
                    Err(BotError::AccessDenied(AccessDenial::Pending))
                } else {
                    Err(BotError::AccessDenied(AccessDenial::NeverRegistered))
                }
            }
        }
    }
}

struct RegistrationFields {
    school: String,
    name: String,
    student_id: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
}

/// Validate a five-field registration line. Explicit field-count and date
/// checks; malformed input is answered, never silently dropped.
fn parse_registration(input: &str) -> Option<RegistrationFields> {
    let tokens: Vec<&str> = input.split_whitespace().collect();
    let [school, name, student_id, start, end] = tokens[..] else {
        return None;
    };
    let start_date = parse_date(start)?;
    let end_date = parse_date(end)?;
    if start_date > end_date {
        return None;
    }
    Some(RegistrationFields {
        school: school.to_string(),
        name: name.to_string(),
        student_id: student_id.to_string(),
        start_date,
        end_date,
    })
}

fn render_whitelist(admin_id: &str, whitelist: &HashMap<String, UserRecord>) -> Vec<Outbound> {
    let text = if whitelist.is_empty() {
        "📭 目前白名單為空。".to_string()
    } else {
        let mut lines: Vec<String> = whitelist.values().map(UserRecord::summary_line).collect();
        lines.sort();
        format!("📋 白名單使用者：\n{}", lines.join("\n"))
    };
    vec![Outbound::to(admin_id, text)]
}
