//! # 一斉送信
//!
//! 共通の件名・本文を複数の宛先に送るリクエスト。
//! 投入時に宛先ごとの [`EmailMessage`] へ展開され、各展開は独立している。
//! ある宛先の失敗（形式不正・投入失敗）が他の宛先の投入を妨げることはない。

use serde::{Deserialize, Serialize};

use crate::{DomainError, EmailMessage};

/// 一斉送信リクエスト
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BulkSendRequest {
    /// 宛先一覧（順序を保持する）
    pub to:      Vec<String>,
    pub subject: String,
    pub body:    String,
}

impl BulkSendRequest {
    /// 宛先ごとのメッセージに展開する
    ///
    /// 入力順を保ったまま、宛先ごとに検証結果を返す。
    pub fn expand(&self) -> impl Iterator<Item = (&str, Result<EmailMessage, DomainError>)> + '_ {
        self.to.iter().map(|recipient| {
            let message = EmailMessage::new(recipient.as_str(), &self.subject, &self.body);
            (recipient.as_str(), message)
        })
    }
}

/// 宛先ごとの失敗
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipientFailure {
    pub recipient: String,
    pub reason:    String,
}

/// 一斉送信の結果集計
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkSendReport {
    /// キュー投入に成功した件数
    pub queued: usize,
    /// 失敗した宛先（入力順）
    pub failed: Vec<RecipientFailure>,
}

impl BulkSendReport {
    pub fn record_queued(&mut self) {
        self.queued += 1;
    }

    pub fn record_failure(&mut self, recipient: impl Into<String>, reason: impl Into<String>) {
        self.failed.push(RecipientFailure {
            recipient: recipient.into(),
            reason:    reason.into(),
        });
    }

    pub fn total(&self) -> usize {
        self.queued + self.failed.len()
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// 1 件以上の宛先があり、すべて失敗した
    pub fn is_total_failure(&self) -> bool {
        self.queued == 0 && !self.failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn request(to: &[&str]) -> BulkSendRequest {
        BulkSendRequest {
            to:      to.iter().map(ToString::to_string).collect(),
            subject: "お知らせ".to_string(),
            body:    "<p>本文</p>".to_string(),
        }
    }

    #[test]
    fn test_宛先ごとに同じ件名と本文のメッセージに展開される() {
        let req = request(&["a@example.com", "b@example.com"]);

        let messages: Vec<_> = req.expand().map(|(_, m)| m.unwrap()).collect();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].to(), "a@example.com");
        assert_eq!(messages[1].to(), "b@example.com");
        assert!(messages.iter().all(|m| m.subject() == "お知らせ"));
        assert!(messages.iter().all(|m| m.body() == "<p>本文</p>"));
    }

    #[test]
    fn test_不正な宛先は他の宛先の展開を妨げない() {
        let req = request(&["a@example.com", "broken", "c@example.com"]);

        let results: Vec<_> = req.expand().collect();

        assert_eq!(results.len(), 3);
        assert!(results[0].1.is_ok());
        assert_eq!(results[1].0, "broken");
        assert!(results[1].1.is_err());
        assert!(results[2].1.is_ok());
    }

    #[test]
    fn test_空の宛先一覧は何も展開しない() {
        let req = request(&[]);
        assert_eq!(req.expand().count(), 0);
    }

    #[test]
    fn test_レポートの集計() {
        let mut report = BulkSendReport::default();
        assert!(!report.is_total_failure());

        report.record_failure("x", "不正");
        assert!(report.is_total_failure());

        report.record_queued();
        assert_eq!(report.total(), 2);
        assert!(!report.is_complete_success());
        assert!(!report.is_total_failure());
    }

    #[test]
    fn test_レポートのserialize結果() {
        let mut report = BulkSendReport::default();
        report.record_queued();
        report.record_failure("broken", "形式不正");

        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "queued": 1,
                "failed": [{"recipient": "broken", "reason": "形式不正"}]
            })
        );
    }
}
