//! # メール
//!
//! キューを流れる作業単位 [`EmailMessage`] と、その配送エラーを定義する。
//!
//! ## ワイヤ形式
//!
//! キュー上のメッセージ本体は UTF-8 JSON で、フィールドは `to` / `subject` /
//! `body` の 3 つだけ。メッセージ ID やタイムスタンプ、リトライ回数といった
//! メタデータは持たないため、コンシューマ側で重複排除や相関付けはできない。
//!
//! ```json
//! {"to": "a@b.com", "subject": "hi", "body": "<p>hi</p>"}
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::DomainError;

/// RFC 5321 のパス長上限
const MAX_ADDRESS_LEN: usize = 254;

/// 配送エラー
///
/// 接続失敗・認証失敗・リレーによる拒否はすべてこの 1 種類に集約される。
/// 呼び出し側（コンシューマ）はいずれもログ出力して破棄するだけなので、
/// 種別を区別しない。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// メール送信に失敗
    #[error("メール送信に失敗: {0}")]
    SendFailed(String),
}

/// 宛先メールアドレス（値オブジェクト）
///
/// `local@domain` の形式で、両側が空でないことを要求する。
/// 厳密な RFC 5322 検証は SMTP リレー側に任せる。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmailAddress(String);

impl EmailAddress {
    /// 宛先アドレスを作成する
    ///
    /// # バリデーション
    ///
    /// - 前後の空白を除いて空文字列ではない
    /// - `@` を含み、ローカル部・ドメイン部ともに空でない
    /// - 最大 254 文字
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_string();

        if value.is_empty() {
            return Err(DomainError::Validation(
                "宛先メールアドレスは必須です".to_string(),
            ));
        }

        let Some((local, domain)) = value.rsplit_once('@') else {
            return Err(DomainError::Validation(format!(
                "宛先メールアドレスの形式が不正です: {value}"
            )));
        };

        if local.is_empty() || domain.is_empty() || value.chars().any(char::is_whitespace) {
            return Err(DomainError::Validation(format!(
                "宛先メールアドレスの形式が不正です: {value}"
            )));
        }

        if value.len() > MAX_ADDRESS_LEN {
            return Err(DomainError::Validation(format!(
                "宛先メールアドレスは{MAX_ADDRESS_LEN}文字以内である必要があります"
            )));
        }

        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// メールメッセージ
///
/// 取り込み API または認証コード生成で作られ、キューを経由して
/// 配送ディスパッチャに一度だけ渡される。生成後は不変。
///
/// `Deserialize` はキューから取り出したワイヤ形式の復元にのみ使う。
/// 宛先の検証は取り込み側の責務で、キュー層では再検証しない。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    to:      String,
    subject: String,
    body:    String,
}

impl EmailMessage {
    /// 宛先を検証してメッセージを作成する
    pub fn new(
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let to = EmailAddress::new(to)?;
        Ok(Self::with_address(to, subject, body))
    }

    /// 検証済みアドレスからメッセージを作成する
    pub fn with_address(
        to: EmailAddress,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            to:      to.into_string(),
            subject: subject.into(),
            body:    body.into(),
        }
    }

    /// 宛先アドレス
    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// HTML 本文
    pub fn body(&self) -> &str {
        &self.body
    }

    /// キューに載せる JSON エンベロープへシリアライズする
    pub fn to_envelope(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// キューから取り出した JSON エンベロープを復元する
    ///
    /// 未知のフィールドは無視し、3 フィールドのいずれかが欠けていればエラー。
    pub fn from_envelope(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

impl std::fmt::Display for EmailMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EmailMessage(to={}, subject={:?})", self.to, self.subject)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_正しい宛先でメッセージを作成できる() {
        let message = EmailMessage::new("a@b.com", "hi", "<p>hi</p>").unwrap();

        assert_eq!(message.to(), "a@b.com");
        assert_eq!(message.subject(), "hi");
        assert_eq!(message.body(), "<p>hi</p>");
    }

    #[test]
    fn test_宛先の前後の空白は除去される() {
        let address = EmailAddress::new("  user@example.com ").unwrap();
        assert_eq!(address.as_str(), "user@example.com");
    }

    #[rstest]
    #[case("", "空文字列")]
    #[case("   ", "空白のみ")]
    #[case("no-at-sign", "@ なし")]
    #[case("@example.com", "ローカル部なし")]
    #[case("user@", "ドメイン部なし")]
    #[case("us er@example.com", "空白を含む")]
    fn test_不正な宛先を拒否する(#[case] input: &str, #[case] _description: &str) {
        let result = EmailMessage::new(input, "件名", "本文");
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_254文字を超える宛先を拒否する() {
        let address = format!("{}@example.com", "a".repeat(250));
        assert!(EmailAddress::new(address).is_err());
    }

    #[test]
    fn test_エンベロープは3フィールドのjsonになる() {
        let message = EmailMessage::new("a@b.com", "hi", "<p>hi</p>").unwrap();

        let payload = message.to_envelope().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&payload).unwrap();

        assert_eq!(
            json,
            serde_json::json!({"to": "a@b.com", "subject": "hi", "body": "<p>hi</p>"})
        );
    }

    #[test]
    fn test_エンベロープから元のメッセージを復元できる() {
        let message = EmailMessage::new("日本語@example.jp", "件名 ✉", "<b>本文</b>\r\n").unwrap();

        let restored = EmailMessage::from_envelope(&message.to_envelope().unwrap()).unwrap();

        assert_eq!(restored, message);
    }

    #[rstest]
    #[case::空の件名と本文(String::new(), String::new())]
    #[case::制御文字("\u{0}\u{7}\t\u{1b}[0m".to_string(), "\u{1f}\u{7f}\r\n".to_string())]
    #[case::行区切り文字("a\u{2028}b".to_string(), "c\u{2029}d\u{2028}".to_string())]
    #[case::エスケープが必要な文字(r#"\"引用\" \\"#.to_string(), "</script>&amp;\u{feff}".to_string())]
    #[case::サロゲート外の文字("🎉".to_string(), "𠮷野家".to_string())]
    #[case::巨大な本文("大量".to_string(), "<p>x</p>".repeat(256 * 1024))]
    fn test_エンベロープは任意の件名と本文を損なわず往復する(
        #[case] subject: String,
        #[case] body: String,
    ) {
        let message = EmailMessage::new("user@example.com", subject.clone(), body.clone()).unwrap();

        let restored = EmailMessage::from_envelope(&message.to_envelope().unwrap()).unwrap();

        assert_eq!(restored, message);
        assert_eq!(restored.subject(), subject);
        assert_eq!(restored.body(), body);
    }

    #[test]
    fn test_未知のフィールドは無視される() {
        let payload = br#"{"to":"a@b.com","subject":"s","body":"b","priority":1}"#;

        let message = EmailMessage::from_envelope(payload).unwrap();

        assert_eq!(message.to(), "a@b.com");
    }

    #[rstest]
    #[case(b"not json".as_slice())]
    #[case(br#"{"to":"a@b.com","subject":"s"}"#.as_slice())]
    #[case(br#"{"to":1,"subject":"s","body":"b"}"#.as_slice())]
    #[case(b"\xff\xfe".as_slice())]
    fn test_不正なエンベロープはエラーになる(#[case] payload: &[u8]) {
        assert!(EmailMessage::from_envelope(payload).is_err());
    }
}
