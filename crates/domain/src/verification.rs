//! # 認証コードメール
//!
//! 宛先と任意の認証コードから、コードを埋め込んだ [`EmailMessage`] を組み立てる。
//! コードが指定されなければ 6 桁の数字を一様乱数で生成する。

use rand::Rng;
use serde::Deserialize;

use crate::{DomainError, EmailMessage};

/// 認証コードメールの件名
pub const VERIFICATION_SUBJECT: &str = "Verification code";

/// 呼び出し側が指定できるコードの最大長
const MAX_CODE_LEN: usize = 32;

/// 認証コード（値オブジェクト）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationCode(String);

impl VerificationCode {
    /// 生成されるコードの下限（6 桁の最小値）
    pub const MIN: u32 = 100_000;
    /// 生成されるコードの上限（6 桁の最大値）
    pub const MAX: u32 = 999_999;

    /// スレッドローカル乱数で 6 桁のコードを生成する
    ///
    /// 呼び出しごとの一意性は保証しない。
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::rng())
    }

    /// 指定した乱数生成器で 6 桁のコードを生成する
    pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(rng.random_range(Self::MIN..=Self::MAX).to_string())
    }

    /// 呼び出し側が指定したコードを検証する
    ///
    /// HTML 本文に埋め込まれるため、ASCII 英数字のみ・1〜32 文字に制限する。
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();

        if value.is_empty() || value.len() > MAX_CODE_LEN {
            return Err(DomainError::Validation(format!(
                "認証コードは1〜{MAX_CODE_LEN}文字である必要があります"
            )));
        }

        if !value.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DomainError::Validation(
                "認証コードには英数字のみ使用できます".to_string(),
            ));
        }

        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 認証コード送信リクエスト
///
/// `code` が未指定（または空文字列）の場合はコードを生成する。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VerificationCodeRequest {
    pub to:   String,
    #[serde(default)]
    pub code: Option<String>,
}

impl VerificationCodeRequest {
    /// 使用するコードを確定する
    pub fn resolve_code(&self) -> Result<VerificationCode, DomainError> {
        match self.code.as_deref() {
            None | Some("") => Ok(VerificationCode::generate()),
            Some(code) => VerificationCode::new(code),
        }
    }

    /// コードを埋め込んだメールメッセージを組み立てる
    pub fn into_email(self) -> Result<EmailMessage, DomainError> {
        let code = self.resolve_code()?;
        EmailMessage::new(self.to, VERIFICATION_SUBJECT, render_body(&code))
    }
}

/// 認証コードメールの HTML 本文
pub fn render_body(code: &VerificationCode) -> String {
    format!(
        "<html><body><h3>Your verification code is: <b>{}</b></h3></body></html>",
        code.as_str()
    )
}
