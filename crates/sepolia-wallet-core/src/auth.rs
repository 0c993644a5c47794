use std::sync::Arc;

use tokio::sync::watch;

use crate::session::WalletSession;

pub const OTP_CODE_LENGTH: usize = 6;

const EMAIL_LOCAL_MAX: usize = 256;
const EMAIL_FIRST_LABEL_MAX: usize = 65;
const EMAIL_LABEL_MAX: usize = 26;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    SendingOtp,
    OtpSent { email: String },
    VerifyingOtp,
    Error { message: String },
    Authenticated,
}

impl AuthState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::SendingOtp => "sending_otp",
            Self::OtpSent { .. } => "otp_sent",
            Self::VerifyingOtp => "verifying_otp",
            Self::Error { .. } => "error",
            Self::Authenticated => "authenticated",
        }
    }

    fn error(error: &AuthError) -> Self {
        Self::Error {
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("invalid email")]
    InvalidEmail,
    #[error("too many attempts, try again later")]
    RateLimited,
    #[error("failed to send code")]
    SendFailed,
    #[error("enter 6 digits")]
    IncompleteCode,
    #[error("invalid code")]
    InvalidCode,
    #[error("code expired")]
    CodeExpired,
    #[error("verification failed")]
    VerificationFailed,
    #[error("failed to resend code")]
    ResendFailed,
}

/// Shape check: `local@label.label[...]`, at least one dot in the domain.
#[must_use]
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    let local_ok = !local.is_empty()
        && local.len() <= EMAIL_LOCAL_MAX
        && local
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '+' | '.' | '_' | '%' | '-'));
    if !local_ok {
        return false;
    }

    let labels = domain.split('.').collect::<Vec<_>>();
    if labels.len() < 2 {
        return false;
    }
    labels.iter().enumerate().all(|(index, label)| {
        let max = if index == 0 {
            EMAIL_FIRST_LABEL_MAX
        } else {
            EMAIL_LABEL_MAX
        };
        let mut chars = label.chars();
        let starts_alnum = chars.next().is_some_and(|ch| ch.is_ascii_alphanumeric());
        starts_alnum
            && label.len() <= max
            && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
    })
}

/// Keeps ASCII digits only, at most [`OTP_CODE_LENGTH`] of them.
#[must_use]
pub fn sanitize_otp_code(raw: &str) -> String {
    raw.chars()
        .filter(|ch| ch.is_ascii_digit())
        .take(OTP_CODE_LENGTH)
        .collect()
}

#[must_use]
pub fn classify_otp_send_failure(message: &str) -> AuthError {
    if message.to_ascii_lowercase().contains("rate_limit") {
        AuthError::RateLimited
    } else {
        AuthError::SendFailed
    }
}

#[must_use]
pub fn classify_otp_verify_failure(message: &str) -> AuthError {
    let normalized = message.to_ascii_lowercase();
    if normalized.contains("invalid_code") {
        AuthError::InvalidCode
    } else if normalized.contains("expired") {
        AuthError::CodeExpired
    } else {
        AuthError::VerificationFailed
    }
}

/// Email one-time-passcode login. Every external call is attempted exactly
/// once per invocation; failures land in [`AuthState::Error`].
pub struct AuthController<S: WalletSession> {
    session: Arc<S>,
    state: watch::Sender<AuthState>,
    email: watch::Sender<String>,
    otp_code: watch::Sender<String>,
}

impl<S: WalletSession> AuthController<S> {
    pub fn new(session: Arc<S>) -> Self {
        Self {
            session,
            state: watch::Sender::new(AuthState::Idle),
            email: watch::Sender::new(String::new()),
            otp_code: watch::Sender::new(String::new()),
        }
    }

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn email(&self) -> String {
        self.email.borrow().clone()
    }

    pub fn otp_code(&self) -> String {
        self.otp_code.borrow().clone()
    }

    pub fn set_email(&self, value: &str) {
        self.email.send_replace(value.trim().to_string());
        self.clear_error();
    }

    pub fn is_email_valid(&self) -> bool {
        is_valid_email(&self.email.borrow())
    }

    pub async fn send_otp(&self) {
        if !self.is_email_valid() {
            self.transition(AuthState::error(&AuthError::InvalidEmail));
            return;
        }

        self.transition(AuthState::SendingOtp);
        let email = self.email();
        match self.session.send_otp(&email).await {
            Ok(()) => {
                self.otp_code.send_replace(String::new());
                self.transition(AuthState::OtpSent { email });
            }
            Err(error) => {
                let classified = classify_otp_send_failure(&error.to_string());
                tracing::warn!(%error, reason = ?classified, "otp send failed");
                self.transition(AuthState::error(&classified));
            }
        }
    }

    pub fn set_otp_code(&self, value: &str) {
        self.otp_code.send_replace(sanitize_otp_code(value));
        self.clear_error();
    }

    pub async fn verify_otp(&self) {
        let code = self.otp_code();
        if code.len() != OTP_CODE_LENGTH {
            self.transition(AuthState::error(&AuthError::IncompleteCode));
            return;
        }

        self.transition(AuthState::VerifyingOtp);
        match self.session.verify_otp(&code).await {
            Ok(()) => self.transition(AuthState::Authenticated),
            Err(error) => {
                self.otp_code.send_replace(String::new());
                let classified = classify_otp_verify_failure(&error.to_string());
                tracing::warn!(%error, reason = ?classified, "otp verification failed");
                self.transition(AuthState::error(&classified));
            }
        }
    }

    /// A successful resend lands in `Idle`, not `OtpSent`.
    pub async fn resend_otp(&self) {
        self.otp_code.send_replace(String::new());
        self.transition(AuthState::SendingOtp);
        match self.session.resend_otp().await {
            Ok(()) => self.transition(AuthState::Idle),
            Err(error) => {
                tracing::warn!(%error, "otp resend failed");
                self.transition(AuthState::error(&AuthError::ResendFailed));
            }
        }
    }

    pub fn dismiss(&self) {
        self.transition(AuthState::Idle);
        self.otp_code.send_replace(String::new());
    }

    fn clear_error(&self) {
        self.state.send_if_modified(|state| {
            if matches!(state, AuthState::Error { .. }) {
                *state = AuthState::Idle;
                true
            } else {
                false
            }
        });
    }

    fn transition(&self, next: AuthState) {
        let previous = self.state.send_replace(next);
        tracing::debug!(
            from = previous.as_str(),
            to = self.state.borrow().as_str(),
            "auth state transition"
        );
    }
}
