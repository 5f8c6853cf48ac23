//! Transactional email: render a template, hand it to the delivery API, and
//! log the outcome either way.

use std::{sync::LazyLock, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tera::{Context, Tera};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    database::models::{EmailStatus, NewEmailLog},
    error::AppError,
    workflows::require_text,
    AppState,
};

const RESEND_API_URL: &str = "https://api.resend.com/emails";
pub const SEND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("email delivery timed out")]
    Timeout,
    #[error("email api error status={status} body={body}")]
    Api { status: u16, body: String },
    #[error("email transport error: {0}")]
    Transport(String),
    #[error("email template error: {0}")]
    Template(String),
}

impl From<reqwest::Error> for EmailError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(e.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailType {
    Welcome,
    BookingConfirmation,
    PaymentReceipt,
    NewMessage,
    ReviewRequest,
    PractitionerOnboarding,
}

impl EmailType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::BookingConfirmation => "booking_confirmation",
            Self::PaymentReceipt => "payment_receipt",
            Self::NewMessage => "new_message",
            Self::ReviewRequest => "review_request",
            Self::PractitionerOnboarding => "practitioner_onboarding",
        }
    }

    fn template(&self) -> &'static str {
        match self {
            Self::Welcome => "welcome.html",
            Self::BookingConfirmation => "booking_confirmation.html",
            Self::PaymentReceipt => "payment_receipt.html",
            Self::NewMessage => "new_message.html",
            Self::ReviewRequest => "review_request.html",
            Self::PractitionerOnboarding => "practitioner_onboarding.html",
        }
    }

    /// Subjects are plain text and are not escaped.
    fn subject(&self, data: &Map<String, Value>) -> String {
        match self {
            Self::Welcome => "Welcome aboard".to_string(),
            Self::BookingConfirmation => format!(
                "Your session with {} is confirmed",
                text(data, "practitioner_name", "your practitioner")
            ),
            Self::PaymentReceipt => "Payment receipt".to_string(),
            Self::NewMessage => "You have a new message".to_string(),
            Self::ReviewRequest => "How was your session?".to_string(),
            Self::PractitionerOnboarding => "Finish setting up payouts".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Returns the provider's message id.
    async fn send(&self, email: &OutgoingEmail) -> Result<String, EmailError>;
}

pub struct ResendMailer {
    http: reqwest::Client,
    api_key: String,
}

impl ResendMailer {
    pub fn new(api_key: String) -> Result<Self, EmailError> {
        let http = reqwest::Client::builder()
            .timeout(SEND_TIMEOUT)
            .build()
            .map_err(|e| EmailError::Transport(e.to_string()))?;
        Ok(Self { http, api_key })
    }
}

#[derive(Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

#[derive(Deserialize)]
struct ResendResponse {
    id: String,
}

#[async_trait]
impl Mailer for ResendMailer {
    #[tracing::instrument(skip_all, fields(to = %email.to))]
    async fn send(&self, email: &OutgoingEmail) -> Result<String, EmailError> {
        let resp = self
            .http
            .post(RESEND_API_URL)
            .bearer_auth(&self.api_key)
            .json(&ResendRequest {
                from: &email.from,
                to: [&email.to],
                subject: &email.subject,
                html: &email.html,
            })
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(EmailError::Api {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str::<ResendResponse>(&body)
            .map(|r| r.id)
            .map_err(|e| EmailError::Transport(format!("{e}; body={body}")))
    }
}

const LAYOUT: &str = r#"<!DOCTYPE html><html><body style="font-family:sans-serif;color:#1f2933">
<h1 style="font-size:20px">{% block heading %}{% endblock heading %}</h1>
{% block content %}{% endblock content %}
<p style="color:#7b8794;font-size:12px">You are receiving this email because you have an account with us.</p>
</body></html>"#;

const WELCOME: &str = r#"{% extends "layout.html" %}
{% block heading %}Welcome, {{ name }}!{% endblock heading %}
{% block content %}<p>Your account is ready. Start by completing your profile.</p>{% endblock content %}"#;

const BOOKING_CONFIRMATION: &str = r#"{% extends "layout.html" %}
{% block heading %}Booking confirmed{% endblock heading %}
{% block content %}<p>Hi {{ name }},</p>
<p>Your session with {{ practitioner_name }} on {{ session_date }} is confirmed.</p>{% endblock content %}"#;

const PAYMENT_RECEIPT: &str = r#"{% extends "layout.html" %}
{% block heading %}Thanks for your payment{% endblock heading %}
{% block content %}<p>Hi {{ name }},</p>
<p>We received {{ total }}.</p>
<p>Reference: {{ payment_id }}</p>{% endblock content %}"#;

const NEW_MESSAGE: &str = r#"{% extends "layout.html" %}
{% block heading %}New message{% endblock heading %}
{% block content %}<p>Hi {{ name }},</p>
<p>{{ sender_name }} sent you a message:</p>
<blockquote>{{ preview }}</blockquote>{% endblock content %}"#;

const REVIEW_REQUEST: &str = r#"{% extends "layout.html" %}
{% block heading %}Leave a review{% endblock heading %}
{% block content %}<p>Hi {{ name }},</p>
<p>Tell us how your session with {{ practitioner_name }} went.</p>
<p><a href="{{ review_url }}">Write a review</a></p>{% endblock content %}"#;

const PRACTITIONER_ONBOARDING: &str = r#"{% extends "layout.html" %}
{% block heading %}Almost there{% endblock heading %}
{% block content %}<p>Hi {{ name }},</p>
<p>Complete your payout details to start accepting bookings.</p>
<p><a href="{{ dashboard_url }}">Continue setup</a></p>{% endblock content %}"#;

/// Templates end in `.html`, so tera escapes every interpolated value.
static TEMPLATES: LazyLock<Result<Tera, tera::Error>> = LazyLock::new(|| {
    let mut tera = Tera::default();
    tera.add_raw_templates(vec![
        ("layout.html", LAYOUT),
        (EmailType::Welcome.template(), WELCOME),
        (EmailType::BookingConfirmation.template(), BOOKING_CONFIRMATION),
        (EmailType::PaymentReceipt.template(), PAYMENT_RECEIPT),
        (EmailType::NewMessage.template(), NEW_MESSAGE),
        (EmailType::ReviewRequest.template(), REVIEW_REQUEST),
        (EmailType::PractitionerOnboarding.template(), PRACTITIONER_ONBOARDING),
    ])?;
    Ok(tera)
});

fn text(data: &Map<String, Value>, key: &str, fallback: &str) -> String {
    match data.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => fallback.to_string(),
        Some(other) => other.to_string(),
    }
}

fn amount(data: &Map<String, Value>) -> String {
    let minor = data.get("amount").and_then(Value::as_i64).unwrap_or(0);
    let currency = data
        .get("currency")
        .and_then(Value::as_str)
        .unwrap_or("usd")
        .to_uppercase();
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.unsigned_abs();
    format!("{sign}{}.{:02} {currency}", abs / 100, abs % 100)
}

fn context(email_type: EmailType, recipient_name: &str, data: &Map<String, Value>) -> Context {
    let mut ctx = Context::new();
    ctx.insert("name", recipient_name);
    match email_type {
        EmailType::Welcome => {}
        EmailType::BookingConfirmation => {
            ctx.insert("practitioner_name", &text(data, "practitioner_name", "your practitioner"));
            ctx.insert("session_date", &text(data, "session_date", "the scheduled time"));
        }
        EmailType::PaymentReceipt => {
            ctx.insert("total", &amount(data));
            ctx.insert("payment_id", &text(data, "payment_id", "-"));
        }
        EmailType::NewMessage => {
            ctx.insert("sender_name", &text(data, "sender_name", "Someone"));
            ctx.insert("preview", &text(data, "preview", ""));
        }
        EmailType::ReviewRequest => {
            ctx.insert("practitioner_name", &text(data, "practitioner_name", "your practitioner"));
            ctx.insert("review_url", &text(data, "review_url", "#"));
        }
        EmailType::PractitionerOnboarding => {
            ctx.insert("dashboard_url", &text(data, "dashboard_url", "#"));
        }
    }
    ctx
}

pub fn render(
    email_type: EmailType,
    recipient_name: &str,
    data: &Map<String, Value>,
) -> Result<RenderedEmail, EmailError> {
    let tera = TEMPLATES
        .as_ref()
        .map_err(|e| EmailError::Template(e.to_string()))?;
    let html = tera
        .render(email_type.template(), &context(email_type, recipient_name, data))
        .map_err(|e| EmailError::Template(e.to_string()))?;
    Ok(RenderedEmail {
        subject: email_type.subject(data),
        html,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailRequest {
    pub email_type: EmailType,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub recipient_name: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct SendEmailResponse {
    pub success: bool,
    pub id: String,
}

#[tracing::instrument(skip(state, request), fields(email_type = request.email_type.as_str()))]
pub async fn send_email(
    state: &AppState,
    request: SendEmailRequest,
) -> Result<SendEmailResponse, AppError> {
    let to = require_text(request.to, "to")?;
    if !to.contains('@') {
        return Err(AppError::Validation("to must be an email address".into()));
    }
    let recipient_name = request.recipient_name.unwrap_or_else(|| "there".to_string());
    let rendered = render(request.email_type, &recipient_name, &request.data)?;

    let outgoing = OutgoingEmail {
        from: state.config.email_from.clone(),
        to: to.clone(),
        subject: rendered.subject.clone(),
        html: rendered.html,
    };
    let result = state.mailer.send(&outgoing).await;

    let log = NewEmailLog {
        id: Uuid::new_v4(),
        email_type: request.email_type.as_str().to_string(),
        recipient: to,
        subject: rendered.subject,
        status: match result {
            Ok(_) => EmailStatus::Sent,
            Err(_) => EmailStatus::Failed,
        },
        provider_message_id: result.as_ref().ok().cloned(),
        error_message: result.as_ref().err().map(|e| e.to_string()),
    };
    if let Err(e) = state.store.insert_email_log(log).await {
        warn!("Failed to write email log: {e}");
    }

    match result {
        Ok(id) => {
            info!("Sent {} email ({id})", request.email_type.as_str());
            Ok(SendEmailResponse { success: true, id })
        }
        Err(e) => {
            error!("Failed to send {} email: {e}", request.email_type.as_str());
            Err(e.into())
        }
    }
}
