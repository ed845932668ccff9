//! Notification Content and Rendering

use crate::TemplateError;
use alert_model::{AlertKey, AlertRule, Attachment, EvalResult, Event, NotificationDef, State};
use std::collections::BTreeMap;
use std::fmt::Write;
use tracing::warn;

/// Which piece of notification content is being rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Subject,
    Body,
    EmailSubject,
    EmailBody,
}

/// Data available to templates
pub struct RenderContext<'a> {
    pub key: &'a AlertKey,
    pub rule: &'a AlertRule,
    pub event: &'a Event,
    pub state: &'a State,
}

/// Rendered template output
#[derive(Debug, Clone, Default)]
pub struct Rendered {
    pub bytes: Vec<u8>,
    pub attachments: Vec<Attachment>,
}

impl Rendered {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            bytes: text.into().into_bytes(),
            attachments: Vec::new(),
        }
    }
}

/// Template renderer collaborator
pub trait Renderer: Send + Sync {
    fn render(
        &self,
        template: &str,
        kind: TemplateKind,
        ctx: &RenderContext<'_>,
    ) -> Result<Rendered, TemplateError>;
}

fn result_line(label: &str, result: &Option<EvalResult>, out: &mut String) {
    if let Some(r) = result {
        let _ = writeln!(out, "{}: {} = {}", label, r.expr, r.value);
    }
}

/// Renderer producing plain text summaries without a template engine
#[derive(Debug, Clone, Default)]
pub struct PlainRenderer;

impl Renderer for PlainRenderer {
    fn render(
        &self,
        _template: &str,
        kind: TemplateKind,
        ctx: &RenderContext<'_>,
    ) -> Result<Rendered, TemplateError> {
        let status = ctx.event.status.as_str().to_uppercase();
        let subject = format!("{}: {}", status, ctx.key);
        let text = match kind {
            TemplateKind::Subject | TemplateKind::EmailSubject => subject,
            TemplateKind::Body | TemplateKind::EmailBody => {
                let mut body = format!("{}\nTime: {}\n", subject, ctx.event.time.to_rfc3339());
                result_line("crit", &ctx.event.crit, &mut body);
                result_line("warn", &ctx.event.warn, &mut body);
                if let Some(err) = &ctx.event.error {
                    for c in &err.computations {
                        let _ = writeln!(body, "error: {}", c.text);
                    }
                }
                if kind == TemplateKind::EmailBody {
                    body = format!("<pre>{}</pre>", body);
                }
                body
            }
        };
        Ok(Rendered::text(text))
    }
}

/// Render subject, body and email variants into the state.
///
/// Any failure replaces all content with a generic fallback and drops the
/// attachments. Returns whether rendering succeeded.
pub fn apply_templates(
    renderer: &dyn Renderer,
    rule: &AlertRule,
    state: &mut State,
    event: &Event,
) -> bool {
    let key = state.key.clone();
    let snapshot = state.clone();
    let ctx = RenderContext {
        key: &key,
        rule,
        event,
        state: &snapshot,
    };
    let render = |kind| renderer.render(&rule.template, kind, &ctx);

    let outcome = (|| {
        let subject = render(TemplateKind::Subject)?;
        if subject.bytes.is_empty() {
            return Err(TemplateError::EmptySubject(key.to_string()));
        }
        let body = render(TemplateKind::Body)?;
        let email_subject = render(TemplateKind::EmailSubject)?;
        let email_body = render(TemplateKind::EmailBody)?;
        Ok::<_, TemplateError>((subject, body, email_subject, email_body))
    })();

    state.clear_rendered();
    match outcome {
        Ok((subject, body, email_subject, email_body)) => {
            state.subject = String::from_utf8_lossy(&subject.bytes).into_owned();
            state.body = String::from_utf8_lossy(&body.bytes).into_owned();
            state.email_subject = String::from_utf8_lossy(&email_subject.bytes).into_owned();
            state.email_body = String::from_utf8_lossy(&email_body.bytes).into_owned();
            state.attachments = email_body.attachments;
            true
        }
        Err(e) => {
            warn!("Template rendering failed for {}: {}", key, e);
            metrics::counter!("sched.template.errors", "alert" => key.name().to_string())
                .increment(1);
            state.subject = format!("error: template rendering error for alert {}", key);
            state.body = format!("templates for {} failed to render: {}", key, e);
            state.email_subject = state.subject.clone();
            state.email_body = state.body.clone();
            false
        }
    }
}

/// Content handed to the transport
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub subject: String,
    pub body: String,
    pub html_subject: String,
    pub html_body: String,
    /// Lets receivers collapse repeats of the same incident
    pub dedup_key: String,
    pub attachments: Vec<Attachment>,
}

impl Message {
    /// Notification for one alert key from its rendered state
    pub fn from_state(state: &State, notification: &NotificationDef) -> Self {
        let mut body = state.body.clone();
        if notification.print {
            if let Some(last) = state.last() {
                for result in [&last.crit, &last.warn, &last.error].into_iter().flatten() {
                    for c in &result.computations {
                        let _ = writeln!(body, "{} = {}", c.text, c.value);
                    }
                }
            }
        }
        Self {
            subject: state.subject.clone(),
            body,
            html_subject: state.email_subject.clone(),
            html_body: state.email_body.clone(),
            dedup_key: state.key.to_string(),
            attachments: state.attachments.clone(),
        }
    }

    /// One group of unknown keys
    pub fn unknown_group(name: &str, keys: &[AlertKey]) -> Self {
        let subject = format!("{}: {} unknown alerts", name, keys.len());
        let mut body = String::new();
        for ak in keys {
            let _ = writeln!(body, "{}", ak);
        }
        Self {
            html_subject: subject.clone(),
            html_body: format!("<pre>{}</pre>", body),
            subject,
            body,
            dedup_key: format!("unknown:{}", name),
            attachments: Vec::new(),
        }
    }

    /// Digest of every group past the unknown threshold
    pub fn unknown_digest(groups: &BTreeMap<String, Vec<AlertKey>>) -> Self {
        let total: usize = groups.values().map(Vec::len).sum();
        let subject = format!(
            "{} unknown alert instances suppressed in {} groups",
            total,
            groups.len()
        );
        let mut body = String::new();
        for (name, keys) in groups {
            let _ = writeln!(body, "{}: {}", name, keys.len());
        }
        Self {
            html_subject: subject.clone(),
            html_body: format!("<pre>{}</pre>", body),
            subject,
            body,
            dedup_key: "unknown:digest".to_string(),
            attachments: Vec::new(),
        }
    }
}
