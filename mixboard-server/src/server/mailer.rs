use async_trait::async_trait;
use mixboard_shared::domain::Mix;
use mixboard_shared::timing::MINUTE_MS;
use serde::Serialize;
use tinytemplate::TinyTemplate;

const TEXT_TEMPLATE: &str = "Hi {to_name},

The final stage of \"{mix_name}\" has just started ({stage_name}, {duration_min} min).

Once this stage is complete, your mix will be done!

- Mix Scheduler";

const HTML_TEMPLATE: &str = r#"<p>Hi <strong>{to_name}</strong>,</p>
<p>The <strong>final stage</strong> of <em>{mix_name}</em> has just started:</p>
<ul>
  <li><strong>Stage:</strong> {stage_name}</li>
  <li><strong>Duration:</strong> {duration_min} minutes</li>
</ul>
<p>Once this stage is complete, your mix will be done! 🎉</p>
<p style="color:#999;font-size:12px;">- Mix Scheduler</p>
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("template error: {0}")]
    Template(#[from] tinytemplate::error::Error),
    #[error("delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: OutgoingMail) -> Result<(), MailError>;
}

/// Writes outgoing mail to the log instead of delivering it.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: OutgoingMail) -> Result<(), MailError> {
        tracing::info!(to = %mail.to, from = %mail.from, subject = %mail.subject, "mail: queued");
        tracing::debug!(body = %mail.text, "mail: text body");
        Ok(())
    }
}

#[derive(Serialize)]
struct FinalStageContext<'a> {
    to_name: &'a str,
    mix_name: &'a str,
    stage_name: &'a str,
    duration_min: u64,
}

/// True when this update moved the mix onto its last stage.
pub fn just_reached_final_stage(before: &Mix, after: &Mix) -> bool {
    if after.is_deleted || after.stages.is_empty() {
        return false;
    }
    let last = after.stages.len() - 1;
    after.current_stage_index == last && before.current_stage_index != last
}

/// Composes the owner notice for a mix that just entered its final stage.
pub fn final_stage_mail(mix: &Mix, from: &str) -> Result<Option<OutgoingMail>, MailError> {
    let Some(stage) = mix.stages.last() else {
        return Ok(None);
    };
    let mix_name = if mix.name.trim().is_empty() {
        "Your mix"
    } else {
        mix.name.as_str()
    };
    let ctx = FinalStageContext {
        to_name: mix.owner.label(),
        mix_name,
        stage_name: &stage.name,
        duration_min: (stage.duration_ms + MINUTE_MS / 2) / MINUTE_MS,
    };

    let mut text_tt = TinyTemplate::new();
    text_tt.set_default_formatter(&tinytemplate::format_unescaped);
    text_tt.add_template("text", TEXT_TEMPLATE)?;
    let text = text_tt.render("text", &ctx)?;

    let mut html_tt = TinyTemplate::new();
    html_tt.add_template("html", HTML_TEMPLATE)?;
    let html = html_tt.render("html", &ctx)?;

    Ok(Some(OutgoingMail {
        to: mix.owner.email.clone(),
        from: from.to_string(),
        subject: format!("⏱ Final stage started: {mix_name}"),
        text,
        html,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mixboard_shared::domain::{MixId, MixMetadata, Owner, Stage};

    fn mix(index: usize) -> Mix {
        Mix {
            id: MixId::from("m1"),
            name: "Batch <A>".into(),
            stages: vec![Stage::new("Powder 1", 60_000), Stage::new("Cure", 150_000)],
            current_stage_index: index,
            current_stage_started_at_ms: 0,
            owner: Owner {
                id: "u1".into(),
                email: "ann@example.com".into(),
                display_name: None,
            },
            created_at_ms: 0,
            is_deleted: false,
            metadata: MixMetadata::default(),
        }
    }

    #[test]
    fn trigger_fires_only_on_entering_last_stage() {
        assert!(just_reached_final_stage(&mix(0), &mix(1)));
        assert!(!just_reached_final_stage(&mix(1), &mix(1)));
        assert!(!just_reached_final_stage(&mix(0), &mix(0)));
        let mut deleted = mix(1);
        deleted.is_deleted = true;
        assert!(!just_reached_final_stage(&mix(0), &deleted));
    }

    #[test]
    fn mail_names_stage_and_rounded_minutes() {
        let mail = final_stage_mail(&mix(1), "noreply@example.com")
            .unwrap()
            .unwrap();
        assert_eq!(mail.to, "ann@example.com");
        assert_eq!(mail.subject, "⏱ Final stage started: Batch <A>");
        assert!(mail.text.starts_with("Hi ann@example.com,"));
        assert!(mail.text.contains("(Cure, 3 min)"));
        assert!(mail.text.contains("\"Batch <A>\""));
        assert!(mail.html.contains("Batch &lt;A&gt;"));
        assert!(mail.html.contains("3 minutes"));
    }
}
