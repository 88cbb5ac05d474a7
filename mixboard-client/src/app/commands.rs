//! One-shot mix and template commands.

use std::path::PathBuf;

use mixboard_shared::api::{self, CreateMixReq, CreateTemplateReq, UpdateMixReq};
use mixboard_shared::domain::{Mix, MixMetadata, MixTemplate, now_ms};
use mixboard_shared::timing::{self, format_duration};

use crate::cli::{MetaArgs, MixCommand, TemplateCommand};
use crate::config::ClientConfig;
use crate::login::token_for;
use crate::{AppError, board, rest_err};

struct Ctx {
    base: String,
    token: String,
}

fn context(config: Option<PathBuf>) -> Result<Ctx, AppError> {
    let (_, cfg) = ClientConfig::find_and_load(config)?;
    let token = token_for(&cfg)?;
    Ok(Ctx {
        base: cfg.server_url,
        token,
    })
}

impl From<MetaArgs> for MixMetadata {
    fn from(m: MetaArgs) -> Self {
        MixMetadata {
            category: m.category,
            color: m.color,
            description: m.description,
            batch_number: m.batch,
        }
    }
}

pub async fn run_mix(cmd: MixCommand, config: Option<PathBuf>) -> Result<(), AppError> {
    let ctx = context(config)?;
    match cmd {
        MixCommand::List { mine } => {
            let owner = if mine {
                Some(
                    api::rest::me(&ctx.base, &ctx.token)
                        .await
                        .map_err(rest_err)?
                        .id,
                )
            } else {
                None
            };
            let mixes = api::rest::list_mixes(&ctx.base, &ctx.token, owner.as_deref())
                .await
                .map_err(rest_err)?;
            if mixes.is_empty() {
                println!("No active mixes.");
            }
            let now = now_ms();
            for m in &mixes {
                println!("{}", mix_line(m, now));
            }
        }
        MixCommand::Show { id } => {
            let m = api::rest::get_mix(&ctx.base, &ctx.token, &id)
                .await
                .map_err(rest_err)?;
            print_mix(&m);
        }
        MixCommand::Create { name, stages, meta } => {
            let req = CreateMixReq {
                name,
                stages,
                metadata: meta.into(),
            };
            let m = api::rest::create_mix(&ctx.base, &ctx.token, &req)
                .await
                .map_err(rest_err)?;
            println!("Created mix {}", m.id);
            print_mix(&m);
        }
        MixCommand::FromTemplate { template_id } => {
            let m = api::rest::create_mix_from_template(&ctx.base, &ctx.token, &template_id)
                .await
                .map_err(rest_err)?;
            println!("Created mix {} from template {template_id}", m.id);
            print_mix(&m);
        }
        MixCommand::Advance { id, from } => {
            let from_index = match from {
                Some(i) => i,
                None => {
                    api::rest::get_mix(&ctx.base, &ctx.token, &id)
                        .await
                        .map_err(rest_err)?
                        .current_stage_index
                }
            };
            let m = api::rest::advance_mix(&ctx.base, &ctx.token, &id, from_index)
                .await
                .map_err(rest_err)?;
            let stage = m.current_stage().map(|s| s.name.as_str()).unwrap_or("-");
            println!(
                "{} is now on stage {}/{}: {stage}",
                board::display_name(&m),
                m.current_stage_index + 1,
                m.stages.len()
            );
        }
        MixCommand::Edit {
            id,
            name,
            stages,
            meta,
        } => {
            let metadata = if meta.is_empty() {
                None
            } else {
                let current = api::rest::get_mix(&ctx.base, &ctx.token, &id)
                    .await
                    .map_err(rest_err)?
                    .metadata;
                Some(merge_metadata(current, meta))
            };
            let req = UpdateMixReq {
                name,
                stages: if stages.is_empty() { None } else { Some(stages) },
                metadata,
            };
            let m = api::rest::update_mix(&ctx.base, &ctx.token, &id, &req)
                .await
                .map_err(rest_err)?;
            print_mix(&m);
        }
        MixCommand::Delete { id } => {
            api::rest::delete_mix(&ctx.base, &ctx.token, &id)
                .await
                .map_err(rest_err)?;
            println!("Deleted mix {id}");
        }
    }
    Ok(())
}

pub async fn run_template(cmd: TemplateCommand, config: Option<PathBuf>) -> Result<(), AppError> {
    let ctx = context(config)?;
    match cmd {
        TemplateCommand::List => {
            let templates = api::rest::list_templates(&ctx.base, &ctx.token)
                .await
                .map_err(rest_err)?;
            if templates.is_empty() {
                println!("No templates.");
            }
            for t in &templates {
                println!("{}", template_line(t));
            }
        }
        TemplateCommand::Create { name, stages, meta } => {
            let req = CreateTemplateReq {
                name,
                stages,
                metadata: meta.into(),
            };
            let t = api::rest::create_template(&ctx.base, &ctx.token, &req)
                .await
                .map_err(rest_err)?;
            println!("Created template {}", template_line(&t));
        }
        TemplateCommand::Save { mix_id, name } => {
            let t = api::rest::save_mix_as_template(&ctx.base, &ctx.token, &mix_id, &name)
                .await
                .map_err(rest_err)?;
            println!("Saved template {}", template_line(&t));
        }
        TemplateCommand::Delete { id } => {
            api::rest::delete_template(&ctx.base, &ctx.token, &id)
                .await
                .map_err(rest_err)?;
            println!("Deleted template {id}");
        }
    }
    Ok(())
}

/// Flags given on the command line replace the matching stored fields.
fn merge_metadata(mut current: MixMetadata, args: MetaArgs) -> MixMetadata {
    if args.category.is_some() {
        current.category = args.category;
    }
    if args.color.is_some() {
        current.color = args.color;
    }
    if args.description.is_some() {
        current.description = args.description;
    }
    if args.batch.is_some() {
        current.batch_number = args.batch;
    }
    current
}

fn mix_line(m: &Mix, now: i64) -> String {
    let timer = match m.current_deadline_ms() {
        Some(end) if timing::is_overdue(end, now) => {
            format!("done +{}", format_duration(timing::overdue_by(end, now)))
        }
        Some(end) => format!("{} left", format_duration(timing::remaining(end, now))),
        None => "-".to_string(),
    };
    format!(
        "{}  {:<28} {}/{} {:<20} {:<16} {}",
        m.id,
        board::display_name(m),
        m.current_stage_index + 1,
        m.stages.len(),
        m.current_stage().map(|s| s.name.as_str()).unwrap_or("-"),
        timer,
        m.owner.label(),
    )
}

fn print_mix(m: &Mix) {
    println!("{} ({})", board::display_name(m), m.id);
    println!("  owner:    {}", m.owner.label());
    println!("  colour:   {}", m.color());
    println!("  created:  {}", local_time(m.created_at_ms));
    println!("  stage since {}", local_time(m.current_stage_started_at_ms));
    if let Some(c) = &m.metadata.category {
        println!("  category: {c}");
    }
    if let Some(d) = &m.metadata.description {
        println!("  notes:    {d}");
    }
    for (i, s) in m.stages.iter().enumerate() {
        let marker = if i == m.current_stage_index { ">" } else { " " };
        println!(
            "  {marker} {}. {:<24} {}",
            i + 1,
            s.name,
            format_duration(s.duration_ms)
        );
    }
}

fn local_time(ms: i64) -> String {
    match chrono::DateTime::from_timestamp_millis(ms) {
        Some(t) => t
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => "-".to_string(),
    }
}

fn template_line(t: &MixTemplate) -> String {
    let total: u64 = t.stages.iter().map(|s| s.duration_ms).sum();
    format!(
        "{}  {:<28} {} stages, {}",
        t.id,
        t.name,
        t.stages.len(),
        format_duration(total)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use mixboard_shared::domain::{MixId, Owner, Stage};

    #[test]
    fn metadata_merge_keeps_unset_fields() {
        let current = MixMetadata {
            category: Some("Powder".into()),
            description: Some("keep".into()),
            ..Default::default()
        };
        let merged = merge_metadata(
            current,
            MetaArgs {
                batch: Some("7".into()),
                ..Default::default()
            },
        );
        assert_eq!(merged.category.as_deref(), Some("Powder"));
        assert_eq!(merged.description.as_deref(), Some("keep"));
        assert_eq!(merged.batch_number.as_deref(), Some("7"));
    }

    #[test]
    fn list_line_shows_timer_state() {
        let m = Mix {
            id: MixId::from("m1"),
            name: "Batch A".into(),
            stages: vec![Stage::new("Powder 1", 60_000), Stage::new("Powder 2", 60_000)],
            current_stage_index: 1,
            current_stage_started_at_ms: 0,
            owner: Owner {
                id: "u1".into(),
                email: "ann@example.com".into(),
                display_name: None,
            },
            created_at_ms: 0,
            is_deleted: false,
            metadata: MixMetadata::default(),
        };
        let line = mix_line(&m, 30_000);
        assert!(line.contains("2/2"), "{line}");
        assert!(line.contains("30s left"), "{line}");
        assert!(mix_line(&m, 75_000).contains("done +15s"));
    }
}
