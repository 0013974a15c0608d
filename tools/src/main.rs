//! closeout-runner: scheduled entry point for one closed-account pass.
//!
//! Usage:
//!   closeout-runner --config data/config/member_notice.json --db dna.db --effdate 07/23/2025
//!   closeout-runner --config data/config/status_cleanup.json --db dna.db --full-cleanup
//!
//! Any error exits non-zero; the scheduler treats that as a failed job.

use anyhow::{Context, Result};
use closeout_core::{
    clock::RunClock,
    config::{ConfigFile, Environment, PipelineVariant},
    engine::RunEngine,
    gateway::SqliteGateway,
    notifier::{JinjaTemplate, Notifier, TemplateRenderer},
    transport::SmtpMailTransport,
};
use std::env;
use std::path::PathBuf;

fn main() -> Result<()> {
    env_logger::init();
    let args: Vec<String> = env::args().collect();

    let config_path = flag_value(&args, "--config").context("--config <file.json> is required")?;
    let db = flag_value(&args, "--db").context("--db <database> is required")?;
    let environment = resolve_environment(&args)?;

    let mut file = ConfigFile::load(&config_path)?;
    apply_overrides(&mut file, &args)?;
    let config = file.validate(environment)?;

    log::info!(
        "closeout-runner started at {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );

    let clock = RunClock::new(config.time_zone);
    let template: Option<Box<dyn TemplateRenderer>> = match &config.email.template_path {
        Some(path) if config.variant == PipelineVariant::MemberNotice => Some(Box::new(
            JinjaTemplate::from_file(path)
                .with_context(|| format!("Cannot load template {}", path.display()))?,
        )),
        _ => None,
    };
    let notifier = Notifier::new(
        &config,
        clock.year(),
        Box::new(SmtpMailTransport::default()),
        template,
    );
    let gateway = SqliteGateway::open(&db).with_context(|| format!("Cannot open {db}"))?;

    let summary = RunEngine::new(config, clock, Box::new(gateway), notifier).run()?;

    println!("=== RUN SUMMARY ===");
    println!("  run_id:         {}", summary.run_id);
    println!("  selected:       {}", summary.selected);
    println!("  successes:      {}", summary.successes);
    println!("  exceptions:     {}", summary.exceptions);
    println!("  failed updates: {}", summary.failed_updates);
    if let Some(notice) = &summary.failure_notice {
        println!("  failure email:  {}", notice.message);
    }
    log::info!(
        "closeout-runner finished at {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    Ok(())
}

/// `--environment production|local`, else production when the scheduler's
/// `AW_HOME` is set.
fn resolve_environment(args: &[String]) -> Result<Environment> {
    match flag_value(args, "--environment").as_deref() {
        Some("production") => Ok(Environment::Production),
        Some("local") => Ok(Environment::Local),
        Some(other) => anyhow::bail!("unknown --environment '{other}'"),
        None if env::var_os("AW_HOME").is_some() => Ok(Environment::Production),
        None => Ok(Environment::Local),
    }
}

fn apply_overrides(file: &mut ConfigFile, args: &[String]) -> Result<()> {
    if let Some(date) = flag_value(args, "--effdate") {
        file.effective_date = Some(date);
    }
    if has_flag(args, "--full-cleanup") {
        file.full_cleanup = true;
    }
    if has_flag(args, "--report-only") {
        file.report_only = true;
    }
    if let Some(yn) = flag_value(args, "--send-email") {
        file.send_email = match yn.to_uppercase().as_str() {
            "Y" => true,
            "N" => false,
            other => anyhow::bail!("--send-email expects Y or N, got '{other}'"),
        };
    }
    if let Some(addr) = flag_value(args, "--test-email") {
        file.email.test_address = Some(addr);
    }
    if let Some(dir) = flag_value(args, "--output-dir") {
        // Relative to the working directory, not the config file.
        file.output.directory = env::current_dir()?.join(PathBuf::from(dir));
    }
    if let Some(name) = flag_value(args, "--output-file") {
        file.output.file_name = name;
    }
    if let Ok(password) = env::var("CLOSEOUT_SMTP_PASSWORD") {
        file.smtp.password = password;
    }
    Ok(())
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].clone())
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}
