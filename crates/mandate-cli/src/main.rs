//! CLI for compiling policy bundles, enforcing queries, and verifying audit
//! logs.
//!
//! Exit codes: 0 when the decision is `pass`/`auto_correct` (and for clean
//! compiles/verifications), 2 for `regenerate`/`escalate`, 1 on errors.

#![deny(unsafe_code)]

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use enforcement::{load_bundle, EnforceRequest, EnforcementConfig, Enforcer};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "mandate", about = "Policy-governance engine: compile bundles, enforce queries")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile raw policy records (JSONL) into a bundle
    Validate {
        /// Path to policies.jsonl
        policies: PathBuf,
        /// Output bundle path
        #[arg(long, default_value = "bundle.json")]
        out: PathBuf,
    },
    /// Enforce a query against a compiled bundle
    Enforce {
        #[arg(long)]
        bundle: PathBuf,
        #[arg(long)]
        query: String,
        /// Pre-generated response to verify (skips generation)
        #[arg(long)]
        response: Option<String>,
        /// Known query domain; bypasses the LLM classifier. Without a wired
        /// classifier or this flag the pipeline short-circuits to pass.
        #[arg(long)]
        domain: Option<String>,
        /// Retrieval cutoff date (YYYY-MM-DD; defaults to today)
        #[arg(long)]
        effective_date: Option<String>,
        /// Disable the judge-LLM check
        #[arg(long, default_value_t = false)]
        no_judge: bool,
        /// Disable the SMT fact check
        #[arg(long, default_value_t = false)]
        no_smt: bool,
        #[arg(long, default_value = "audit/enforcement.jsonl")]
        audit_log: PathBuf,
        /// Optional YAML config overriding pipeline defaults
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Verify the hash chain of an audit log
    VerifyAudit {
        log: PathBuf,
    },
}

struct EnforceArgs {
    bundle: PathBuf,
    query: String,
    response: Option<String>,
    domain: Option<String>,
    effective_date: Option<String>,
    no_judge: bool,
    no_smt: bool,
    audit_log: PathBuf,
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    telemetry::init_json_logging();
    let cli = Cli::parse();
    let code = match cli.cmd {
        Command::Validate { policies, out } => cmd_validate(&policies, &out),
        Command::Enforce {
            bundle,
            query,
            response,
            domain,
            effective_date,
            no_judge,
            no_smt,
            audit_log,
            config,
        } => cmd_enforce(&EnforceArgs {
            bundle,
            query,
            response,
            domain,
            effective_date,
            no_judge,
            no_smt,
            audit_log,
            config,
        }),
        Command::VerifyAudit { log } => cmd_verify_audit(&log),
    };
    ExitCode::from(code)
}

fn cmd_validate(policies: &Path, out: &Path) -> u8 {
    let records = match compiler::read_records_jsonl(policies) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: {}", e);
            return 1;
        }
    };
    let compilation = match compiler::compile_from_records(&records) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {}", e);
            return 1;
        }
    };
    for w in &compilation.warnings {
        warn!(warning = %w, "compile");
        eprintln!("warning: {}", w);
    }
    if let Err(e) = compiler::write_bundle(&compilation.bundle, out) {
        eprintln!("error: {}", e);
        return 1;
    }
    println!(
        "compiled {} rules, {} constraints, {} paths, {} dominance rules, {} escalations -> {}",
        compilation.bundle.bundle_metadata.rule_count,
        compilation.bundle.bundle_metadata.constraint_count,
        compilation.bundle.bundle_metadata.path_count,
        compilation.bundle.dominance_rules.len(),
        compilation.bundle.escalations.len(),
        out.display()
    );
    0
}

fn cmd_enforce(args: &EnforceArgs) -> u8 {
    let (bundle, index) = match load_bundle(&args.bundle) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("error: {}", e);
            return 1;
        }
    };

    let mut cfg = match &args.config {
        Some(path) => match EnforcementConfig::from_yaml_path(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("error: {}", e);
                return 1;
            }
        },
        None => EnforcementConfig::default(),
    };
    cfg.judge_enabled = cfg.judge_enabled && !args.no_judge;
    cfg.smt_enabled = cfg.smt_enabled && !args.no_smt;

    let effective_date = match &args.effective_date {
        Some(raw) => match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            Ok(d) => Some(d),
            Err(e) => {
                eprintln!("error: invalid --effective-date '{}': {}", raw, e);
                return 1;
            }
        },
        None => None,
    };

    let audit = match audit_log::AuditLogger::open(&args.audit_log) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("error: {}", e);
            return 1;
        }
    };

    let enforcer = Enforcer::new(bundle, index).with_config(cfg).with_audit(audit);
    let req = EnforceRequest {
        query: args.query.clone(),
        session_id: None,
        response_override: args.response.clone(),
        effective_date,
        domain: args.domain.clone(),
    };
    let decision = enforcer.enforce(&req);
    match serde_json::to_string_pretty(&decision) {
        Ok(text) => println!("{}", text),
        Err(e) => {
            eprintln!("error: {}", e);
            return 1;
        }
    }
    if decision.action.is_ok() {
        0
    } else {
        2
    }
}

fn cmd_verify_audit(log: &Path) -> u8 {
    match audit_log::verify_file(log) {
        Ok(count) => {
            println!("ok: {} entries verified", count);
            0
        }
        Err(e) => {
            eprintln!("error: {}", e);
            2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    const POLICY_LINE: &str = concat!(
        r#"{"policy_id":"RET-001","conditions":[{"type":"boolean_flag","parameter":"has_receipt"}],"#,
        r#""actions":[{"type":"required","action":"issue_refund"}],"metadata":{"domain":"returns"}}"#,
        "\n",
    );

    fn write_bundle_fixture(dir: &Path) -> PathBuf {
        let policies = dir.join("policies.jsonl");
        std::fs::write(&policies, POLICY_LINE).unwrap();
        let out = dir.join("bundle.json");
        assert_eq!(cmd_validate(&policies, &out), 0);
        out
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn validate_writes_bundle_and_empty_audit_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let out = write_bundle_fixture(dir.path());
        assert!(out.exists());
        assert_eq!(cmd_verify_audit(&dir.path().join("missing.jsonl")), 0);
    }

    #[test]
    fn validate_rejects_malformed_records() {
        let dir = tempfile::tempdir().unwrap();
        let policies = dir.path().join("bad.jsonl");
        std::fs::write(&policies, "{\"conditions\": []}\n").unwrap();
        assert_eq!(cmd_validate(&policies, &dir.path().join("out.json")), 1);
    }

    #[test]
    fn enforce_without_classifier_short_circuits_ok() {
        let dir = tempfile::tempdir().unwrap();
        let out = write_bundle_fixture(dir.path());
        let audit = dir.path().join("audit.jsonl");
        let code = cmd_enforce(&EnforceArgs {
            bundle: out,
            query: "anything at all".into(),
            response: None,
            domain: None,
            effective_date: None,
            no_judge: false,
            no_smt: false,
            audit_log: audit.clone(),
            config: None,
        });
        assert_eq!(code, 0);
        assert_eq!(audit_log::verify_file(&audit).unwrap(), 1);
    }

    #[test]
    fn enforce_with_domain_flags_bad_response() {
        let dir = tempfile::tempdir().unwrap();
        let out = write_bundle_fixture(dir.path());
        let audit = dir.path().join("audit.jsonl");
        let code = cmd_enforce(&EnforceArgs {
            bundle: out,
            query: "refund for laptop".into(),
            response: Some("Your SSN 123-45-6789 is on file; refund approved.".into()),
            domain: Some("returns".into()),
            effective_date: None,
            no_judge: true,
            no_smt: false,
            audit_log: audit.clone(),
            config: None,
        });
        assert_eq!(code, 2);
        assert_eq!(audit_log::verify_file(&audit).unwrap(), 1);
    }
}
