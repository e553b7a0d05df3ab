use mentionbot_core::config::{AppConfig, LlmProvider, LoadOptions};
use secrecy::ExposeSecret;
use serde::Serialize;

use super::{config::redact_token, CommandResult};

pub const DOCTOR_FAILURE_EXIT_CODE: u8 = 3;

const DEPENDENT_CHECKS: [&str; 3] =
    ["slack_token_readiness", "slack_request_signing", "llm_credentials"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

impl CheckStatus {
    fn marker(self) -> &'static str {
        match self {
            Self::Pass => "ok",
            Self::Warn => "warn",
            Self::Fail => "fail",
            Self::Skipped => "skip",
        }
    }

    fn blocks_startup(self) -> bool {
        matches!(self, Self::Fail | Self::Skipped)
    }
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn new(name: &'static str, status: CheckStatus, details: impl Into<String>) -> Self {
        Self { name, status, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: &'static str,
    checks: Vec<DoctorCheck>,
}

impl DoctorReport {
    fn from_checks(checks: Vec<DoctorCheck>) -> Self {
        if checks.iter().any(|check| check.status.blocks_startup()) {
            Self {
                overall_status: CheckStatus::Fail,
                summary: "doctor: one or more readiness checks failed",
                checks,
            }
        } else {
            Self {
                overall_status: CheckStatus::Pass,
                summary: "doctor: all readiness checks passed",
                checks,
            }
        }
    }

    fn render_human(&self) -> String {
        std::iter::once(self.summary.to_string())
            .chain(self.checks.iter().map(|check| {
                format!("- [{}] {}: {}", check.status.marker(), check.name, check.details)
            }))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn run(json_output: bool) -> CommandResult {
    let report = DoctorReport::from_checks(collect_checks());
    let exit_code =
        if report.overall_status == CheckStatus::Fail { DOCTOR_FAILURE_EXIT_CODE } else { 0 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            serde_json::json!({
                "overall_status": "fail",
                "summary": "doctor serialization failed",
                "error": error.to_string(),
            })
            .to_string()
        })
    } else {
        report.render_human()
    };

    CommandResult { exit_code, output }
}

fn collect_checks() -> Vec<DoctorCheck> {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            let mut checks =
                vec![DoctorCheck::new("config_validation", CheckStatus::Fail, error.to_string())];
            checks.extend(DEPENDENT_CHECKS.into_iter().map(|name| {
                DoctorCheck::new(
                    name,
                    CheckStatus::Skipped,
                    "skipped because configuration did not load",
                )
            }));
            return checks;
        }
    };

    vec![
        DoctorCheck::new(
            "config_validation",
            CheckStatus::Pass,
            "configuration loaded and validated",
        ),
        slack_token_check(&config),
        request_signing_check(&config),
        llm_credentials_check(&config),
    ]
}

fn slack_token_check(config: &AppConfig) -> DoctorCheck {
    let token = config.slack.bot_token.expose_secret();
    let status = if token.starts_with("xoxb-") { CheckStatus::Pass } else { CheckStatus::Fail };
    DoctorCheck::new("slack_token_readiness", status, format!("bot token {}", redact_token(token)))
}

fn request_signing_check(config: &AppConfig) -> DoctorCheck {
    if config.slack.signing_secret.is_some() {
        DoctorCheck::new(
            "slack_request_signing",
            CheckStatus::Pass,
            "inbound requests are verified with the signing secret",
        )
    } else {
        DoctorCheck::new(
            "slack_request_signing",
            CheckStatus::Warn,
            "slack.signing_secret is unset; inbound requests will not be verified",
        )
    }
}

fn llm_credentials_check(config: &AppConfig) -> DoctorCheck {
    let endpoint = config.llm.effective_base_url();
    let has_key = config
        .llm
        .api_key
        .as_ref()
        .is_some_and(|key| !key.expose_secret().trim().is_empty());

    let (status, details) = match (config.llm.provider, has_key) {
        (LlmProvider::Ollama, _) => {
            (CheckStatus::Pass, format!("ollama at `{endpoint}` needs no api key"))
        }
        (provider, true) => {
            (CheckStatus::Pass, format!("{provider:?} api key present for `{endpoint}`"))
        }
        (provider, false) => (CheckStatus::Fail, format!("{provider:?} requires llm.api_key")),
    };
    DoctorCheck::new("llm_credentials", status, details)
}
