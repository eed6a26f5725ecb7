//! Scenario report rendering.
//!
//! User-facing output uses writeln! to stdout (this is a CLI binary, not debug output).

use std::io::Write;

use selfverify_session::VerificationState;

use crate::scenario::ScenarioReport;

/// Human-readable report.
pub fn write_text(out: &mut impl Write, report: &ScenarioReport) -> anyhow::Result<()> {
    writeln!(out, "Flow {}", report.flow_id)?;
    writeln!(out, "States:")?;
    for state in &report.states {
        writeln!(out, "  -> {}", describe(state))?;
    }

    let calls: Vec<String> = report
        .calls
        .iter()
        .map(|c| format!("{c:?}"))
        .collect();
    writeln!(out, "Service calls: {}", calls.join(", "))?;

    let verdict = if report.passed { "ok" } else { "MISMATCH" };
    writeln!(
        out,
        "Final state: {} (expected {}) {}",
        report.final_state, report.expected, verdict
    )?;
    Ok(())
}

/// JSON report on a single line.
pub fn write_json(out: &mut impl Write, report: &ScenarioReport) -> anyhow::Result<()> {
    serde_json::to_writer(&mut *out, report)?;
    writeln!(out)?;
    Ok(())
}

fn describe(state: &VerificationState) -> String {
    match state {
        VerificationState::ChallengeReceived(data) => format!("{state} [{data}]"),
        VerificationState::Replying { data, accept } => {
            let decision = if *accept { "accept" } else { "decline" };
            format!("{state} [{data}] ({decision})")
        }
        _ => state.to_string(),
    }
}
