//! Default system prompts and the shared context block.
//!
//! Prompts only steer the output format the routers depend on (finalize
//! markers, tool requests, structured recommendations). Applications replace
//! them through [`AgentRoster`](crate::roster::AgentRoster) when they need
//! domain-specific wording.

use crate::proposalgraph::state::{AnalysisTrack, DebateSide, DebateTrack, ProposalState};

pub const INTENTION: &str = "Decide whether the request needs a full proposal analysis. \
If it can be answered directly, reply with a short explanation followed by <FINALIZE>. \
Otherwise describe what must be analysed.";

pub const OUTPUT: &str = "Answer the user's request directly and concisely.";

pub const STRUCTURE: &str = "Extract the structure of the proposal: title, aims, methods, \
team, budget and timeline. Reply with a structured outline.";

pub const PLANNING: &str = "Write an execution plan for reviewing the proposal, naming what \
the academic, social, future influence and interdisciplinary analyses should focus on.";

pub const FINAL_ANALYST: &str = "Synthesise the analysis reports and the debate verdicts into \
one balanced assessment of the proposal.";

pub const REFLECTION: &str = "Assess the quality of the work done so far and give a confidence \
score between 0 and 100. A score of 80 or higher means the analysis can proceed to report \
generation; below 80 it needs human review. Reply with a JSON object with the keys \
'confidence_score' and 'recommendation', where 'recommendation' is either 'generate' or 'review'.";

pub const FEEDBACK_ANALYSIS: &str = "Read the human reviewer's feedback and decide which stage \
must be revisited: academic_analysis, social_analysis, future_influence, interdisciplinary, \
debate or generate. Choose 'generate' if no changes are needed. Reply with a JSON object with \
one key: 'next_step'.";

pub const GENERATOR: &str = "Write the final review report for the proposal from the \
assessment, the debate verdicts and any reviewer feedback.";

const STAGE_SUFFIX: &str = "Use your tools when you need evidence. When your analysis is \
complete, write the full report and end with <FINALIZE>.";

/// Prompt for a sequential analysis stage.
pub fn analysis(track: AnalysisTrack) -> String {
    let focus = match track {
        AnalysisTrack::Academic => {
            "Evaluate the academic merit of the proposal: novelty against prior work, \
             methodological soundness and publication record."
        }
        AnalysisTrack::Social => {
            "Evaluate the social value of the proposal: who benefits, public interest \
             and ethical concerns."
        }
        AnalysisTrack::FutureInfluence => {
            "Evaluate the long-term influence of the proposal on its field and on industry."
        }
        AnalysisTrack::Interdisciplinary => {
            "Identify the disciplines the proposal draws on and how they interact. \
             List them on one line as `DISCIPLINES: A, B, C` or as \
             {\"disciplines\": [\"A\", \"B\"]}."
        }
    };
    format!("{} {}", focus, STAGE_SUFFIX)
}

/// Prompt for one side of a debate.
pub fn debater(track: DebateTrack, side: DebateSide) -> String {
    let stance = match side {
        DebateSide::Proponent => "Argue that the proposal is strong",
        DebateSide::Opponent => "Argue that the proposal is weak",
    };
    format!(
        "{} on {} within the discipline named in the context. Respond to the other side's \
         last argument. Say <FINALIZE> only if the debate has reached a clear conclusion.",
        stance, track
    )
}

pub fn judge(track: DebateTrack) -> String {
    format!(
        "You judge a debate about the {} of a proposal. Weigh both sides and write a \
         verdict with the strongest arguments of each.",
        track
    )
}

fn section(out: &mut String, title: &str, body: &str) {
    if !body.trim().is_empty() {
        out.push_str(&format!("### {}\n{}\n\n", title, body.trim()));
    }
}

/// Everything downstream stages may read, skipping empty fields.
pub fn render_context(state: &ProposalState) -> String {
    let mut out = String::new();
    section(&mut out, "Research topic", &state.research_topic);
    section(&mut out, "Proposal structure", &state.research_structure);
    section(&mut out, "Execution plan", &state.execution_plan);
    for (track, report) in &state.analysis_reports {
        section(&mut out, &format!("{} report", track), report);
    }
    if !state.interdisciplinary_results.is_empty() {
        section(
            &mut out,
            "Disciplines",
            &state.interdisciplinary_results.join(", "),
        );
    }
    if !state.current_discipline.is_empty() {
        section(&mut out, "Current discipline", &state.current_discipline);
    }
    for entry in &state.debate_results {
        for track in [DebateTrack::Feasibility, DebateTrack::Innovation] {
            section(
                &mut out,
                &format!("{} {} verdict", entry.discipline, track),
                &entry.track(track).judge_summary,
            );
        }
    }
    section(&mut out, "Assessment", &state.final_analysis_summary);
    section(&mut out, "Reviewer feedback", &state.human_feedback);
    out
}
