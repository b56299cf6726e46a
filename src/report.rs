//! Commit statistics split by agent and human authorship.

use chrono::NaiveDate;
use serde::Serialize;
use std::path::Path;

use crate::error::VcsError;
use crate::vcs::VersionControl;

/// Commit counts over a date range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommitStats {
    pub agent: usize,
    pub human: usize,
}

impl CommitStats {
    /// Count committer emails, attributing `agent_email` to the agent.
    pub fn from_emails<S: AsRef<str>>(emails: &[S], agent_email: &str) -> Self {
        let agent = emails
            .iter()
            .filter(|e| e.as_ref().eq_ignore_ascii_case(agent_email))
            .count();
        Self {
            agent,
            human: emails.len() - agent,
        }
    }

    pub fn total(&self) -> usize {
        self.agent + self.human
    }

    /// Share of agent commits in percent, 0 when there are none.
    pub fn agent_percentage(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.agent as f64 * 100.0 / self.total() as f64
        }
    }
}

impl std::fmt::Display for CommitStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Agent commits: {}", self.agent)?;
        writeln!(f, "Human commits: {}", self.human)?;
        write!(f, "Agent share:   {:.1}%", self.agent_percentage())
    }
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(text: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
}

/// Statistics for commits in `dir` between `since` and `until`.
pub async fn commit_statistics(
    vcs: &dyn VersionControl,
    dir: &Path,
    since: NaiveDate,
    until: Option<NaiveDate>,
    agent_email: &str,
) -> Result<CommitStats, VcsError> {
    let since = since.format("%Y-%m-%d").to_string();
    let until = until.map(|d| d.format("%Y-%m-%d").to_string());
    let emails = vcs
        .committer_emails(dir, &since, until.as_deref())
        .await?;
    Ok(CommitStats::from_emails(&emails, agent_email))
}
