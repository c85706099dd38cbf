//! Planner: asks the model which handler should take each task.
//!
//! The model answers with `Name` / `Instructions` sections, one pair per
//! nomination:
//!
//! ```text
//! * Name
//! general
//! * Instructions
//! Replace javax.* imports with jakarta.*
//! ```

use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::error::Result;
use crate::model::{ChatMessage, InvokeOptions, ModelProvider};
use crate::workflow::{NominatedAssignment, Task};
use crate::{mlog_debug, mlog_warn};

use super::handler::HandlerInfo;

/// Section header line: `Name` or `Instructions`, optionally decorated with
/// leading `*`/`#` markers and a trailing colon.
static SECTION_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*[*#]*\s*(name|instructions)\s*:?\s*[*#]*\s*:?\s*$").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Name,
    Instructions,
}

/// Parse a planner reply into nominations, in reply order.
pub fn parse_nominations(text: &str) -> Vec<NominatedAssignment> {
    let mut nominations: Vec<NominatedAssignment> = Vec::new();
    let mut current: Option<(Section, Vec<&str>)> = None;

    fn close(nominations: &mut Vec<NominatedAssignment>, section: Section, lines: &[&str]) {
        let body = lines.join("\n").trim().to_string();
        match section {
            Section::Name if body.is_empty() => {
                mlog_debug!("[planner] skipping empty Name section");
            }
            Section::Name => nominations.push(NominatedAssignment::new(body, "")),
            Section::Instructions => match nominations.last_mut() {
                Some(last) => last.instructions = body,
                None => mlog_warn!("[planner] Instructions section before any Name"),
            },
        }
    }

    for line in text.lines() {
        if let Some(caps) = SECTION_HEADER_RE.captures(line) {
            if let Some((section, lines)) = current.take() {
                close(&mut nominations, section, &lines);
            }
            let section = if caps[1].eq_ignore_ascii_case("name") {
                Section::Name
            } else {
                Section::Instructions
            };
            current = Some((section, Vec::new()));
        } else if let Some((_, lines)) = current.as_mut() {
            lines.push(line);
        }
    }
    if let Some((section, lines)) = current.take() {
        close(&mut nominations, section, &lines);
    }

    nominations
}

/// Routes tasks to handlers through the model.
pub struct Planner {
    model: Arc<dyn ModelProvider>,
    background: String,
}

impl Planner {
    pub fn new(model: Arc<dyn ModelProvider>, background: impl Into<String>) -> Self {
        Self {
            model,
            background: background.into(),
        }
    }

    /// Build the system and human messages for one task.
    pub fn messages(&self, task: &Task, roster: &[HandlerInfo]) -> Vec<ChatMessage> {
        let mut system = String::from(
            "You route code remediation work to specialized agents. For each piece of work, \
             pick the agent best suited to it and write precise instructions for it.\n\n\
             Answer with one block per assignment, in the order they should run:\n\n\
             * Name\n<agent name>\n* Instructions\n<what the agent must do>\n",
        );
        if !self.background.trim().is_empty() {
            system.push_str("\nBackground:\n");
            system.push_str(self.background.trim());
            system.push('\n');
        }

        let mut human = String::from("Available agents:\n");
        for info in roster {
            human.push_str(&format!("- {}: {}\n", info.name, info.description));
        }
        human.push_str("\nIssues:\n");
        for issue in &task.issues {
            human.push_str(&format!("- {}\n", issue));
        }
        if task.has_uri() {
            human.push_str(&format!(
                "\nOnly make changes needed to fix these issues in {}.\n",
                task.uri
            ));
        }

        vec![ChatMessage::system(system), ChatMessage::human(human)]
    }

    /// Nominate handlers for `task`.
    ///
    /// A task without issues, or an empty reply, yields no nominations.
    pub async fn plan(&self, task: &Task, roster: &[HandlerInfo]) -> Result<Vec<NominatedAssignment>> {
        if task.issues.is_empty() {
            return Ok(Vec::new());
        }

        let messages = self.messages(task, roster);
        let reply = self.model.invoke(&messages, InvokeOptions::plain()).await?;
        if reply.content.trim().is_empty() {
            mlog_warn!("[planner] empty reply from {} for {}", self.model.name(), task.uri);
            return Ok(Vec::new());
        }

        let nominations = parse_nominations(&reply.content);
        mlog_debug!(
            "[planner] {} nominations for '{}': {:?}",
            nominations.len(),
            task.uri,
            nominations.iter().map(|n| n.handler_name.as_str()).collect::<Vec<_>>()
        );
        Ok(nominations)
    }
}
