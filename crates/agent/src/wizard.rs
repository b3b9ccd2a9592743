//! Wizard data-collector: a state-bearing agent that drives a declared field
//! schema to completion, one field per user turn.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use relay_core::domain::interview::{
    AnswerOutcome, FieldDescriptor, FieldType, Interview, InterviewId,
};
use relay_db::repositories::{InterviewRepository, RepositoryError};

use crate::llm::{ChatRequest, LlmClient, LlmError};

/// Reply emitted when the question-generating LLM call fails. The interview
/// state is not advanced in that case.
pub const WIZARD_LLM_FAILURE_REPLY: &str = "Sorry, I couldn't process that — please repeat.";

const CLOSING_REPLY: &str = "Thank you! I have everything I need.";

const QUESTION_MAX_TOKENS: u32 = 192;

#[derive(Clone, Debug, PartialEq)]
pub struct WizardTurn {
    pub reply: String,
    pub collected: BTreeMap<String, String>,
    pub remaining_fields: Vec<String>,
    pub complete: bool,
}

#[derive(Debug, Error)]
pub enum WizardError {
    #[error("interview `{0}` was not found")]
    InterviewNotFound(String),
    #[error("interview state could not be persisted: {0}")]
    Persistence(#[from] RepositoryError),
}

pub struct WizardCollector {
    interviews: Arc<dyn InterviewRepository>,
    llm: Arc<dyn LlmClient>,
    model: String,
    persona: String,
}

impl WizardCollector {
    pub fn new(
        interviews: Arc<dyn InterviewRepository>,
        llm: Arc<dyn LlmClient>,
        model: impl Into<String>,
        persona: impl Into<String>,
    ) -> Self {
        Self { interviews, llm, model: model.into(), persona: persona.into() }
    }

    /// Apply one user turn to the interview. Validation failures re-ask the
    /// same field; an LLM failure replies with a fixed sentinel and leaves
    /// the stored state untouched, so an abandoned or interrupted session
    /// resumes exactly where it stopped.
    pub async fn handle_turn(
        &self,
        interview_id: &InterviewId,
        text: &str,
    ) -> Result<WizardTurn, WizardError> {
        let stored = self
            .interviews
            .find(interview_id)
            .await?
            .ok_or_else(|| WizardError::InterviewNotFound(interview_id.0.clone()))?;

        if stored.complete {
            return Ok(turn_view(&stored, CLOSING_REPLY.to_string()));
        }

        // Transition on a scratch copy; the store is only written once the
        // reply is known, so a failed question leaves no half-applied state.
        let mut interview = stored;

        let reply = if !interview.greeted {
            interview.greeted = true;
            match interview.current_field() {
                Some(descriptor) => match self.ask(&interview, descriptor).await {
                    Ok(question) => question,
                    Err(error) => return Ok(self.llm_failure_turn(&interview, error)),
                },
                None => {
                    interview.complete = true;
                    CLOSING_REPLY.to_string()
                }
            }
        } else {
            match interview.accept_answer(text) {
                AnswerOutcome::Complete => CLOSING_REPLY.to_string(),
                AnswerOutcome::Accepted { .. } => match interview.current_field() {
                    Some(descriptor) => {
                        let descriptor = descriptor.clone();
                        match self.ask(&interview, &descriptor).await {
                            Ok(question) => question,
                            Err(error) => return Ok(self.llm_failure_turn(&interview, error)),
                        }
                    }
                    None => CLOSING_REPLY.to_string(),
                },
                AnswerOutcome::Rejected { reason, .. } => {
                    format!("{reason}. Could you try again?")
                }
            }
        };

        self.interviews.save(interview.clone()).await?;
        Ok(turn_view(&interview, reply))
    }

    async fn ask(
        &self,
        interview: &Interview,
        descriptor: &FieldDescriptor,
    ) -> Result<String, LlmError> {
        let collected = if interview.collected.is_empty() {
            "none yet".to_string()
        } else {
            interview
                .collected
                .iter()
                .map(|(field, value)| format!("{field}: {value}"))
                .collect::<Vec<_>>()
                .join("; ")
        };

        let mut field_note = format!("`{}` ({})", descriptor.label, field_type_hint(descriptor));
        if descriptor.field_type == FieldType::Select && !descriptor.options.is_empty() {
            field_note.push_str(&format!("; options: {}", descriptor.options.join(", ")));
        }

        let request = ChatRequest {
            model: self.model.clone(),
            system_prompt: self.persona.clone(),
            temperature: 0.3,
            max_tokens: QUESTION_MAX_TOKENS,
            history: Vec::new(),
            user_text: format!(
                "You are collecting structured information from the user.\n\
                 Already collected: {collected}.\n\
                 Ask the user, in one short friendly sentence, for {field_note}.\n\
                 Ask only for this field."
            ),
        };
        self.llm.complete(&request).await
    }

    /// The stored interview is untouched: the sentinel turn reflects the
    /// pre-transition state.
    fn llm_failure_turn(&self, interview: &Interview, error: LlmError) -> WizardTurn {
        warn!(
            event_name = "wizard.question_failed",
            interview_id = %interview.id.0,
            error = %error,
            "wizard question generation failed; replying with sentinel"
        );
        WizardTurn {
            reply: WIZARD_LLM_FAILURE_REPLY.to_string(),
            collected: interview.collected.clone(),
            remaining_fields: remaining_names(interview),
            complete: interview.complete,
        }
    }
}

fn turn_view(interview: &Interview, reply: String) -> WizardTurn {
    WizardTurn {
        reply,
        collected: interview.collected.clone(),
        remaining_fields: remaining_names(interview),
        complete: interview.complete,
    }
}

fn remaining_names(interview: &Interview) -> Vec<String> {
    interview.remaining.iter().map(|descriptor| descriptor.name.clone()).collect()
}

fn field_type_hint(descriptor: &FieldDescriptor) -> &'static str {
    match descriptor.field_type {
        FieldType::Text => "free text",
        FieldType::Textarea => "a longer text answer",
        FieldType::Email => "an email address",
        FieldType::Phone => "a phone number",
        FieldType::Number => "a number",
        FieldType::Select => "one of the listed options",
        FieldType::Date => "a date in YYYY-MM-DD format",
    }
}
