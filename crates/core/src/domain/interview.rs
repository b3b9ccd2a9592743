use std::collections::{BTreeMap, VecDeque};
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterviewId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WizardId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Email,
    Phone,
    Number,
    Select,
    Textarea,
    Date,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub label: String,
    pub field_type: FieldType,
    pub required: bool,
    /// Only meaningful for `Select` fields.
    #[serde(default)]
    pub options: Vec<String>,
}

/// A field as declared on the wizard configuration. Disabled fields are
/// omitted from the interview entirely.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WizardFieldSpec {
    pub enabled: bool,
    #[serde(flatten)]
    pub descriptor: FieldDescriptor,
}

/// The declared schema of a data-collection wizard: step-3 standard fields
/// first, then custom fields, each in declaration order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WizardConfig {
    #[serde(default)]
    pub standard_fields: Vec<WizardFieldSpec>,
    #[serde(default)]
    pub custom_fields: Vec<WizardFieldSpec>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// The answer validated; the value is now in `collected`.
    Accepted { field: String, value: String },
    /// The answer failed validation; the field stays at the head of
    /// `remaining` and must be re-asked.
    Rejected { field: String, reason: String },
    /// Nothing left to collect.
    Complete,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Interview {
    pub id: InterviewId,
    pub wizard_id: WizardId,
    pub collected: BTreeMap<String, String>,
    pub remaining: VecDeque<FieldDescriptor>,
    /// Whether the collector has asked its first question. An incoming turn
    /// is only treated as an answer once a question is outstanding.
    #[serde(default)]
    pub greeted: bool,
    pub complete: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Interview {
    pub fn from_wizard(id: InterviewId, wizard_id: WizardId, wizard: &WizardConfig) -> Self {
        let remaining = wizard
            .standard_fields
            .iter()
            .chain(wizard.custom_fields.iter())
            .filter(|field| field.enabled)
            .map(|field| field.descriptor.clone())
            .collect();

        Self {
            id,
            wizard_id,
            collected: BTreeMap::new(),
            remaining,
            greeted: false,
            complete: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// The field the interview is currently waiting on.
    pub fn current_field(&self) -> Option<&FieldDescriptor> {
        self.remaining.front()
    }

    /// Apply one user answer to the head field. Rejected answers do not
    /// advance state; `remaining` shrinks by at most one per call.
    pub fn accept_answer(&mut self, text: &str) -> AnswerOutcome {
        let Some(descriptor) = self.remaining.pop_front() else {
            self.complete = true;
            return AnswerOutcome::Complete;
        };

        match extract_value(&descriptor, text) {
            Ok(value) => {
                self.collected.insert(descriptor.name.clone(), value.clone());
                if self.remaining.is_empty() {
                    // Every field, required ones included, was collected in
                    // order, so completion is safe here.
                    self.complete = true;
                }
                self.updated_at = Utc::now();
                AnswerOutcome::Accepted { field: descriptor.name, value }
            }
            Err(reason) => {
                let field = descriptor.name.clone();
                self.remaining.push_front(descriptor);
                AnswerOutcome::Rejected { field, reason }
            }
        }
    }

    /// Required-field invariant: `complete` implies every required field has
    /// a collected value.
    pub fn required_fields_satisfied(&self) -> bool {
        !self.complete
            || self
                .remaining
                .iter()
                .filter(|descriptor| descriptor.required)
                .all(|descriptor| self.collected.contains_key(&descriptor.name))
    }
}

fn extract_value(descriptor: &FieldDescriptor, text: &str) -> Result<String, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(format!("{} cannot be empty", descriptor.label));
    }

    match descriptor.field_type {
        FieldType::Text | FieldType::Textarea => Ok(trimmed.to_string()),
        FieldType::Email => {
            if email_pattern().is_match(trimmed) {
                Ok(trimmed.to_ascii_lowercase())
            } else {
                Err(format!("{} must be a valid email address", descriptor.label))
            }
        }
        FieldType::Phone => {
            let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
            if (7..=15).contains(&digits.len()) {
                Ok(trimmed.to_string())
            } else {
                Err(format!("{} must be a valid phone number", descriptor.label))
            }
        }
        FieldType::Number => trimmed
            .parse::<f64>()
            .map(|_| trimmed.to_string())
            .map_err(|_| format!("{} must be a number", descriptor.label)),
        FieldType::Date => NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .map(|_| trimmed.to_string())
            .map_err(|_| format!("{} must be a date in YYYY-MM-DD format", descriptor.label)),
        FieldType::Select => descriptor
            .options
            .iter()
            .find(|option| option.eq_ignore_ascii_case(trimmed))
            .cloned()
            .ok_or_else(|| {
                format!("{} must be one of: {}", descriptor.label, descriptor.options.join(", "))
            }),
    }
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap_or_else(|_| unreachable!())
    })
}
