//! Action buttons that can be attached to outbound chat messages
//!
//! An action gives users a one-click shortcut for sending a message the bot
//! reacts to, optionally after filling in a small survey whose answers are
//! interpolated into the message (e.g. `"!seed ${preset}"`).

use serde_json::{json, Map, Value};

/// A button or link attached to a chat message
#[derive(Debug, Clone, PartialEq)]
pub enum MessageAction {
    Button(Action),
    Link(ActionLink),
}

impl MessageAction {
    pub fn label(&self) -> &str {
        match self {
            MessageAction::Button(action) => &action.label,
            MessageAction::Link(link) => &link.label,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            MessageAction::Button(action) => action.to_value(),
            MessageAction::Link(link) => link.to_value(),
        }
    }
}

/// An action button that makes the user send `message`
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub label: String,
    pub message: String,
    pub submit: Option<String>,
    pub survey: Option<Survey>,
    pub help_text: Option<String>,
}

impl Action {
    pub fn new(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            message: message.into(),
            submit: None,
            survey: None,
            help_text: None,
        }
    }

    /// Text of the submit button when a survey is shown
    pub fn submit(mut self, submit: impl Into<String>) -> Self {
        self.submit = Some(submit.into());
        self
    }

    pub fn survey(mut self, survey: Survey) -> Self {
        self.survey = Some(survey);
        self
    }

    pub fn help(mut self, help_text: impl Into<String>) -> Self {
        self.help_text = Some(help_text.into());
        self
    }

    fn to_value(&self) -> Value {
        let mut data = Map::new();
        data.insert("message".to_string(), json!(self.message));
        if let Some(submit) = &self.submit {
            data.insert("submit".to_string(), json!(submit));
        }
        if let Some(survey) = &self.survey {
            data.insert("survey".to_string(), survey.to_value());
        }
        if let Some(help) = &self.help_text {
            data.insert("help".to_string(), json!(help));
        }
        Value::Object(data)
    }
}

impl From<Action> for MessageAction {
    fn from(action: Action) -> Self {
        MessageAction::Button(action)
    }
}

/// A button that opens a URL; links cannot carry surveys
#[derive(Debug, Clone, PartialEq)]
pub struct ActionLink {
    pub label: String,
    pub url: String,
    pub help_text: Option<String>,
}

impl ActionLink {
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
            help_text: None,
        }
    }

    pub fn help(mut self, help_text: impl Into<String>) -> Self {
        self.help_text = Some(help_text.into());
        self
    }

    fn to_value(&self) -> Value {
        let mut data = Map::new();
        data.insert("url".to_string(), json!(self.url));
        if let Some(help) = &self.help_text {
            data.insert("help".to_string(), json!(help));
        }
        Value::Object(data)
    }
}

impl From<ActionLink> for MessageAction {
    fn from(link: ActionLink) -> Self {
        MessageAction::Link(link)
    }
}

/// Ordered list of questions shown before an action is sent
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Survey {
    pub questions: Vec<Question>,
}

impl Survey {
    pub fn new(questions: Vec<Question>) -> Self {
        Self { questions }
    }

    fn to_value(&self) -> Value {
        Value::Array(self.questions.iter().map(Question::to_value).collect())
    }
}

/// Input widget of a survey question
#[derive(Debug, Clone, PartialEq)]
pub enum QuestionKind {
    /// Free-text field
    Input { placeholder: Option<String> },
    /// Checkbox
    Bool,
    /// `(value, label)` pairs shown as radio buttons
    Radio { options: Vec<(String, String)> },
    /// `(value, label)` pairs shown as a drop-down
    Select { options: Vec<(String, String)> },
}

/// A single survey question
#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    /// Identifies the answer when interpolating into the message
    pub name: String,
    pub label: String,
    pub kind: QuestionKind,
    /// For radio and select questions this must be an option value
    pub default: Option<String>,
    pub help_text: Option<String>,
}

impl Question {
    fn with_kind(name: impl Into<String>, label: impl Into<String>, kind: QuestionKind) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            kind,
            default: None,
            help_text: None,
        }
    }

    pub fn text(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self::with_kind(name, label, QuestionKind::Input { placeholder: None })
    }

    pub fn boolean(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self::with_kind(name, label, QuestionKind::Bool)
    }

    pub fn radio(
        name: impl Into<String>,
        label: impl Into<String>,
        options: Vec<(String, String)>,
    ) -> Self {
        Self::with_kind(name, label, QuestionKind::Radio { options })
    }

    pub fn select(
        name: impl Into<String>,
        label: impl Into<String>,
        options: Vec<(String, String)>,
    ) -> Self {
        Self::with_kind(name, label, QuestionKind::Select { options })
    }

    /// Placeholder text; only meaningful for text inputs
    pub fn placeholder(mut self, placeholder: impl Into<String>) -> Self {
        if let QuestionKind::Input { placeholder: slot } = &mut self.kind {
            *slot = Some(placeholder.into());
        }
        self
    }

    pub fn default_value(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn help(mut self, help_text: impl Into<String>) -> Self {
        self.help_text = Some(help_text.into());
        self
    }

    fn to_value(&self) -> Value {
        let mut data = Map::new();
        data.insert("name".to_string(), json!(self.name));
        data.insert("label".to_string(), json!(self.label));

        match &self.kind {
            QuestionKind::Input { placeholder } => {
                data.insert("type".to_string(), json!("input"));
                data.insert("placeholder".to_string(), json!(placeholder));
            }
            QuestionKind::Bool => {
                data.insert("type".to_string(), json!("bool"));
            }
            QuestionKind::Radio { options } => {
                data.insert("type".to_string(), json!("radio"));
                data.insert("options".to_string(), options_value(options));
            }
            QuestionKind::Select { options } => {
                data.insert("type".to_string(), json!("select"));
                data.insert("options".to_string(), options_value(options));
            }
        }

        if let Some(default) = &self.default {
            data.insert("default".to_string(), json!(default));
        }
        if let Some(help) = &self.help_text {
            data.insert("help".to_string(), json!(help));
        }
        Value::Object(data)
    }
}

fn options_value(options: &[(String, String)]) -> Value {
    let map: Map<String, Value> = options
        .iter()
        .map(|(value, label)| (value.clone(), json!(label)))
        .collect();
    Value::Object(map)
}

/// Render a list of actions as the `{label: data}` object the server expects
pub fn actions_value(actions: &[MessageAction]) -> Value {
    let map: Map<String, Value> = actions
        .iter()
        .map(|action| (action.label().to_string(), action.to_value()))
        .collect();
    Value::Object(map)
}
