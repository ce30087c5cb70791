use std::fmt;
use std::str::FromStr;

use teloxide::types::InlineKeyboardButton;
use teloxide::types::InlineKeyboardMarkup;
use thiserror::Error;

use crate::bot::state::Category;
use crate::bot::state::Feature;
use crate::bot::state::Gender;

pub const GREETING_TEXT: &str = "How can I help you?";
pub const QUESTION_PROMPT_TEXT: &str = "We are waiting for your Questions\n\n\t/stop - Stop the bot.";
pub const ACTION_MENU_TEXT: &str = "Got it! Please select your Choice.";
pub const START_MENU_TEXT: &str = "👋 Hi! I turn your text or voice questions into transcripts and summaries.\n\n\
   /question - Ask a question\n/stop - Stop the current conversation\n/help - Show the help text";

/// Callback payloads carried by inline buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
  AddingMember,
  AddingSelf,
  ShowData,
  ShowTranscription,
  ShowTranscriptionSummary,
  ShowTranscriptionExecution,
  ShowTranscriptionGiveCommand,
  End,
  Parents,
  Children,
  Male,
  Female,
  Name,
  Age,
}

impl Button {
  #[cfg(test)]
  pub const ALL: [Button; 14] = [
    Button::AddingMember,
    Button::AddingSelf,
    Button::ShowData,
    Button::ShowTranscription,
    Button::ShowTranscriptionSummary,
    Button::ShowTranscriptionExecution,
    Button::ShowTranscriptionGiveCommand,
    Button::End,
    Button::Parents,
    Button::Children,
    Button::Male,
    Button::Female,
    Button::Name,
    Button::Age,
  ];

  pub fn payload(self) -> &'static str {
    match self {
      Self::AddingMember => "top:member",
      Self::AddingSelf => "top:self",
      Self::ShowData => "show:data",
      Self::ShowTranscription => "show:transcription",
      Self::ShowTranscriptionSummary => "show:summary",
      Self::ShowTranscriptionExecution => "show:execution",
      Self::ShowTranscriptionGiveCommand => "show:command",
      Self::End => "nav:end",
      Self::Parents => "level:parents",
      Self::Children => "level:children",
      Self::Male => "gender:male",
      Self::Female => "gender:female",
      Self::Name => "feature:name",
      Self::Age => "feature:age",
    }
  }

  pub fn category(self) -> Option<Category> {
    match self {
      Self::Parents => Some(Category::Parents),
      Self::Children => Some(Category::Children),
      _ => None,
    }
  }

  pub fn gender(self) -> Option<Gender> {
    match self {
      Self::Male => Some(Gender::Male),
      Self::Female => Some(Gender::Female),
      _ => None,
    }
  }

  pub fn feature(self) -> Option<Feature> {
    match self {
      Self::Name => Some(Feature::Name),
      Self::Age => Some(Feature::Age),
      _ => None,
    }
  }
}

impl fmt::Display for Button {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.payload())
  }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown button payload {0:?}")]
pub struct UnknownButton(pub String);

impl FromStr for Button {
  type Err = UnknownButton;

  fn from_str(raw: &str) -> Result<Self, Self::Err> {
    let unknown = || UnknownButton(raw.to_string());
    let (prefix, value) = raw.split_once(':').ok_or_else(unknown)?;
    let button = match (prefix, value) {
      ("top", "member") => Self::AddingMember,
      ("top", "self") => Self::AddingSelf,
      ("show", "data") => Self::ShowData,
      ("show", "transcription") => Self::ShowTranscription,
      ("show", "summary") => Self::ShowTranscriptionSummary,
      ("show", "execution") => Self::ShowTranscriptionExecution,
      ("show", "command") => Self::ShowTranscriptionGiveCommand,
      ("nav", "end") => Self::End,
      ("level", "parents") => Self::Parents,
      ("level", "children") => Self::Children,
      ("gender", "male") => Self::Male,
      ("gender", "female") => Self::Female,
      ("feature", "name") => Self::Name,
      ("feature", "age") => Self::Age,
      _ => return Err(unknown()),
    };
    Ok(button)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuOption {
  pub label: String,
  pub button: Button,
}

impl MenuOption {
  fn new(label: impl Into<String>, button: Button) -> Self {
    Self {
      label: label.into(),
      button,
    }
  }
}

/// Prompt text plus rows of buttons, rendered as an inline keyboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Menu {
  pub prompt: String,
  pub rows: Vec<Vec<MenuOption>>,
}

impl Menu {
  pub fn new(prompt: impl Into<String>, rows: Vec<Vec<MenuOption>>) -> Self {
    Self {
      prompt: prompt.into(),
      rows,
    }
  }

  #[cfg(test)]
  pub fn buttons(&self) -> impl Iterator<Item = Button> + '_ {
    self.rows.iter().flatten().map(|option| option.button)
  }

  pub fn keyboard(&self) -> InlineKeyboardMarkup {
    let rows = self
      .rows
      .iter()
      .map(|row| {
        row
          .iter()
          .map(|option| InlineKeyboardButton::callback(option.label.clone(), option.button.payload().to_string()))
          .collect::<Vec<_>>()
      })
      .collect::<Vec<_>>();
    InlineKeyboardMarkup::new(rows)
  }
}

/// Menu shown once a question is recorded, and whenever the user returns to it.
pub fn action_menu() -> Menu {
  Menu::new(
    ACTION_MENU_TEXT,
    vec![
      vec![
        MenuOption::new("Transcription", Button::ShowTranscription),
        MenuOption::new("Forward Message", Button::ShowTranscriptionSummary),
      ],
      vec![MenuOption::new("Transcription + summary", Button::ShowTranscriptionSummary)],
      vec![MenuOption::new("Transcription + execution", Button::ShowTranscriptionExecution)],
      vec![MenuOption::new(
        "Transcription + give command",
        Button::ShowTranscriptionGiveCommand,
      )],
      vec![
        MenuOption::new("Add family member", Button::AddingMember),
        MenuOption::new("Add yourself", Button::AddingSelf),
      ],
      vec![MenuOption::new("Show data", Button::ShowData)],
      vec![MenuOption::new("END", Button::End)],
    ],
  )
}

pub fn adding_self_menu() -> Menu {
  Menu::new(
    "Okay, please tell me about yourself.",
    vec![vec![MenuOption::new("Add info", Button::Male)]],
  )
}

pub fn level_menu() -> Menu {
  Menu::new(
    "You may add a parent or a child. Also you can show the gathered data or go back.",
    vec![
      vec![
        MenuOption::new("Add parent", Button::Parents),
        MenuOption::new("Add child", Button::Children),
      ],
      vec![
        MenuOption::new("Show data", Button::ShowData),
        MenuOption::new("Back", Button::End),
      ],
    ],
  )
}

pub fn gender_menu(category: Category) -> Menu {
  let (male, female) = category.labels();
  Menu::new(
    "Please choose, whom to add.",
    vec![
      vec![
        MenuOption::new(format!("Add {male}"), Button::Male),
        MenuOption::new(format!("Add {female}"), Button::Female),
      ],
      vec![
        MenuOption::new("Show data", Button::ShowData),
        MenuOption::new("Back", Button::End),
      ],
    ],
  )
}

pub fn feature_menu(after_input: bool) -> Menu {
  let prompt = if after_input {
    "Got it! Please select a feature to update."
  } else {
    "Please select a feature to update."
  };
  Menu::new(
    prompt,
    vec![vec![
      MenuOption::new("Name", Button::Name),
      MenuOption::new("Age", Button::Age),
      MenuOption::new("Done", Button::End),
    ]],
  )
}

/// A read-only view with a single way back.
pub fn back_menu(text: impl Into<String>) -> Menu {
  Menu::new(text, vec![vec![MenuOption::new("Back", Button::End)]])
}
