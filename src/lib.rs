use std::fmt;

use serde::{Deserialize, Serialize};

pub mod config;
pub mod credentials;
pub mod error;
pub mod extract;
pub mod llm;
pub mod notify;
pub mod resolve;
pub mod runner;

pub use error::{Result, SolverError};

/// An image referenced by a question
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Image {
	/// The URL of the image
	pub url: String,
	/// Alt text if available
	pub alt: Option<String>,
}

/// A question extracted from the live page
///
/// Produced fresh each cycle; `detected` is false when no element on the page
/// passed the question-text heuristics.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Question {
	/// The question text/prompt
	pub text: String,
	/// Images in the question, in document order
	#[serde(default)]
	pub images: Vec<Image>,
	/// Whether any qualifying question text was found
	pub detected: bool,
}

impl Question {
	/// The "nothing found this cycle" value
	pub fn undetected() -> Self {
		Question {
			text: String::new(),
			images: Vec::new(),
			detected: false,
		}
	}
}

/// Opaque reference to a clickable answer control, minted at extraction time
///
/// Wraps the selector of a marker attribute planted on the live element, so
/// the resolver activates exactly the element the extractor saw without
/// re-querying the document by content.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OptionHandle(String);

impl OptionHandle {
	pub fn new(selector: impl Into<String>) -> Self {
		OptionHandle(selector.into())
	}

	pub fn selector(&self) -> &str {
		&self.0
	}
}

/// Opaque reference to a selection (dropdown) control, minted at extraction time
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SelectHandle(String);

impl SelectHandle {
	pub fn new(selector: impl Into<String>) -> Self {
		SelectHandle(selector.into())
	}

	pub fn selector(&self) -> &str {
		&self.0
	}
}

/// One candidate answer discovered on the page
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum AnswerOption {
	/// A lettered choice ("A) ...") bound to a clickable control
	Labeled {
		/// The leading letter, 'A'..='E'
		letter: char,
		/// Full display text, including the letter prefix
		text: String,
		handle: OptionHandle,
	},
	/// One option of a dropdown control
	///
	/// `value` is the control value this option's text maps to; it is resolved
	/// from the control's candidate values at extraction time.
	Dropdown { text: String, handle: SelectHandle, value: String },
	/// Discovered by text pattern matching only; reported but never actionable
	Unbound { text: String },
}

impl AnswerOption {
	/// Display text of this option, as shown to the inference backend
	pub fn text(&self) -> &str {
		match self {
			AnswerOption::Labeled { text, .. } | AnswerOption::Dropdown { text, .. } | AnswerOption::Unbound { text } => text,
		}
	}

	/// Whether the resolver can drive a control for this option
	pub fn is_actionable(&self) -> bool {
		!matches!(self, AnswerOption::Unbound { .. })
	}
}

/// The candidate answers for one question, in document traversal order
///
/// Label-derived entries come before dropdown-derived ones, matching the
/// extraction tier order; the resolver evaluates them in this order.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct AnswerSet {
	pub options: Vec<AnswerOption>,
}

impl AnswerSet {
	pub fn is_empty(&self) -> bool {
		self.options.is_empty()
	}

	pub fn len(&self) -> usize {
		self.options.len()
	}

	/// True if at least one option can actually be activated
	pub fn has_actionable(&self) -> bool {
		self.options.iter().any(AnswerOption::is_actionable)
	}
}

impl fmt::Display for AnswerSet {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for option in &self.options {
			match option {
				AnswerOption::Labeled { text, .. } => writeln!(f, "( ) {}", text)?,
				AnswerOption::Dropdown { text, .. } => writeln!(f, "[v] {}", text)?,
				AnswerOption::Unbound { text } => writeln!(f, "    {} (not actionable)", text)?,
			}
		}
		Ok(())
	}
}

impl fmt::Display for Question {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if !self.detected {
			return write!(f, "(no question detected)");
		}
		write!(f, "{}", self.text)?;
		if !self.images.is_empty() {
			write!(f, " [{} image(s)]", self.images.len())?;
		}
		Ok(())
	}
}
