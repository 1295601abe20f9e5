//! Reply resolution and control actuation
//!
//! Maps the backend's free-text reply onto one of the extracted options and
//! drives its control, then the page's confirmation control. Matching is
//! deliberately permissive for lettered choices (the backend may answer "A",
//! "A)" or "Option A") and strict for dropdown texts, where a substring match
//! could pick the wrong entry.

use std::time::Duration;

use chromiumoxide::Page;

use crate::{
	AnswerOption, AnswerSet,
	error::{Result, SolverError},
};

/// Uppercase the reply and strip everything that is not alphanumeric
pub fn normalize_letters(reply: &str) -> String {
	reply.to_uppercase().chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// Whether a reply designates the given option
pub fn matches_option(reply: &str, option: &AnswerOption) -> bool {
	match option {
		AnswerOption::Labeled { letter, .. } => normalize_letters(reply).contains(*letter),
		AnswerOption::Dropdown { text, .. } => reply.trim().to_lowercase() == text.trim().to_lowercase(),
		AnswerOption::Unbound { .. } => false,
	}
}

/// First option the reply resolves to, in answer-set order
pub fn find_match<'a>(reply: &str, answers: &'a AnswerSet) -> Option<&'a AnswerOption> {
	answers.options.iter().find(|option| matches_option(reply, option))
}

/// Drives answer and confirmation controls on the live page
pub struct Actuator {
	settle_delay: Duration,
	confirm_delay: Duration,
}

impl Actuator {
	pub fn new(settle_delay: Duration, confirm_delay: Duration) -> Self {
		Actuator { settle_delay, confirm_delay }
	}

	/// Activate the control for whichever option the reply resolves to
	///
	/// Returns false when no option matches or the bound control has vanished
	/// from the page; the resolver never guesses. A fixed settling delay
	/// follows every activation so the page can react before the loop reads
	/// its state again.
	pub async fn select(&self, page: &Page, reply: &str, answers: &AnswerSet) -> Result<bool> {
		let Some(option) = find_match(reply, answers) else {
			tracing::warn!("reply {:?} matched none of the {} extracted option(s)", reply, answers.len());
			return Ok(false);
		};

		let activated = match option {
			AnswerOption::Labeled { handle, text, .. } => {
				let clicked = click_handle(page, handle.selector()).await?;
				if clicked {
					tracing::debug!("activated choice {:?}", text);
				}
				clicked
			}
			AnswerOption::Dropdown { handle, value, text } => {
				let set = set_select_value(page, handle.selector(), value).await?;
				if set {
					tracing::debug!("selected dropdown option {:?}", text);
				}
				set
			}
			AnswerOption::Unbound { .. } => false,
		};

		if !activated {
			tracing::warn!("control bound to reply {:?} is no longer on the page", reply);
			return Ok(false);
		}

		tokio::time::sleep(self.settle_delay).await;
		Ok(true)
	}

	/// Find and activate a confirmation control
	///
	/// Absence is not fatal to the cycle: some pages auto-advance after a
	/// selection and simply have no confirm step.
	pub async fn confirm(&self, page: &Page) -> Result<bool> {
		let script = r#"
			(function() {
				function isConfirmText(text) {
					const t = text.toLowerCase();
					return t.includes('confirmar') || t.includes('confirm') || t.includes('próxima') || t.includes('proxima') ||
						t.includes('next') || t.includes('enviar') || t.includes('submit') || t.includes('avançar');
				}
				const candidates = document.querySelectorAll('button, input[type="submit"], a.btn, [role="button"]');
				for (const el of candidates) {
					const text = (el.textContent || el.value || '').trim();
					if (text ? isConfirmText(text) : el.type === 'submit') {
						el.click();
						return true;
					}
				}
				return false;
			})()
		"#;

		let result = page.evaluate(script).await.map_err(|e| SolverError::Page(format!("confirmation scan failed: {e}")))?;
		let clicked = result.value().and_then(|v| v.as_bool()) == Some(true);
		if clicked {
			tokio::time::sleep(self.confirm_delay).await;
		}
		Ok(clicked)
	}
}

/// Simulate a click on the control behind an extraction-time handle
async fn click_handle(page: &Page, selector: &str) -> Result<bool> {
	let script = format!(
		r#"
		(function() {{
			const el = document.querySelector('{}');
			if (el) {{ el.click(); return true; }}
			return false;
		}})()
		"#,
		selector
	);

	let result = page.evaluate(script).await.map_err(|e| SolverError::Page(format!("click failed: {e}")))?;
	Ok(result.value().and_then(|v| v.as_bool()) == Some(true))
}

/// Set a dropdown's value and dispatch a synthetic change event
///
/// Value mutation alone does not reliably trigger the page logic hanging off
/// the control, so the change notification is mandatory.
async fn set_select_value(page: &Page, selector: &str, value: &str) -> Result<bool> {
	let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
	let script = format!(
		r#"
		(function() {{
			const select = document.querySelector('{}');
			if (!select) return false;
			select.value = "{}";
			select.dispatchEvent(new Event('change', {{ bubbles: true }}));
			return true;
		}})()
		"#,
		selector, escaped
	);

	let result = page.evaluate(script).await.map_err(|e| SolverError::Page(format!("dropdown update failed: {e}")))?;
	Ok(result.value().and_then(|v| v.as_bool()) == Some(true))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{OptionHandle, SelectHandle};

	fn labeled(letter: char, text: &str) -> AnswerOption {
		AnswerOption::Labeled {
			letter,
			text: text.to_string(),
			handle: OptionHandle::new(format!("[data-sala-opt=\"{}\"]", letter)),
		}
	}

	fn dropdown(text: &str, value: &str) -> AnswerOption {
		AnswerOption::Dropdown {
			text: text.to_string(),
			handle: SelectHandle::new("[data-sala-sel=\"0\"]"),
			value: value.to_string(),
		}
	}

	#[test]
	fn normalization_strips_punctuation_and_uppercases() {
		assert_eq!(normalize_letters("a)."), "A");
		assert_eq!(normalize_letters(" B "), "B");
		assert_eq!(normalize_letters("Option C"), "OPTIONC");
	}

	#[test]
	fn letter_matching_is_permissive() {
		let option = labeled('A', "A) 1");
		assert!(matches_option("A", &option));
		assert!(matches_option("A)", &option));
		assert!(matches_option("a", &option));
		assert!(matches_option("Resposta: A", &option));
		assert!(!matches_option("B", &option));
	}

	#[test]
	fn sole_letter_reply_picks_exactly_one_labeled_option() {
		let answers = AnswerSet {
			options: vec![labeled('A', "A) 1"), labeled('B', "B) 2"), labeled('C', "C) 3")],
		};
		let matched = find_match("B", &answers).expect("should match");
		assert!(matches!(matched, AnswerOption::Labeled { letter: 'B', .. }));
		// no other option matches the same normalized reply
		let matching: Vec<_> = answers.options.iter().filter(|o| matches_option("B", o)).collect();
		assert_eq!(matching.len(), 1);
	}

	#[test]
	fn dropdown_matching_requires_exact_text() {
		let option = dropdown("Roma", "3");
		assert!(matches_option("Roma", &option));
		assert!(matches_option("roma", &option));
		assert!(matches_option("  Roma  ", &option));
		assert!(!matches_option("Rom", &option));
		assert!(!matches_option("Roma antiga", &option));
	}

	#[test]
	fn dropdown_reply_never_touches_labeled_logic() {
		let answers = AnswerSet {
			options: vec![dropdown("Paris", "1"), dropdown("Londres", "2"), dropdown("Roma", "3")],
		};
		let matched = find_match("Roma", &answers).expect("should match");
		match matched {
			AnswerOption::Dropdown { value, .. } => assert_eq!(value, "3"),
			other => panic!("unexpected match: {other:?}"),
		}
	}

	#[test]
	fn unbound_options_never_match() {
		let answers = AnswerSet {
			options: vec![AnswerOption::Unbound { text: "A) 1".to_string() }],
		};
		assert!(find_match("A", &answers).is_none());
	}

	#[test]
	fn first_match_wins_in_set_order() {
		let answers = AnswerSet {
			options: vec![labeled('A', "A) alfa"), dropdown("a", "1")],
		};
		let matched = find_match("A", &answers).expect("should match");
		assert!(matches!(matched, AnswerOption::Labeled { .. }));
	}

	#[test]
	fn no_match_means_no_guess() {
		let answers = AnswerSet {
			options: vec![labeled('A', "A) 1"), labeled('B', "B) 2")],
		};
		assert!(find_match("F", &answers).is_none());
	}
}
