//! Question and answer extraction from the live page
//!
//! The page structure is uncontrolled and varies by question type, so
//! extraction degrades through tiers rather than assuming one schema: lettered
//! labels, then dropdown controls, then a bare text scan as a last resort.
//! Interactive elements are tagged with a marker attribute at extraction time
//! and handles carry the marker selector, so the resolver never has to match
//! page content again.

use chromiumoxide::Page;
use regex::Regex;
use serde::Deserialize;

use crate::{
	AnswerOption, AnswerSet, Image, OptionHandle, Question, SelectHandle,
	error::{Result, SolverError},
};

/// Marker attribute planted on clickable answer controls
const OPT_MARKER: &str = "data-sala-opt";
/// Marker attribute planted on dropdown controls
const SEL_MARKER: &str = "data-sala-sel";

const QUESTION_BODY_JS: &str = r#"
	const cues = ['considerando', 'considering', 'complete', 'preencha', 'fill in', 'assinale', 'sequência', 'sequence'];
	let best = null;
	const nodes = document.querySelectorAll('p, div, span, li, td, h1, h2, h3, h4');
	for (const el of nodes) {
		const text = (el.textContent || '').replace(/\s+/g, ' ').trim();
		if (text.length < MIN) continue;
		const lower = text.toLowerCase();
		if (!text.includes('?') && !cues.some(c => lower.includes(c))) continue;
		best = text;
	}
	const images = [];
	for (const img of document.querySelectorAll('img')) {
		const src = img.src || '';
		if (!src || src.startsWith('data:')) continue;
		images.push({ url: src, alt: img.alt || null });
	}
	return JSON.stringify({ detected: best !== null, text: best || '', images: images });
"#;

#[derive(Debug, Deserialize)]
struct RawQuestion {
	detected: bool,
	text: String,
	#[serde(default)]
	images: Vec<Image>,
}

/// Scan the page for question text and question imagery
///
/// An element qualifies when its trimmed text is at least `min_len` chars and
/// contains a question mark or an instructional cue word. The last qualifying
/// element in document order wins, favoring content closer to the controls.
/// Inline-encoded (`data:`) images are skipped; their payload is already in
/// memory-resident form and never needs a fetch.
pub async fn extract_question(page: &Page, min_len: usize) -> Result<Question> {
	let script = format!("(function() {{ const MIN = {}; {} }})()", min_len, QUESTION_BODY_JS);
	let result = page.evaluate(script).await.map_err(|e| SolverError::Page(format!("question scan failed: {e}")))?;
	let json = result
		.value()
		.and_then(|v| v.as_str())
		.ok_or_else(|| SolverError::Page("question scan returned no result".to_string()))?;
	let raw: RawQuestion = serde_json::from_str(json)?;
	if !raw.detected {
		return Ok(Question::undetected());
	}
	Ok(Question {
		text: raw.text,
		images: raw.images,
		detected: true,
	})
}

const ALTERNATIVES_JS: &str = r#"
	(function() {
		const found = [];
		let nextOpt = 0;
		for (const label of document.querySelectorAll('label')) {
			const text = (label.textContent || '').replace(/\s+/g, ' ').trim();
			if (!/^[A-E]\)/.test(text)) continue;
			let control = label.querySelector('input, button');
			if (!control && label.htmlFor) control = document.getElementById(label.htmlFor);
			if (!control) control = label;
			control.setAttribute('data-sala-opt', String(nextOpt));
			found.push({ kind: 'label', text: text, handle: nextOpt });
			nextOpt++;
		}
		let nextSel = 0;
		for (const select of document.querySelectorAll('select')) {
			const options = [];
			for (const opt of select.options) {
				const text = (opt.textContent || '').replace(/\s+/g, ' ').trim();
				if (!text || opt.value === '') continue;
				options.push({ text: text, value: opt.value });
			}
			if (options.length === 0) continue;
			select.setAttribute('data-sala-sel', String(nextSel));
			found.push({ kind: 'select', handle: nextSel, options: options });
			nextSel++;
		}
		return JSON.stringify(found);
	})()
"#;

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum RawSource {
	Label { text: String, handle: u32 },
	Select { handle: u32, options: Vec<RawSelectOption> },
}

#[derive(Debug, Deserialize)]
struct RawSelectOption {
	text: String,
	value: String,
}

/// Collect the candidate answers for the current question
///
/// Tier 1 (lettered labels) and tier 2 (dropdown options) accumulate, labels
/// first. Tier 3 — a bare text scan of the whole document — only runs when
/// both interactive tiers came up empty, and yields options the resolver can
/// report but not activate.
pub async fn extract_alternatives(page: &Page) -> Result<AnswerSet> {
	let result = page.evaluate(ALTERNATIVES_JS).await.map_err(|e| SolverError::Page(format!("alternative scan failed: {e}")))?;
	let json = result.value().and_then(|v| v.as_str()).unwrap_or("[]");
	let sources: Vec<RawSource> = serde_json::from_str(json)?;

	let mut set = AnswerSet::default();
	let mut seen_dropdown_texts: Vec<String> = Vec::new();

	for source in sources {
		match source {
			RawSource::Label { text, handle } => {
				let Some(letter) = leading_letter(&text) else { continue };
				set.options.push(AnswerOption::Labeled {
					letter,
					text,
					handle: OptionHandle::new(format!("[{}=\"{}\"]", OPT_MARKER, handle)),
				});
			}
			RawSource::Select { handle, options } => {
				let selector = format!("[{}=\"{}\"]", SEL_MARKER, handle);
				for option in options {
					// duplicate option texts across dropdown controls are suppressed
					let key = option.text.to_lowercase();
					if seen_dropdown_texts.contains(&key) {
						continue;
					}
					seen_dropdown_texts.push(key);
					set.options.push(AnswerOption::Dropdown {
						text: option.text,
						handle: SelectHandle::new(selector.clone()),
						value: option.value,
					});
				}
			}
		}
	}

	if set.is_empty() {
		let body = page
			.evaluate("document.body ? document.body.innerText : ''")
			.await
			.map_err(|e| SolverError::Page(format!("body text scan failed: {e}")))?;
		let text = body.value().and_then(|v| v.as_str()).unwrap_or("").to_string();
		for found in scan_unbound(&text) {
			set.options.push(AnswerOption::Unbound { text: found });
		}
	}

	Ok(set)
}

/// The leading letter of a "X) ..." display text, if it has one
pub(crate) fn leading_letter(text: &str) -> Option<char> {
	let mut chars = text.chars();
	let letter = chars.next()?;
	if !('A'..='E').contains(&letter) {
		return None;
	}
	if chars.next()? != ')' {
		return None;
	}
	Some(letter)
}

/// Last-resort scan for "X) ..." patterns in raw document text
pub(crate) fn scan_unbound(body: &str) -> Vec<String> {
	let re = Regex::new(r"[A-E]\)\s*[^\n\r]+").expect("static pattern");
	re.find_iter(body).map(|m| m.as_str().trim().to_string()).collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn leading_letter_accepts_the_five_letters() {
		assert_eq!(leading_letter("A) first"), Some('A'));
		assert_eq!(leading_letter("E) last"), Some('E'));
	}

	#[test]
	fn leading_letter_rejects_other_shapes() {
		assert_eq!(leading_letter("F) out of range"), None);
		assert_eq!(leading_letter("a) lowercase"), None);
		assert_eq!(leading_letter("A. dot separator"), None);
		assert_eq!(leading_letter("just text"), None);
		assert_eq!(leading_letter(""), None);
	}

	#[test]
	fn scan_unbound_finds_lettered_lines() {
		let body = "Qual o valor de x?\nA) 1\nB) 2\nC) 3\nrodapé";
		let found = scan_unbound(body);
		assert_eq!(found, vec!["A) 1", "B) 2", "C) 3"]);
	}

	#[test]
	fn scan_unbound_stops_at_line_breaks() {
		let found = scan_unbound("A) primeira linha\r\nsegunda linha");
		assert_eq!(found, vec!["A) primeira linha"]);
	}

	#[test]
	fn scan_unbound_on_plain_text_is_empty() {
		assert!(scan_unbound("nenhuma alternativa aqui").is_empty());
	}
}
