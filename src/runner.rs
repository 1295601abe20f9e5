//! The perception–inference–action control loop
//!
//! One cycle: extract a question, extract its alternatives, query the
//! inference backend, resolve the reply onto a control and confirm. The loop
//! is strictly sequential — never more than one cycle in flight — and yields
//! only at named suspension points: the inter-cycle delay, the inter-attempt
//! retry delay, the actuator's settling delays and the paused park. Pause and
//! stop are cooperative flags observed at those points; an in-flight cycle
//! always runs to completion.

use std::sync::{
	Arc,
	atomic::{AtomicBool, Ordering},
};

use chromiumoxide::Page;
use tokio::sync::watch;

use crate::{
	AnswerSet, Question,
	config::Config,
	error::Result,
	extract,
	llm::GeminiClient,
	notify::{Notify, Severity},
	resolve::Actuator,
};

/// Loop counters and lifecycle
///
/// Mutated only by the control loop; everyone else sees snapshots through the
/// watch subscription.
#[derive(Clone, Debug, Default)]
pub struct LoopState {
	pub running: bool,
	pub questions_answered: u32,
	pub consecutive_errors: u32,
}

#[derive(Default)]
struct Flags {
	paused: AtomicBool,
	stopped: AtomicBool,
}

/// Cooperative control surface over a running loop
///
/// Cloneable; hand one to a signal handler or UI. Flags take effect at the
/// loop's next suspension point, never mid-cycle.
#[derive(Clone, Default)]
pub struct LoopHandle {
	inner: Arc<Flags>,
}

impl LoopHandle {
	pub fn new() -> Self {
		Self::default()
	}

	/// Pause or resume; returns true when the loop will be running afterwards
	pub fn toggle(&self) -> bool {
		self.inner.paused.fetch_xor(true, Ordering::SeqCst)
	}

	/// Out-of-band termination; terminal, there is no restart
	pub fn stop(&self) {
		self.inner.stopped.store(true, Ordering::SeqCst);
	}

	pub fn is_paused(&self) -> bool {
		self.inner.paused.load(Ordering::SeqCst)
	}

	pub fn is_stopped(&self) -> bool {
		self.inner.stopped.load(Ordering::SeqCst)
	}
}

/// What a single cycle accomplished
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
	/// No qualifying question text on the page; idle, not an error
	NoQuestion,
	/// A question but no alternatives; warned, not an error
	NoAnswers,
	/// Inference attempts exhausted without a usable reply
	NoReply,
	/// The reply matched no extracted option, or its control vanished
	Unresolved,
	/// An answer control was activated
	Answered { reply: String, confirmed: bool },
}

/// The collaborators one cycle is built from
///
/// The loop only sees this seam, so its retry and ceiling behavior is
/// testable against mock collaborators.
#[allow(async_fn_in_trait)]
pub trait CycleOps {
	async fn question(&mut self) -> Result<Question>;
	async fn alternatives(&mut self) -> Result<AnswerSet>;
	async fn infer(&mut self, question: &Question, answers: &AnswerSet) -> Result<Option<String>>;
	async fn select(&mut self, reply: &str, answers: &AnswerSet) -> Result<bool>;
	async fn confirm(&mut self) -> Result<bool>;
}

/// Cycle collaborators bound to a live page
pub struct PageCycle<'a> {
	page: &'a Page,
	client: GeminiClient,
	actuator: Actuator,
	min_question_len: usize,
}

impl<'a> PageCycle<'a> {
	pub fn new(page: &'a Page, client: GeminiClient, config: &Config) -> Self {
		PageCycle {
			page,
			client,
			actuator: Actuator::new(config.settle_delay, config.confirm_delay),
			min_question_len: config.min_question_len,
		}
	}
}

impl CycleOps for PageCycle<'_> {
	async fn question(&mut self) -> Result<Question> {
		extract::extract_question(self.page, self.min_question_len).await
	}

	async fn alternatives(&mut self) -> Result<AnswerSet> {
		extract::extract_alternatives(self.page).await
	}

	async fn infer(&mut self, question: &Question, answers: &AnswerSet) -> Result<Option<String>> {
		self.client.query(self.page, question, answers).await
	}

	async fn select(&mut self, reply: &str, answers: &AnswerSet) -> Result<bool> {
		self.actuator.select(self.page, reply, answers).await
	}

	async fn confirm(&mut self) -> Result<bool> {
		self.actuator.confirm(self.page).await
	}
}

/// The loop state machine: Idle → Running → {Paused ⇄ Running} → Stopped
pub struct ControlLoop {
	config: Config,
	handle: LoopHandle,
	notifier: Box<dyn Notify>,
	state: LoopState,
	state_tx: watch::Sender<LoopState>,
}

impl ControlLoop {
	pub fn new(config: Config, handle: LoopHandle, notifier: Box<dyn Notify>) -> Self {
		let (state_tx, _) = watch::channel(LoopState::default());
		ControlLoop {
			config,
			handle,
			notifier,
			state: LoopState::default(),
			state_tx,
		}
	}

	/// Read-only snapshot subscription for the presentation layer
	pub fn subscribe(&self) -> watch::Receiver<LoopState> {
		self.state_tx.subscribe()
	}

	pub fn state(&self) -> &LoopState {
		&self.state
	}

	fn publish(&self) {
		self.state_tx.send_replace(self.state.clone());
	}

	/// Run cycles until stopped or the consecutive-error ceiling is hit
	pub async fn run(&mut self, ops: &mut impl CycleOps) {
		self.state.running = true;
		self.publish();

		while !self.handle.is_stopped() {
			if self.handle.is_paused() {
				if self.state.running {
					self.state.running = false;
					self.publish();
					self.notifier.toast(Severity::Warning, "paused");
				}
				tokio::time::sleep(self.config.pause_poll).await;
				continue;
			}
			if !self.state.running {
				// resuming starts a fresh cycle, counters intact
				self.state.running = true;
				self.publish();
				self.notifier.toast(Severity::Success, "resumed");
			}

			match self.cycle(ops).await {
				Ok(outcome) => {
					self.state.consecutive_errors = 0;
					self.report(&outcome);
				}
				Err(e) => {
					self.state.consecutive_errors += 1;
					self.notifier.toast(
						Severity::Error,
						&format!("cycle failed: {e} ({}/{})", self.state.consecutive_errors, self.config.max_consecutive_errors),
					);
					if self.state.consecutive_errors >= self.config.max_consecutive_errors {
						self.notifier.toast(Severity::Error, "too many consecutive failures, stopping");
						break;
					}
				}
			}

			self.publish();
			self.notifier.status("waiting for the next question");
			tokio::time::sleep(self.config.cycle_delay).await;
		}

		self.state.running = false;
		self.publish();
		self.notifier.toast(Severity::Info, "stopped");
	}

	/// One full question cycle
	async fn cycle(&mut self, ops: &mut impl CycleOps) -> Result<CycleOutcome> {
		self.notifier.status("scanning for a question");
		let question = ops.question().await?;
		if !question.detected {
			return Ok(CycleOutcome::NoQuestion);
		}
		tracing::debug!("question: {question}");

		self.notifier.status("processing question");
		let answers = ops.alternatives().await?;
		if answers.is_empty() {
			return Ok(CycleOutcome::NoAnswers);
		}
		tracing::debug!("alternatives:\n{answers}");

		let mut reply = None;
		for attempt in 1..=self.config.answer_retries {
			reply = ops.infer(&question, &answers).await?;
			if reply.is_some() {
				break;
			}
			tracing::debug!("inference attempt {attempt}/{} returned nothing", self.config.answer_retries);
			if attempt < self.config.answer_retries {
				tokio::time::sleep(self.config.retry_delay).await;
			}
		}
		let Some(reply) = reply else {
			return Ok(CycleOutcome::NoReply);
		};

		self.notifier.status("selecting the answer");
		if !ops.select(&reply, &answers).await? {
			return Ok(CycleOutcome::Unresolved);
		}

		let confirmed = ops.confirm().await?;
		self.state.questions_answered += 1;
		Ok(CycleOutcome::Answered { reply, confirmed })
	}

	fn report(&self, outcome: &CycleOutcome) {
		match outcome {
			CycleOutcome::NoQuestion => self.notifier.status("no question on the page"),
			CycleOutcome::NoAnswers => self.notifier.toast(Severity::Warning, "question found but no alternatives"),
			CycleOutcome::NoReply => self.notifier.toast(Severity::Error, "no usable reply from inference, skipping question"),
			CycleOutcome::Unresolved => self.notifier.toast(Severity::Warning, "reply did not resolve to any option"),
			CycleOutcome::Answered { reply, confirmed } => {
				self.notifier.toast(Severity::Success, &format!("question {} answered: {}", self.state.questions_answered, reply));
				if !confirmed {
					self.notifier.toast(Severity::Warning, "no confirmation control found");
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{AnswerOption, OptionHandle, SelectHandle, SolverError, notify::ConsoleNotifier, resolve};

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

	fn question(text: &str) -> Question {
		Question {
			text: text.to_string(),
			images: Vec::new(),
			detected: true,
		}
	}

	/// Scripted collaborators: selection delegates to the real matching logic
	/// and records what was activated.
	struct MockOps {
		handle: LoopHandle,
		question: Question,
		answers: AnswerSet,
		reply: Option<String>,
		/// cycles (1-based) whose perception should throw
		failing_cycles: Vec<u32>,
		/// stop the loop once this many cycles have started
		max_cycles: u32,
		question_calls: u32,
		infer_calls: u32,
		activated: Vec<String>,
		set_values: Vec<String>,
	}

	impl MockOps {
		fn new(handle: LoopHandle, question: Question, answers: AnswerSet, reply: Option<String>, max_cycles: u32) -> Self {
			MockOps {
				handle,
				question,
				answers,
				reply,
				failing_cycles: Vec::new(),
				max_cycles,
				question_calls: 0,
				infer_calls: 0,
				activated: Vec::new(),
				set_values: Vec::new(),
			}
		}
	}

	impl CycleOps for MockOps {
		async fn question(&mut self) -> Result<Question> {
			if self.question_calls >= self.max_cycles {
				self.handle.stop();
				return Ok(Question::undetected());
			}
			self.question_calls += 1;
			if self.failing_cycles.contains(&self.question_calls) {
				return Err(SolverError::Page("scripted failure".to_string()));
			}
			Ok(self.question.clone())
		}

		async fn alternatives(&mut self) -> Result<AnswerSet> {
			Ok(self.answers.clone())
		}

		async fn infer(&mut self, _question: &Question, _answers: &AnswerSet) -> Result<Option<String>> {
			self.infer_calls += 1;
			Ok(self.reply.clone())
		}

		async fn select(&mut self, reply: &str, answers: &AnswerSet) -> Result<bool> {
			match resolve::find_match(reply, answers) {
				Some(AnswerOption::Labeled { text, .. }) => {
					self.activated.push(text.clone());
					Ok(true)
				}
				Some(AnswerOption::Dropdown { value, .. }) => {
					self.set_values.push(value.clone());
					Ok(true)
				}
				_ => Ok(false),
			}
		}

		async fn confirm(&mut self) -> Result<bool> {
			Ok(true)
		}
	}

	fn test_loop(handle: LoopHandle) -> ControlLoop {
		ControlLoop::new(Config::default(), handle, Box::new(ConsoleNotifier))
	}

	#[tokio::test(start_paused = true)]
	async fn undetected_question_never_invokes_inference() {
		let handle = LoopHandle::new();
		let mut ops = MockOps::new(handle.clone(), Question::undetected(), AnswerSet::default(), None, 3);
		let mut ctl = test_loop(handle);
		ctl.run(&mut ops).await;
		assert_eq!(ops.question_calls, 3);
		assert_eq!(ops.infer_calls, 0);
		assert_eq!(ctl.state().questions_answered, 0);
	}

	#[tokio::test(start_paused = true)]
	async fn inference_attempts_are_bounded_per_question() {
		let handle = LoopHandle::new();
		let answers = AnswerSet { options: vec![labeled('A', "A) 1")] };
		let mut ops = MockOps::new(handle.clone(), question("Qual o valor de x?"), answers, None, 1);
		let mut ctl = test_loop(handle);
		ctl.run(&mut ops).await;
		// exactly answer_retries attempts, then the cycle is abandoned
		assert_eq!(ops.infer_calls, Config::default().answer_retries);
		assert!(ops.activated.is_empty());
		assert_eq!(ctl.state().questions_answered, 0);
	}

	#[tokio::test(start_paused = true)]
	async fn error_ceiling_stops_the_loop() {
		let handle = LoopHandle::new();
		let mut ops = MockOps::new(handle.clone(), question("irrelevante?"), AnswerSet::default(), None, 100);
		ops.failing_cycles = (1..=100).collect();
		let mut ctl = test_loop(handle.clone());
		ctl.run(&mut ops).await;
		// exactly max_consecutive_errors cycles before Stopped
		assert_eq!(ops.question_calls, Config::default().max_consecutive_errors);
		assert_eq!(ctl.state().consecutive_errors, Config::default().max_consecutive_errors);
		assert!(!ctl.state().running);
		// the loop stopped itself, not the handle
		assert!(!handle.is_stopped());
	}

	#[tokio::test(start_paused = true)]
	async fn consecutive_errors_reset_only_on_a_clean_cycle() {
		let handle = LoopHandle::new();
		let mut ops = MockOps::new(handle.clone(), Question::undetected(), AnswerSet::default(), None, 100);
		// two failures, a clean cycle, then three failures hit the ceiling
		ops.failing_cycles = vec![1, 2, 4, 5, 6];
		let mut ctl = test_loop(handle);
		ctl.run(&mut ops).await;
		assert_eq!(ops.question_calls, 6);
		assert_eq!(ctl.state().consecutive_errors, 3);
	}

	#[tokio::test(start_paused = true)]
	async fn lettered_reply_activates_the_matching_control() {
		let handle = LoopHandle::new();
		let answers = AnswerSet {
			options: vec![labeled('A', "A) 1"), labeled('B', "B) 2"), labeled('C', "C) 3")],
		};
		let mut ops = MockOps::new(handle.clone(), question("Qual o valor de x?"), answers, Some("B".to_string()), 1);
		let mut ctl = test_loop(handle);
		ctl.run(&mut ops).await;
		assert_eq!(ops.activated, vec!["B) 2"]);
		assert!(ops.set_values.is_empty());
		assert_eq!(ctl.state().questions_answered, 1);
		assert_eq!(ctl.state().consecutive_errors, 0);
	}

	#[tokio::test(start_paused = true)]
	async fn dropdown_reply_sets_the_bound_value() {
		let handle = LoopHandle::new();
		let answers = AnswerSet {
			options: vec![dropdown("Paris", "1"), dropdown("Londres", "2"), dropdown("Roma", "3")],
		};
		let mut ops = MockOps::new(handle.clone(), question("Complete: a capital da Itália é ____?"), answers, Some("Roma".to_string()), 1);
		let mut ctl = test_loop(handle);
		ctl.run(&mut ops).await;
		assert_eq!(ops.set_values, vec!["3"]);
		assert!(ops.activated.is_empty());
		assert_eq!(ctl.state().questions_answered, 1);
	}

	#[tokio::test(start_paused = true)]
	async fn unmatched_reply_does_not_count_as_answered() {
		let handle = LoopHandle::new();
		let answers = AnswerSet { options: vec![labeled('A', "A) 1")] };
		let mut ops = MockOps::new(handle.clone(), question("Qual o valor de x?"), answers, Some("F".to_string()), 2);
		let mut ctl = test_loop(handle);
		ctl.run(&mut ops).await;
		assert!(ops.activated.is_empty());
		assert_eq!(ctl.state().questions_answered, 0);
		// resolution misses are not errors
		assert_eq!(ctl.state().consecutive_errors, 0);
	}

	#[tokio::test(start_paused = true)]
	async fn paused_loop_runs_no_cycles_until_stopped() {
		let handle = LoopHandle::new();
		assert!(!handle.toggle()); // paused
		let mut ops = MockOps::new(handle.clone(), question("Qual o valor de x?"), AnswerSet::default(), None, 10);
		let stopper = handle.clone();
		let mut ctl = test_loop(handle);
		tokio::spawn(async move {
			tokio::time::sleep(std::time::Duration::from_secs(5)).await;
			stopper.stop();
		});
		ctl.run(&mut ops).await;
		assert_eq!(ops.question_calls, 0);
		assert!(!ctl.state().running);
	}
}
