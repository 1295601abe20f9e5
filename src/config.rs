use std::time::Duration;

/// In-process tuning constants for the solver
///
/// Defaults mirror the observed behavior of the portal: two seconds between
/// cycles, three consecutive failed cycles before giving up, two inference
/// attempts per question.
#[derive(Clone, Debug)]
pub struct Config {
	/// Sleep between question cycles
	pub cycle_delay: Duration,
	/// Sleep between inference attempts for the same question
	pub retry_delay: Duration,
	/// Settle time after activating an answer control
	pub settle_delay: Duration,
	/// Settle time after activating a confirmation control
	pub confirm_delay: Duration,
	/// Poll interval while the loop is paused
	pub pause_poll: Duration,
	/// How long toast notifications stay visible
	pub toast_duration: Duration,
	/// Inference attempts per question before the cycle is abandoned
	pub answer_retries: u32,
	/// Consecutive failed cycles before the loop stops itself
	pub max_consecutive_errors: u32,
	/// Hard timeout on each inference request
	pub request_timeout: Duration,
	/// Minimum trimmed length for an element to qualify as question text
	pub min_question_len: usize,
	/// Model name on the inference endpoint
	pub model: String,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			cycle_delay: Duration::from_millis(2000),
			retry_delay: Duration::from_millis(500),
			settle_delay: Duration::from_millis(500),
			confirm_delay: Duration::from_millis(1000),
			pause_poll: Duration::from_millis(500),
			toast_duration: Duration::from_millis(3000),
			answer_retries: 2,
			max_consecutive_errors: 3,
			request_timeout: Duration::from_secs(30),
			min_question_len: 40,
			model: "gemini-2.0-flash".to_string(),
		}
	}
}
