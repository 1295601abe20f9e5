use thiserror::Error;

/// Failure taxonomy for the solver
///
/// Extraction misses and resolution misses are not errors: they are reported
/// through `Question::detected`, empty `AnswerSet`s and `false` returns, and
/// the cycle simply moves on. Only conditions that the loop boundary must see
/// (and count toward the consecutive-error ceiling) live here.
#[derive(Debug, Error)]
pub enum SolverError {
	#[error("credential error: {0}")]
	Credential(String),

	#[error("page evaluation failed: {0}")]
	Page(String),

	#[error("inference backend returned {status}: {message}")]
	Inference { status: u16, message: String },

	#[error("malformed inference reply: {0}")]
	MalformedReply(String),

	#[error("network error: {0}")]
	Network(#[from] reqwest::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SolverError>;
