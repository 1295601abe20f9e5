use std::{fmt, fs, io::ErrorKind, path::PathBuf};

use dialoguer::Password;

use crate::error::{Result, SolverError};

/// Environment variable read by the `--api-key` flag
pub const CREDENTIAL_ENV: &str = "GEMINI_API_KEY";

const CREDENTIAL_FILE: &str = "api_key";

/// The inference backend credential
///
/// Opaque once constructed; `Debug` never prints the contents and the client
/// only ever places it in a request header.
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
	pub fn new(raw: &str) -> Result<Self> {
		let trimmed = raw.trim();
		if trimmed.is_empty() {
			return Err(SolverError::Credential("credential is empty".to_string()));
		}
		if trimmed.chars().any(char::is_whitespace) {
			return Err(SolverError::Credential("credential contains whitespace".to_string()));
		}
		Ok(Credential(trimmed.to_string()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for Credential {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Credential(****)")
	}
}

/// Durable store for the single API credential
///
/// One named value in a file under the user config directory. There is no
/// built-in fallback credential: setup fails unless the caller supplies one
/// via flag, environment, the store, or the interactive prompt.
pub struct CredentialStore {
	path: PathBuf,
}

impl CredentialStore {
	/// Open the store at the default location, creating its directory
	pub fn open() -> Result<Self> {
		let dir = dirs::config_dir()
			.ok_or_else(|| SolverError::Credential("could not determine a config directory".to_string()))?
			.join("sala_headless");
		fs::create_dir_all(&dir)?;
		Ok(CredentialStore { path: dir.join(CREDENTIAL_FILE) })
	}

	/// Open a store backed by an explicit file path
	pub fn at(path: PathBuf) -> Self {
		CredentialStore { path }
	}

	/// Read the stored credential, if any
	pub fn get(&self) -> Result<Option<String>> {
		match fs::read_to_string(&self.path) {
			Ok(contents) => {
				let trimmed = contents.trim();
				if trimmed.is_empty() { Ok(None) } else { Ok(Some(trimmed.to_string())) }
			}
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	/// Persist the credential, replacing any previous value
	pub fn set(&self, credential: &str) -> Result<()> {
		fs::write(&self.path, credential)?;
		Ok(())
	}

	/// Delete the stored credential; a no-op when nothing is stored
	pub fn remove(&self) -> Result<()> {
		match fs::remove_file(&self.path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}

	/// Resolve the credential to use, priority: flag/env > stored > prompt
	///
	/// A key entered at the prompt is persisted for the next run. Keys passed
	/// by flag or environment are used as-is and not written to the store.
	pub fn resolve(&self, flag: Option<&str>) -> Result<Credential> {
		if let Some(key) = flag {
			return Credential::new(key);
		}
		if let Some(key) = self.get()? {
			return Credential::new(&key);
		}
		let entered = Password::new()
			.with_prompt(format!("Gemini API key (or set {CREDENTIAL_ENV})"))
			.allow_empty_password(true)
			.interact()
			.map_err(|e| SolverError::Credential(format!("prompt failed: {e}")))?;
		let credential = Credential::new(&entered)?;
		self.set(credential.as_str())?;
		Ok(credential)
	}
}
