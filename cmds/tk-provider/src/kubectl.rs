//! Cluster access through the `kubectl` binary.
//!
//! Manifests are handed to kubectl on stdin (`-f -`); whatever kubectl prints
//! is passed back untouched.

use std::{
	ffi::OsString,
	fmt,
	io::{self, Read, Write},
	path::{Path, PathBuf},
	process::{Child, Command, ExitStatus, Stdio},
	thread::{self, JoinHandle},
	time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, instrument, warn};

/// How often a child with a deadline is polled for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// kubectl sub-command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
	Apply,
	Diff,
}

impl Verb {
	pub fn as_str(self) -> &'static str {
		match self {
			Verb::Apply => "apply",
			Verb::Diff => "diff",
		}
	}

	/// `kubectl diff` exits with 1 when differences were found.
	fn succeeded(self, status: ExitStatus) -> bool {
		match self {
			Verb::Apply => status.success(),
			Verb::Diff => matches!(status.code(), Some(0 | 1)),
		}
	}
}

impl fmt::Display for Verb {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Errors raised while running kubectl.
#[derive(Debug, Error)]
pub enum ExternalToolError {
	#[error("failed to execute {binary}")]
	Spawn {
		binary: String,
		#[source]
		source: io::Error,
	},

	#[error("kubectl {verb}: {context}")]
	Io {
		verb: Verb,
		context: &'static str,
		#[source]
		source: io::Error,
	},

	#[error("kubectl {verb} failed ({status}):\n{output}")]
	Failed {
		verb: Verb,
		status: ExitStatus,
		/// stdout followed by stderr.
		output: String,
	},

	#[error("kubectl {verb} did not finish within {timeout:?}")]
	TimedOut { verb: Verb, timeout: Duration },
}

/// Something that can submit rendered manifests to a cluster.
pub trait ClusterClient {
	/// Apply `manifests` (a YAML stream) to the cluster at `endpoint`.
	fn apply(&self, endpoint: &str, manifests: &str) -> Result<String, ExternalToolError>;

	/// Diff `manifests` against the live state at `endpoint`.
	fn diff(&self, endpoint: &str, manifests: &str) -> Result<String, ExternalToolError>;
}

/// [`ClusterClient`] running a local kubectl.
#[derive(Debug, Clone)]
pub struct Kubectl {
	binary: PathBuf,
	envs: Vec<(OsString, OsString)>,
	timeout: Option<Duration>,
}

impl Default for Kubectl {
	fn default() -> Self {
		Self {
			binary: PathBuf::from("kubectl"),
			envs: Vec::new(),
			timeout: None,
		}
	}
}

impl Kubectl {
	pub fn new() -> Self {
		Self::default()
	}

	/// Use a different kubectl executable.
	pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
		self.binary = binary.into();
		self
	}

	/// Set an environment variable for every invocation.
	pub fn with_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
		self.envs.push((key.into(), value.into()));
		self
	}

	/// Kill kubectl if it runs longer than `timeout`.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}

	pub fn binary(&self) -> &Path {
		&self.binary
	}

	fn args(verb: Verb, endpoint: &str) -> Vec<&str> {
		let mut args = vec![verb.as_str()];
		if !endpoint.is_empty() {
			args.extend(["--server", endpoint]);
		}
		args.extend(["-f", "-"]);
		args
	}

	#[instrument(skip(self, manifests), fields(binary = %self.binary.display()))]
	fn run(&self, verb: Verb, endpoint: &str, manifests: &str) -> Result<String, ExternalToolError> {
		let io_error = |context: &'static str| move |source: io::Error| ExternalToolError::Io {
			verb,
			context,
			source,
		};

		let mut child = Command::new(&self.binary)
			.args(Self::args(verb, endpoint))
			.envs(self.envs.iter().map(|(k, v)| (k, v)))
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.spawn()
			.map_err(|source| ExternalToolError::Spawn {
				binary: self.binary.display().to_string(),
				source,
			})?;

		let mut stdin = child
			.stdin
			.take()
			.ok_or_else(|| io_error("capturing stdin")(missing_pipe()))?;
		let input = manifests.to_owned();
		// Dropping stdin at the end of the thread closes it, letting kubectl
		// see the end of the stream.
		let stdin_handle = thread::spawn(move || stdin.write_all(input.as_bytes()));

		let stdout = child
			.stdout
			.take()
			.ok_or_else(|| io_error("capturing stdout")(missing_pipe()))?;
		let stderr = child
			.stderr
			.take()
			.ok_or_else(|| io_error("capturing stderr")(missing_pipe()))?;
		let stdout_handle = read_in_background(stdout);
		let stderr_handle = read_in_background(stderr);

		let status = self.wait(&mut child, verb)?;

		let stdout_buf = join(stdout_handle).map_err(io_error("reading stdout"))?;
		let stderr_buf = join(stderr_handle).map_err(io_error("reading stderr"))?;
		let stdout = String::from_utf8_lossy(&stdout_buf).into_owned();
		let stderr = String::from_utf8_lossy(&stderr_buf);

		if !verb.succeeded(status) {
			return Err(ExternalToolError::Failed {
				verb,
				status,
				output: format!("{stdout}{stderr}"),
			});
		}

		// kubectl may stop reading early once it has failed; that case is
		// reported above through the exit status.
		match stdin_handle.join() {
			Ok(Ok(())) => {}
			Ok(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {}
			Ok(Err(e)) => return Err(io_error("writing manifests to stdin")(e)),
			Err(_) => return Err(io_error("writing manifests to stdin")(thread_panicked())),
		}

		if !stderr.is_empty() {
			debug!(stderr = %stderr.trim_end(), "kubectl stderr");
		}
		debug!(%status, "kubectl finished");
		Ok(stdout)
	}

	fn wait(&self, child: &mut Child, verb: Verb) -> Result<ExitStatus, ExternalToolError> {
		let wait_error = |source: io::Error| ExternalToolError::Io {
			verb,
			context: "waiting for kubectl",
			source,
		};

		let Some(timeout) = self.timeout else {
			return child.wait().map_err(wait_error);
		};

		let deadline = Instant::now() + timeout;
		loop {
			if let Some(status) = child.try_wait().map_err(wait_error)? {
				return Ok(status);
			}
			if Instant::now() >= deadline {
				warn!(%verb, ?timeout, "kubectl timed out, killing it");
				if let Err(e) = child.kill() {
					warn!(error = %e, "failed to kill kubectl");
				}
				// Reap the child; the reader threads are left to finish on their own.
				let _ = child.wait();
				return Err(ExternalToolError::TimedOut { verb, timeout });
			}
			thread::sleep(POLL_INTERVAL);
		}
	}
}

impl ClusterClient for Kubectl {
	fn apply(&self, endpoint: &str, manifests: &str) -> Result<String, ExternalToolError> {
		self.run(Verb::Apply, endpoint, manifests)
	}

	fn diff(&self, endpoint: &str, manifests: &str) -> Result<String, ExternalToolError> {
		self.run(Verb::Diff, endpoint, manifests)
	}
}

fn read_in_background<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<io::Result<Vec<u8>>> {
	thread::spawn(move || {
		let mut buf = Vec::new();
		reader.read_to_end(&mut buf)?;
		Ok(buf)
	})
}

fn join(handle: JoinHandle<io::Result<Vec<u8>>>) -> io::Result<Vec<u8>> {
	handle.join().map_err(|_| thread_panicked())?
}

fn missing_pipe() -> io::Error {
	io::Error::other("pipe was not configured")
}

fn thread_panicked() -> io::Error {
	io::Error::other("io thread panicked")
}
