use crate::errors::CassetteError;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl ProcessRequest {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(|s| s.as_ref().to_string()).collect(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn in_dir(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    /// Names of the injected variables, safe to log.
    pub fn env_keys(&self) -> Vec<&str> {
        self.env.iter().map(|(key, _)| key.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Blocking subprocess execution. An `Err` means the process could not be
/// started or waited on; a non-zero exit is reported through `exit_code`.
pub trait ProcessRunner: Send + Sync {
    fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, CassetteError>;
}

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String, CassetteError>;
    fn write_string(&self, path: &Path, contents: &str) -> Result<(), CassetteError>;
    fn create_dir_all(&self, path: &Path) -> Result<(), CassetteError>;
    fn remove_dir_all(&self, path: &Path) -> Result<(), CassetteError>;
    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>, CassetteError>;
    fn exists(&self, path: &Path) -> bool;
}

pub trait Terminal: Send + Sync {
    fn write_line(&self, line: &str) -> Result<(), CassetteError>;
    fn write_error_line(&self, line: &str) -> Result<(), CassetteError>;
}

pub struct ProductionFileSystem;

impl FileSystem for ProductionFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, CassetteError> {
        std::fs::read_to_string(path).map_err(|e| CassetteError::Io(e.to_string()))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), CassetteError> {
        std::fs::write(path, contents).map_err(|e| CassetteError::Io(e.to_string()))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), CassetteError> {
        std::fs::create_dir_all(path).map_err(|e| CassetteError::Io(e.to_string()))
    }

    fn remove_dir_all(&self, path: &Path) -> Result<(), CassetteError> {
        match std::fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CassetteError::Io(format!("{}: {e}", path.display()))),
        }
    }

    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>, CassetteError> {
        let mut files = std::fs::read_dir(dir)
            .map_err(|e| CassetteError::Io(format!("{}: {e}", dir.display())))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect::<Vec<_>>();
        files.sort();
        Ok(files)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

pub struct ProductionProcessRunner;

impl ProcessRunner for ProductionProcessRunner {
    fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, CassetteError> {
        let mut cmd = std::process::Command::new(&request.program);
        cmd.args(&request.args);
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }
        cmd.envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        cmd.stdin(std::process::Stdio::null());

        let output = cmd
            .output()
            .map_err(|e| CassetteError::Process(format!("{}: {e}", request.program)))?;
        Ok(ProcessOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

pub struct ProductionTerminal;

impl Terminal for ProductionTerminal {
    fn write_line(&self, line: &str) -> Result<(), CassetteError> {
        use std::io::Write;
        let mut out = std::io::stdout();
        writeln!(out, "{line}").map_err(|e| CassetteError::Io(e.to_string()))
    }

    fn write_error_line(&self, line: &str) -> Result<(), CassetteError> {
        use std::io::Write;
        let mut err = std::io::stderr();
        writeln!(err, "{line}").map_err(|e| CassetteError::Io(e.to_string()))
    }
}

pub struct ProductionRuntime {
    pub file_system: Arc<dyn FileSystem>,
    pub process_runner: Arc<dyn ProcessRunner>,
    pub terminal: Arc<dyn Terminal>,
}

impl ProductionRuntime {
    pub fn new() -> Self {
        Self {
            file_system: Arc::new(ProductionFileSystem),
            process_runner: Arc::new(ProductionProcessRunner),
            terminal: Arc::new(ProductionTerminal),
        }
    }
}

impl Default for ProductionRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default, Clone)]
pub struct FakeFileSystem {
    files: Arc<Mutex<BTreeMap<PathBuf, String>>>,
    dirs: Arc<Mutex<BTreeSet<PathBuf>>>,
    removed_dirs: Arc<Mutex<Vec<PathBuf>>>,
    fail_removal_of: Arc<Mutex<BTreeSet<PathBuf>>>,
}

impl FakeFileSystem {
    pub fn with_file(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        let fs = Self::default();
        fs.seed_file(path, contents);
        fs
    }

    pub fn seed_file(&self, path: impl Into<PathBuf>, contents: impl Into<String>) {
        self.files
            .lock()
            .expect("files lock")
            .insert(path.into(), contents.into());
    }

    pub fn fail_removal_of(&self, path: impl Into<PathBuf>) {
        self.fail_removal_of
            .lock()
            .expect("fail removal lock")
            .insert(path.into());
    }

    pub fn removed_dirs(&self) -> Vec<PathBuf> {
        self.removed_dirs.lock().expect("removed lock").clone()
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<String> {
        self.files
            .lock()
            .expect("files lock")
            .get(path.as_ref())
            .cloned()
    }
}

impl FileSystem for FakeFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, CassetteError> {
        self.file(path)
            .ok_or_else(|| CassetteError::Io(format!("missing file {}", path.display())))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), CassetteError> {
        self.seed_file(path, contents);
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), CassetteError> {
        self.dirs
            .lock()
            .expect("dirs lock")
            .insert(path.to_path_buf());
        Ok(())
    }

    fn remove_dir_all(&self, path: &Path) -> Result<(), CassetteError> {
        self.removed_dirs
            .lock()
            .expect("removed lock")
            .push(path.to_path_buf());
        if self
            .fail_removal_of
            .lock()
            .expect("fail removal lock")
            .contains(path)
        {
            return Err(CassetteError::Io(format!(
                "permission denied: {}",
                path.display()
            )));
        }
        self.files
            .lock()
            .expect("files lock")
            .retain(|file, _| !file.starts_with(path));
        self.dirs
            .lock()
            .expect("dirs lock")
            .retain(|dir| !dir.starts_with(path));
        Ok(())
    }

    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>, CassetteError> {
        Ok(self
            .files
            .lock()
            .expect("files lock")
            .keys()
            .filter(|file| file.parent() == Some(dir))
            .cloned()
            .collect())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.lock().expect("files lock").contains_key(path)
            || self.dirs.lock().expect("dirs lock").contains(path)
    }
}

#[derive(Default, Clone)]
pub struct FakeTerminal {
    writes: Arc<Mutex<Vec<String>>>,
    errors: Arc<Mutex<Vec<String>>>,
}

impl FakeTerminal {
    pub fn written_lines(&self) -> Vec<String> {
        self.writes.lock().expect("writes lock").clone()
    }

    pub fn error_lines(&self) -> Vec<String> {
        self.errors.lock().expect("errors lock").clone()
    }
}

impl Terminal for FakeTerminal {
    fn write_line(&self, line: &str) -> Result<(), CassetteError> {
        self.writes
            .lock()
            .expect("writes lock")
            .push(line.to_string());
        Ok(())
    }

    fn write_error_line(&self, line: &str) -> Result<(), CassetteError> {
        self.errors
            .lock()
            .expect("errors lock")
            .push(line.to_string());
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct FakeProcessRunner {
    responses: Arc<Mutex<Vec<Result<ProcessOutput, CassetteError>>>>,
    spawned: Arc<Mutex<Vec<ProcessRequest>>>,
}

impl FakeProcessRunner {
    pub fn push_response(&self, output: Result<ProcessOutput, CassetteError>) {
        self.responses.lock().expect("responses lock").push(output);
    }

    pub fn spawned(&self) -> Vec<ProcessRequest> {
        self.spawned.lock().expect("spawned lock").clone()
    }

    pub fn spawned_programs(&self) -> Vec<String> {
        self.spawned()
            .iter()
            .map(|request| {
                let sub = request.args.first().cloned().unwrap_or_default();
                format!("{} {}", request.program, sub)
            })
            .collect()
    }
}

impl ProcessRunner for FakeProcessRunner {
    fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, CassetteError> {
        self.spawned.lock().expect("spawned lock").push(request);
        let mut responses = self.responses.lock().expect("responses lock");
        if responses.is_empty() {
            return Err(CassetteError::Process(
                "no fake response queued".to_string(),
            ));
        }
        responses.remove(0)
    }
}
