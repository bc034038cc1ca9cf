use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    process::{Command, Output},
};

use serde::{Deserialize, Serialize};

use crate::errors::LaunchError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mount {
    pub host: String,
    pub container: String,
}

impl Mount {
    pub fn new(host: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
        }
    }
}

/// The container invocation every rendered command is embedded in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContainerTemplate {
    pub program: String,
    pub volumes: Vec<Mount>,
    pub devices: Vec<Mount>,
    pub image: String,
}

impl Default for ContainerTemplate {
    fn default() -> Self {
        let volumes = [
            ("~/.bash_history", "/root/.bash_history"),
            ("/slave/theano_cache_docker", "/root/.theano"),
            ("/slave/theanorc", "/root/.theanorc"),
            ("~/.vim", "/root/.vim"),
            ("/slave/gitconfig", "/root/.gitconfig"),
            ("~/.vimrc", "/root/.vimrc"),
            ("/slave/dockerfiles/ssh", "/root/.ssh"),
            ("/slave/jupyter", "/root/.jupyter"),
            ("/home/ubuntu/data", "/root/workspace/data"),
            ("/slave/workspace", "/root/workspace"),
            ("`pwd`/rllab", "/root/workspace/rllab"),
        ];
        let devices = ["/dev/nvidia0", "/dev/nvidiactl", "/dev/nvidia-uvm"];
        Self {
            program: "docker run".to_string(),
            volumes: volumes
                .iter()
                .map(|(host, container)| Mount::new(*host, *container))
                .collect(),
            devices: devices.iter().map(|d| Mount::new(*d, *d)).collect(),
            image: "dementrock/starcluster:new".to_string(),
        }
    }
}

impl ContainerTemplate {
    /// A single shell command running `command` inside the container.
    pub fn wrap(&self, command: &str) -> String {
        let mut lines = vec![self.program.clone()];
        lines.extend(
            self.volumes
                .iter()
                .map(|m| format!("  -v {}:{}", m.host, m.container)),
        );
        lines.extend(
            self.devices
                .iter()
                .map(|m| format!("  --device {}:{}", m.host, m.container)),
        );
        lines.push(format!("  {} {}", self.image, command));
        lines.join(" \\\n")
    }
}

/// The executable script of one experiment.
#[derive(Clone, Debug, PartialEq)]
pub struct JobScript {
    pub name: String,
    pub body: String,
}

impl JobScript {
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.sh", self.name)
    }
}

/// What the scheduler handed back for one submitted script.
#[derive(Clone, Debug, PartialEq)]
pub struct JobHandle {
    pub script: PathBuf,
    pub scheduler_output: Option<String>,
}

pub trait JobSubmitter {
    /// Persists `script` as an executable file and returns its path.
    fn materialize(&mut self, script: &JobScript) -> Result<PathBuf, LaunchError>;
    /// Enqueues a previously materialized script.
    fn submit(&mut self, path: &Path) -> Result<JobHandle, LaunchError>;
}

/// What to do when `chmod` or the queue command cannot be started or exits
/// unsuccessfully.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailurePolicy {
    /// Log the failure and carry on.
    #[default]
    BestEffort,
    FailFast,
}

impl FailurePolicy {
    /// Runs `program` to completion. Yields `None` when it could not be started
    /// and the policy lets that pass.
    fn run(&self, program: &str, args: &[OsString]) -> Result<Option<Output>, LaunchError> {
        let output = match Command::new(program).args(args).output() {
            Ok(output) => output,
            Err(source) => {
                return match self {
                    Self::BestEffort => {
                        log::warn!("Failed to spawn `{}`: {}. Ignoring", program, source);
                        Ok(None)
                    }
                    Self::FailFast => Err(LaunchError::Spawn {
                        program: program.to_string(),
                        source,
                    }),
                }
            }
        };
        self.check(program, &output)?;
        Ok(Some(output))
    }

    fn check(&self, program: &str, output: &Output) -> Result<(), LaunchError> {
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        match self {
            Self::BestEffort => {
                log::warn!(
                    "`{}` exited with {}: {}. Ignoring",
                    program,
                    output.status,
                    stderr
                );
                Ok(())
            }
            Self::FailFast => Err(LaunchError::CommandFailed {
                program: program.to_string(),
                status: output.status,
                stderr,
            }),
        }
    }
}

/// Resource request and flags passed to the batch queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueSettings {
    pub program: String,
    pub export_env: bool,
    pub binary: bool,
    pub mem_free: String,
    pub h_vmem: String,
    pub rerun: bool,
    pub cwd: bool,
    pub extra_args: Vec<String>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            program: "qsub".to_string(),
            export_env: true,
            binary: false,
            mem_free: "8G".to_string(),
            h_vmem: "14G".to_string(),
            rerun: true,
            cwd: true,
            extra_args: Vec::new(),
        }
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "y"
    } else {
        "n"
    }
}

impl QueueSettings {
    pub fn args(&self, script: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if self.export_env {
            args.push("-V".into());
        }
        args.push("-b".into());
        args.push(yes_no(self.binary).into());
        args.push("-l".into());
        args.push(format!("mem_free={},h_vmem={}", self.mem_free, self.h_vmem).into());
        args.push("-r".into());
        args.push(yes_no(self.rerun).into());
        if self.cwd {
            args.push("-cwd".into());
        }
        args.extend(self.extra_args.iter().map(OsString::from));
        args.push(script.as_os_str().to_owned());
        args
    }
}

/// Writes scripts into `out_dir`, marks them executable with `chmod` and
/// submits them through the queue command.
pub struct QueueSubmitter {
    out_dir: PathBuf,
    queue: QueueSettings,
    policy: FailurePolicy,
}

impl QueueSubmitter {
    pub fn new(out_dir: impl Into<PathBuf>, queue: QueueSettings, policy: FailurePolicy) -> Self {
        Self {
            out_dir: out_dir.into(),
            queue,
            policy,
        }
    }
}

impl JobSubmitter for QueueSubmitter {
    fn materialize(&mut self, script: &JobScript) -> Result<PathBuf, LaunchError> {
        let path = self.out_dir.join(script.file_name());
        fs::write(&path, format!("{}\n", script.body)).map_err(|source| LaunchError::Io {
            path: path.clone(),
            source,
        })?;
        self.policy
            .run("chmod", &["+x".into(), path.as_os_str().to_owned()])?;
        Ok(path)
    }

    fn submit(&mut self, path: &Path) -> Result<JobHandle, LaunchError> {
        let output = self
            .policy
            .run(&self.queue.program, &self.queue.args(path))?;
        let stdout = output
            .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
            .filter(|s| !s.is_empty());
        if let Some(ref line) = stdout {
            log::info!("{}", line);
        }
        Ok(JobHandle {
            script: path.to_path_buf(),
            scheduler_output: stdout,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SubmitEvent {
    Materialized(JobScript),
    Submitted(PathBuf),
}

/// Records materialize and submit calls without touching the scheduler.
///
/// With a directory set, scripts are also written there and made executable.
#[derive(Debug, Default)]
pub struct RecordingSubmitter {
    dir: Option<PathBuf>,
    pub events: Vec<SubmitEvent>,
}

impl RecordingSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writing_to(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            events: Vec::new(),
        }
    }

    pub fn materialized(&self) -> impl Iterator<Item = &JobScript> {
        self.events.iter().filter_map(|e| match e {
            SubmitEvent::Materialized(script) => Some(script),
            _ => None,
        })
    }

    pub fn submitted(&self) -> impl Iterator<Item = &Path> {
        self.events.iter().filter_map(|e| match e {
            SubmitEvent::Submitted(path) => Some(path.as_path()),
            _ => None,
        })
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_mode(permissions.mode() | 0o111);
    fs::set_permissions(path, permissions)
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

impl JobSubmitter for RecordingSubmitter {
    fn materialize(&mut self, script: &JobScript) -> Result<PathBuf, LaunchError> {
        let path = match self.dir {
            Some(ref dir) => {
                let path = dir.join(script.file_name());
                fs::write(&path, format!("{}\n", script.body))
                    .and_then(|_| make_executable(&path))
                    .map_err(|source| LaunchError::Io {
                        path: path.clone(),
                        source,
                    })?;
                path
            }
            None => PathBuf::from(script.file_name()),
        };
        self.events.push(SubmitEvent::Materialized(script.clone()));
        Ok(path)
    }

    fn submit(&mut self, path: &Path) -> Result<JobHandle, LaunchError> {
        self.events.push(SubmitEvent::Submitted(path.to_path_buf()));
        Ok(JobHandle {
            script: path.to_path_buf(),
            scheduler_output: None,
        })
    }
}

#[cfg(test)]
mod tests {
    #[cfg(unix)]
    use std::process::ExitStatus;

    use super::*;

    #[cfg(unix)]
    fn is_executable(path: &Path) -> bool {
        use std::os::unix::fs::PermissionsExt;
        fs::metadata(path).unwrap().permissions().mode() & 0o111 != 0
    }

    #[test]
    fn wraps_command_in_container_invocation() {
        let template = ContainerTemplate {
            program: "docker run".to_string(),
            volumes: vec![Mount::new("/data", "/root/data")],
            devices: vec![Mount::new("/dev/nvidia0", "/dev/nvidia0")],
            image: "repo/image:tag".to_string(),
        };
        assert_eq!(
            template.wrap("python run.py --seed 1"),
            "docker run \\\n  -v /data:/root/data \\\n  --device /dev/nvidia0:/dev/nvidia0 \\\n  repo/image:tag python run.py --seed 1"
        );
    }

    #[test]
    fn default_template_mounts_and_devices() {
        let template = ContainerTemplate::default();
        assert_eq!(template.volumes.len(), 11);
        assert_eq!(template.devices.len(), 3);
        let body = template.wrap("cmd");
        assert!(body.starts_with("docker run \\\n"));
        assert!(body.ends_with("dementrock/starcluster:new cmd"));
    }

    #[test]
    fn queue_args_match_resource_request() {
        let args = QueueSettings::default().args(Path::new("exp_1.sh"));
        let args: Vec<_> = args.iter().map(|a| a.to_string_lossy().to_string()).collect();
        assert_eq!(
            args,
            vec![
                "-V",
                "-b",
                "n",
                "-l",
                "mem_free=8G,h_vmem=14G",
                "-r",
                "y",
                "-cwd",
                "exp_1.sh"
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn queue_submitter_marks_script_executable() {
        let dir = tempfile::tempdir().unwrap();
        let queue = QueueSettings {
            program: "true".to_string(),
            ..QueueSettings::default()
        };
        let mut submitter = QueueSubmitter::new(dir.path(), queue, FailurePolicy::FailFast);
        let path = submitter
            .materialize(&JobScript::new("exp_1", "echo hi"))
            .unwrap();
        assert_eq!(path, dir.path().join("exp_1.sh"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "echo hi\n");
        assert!(is_executable(&path));

        let handle = submitter.submit(&path).unwrap();
        assert_eq!(handle.script, path);
        assert_eq!(handle.scheduler_output, None);
    }

    #[cfg(unix)]
    #[test]
    fn failure_policy_decides_on_bad_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let queue = QueueSettings {
            program: "false".to_string(),
            ..QueueSettings::default()
        };
        let path = dir.path().join("exp_1.sh");
        fs::write(&path, "true\n").unwrap();

        let mut best_effort =
            QueueSubmitter::new(dir.path(), queue.clone(), FailurePolicy::BestEffort);
        assert!(best_effort.submit(&path).is_ok());

        let mut fail_fast = QueueSubmitter::new(dir.path(), queue, FailurePolicy::FailFast);
        let err = fail_fast.submit(&path).unwrap_err();
        assert!(matches!(err, LaunchError::CommandFailed { ref program, .. } if program == "false"));
    }

    #[test]
    fn missing_queue_program_follows_failure_policy() {
        let dir = tempfile::tempdir().unwrap();
        let queue = QueueSettings {
            program: "definitely-not-a-queue-command".to_string(),
            ..QueueSettings::default()
        };
        let path = dir.path().join("exp_1.sh");

        let mut best_effort =
            QueueSubmitter::new(dir.path(), queue.clone(), FailurePolicy::BestEffort);
        let handle = best_effort.submit(&path).unwrap();
        assert_eq!(handle.script, path);
        assert_eq!(handle.scheduler_output, None);

        let mut fail_fast = QueueSubmitter::new(dir.path(), queue, FailurePolicy::FailFast);
        let err = fail_fast.submit(&path).unwrap_err();
        assert!(matches!(
            err,
            LaunchError::Spawn { ref program, .. } if program == "definitely-not-a-queue-command"
        ));
    }

    #[cfg(unix)]
    #[test]
    fn command_failure_keeps_stderr() {
        use std::os::unix::process::ExitStatusExt;

        let output = Output {
            status: ExitStatus::from_raw(1 << 8),
            stdout: Vec::new(),
            stderr: b"Unable to run job: no suitable queues.\n".to_vec(),
        };
        assert!(FailurePolicy::BestEffort.check("qsub", &output).is_ok());

        let err = FailurePolicy::FailFast.check("qsub", &output).unwrap_err();
        match err {
            LaunchError::CommandFailed { program, stderr, .. } => {
                assert_eq!(program, "qsub");
                assert_eq!(stderr, "Unable to run job: no suitable queues.");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn write_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let mut submitter = QueueSubmitter::new(
            dir.path().join("missing"),
            QueueSettings::default(),
            FailurePolicy::BestEffort,
        );
        let err = submitter
            .materialize(&JobScript::new("exp_1", "echo hi"))
            .unwrap_err();
        assert!(matches!(err, LaunchError::Io { .. }));
    }

    #[test]
    fn recording_submitter_records_in_order() {
        let mut submitter = RecordingSubmitter::new();
        let path = submitter
            .materialize(&JobScript::new("exp_1", "echo hi"))
            .unwrap();
        submitter.submit(&path).unwrap();
        assert_eq!(path, PathBuf::from("exp_1.sh"));
        assert_eq!(
            submitter.events,
            vec![
                SubmitEvent::Materialized(JobScript::new("exp_1", "echo hi")),
                SubmitEvent::Submitted(PathBuf::from("exp_1.sh")),
            ]
        );
    }
}
