//! Command lines for the broker and the password utility.
//!
//! Natively both programs run from the host. In container mode every
//! invocation goes through the container runtime with the working directory
//! mounted at [`CONTAINER_CONFIG_DIR`], running as the invoking user so the
//! files it writes stay removable.

use std::{
    env,
    ffi::OsString,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use tokio::process::Command;
use tracing::debug;

use super::{
    error::BrokerError,
    options::BrokerConfig,
    render::{Layout, CONF_FILE, PASSWD_FILE},
};

/// Mount point of the working directory inside the container.
pub const CONTAINER_CONFIG_DIR: &str = "/mosquitto/config";

/// Resolves `program` the way a shell would.
///
/// Names containing a `/` are checked as paths; bare names are looked up in
/// every `PATH` entry. Only regular files with an execute bit count.
pub fn find_program(program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        return is_executable(&path).then_some(path);
    }
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn require(program: &str) -> Result<PathBuf, BrokerError> {
    find_program(program).ok_or_else(|| BrokerError::ProgramNotFound {
        program: program.to_string(),
    })
}

/// User and group the containerized programs run as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

impl Owner {
    pub fn current() -> Self {
        // SAFETY: getuid/getgid cannot fail and touch no memory.
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self { uid, gid }
    }

    fn user_flag(&self) -> String {
        format!("{}:{}", self.uid, self.gid)
    }
}

/// Executables resolved before anything is written to disk.
#[derive(Debug, Clone)]
pub enum Toolchain {
    Native {
        broker: PathBuf,
        /// Absent when there are no accounts to hash.
        passwd: Option<PathBuf>,
    },
    Container {
        runtime: PathBuf,
        owner: Owner,
    },
}

impl Toolchain {
    pub fn resolve(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let toolchain = if config.native {
            let broker = require(&config.binary)?;
            let passwd = if config.passwd.is_empty() {
                None
            } else {
                Some(require(&config.passwd_binary)?)
            };
            Toolchain::Native { broker, passwd }
        } else {
            Toolchain::Container {
                runtime: require(&config.runtime)?,
                owner: Owner::current(),
            }
        };
        debug!("Resolved toolchain: {:?}", toolchain);
        Ok(toolchain)
    }

    /// Broker invocation for a working directory prepared with `layout`.
    pub fn broker_plan(&self, config: &BrokerConfig, workdir: &Path, layout: &Layout) -> LaunchPlan {
        match self {
            Toolchain::Native { broker, .. } => LaunchPlan {
                program: broker.clone(),
                args: vec!["-c".into(), layout.path(CONF_FILE).into_os_string()],
                cwd: workdir.to_path_buf(),
            },
            Toolchain::Container { runtime, owner } => {
                let mut args = container_prefix(workdir, *owner);
                for listener in &config.listen {
                    args.push("-p".into());
                    args.push(
                        format!("{}:{}:{}", listener.address, listener.port, listener.port).into(),
                    );
                }
                args.push(config.container.clone().into());
                args.push("mosquitto".into());
                args.push("-c".into());
                args.push(layout.path(CONF_FILE).into_os_string());
                LaunchPlan {
                    program: runtime.clone(),
                    args,
                    cwd: workdir.to_path_buf(),
                }
            }
        }
    }

    /// Password utility invocation adding one account.
    ///
    /// `create` truncates the file first (`-c`); later accounts append.
    pub fn passwd_plan(
        &self,
        config: &BrokerConfig,
        workdir: &Path,
        layout: &Layout,
        username: &str,
        password: &str,
        create: bool,
    ) -> Option<LaunchPlan> {
        let mut hash_args: Vec<OsString> = Vec::with_capacity(7);
        if create {
            hash_args.push("-c".into());
        }
        hash_args.extend([
            "-H".into(),
            "sha512-pbkdf2".into(),
            "-b".into(),
            layout.path(PASSWD_FILE).into_os_string(),
            username.into(),
            password.into(),
        ]);

        match self {
            Toolchain::Native { passwd, .. } => passwd.as_ref().map(|program| LaunchPlan {
                program: program.clone(),
                args: hash_args,
                cwd: workdir.to_path_buf(),
            }),
            Toolchain::Container { runtime, owner } => {
                let mut args = container_prefix(workdir, *owner);
                args.push(config.container.clone().into());
                args.push("mosquitto_passwd".into());
                args.extend(hash_args);
                Some(LaunchPlan {
                    program: runtime.clone(),
                    args,
                    cwd: workdir.to_path_buf(),
                })
            }
        }
    }

    /// Name used for the spawned program in logs and errors.
    pub fn broker_name(&self) -> String {
        match self {
            Toolchain::Native { broker, .. } => broker.display().to_string(),
            Toolchain::Container { runtime, .. } => runtime.display().to_string(),
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Toolchain::Container { .. })
    }
}

/// `run --rm --init -v <dir>:/mosquitto/config --user u:g -e PUID=u -e PGID=g`
fn container_prefix(workdir: &Path, owner: Owner) -> Vec<OsString> {
    let mut volume = workdir.as_os_str().to_os_string();
    volume.push(":");
    volume.push(CONTAINER_CONFIG_DIR);
    vec![
        "run".into(),
        "--rm".into(),
        "--init".into(),
        "-v".into(),
        volume,
        "--user".into(),
        owner.user_flag().into(),
        "-e".into(),
        format!("PUID={}", owner.uid).into(),
        "-e".into(),
        format!("PGID={}", owner.gid).into(),
    ]
}

/// A fully resolved program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub cwd: PathBuf,
}

impl LaunchPlan {
    pub fn into_command(self) -> Command {
        let mut cmd = Command::new(self.program);
        cmd.args(self.args).current_dir(self.cwd);
        cmd
    }
}
