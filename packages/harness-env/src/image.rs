//! Launch descriptions for backing store images.
//!
//! Arguments and environment values are templates. The provisioner fills in
//! `{host}`, `{port}`, `{name}`, `{volume}`, `{username}` and `{password}`
//! for every launch, so a restart gets its fresh port without the caller
//! rebuilding the spec.

use std::path::{Path, PathBuf};

use crate::endpoint::Credentials;

/// How to launch one instance of a backing store.
#[derive(Debug, Clone)]
pub struct ImageSpec {
    /// Image or binary name, used in logs
    pub image: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Command run after the launched process is killed
    pub teardown: Option<Vec<String>>,
}

impl ImageSpec {
    /// A store launched directly as a child process.
    pub fn process(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let image = program
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.display().to_string());
        Self {
            image,
            program,
            args: Vec::new(),
            env: Vec::new(),
            teardown: None,
        }
    }

    /// A store run by the docker CLI, publishing `container_port` on the
    /// allocated host port.
    pub fn container(image: impl Into<String>, container_port: u16) -> Self {
        let image = image.into();
        Self {
            program: PathBuf::from("docker"),
            args: vec![
                "run".to_string(),
                "--rm".to_string(),
                "--name".to_string(),
                "{name}".to_string(),
                "-p".to_string(),
                format!("{{host}}:{{port}}:{}", container_port),
                image.clone(),
            ],
            env: Vec::new(),
            teardown: Some(vec![
                "docker".to_string(),
                "rm".to_string(),
                "-f".to_string(),
                "{name}".to_string(),
            ]),
            image,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds an argument before the image name of a container spec, or at the
    /// end of a process spec.
    pub fn runtime_arg(mut self, arg: impl Into<String>) -> Self {
        match self.args.iter().rposition(|a| *a == self.image) {
            Some(at) if self.teardown.is_some() => self.args.insert(at, arg.into()),
            _ => self.args.push(arg.into()),
        }
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_teardown<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.teardown = Some(command.into_iter().map(Into::into).collect());
        self
    }

    pub(crate) fn render(&self, ctx: &LaunchContext<'_>) -> LaunchCommand {
        LaunchCommand {
            program: self.program.clone(),
            args: self.args.iter().map(|a| ctx.substitute(a)).collect(),
            env: self
                .env
                .iter()
                .map(|(k, v)| (k.clone(), ctx.substitute(v)))
                .collect(),
        }
    }

    pub(crate) fn render_teardown(&self, ctx: &LaunchContext<'_>) -> Option<LaunchCommand> {
        let (program, args) = self.teardown.as_ref()?.split_first()?;
        Some(LaunchCommand {
            program: PathBuf::from(ctx.substitute(program)),
            args: args.iter().map(|a| ctx.substitute(a)).collect(),
            env: Vec::new(),
        })
    }
}

/// Values substituted into an [`ImageSpec`] for one launch.
pub(crate) struct LaunchContext<'a> {
    pub host: &'a str,
    pub port: u16,
    pub name: &'a str,
    pub volume: Option<&'a Path>,
    pub credentials: Option<&'a Credentials>,
}

impl LaunchContext<'_> {
    fn substitute(&self, template: &str) -> String {
        let volume = self
            .volume
            .map(|v| v.display().to_string())
            .unwrap_or_default();
        let (username, password) = self
            .credentials
            .map(|c| (c.username.as_str(), c.password.as_str()))
            .unwrap_or_default();

        template
            .replace("{host}", self.host)
            .replace("{port}", &self.port.to_string())
            .replace("{name}", self.name)
            .replace("{volume}", &volume)
            .replace("{username}", username)
            .replace("{password}", password)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}
