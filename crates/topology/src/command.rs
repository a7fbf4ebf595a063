//! Launch commands for the external programs
//!
//! Commands are structured argv pipelines rather than shell strings: each
//! [`CommandStage`] is one program with its arguments and environment, and
//! the stdout of a stage feeds the stdin of the next. This removes quoting
//! ambiguity and lets a bad argument be attributed to its node and stage.

use crate::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// One program in a pipeline
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CommandStage {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl CommandStage {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_env(&self) -> &[(String, String)] {
        &self.env
    }

    fn validate(&self, node: &str, stage: usize) -> Result<(), ValidationError> {
        let invalid = |reason: String| ValidationError::InvalidCommand {
            node: node.to_string(),
            stage,
            reason,
        };

        if self.program.trim().is_empty() {
            return Err(invalid("empty program".to_string()));
        }
        if self.program.contains('\0') {
            return Err(invalid("program contains a NUL byte".to_string()));
        }
        for (i, arg) in self.args.iter().enumerate() {
            if arg.contains('\0') {
                return Err(invalid(format!("argument {} contains a NUL byte", i)));
            }
        }
        for (key, value) in &self.env {
            if key.is_empty() || key.contains('=') || key.contains('\0') {
                return Err(invalid(format!("invalid environment variable name {:?}", key)));
            }
            if value.contains('\0') {
                return Err(invalid(format!("value of {} contains a NUL byte", key)));
            }
        }
        Ok(())
    }
}

impl fmt::Display for CommandStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut words: Vec<String> = self
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, quote(v)))
            .collect();
        words.push(quote(&self.program));
        words.extend(self.args.iter().map(|a| quote(a)));
        write!(f, "{}", words.join(" "))
    }
}

fn quote(word: &str) -> String {
    if !word.is_empty() && !word.contains(|c: char| c.is_whitespace() || c == '\'' || c == '"') {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Pipeline of stages run on one host
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LaunchCommand {
    stages: Vec<CommandStage>,
}

impl LaunchCommand {
    pub fn single(stage: CommandStage) -> Self {
        Self {
            stages: vec![stage],
        }
    }

    pub fn pipeline(stages: Vec<CommandStage>) -> Self {
        Self { stages }
    }

    /// Append a stage reading this pipeline's output
    pub fn pipe(mut self, stage: CommandStage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stages(&self) -> &[CommandStage] {
        &self.stages
    }

    /// Check every stage; errors name the node and the offending stage
    pub fn validate(&self, node: &str) -> Result<(), ValidationError> {
        if self.stages.is_empty() {
            return Err(ValidationError::InvalidCommand {
                node: node.to_string(),
                stage: 0,
                reason: "empty pipeline".to_string(),
            });
        }
        for (i, stage) in self.stages.iter().enumerate() {
            stage.validate(node, i)?;
        }
        Ok(())
    }
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.stages.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", rendered.join(" | "))
    }
}

/// Which address a relay advertises to the API as its `--node`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayAdvertise {
    /// Every relay advertises relay 1
    #[default]
    PrimaryRelay,
    /// Each relay advertises its own address
    OwnAddress,
}

impl FromStr for RelayAdvertise {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" | "primary_relay" => Ok(Self::PrimaryRelay),
            "own" | "own_address" => Ok(Self::OwnAddress),
            other => Err(format!(
                "unknown relay advertise policy '{}' (expected 'primary' or 'own')",
                other
            )),
        }
    }
}

/// Static paths and settings consumed by the launched programs
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessPaths {
    /// Directory holding the moq-* binaries
    pub bin_dir: PathBuf,
    pub tls_cert: PathBuf,
    pub tls_key: PathBuf,
    /// Fragmented MP4 looped by the publisher
    pub media_source: PathBuf,
    /// File written by the subscriber's player
    pub playback_output: PathBuf,
    pub playback_seconds: u32,
    pub track_namespace: String,
    /// Passed to the moq-* programs as `RUST_LOG`
    pub log_level: String,
    /// Passed to the moq-* programs as `RUST_BACKTRACE`
    pub backtrace: String,
}

impl Default for HarnessPaths {
    fn default() -> Self {
        Self {
            bin_dir: PathBuf::from("./target"),
            tls_cert: PathBuf::from("./dev/localhost.crt"),
            tls_key: PathBuf::from("./dev/localhost.key"),
            media_source: PathBuf::from("./dev/bbb.fmp4"),
            playback_output: PathBuf::from("ha-bbb.mp4"),
            playback_seconds: 30,
            track_namespace: "bbb".to_string(),
            log_level: "debug".to_string(),
            backtrace: "0".to_string(),
        }
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

/// Argv builders, one per role
pub struct RoleCommands<'a> {
    paths: &'a HarnessPaths,
}

impl<'a> RoleCommands<'a> {
    pub fn new(paths: &'a HarnessPaths) -> Self {
        Self { paths }
    }

    fn moq(&self, binary: &str) -> CommandStage {
        CommandStage::new(path_arg(&self.paths.bin_dir.join(binary)))
            .env("RUST_LOG", self.paths.log_level.clone())
            .env("RUST_BACKTRACE", self.paths.backtrace.clone())
    }

    fn with_tls(&self, stage: CommandStage) -> CommandStage {
        stage
            .arg("--tls-cert")
            .arg(path_arg(&self.paths.tls_cert))
            .arg("--tls-key")
            .arg(path_arg(&self.paths.tls_key))
    }

    pub fn api(&self) -> LaunchCommand {
        LaunchCommand::single(self.moq("moq-api"))
    }

    pub fn directory(&self) -> LaunchCommand {
        LaunchCommand::single(self.with_tls(self.moq("moq-dir")))
    }

    pub fn relay(&self, api: Ipv4Addr, directory: Ipv4Addr, advertised: Ipv4Addr) -> LaunchCommand {
        let stage = self
            .with_tls(self.moq("moq-relay-ietf"))
            .arg("--tls-disable-verify")
            .args(["--api".to_string(), format!("http://{}", api)])
            .args(["--node".to_string(), format!("https://{}", advertised)])
            .arg("--dev")
            .args(["--announce".to_string(), format!("https://{}", directory)]);
        LaunchCommand::single(stage)
    }

    /// ffmpeg remuxes the media file to fragmented MP4 on stdout, which the
    /// publisher reads and announces to `relay`
    pub fn publisher(&self, relay: Ipv4Addr) -> LaunchCommand {
        let encoder = CommandStage::new("ffmpeg").args([
            "-hide_banner".to_string(),
            "-v".to_string(),
            "quiet".to_string(),
            "-stream_loop".to_string(),
            "-1".to_string(),
            "-re".to_string(),
            "-i".to_string(),
            path_arg(&self.paths.media_source),
            "-c".to_string(),
            "copy".to_string(),
            "-f".to_string(),
            "mp4".to_string(),
            "-movflags".to_string(),
            "cmaf+separate_moof+delay_moov+skip_trailer+frag_every_frame".to_string(),
            "-".to_string(),
        ]);
        let publisher = self
            .moq("moq-pub")
            .args(["--name".to_string(), self.paths.track_namespace.clone()])
            .args(["--url".to_string(), format!("https://{}", relay)]);

        LaunchCommand::single(encoder).pipe(publisher)
    }

    /// Subscriber with a primary and a secondary relay, piped into a player
    pub fn subscriber(&self, primary: Ipv4Addr, secondary: Ipv4Addr) -> LaunchCommand {
        let track = &self.paths.track_namespace;
        let subscriber = self
            .moq("moq-sub")
            .args(["--name".to_string(), track.clone()])
            .args([
                "--url_primary".to_string(),
                format!("https://{}/{}", primary, track),
            ])
            .args([
                "--url_secondary".to_string(),
                format!("https://{}/{}", secondary, track),
            ]);
        let player = CommandStage::new("ffplay").args([
            "-".to_string(),
            "-f".to_string(),
            "mp4".to_string(),
            "-t".to_string(),
            self.paths.playback_seconds.to_string(),
            path_arg(&self.paths.playback_output),
        ]);

        LaunchCommand::single(subscriber).pipe(player)
    }
}
