#![allow(clippy::module_name_repetitions)]
//! Build manifests as ordered instruction sequences, rendered to Dockerfile text.

mod script;
mod synth;

use std::fmt;

pub use script::EntryScript;
pub use synth::synthesize;

/// One manifest instruction with literal arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    From(String),
    /// Shell-form command line, emitted verbatim.
    Run(String),
    Workdir(String),
    Copy { src: String, dest: String },
    Env { key: String, value: String },
    /// Exec form.
    Cmd(Vec<String>),
    /// Exec form; an empty list clears an inherited entrypoint.
    Entrypoint(Vec<String>),
}

fn exec_form(args: &[String]) -> String {
    // Vec<String> always serializes; fall back to an empty list rather than panic.
    serde_json::to_string(args).unwrap_or_else(|_| "[]".to_string())
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::From(image) => write!(f, "FROM {image}"),
            Instruction::Run(cmd) => write!(f, "RUN {cmd}"),
            Instruction::Workdir(dir) => write!(f, "WORKDIR {dir}"),
            Instruction::Copy { src, dest } => write!(f, "COPY {src} {dest}"),
            Instruction::Env { key, value } => write!(f, "ENV {key}={}", exec_form_scalar(value)),
            Instruction::Cmd(args) => write!(f, "CMD {}", exec_form(args)),
            Instruction::Entrypoint(args) => write!(f, "ENTRYPOINT {}", exec_form(args)),
        }
    }
}

fn exec_form_scalar(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{value}\""))
}

/// Ordered instructions; order is significant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildManifest {
    instructions: Vec<Instruction>,
}

impl BuildManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Base image of the first FROM, if any.
    pub fn base(&self) -> Option<&str> {
        self.instructions.iter().find_map(|i| match i {
            Instruction::From(image) => Some(image.as_str()),
            _ => None,
        })
    }
}

impl FromIterator<Instruction> for BuildManifest {
    fn from_iter<T: IntoIterator<Item = Instruction>>(iter: T) -> Self {
        Self {
            instructions: iter.into_iter().collect(),
        }
    }
}

/// Dockerfile text, one instruction per line, trailing newline.
impl fmt::Display for BuildManifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for instruction in &self.instructions {
            writeln!(f, "{instruction}")?;
        }
        Ok(())
    }
}
