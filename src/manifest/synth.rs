use tracing::debug;

use super::script::{EntryScript, ECHO_NEWLINE};
use super::{BuildManifest, Instruction};
use crate::config::Conventions;
use crate::introspect::ImageConfig;

/// Derive the stage-2 manifest for `base` from its introspected configuration.
///
/// Pure and deterministic: the same inputs always yield the same instruction
/// sequence. `overlay_present` gates the COPY of the overlay into the working
/// directory.
pub fn synthesize(
    config: &ImageConfig,
    overlay_present: bool,
    base: &str,
    conventions: &Conventions,
) -> BuildManifest {
    let mut m = BuildManifest::new();
    m.push(Instruction::From(base.to_string()));

    m.push(Instruction::Run(format!("mkdir -p {}", conventions.server_dir)));
    m.push(Instruction::Workdir("/".to_string()));
    m.push(Instruction::Run(format!(
        "curl -sSL {} | bash",
        conventions.bootstrap_installer_url
    )));

    let workdir = match config.working_dir() {
        Some(dir) => dir.to_string(),
        None => {
            m.push(Instruction::Run(format!(
                "mkdir -p {}",
                conventions.default_workdir
            )));
            conventions.default_workdir.clone()
        }
    };
    m.push(Instruction::Run(format!(
        "chown -R {} {}",
        conventions.owner(),
        workdir
    )));

    if overlay_present {
        m.push(Instruction::Copy {
            src: conventions.overlay_name.clone(),
            dest: workdir.clone(),
        });
    }

    if !config.env.is_empty() {
        let payload: String = config
            .env
            .iter()
            .map(|e| format!("{e}{ECHO_NEWLINE}"))
            .collect();
        m.push(Instruction::Run(format!(
            "echo '{payload}' >> {}",
            conventions.environment_file
        )));
    }

    let script = EntryScript::new(&config.cmd, &workdir, conventions);
    m.push(Instruction::Run(format!(
        "echo '{}' > {}",
        script.echo_payload(),
        conventions.entry_script
    )));

    if !config.entrypoint.is_empty() {
        m.push(Instruction::Entrypoint(Vec::new()));
    }
    m.push(Instruction::Cmd(vec![
        "bash".to_string(),
        conventions.entry_script.clone(),
    ]));

    debug!(
        base,
        workdir = %workdir,
        overlay = overlay_present,
        env = config.env.len(),
        instructions = m.len(),
        "synthesized derived manifest"
    );
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(workdir: Option<&str>, cmd: &[&str], env: &[&str]) -> ImageConfig {
        ImageConfig {
            working_dir: workdir.map(str::to_string),
            cmd: cmd.iter().map(|s| s.to_string()).collect(),
            entrypoint: Vec::new(),
            env: env.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_default_workdir_full_text() {
        let m = synthesize(&cfg(None, &[], &[]), false, "me/app", &Conventions::default());
        let expected = concat!(
            "FROM me/app\n",
            "RUN mkdir -p /programschool/server\n",
            "WORKDIR /\n",
            "RUN curl -sSL https://build.boxlayer.com | bash\n",
            "RUN mkdir -p /home/ubuntu/learn\n",
            "RUN chown -R ubuntu:root /home/ubuntu/learn\n",
            "RUN echo '#!/bin/bash\\nCURRENT_DIR=$(cd \"$(dirname \"$0\")\" && pwd)\\n",
            "su -l ubuntu -c \"${CURRENT_DIR}/code-server/bin/code-server --disable-update-check ",
            "--auth=none --bind-addr 0.0.0.0:2090 /home/ubuntu/learn\"' > /programschool/server/run.sh\n",
            "CMD [\"bash\",\"/programschool/server/run.sh\"]\n",
        );
        assert_eq!(m.to_string(), expected);
    }

    #[test]
    fn test_declared_workdir_used_verbatim() {
        let m = synthesize(&cfg(Some("/srv/app"), &[], &[]), true, "b", &Conventions::default());
        let text = m.to_string();
        assert!(!text.contains("mkdir -p /home/ubuntu/learn"));
        assert!(text.contains("RUN chown -R ubuntu:root /srv/app\n"));
        assert!(text.contains("COPY WORKDIR /srv/app\n"));
        assert!(text.contains("--bind-addr 0.0.0.0:2090 /srv/app\""));
    }

    #[test]
    fn test_env_order_and_escape() {
        let m = synthesize(
            &cfg(None, &[], &["B=2", "A=1", "B=2"]),
            false,
            "b",
            &Conventions::default(),
        );
        assert!(m
            .to_string()
            .contains("RUN echo 'B=2\\nA=1\\nB=2\\n' >> /etc/environment\n"));
    }

    #[test]
    fn test_entrypoint_reset_only_when_inherited() {
        let mut c = cfg(None, &["run"], &[]);
        let without = synthesize(&c, false, "b", &Conventions::default());
        assert!(!without
            .instructions()
            .contains(&Instruction::Entrypoint(Vec::new())));

        c.entrypoint = vec!["/docker-entrypoint.sh".into()];
        let with = synthesize(&c, false, "b", &Conventions::default());
        let n = with.len();
        assert_eq!(with.instructions()[n - 2], Instruction::Entrypoint(Vec::new()));
        assert!(matches!(with.instructions()[n - 1], Instruction::Cmd(_)));
    }
}
