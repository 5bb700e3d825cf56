use crate::config::Conventions;

/// Literal backslash-n; `echo` in the build shell expands it into a newline.
pub(crate) const ECHO_NEWLINE: &str = "\\n";

/// Bootstrap script written into the derived image and run as its default command.
///
/// The script starts the image's original command in the background (if any),
/// then runs the companion server in the foreground as the unprivileged user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryScript {
    lines: Vec<String>,
}

impl EntryScript {
    pub fn new(cmd: &[String], workdir: &str, conventions: &Conventions) -> Self {
        let mut lines = vec!["#!/bin/bash".to_string()];
        if !cmd.is_empty() {
            lines.push(format!("nohup {} &", cmd.join(" ")));
        }
        lines.push(r#"CURRENT_DIR=$(cd "$(dirname "$0")" && pwd)"#.to_string());
        lines.push(format!(
            r#"su -l {user} -c "${{CURRENT_DIR}}/{bin} --disable-update-check --auth=none --bind-addr {host}:{port} {workdir}""#,
            user = conventions.user,
            bin = conventions.companion_server_bin,
            host = conventions.bind_host,
            port = conventions.port,
        ));
        Self { lines }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Lines joined with the echo newline escape, ready for a single-quoted `echo`.
    pub fn echo_payload(&self) -> String {
        self.lines.join(ECHO_NEWLINE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_without_command() {
        let s = EntryScript::new(&[], "/home/ubuntu/learn", &Conventions::default());
        assert_eq!(s.lines().len(), 3);
        assert_eq!(s.lines()[0], "#!/bin/bash");
        assert!(!s.echo_payload().contains("nohup"));
        assert_eq!(
            s.lines()[2],
            r#"su -l ubuntu -c "${CURRENT_DIR}/code-server/bin/code-server --disable-update-check --auth=none --bind-addr 0.0.0.0:2090 /home/ubuntu/learn""#
        );
    }

    #[test]
    fn test_script_with_command() {
        let cmd = vec!["python".to_string(), "app.py".to_string()];
        let s = EntryScript::new(&cmd, "/srv", &Conventions::default());
        assert_eq!(s.lines()[1], "nohup python app.py &");
        assert!(s
            .echo_payload()
            .starts_with("#!/bin/bash\\nnohup python app.py &\\nCURRENT_DIR="));
    }
}
