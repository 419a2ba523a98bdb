use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::rules::{RuleId, RuleSpec, RuleTable};

const PROMPT: &str = "$ ";

/// Operator input that could not be turned into a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Bad arguments.")]
    BadArguments,

    #[error("Unknown command")]
    Unknown(String),
}

/// One id argument of `stop`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopArg {
    Id(RuleId),
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start(RuleSpec),
    Stop(Vec<StopArg>),
    Size(usize),
    Exit,
}

impl Command {
    /// Parse one input line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((&name, args)) = tokens.split_first() else {
            return Ok(None);
        };

        let command = match name {
            "start" => {
                let [port, host, target_port] = args else {
                    return Err(CommandError::BadArguments);
                };
                Command::Start(RuleSpec {
                    listen_port: port.parse().map_err(|_| CommandError::BadArguments)?,
                    target_host: host.to_string(),
                    target_port: target_port.parse().map_err(|_| CommandError::BadArguments)?,
                })
            }
            "stop" => Command::Stop(
                args.iter()
                    .map(|arg| match arg.parse() {
                        Ok(id) => StopArg::Id(id),
                        Err(_) => StopArg::Invalid(arg.to_string()),
                    })
                    .collect(),
            ),
            "size" => {
                let [size] = args else {
                    return Err(CommandError::BadArguments);
                };
                let size: i64 = size.parse().map_err(|_| CommandError::BadArguments)?;
                Command::Size(usize::try_from(size.max(1)).unwrap_or(usize::MAX))
            }
            "exit" => Command::Exit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }
}

/// Line-oriented operator shell.
pub struct Shell<R, W> {
    input: R,
    output: W,
}

impl<R, W> Shell<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Read and execute commands until `exit` or end of input.
    pub async fn run(&mut self, rules: &mut RuleTable) -> io::Result<()> {
        let mut line = String::new();
        loop {
            self.write(PROMPT).await?;

            line.clear();
            if self.input.read_line(&mut line).await? == 0 {
                debug!("end of operator input");
                return Ok(());
            }

            match Command::parse(&line) {
                Ok(None) => {}
                Ok(Some(Command::Exit)) => return Ok(()),
                Ok(Some(command)) => self.execute(command, rules).await?,
                Err(err) => {
                    debug!(%err, line = line.trim_end(), "rejected command");
                    self.say(&err.to_string()).await?;
                }
            }
        }
    }

    async fn execute(&mut self, command: Command, rules: &mut RuleTable) -> io::Result<()> {
        match command {
            Command::Start(spec) => match rules.start(&spec).await {
                Ok(id) => self.say(&format!("Proxy id {id}")).await?,
                Err(err) => self.say(&format!("Failed to start proxy: {err}")).await?,
            },
            Command::Stop(args) => {
                for arg in args {
                    match arg {
                        StopArg::Invalid(_) => {
                            self.say(&CommandError::BadArguments.to_string()).await?
                        }
                        StopArg::Id(id) => {
                            if !rules.stop(id).await {
                                self.say(&format!("Proxy {id} not found.")).await?;
                                break;
                            }
                        }
                    }
                }
            }
            Command::Size(size) => rules.set_buffer_size(size),
            Command::Exit => {}
        }
        Ok(())
    }

    async fn say(&mut self, message: &str) -> io::Result<()> {
        self.write(message).await?;
        self.write("\n").await
    }

    async fn write(&mut self, text: &str) -> io::Result<()> {
        self.output.write_all(text.as_bytes()).await?;
        self.output.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::tests::{echo_target, loopback_settings};

    async fn run_script(script: &str, rules: &mut RuleTable) -> String {
        let mut output = Vec::new();
        Shell::new(script.as_bytes(), &mut output)
            .run(rules)
            .await
            .unwrap();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn parses_start() {
        let command = Command::parse("start 8080 example.com 80\n").unwrap();
        assert_eq!(
            command,
            Some(Command::Start(RuleSpec {
                listen_port: 8080,
                target_host: "example.com".to_string(),
                target_port: 80,
            }))
        );
    }

    #[test]
    fn start_needs_three_valid_arguments() {
        for line in [
            "start",
            "start 8080 example.com",
            "start 8080 example.com 80 extra",
            "start port example.com 80",
            "start 8080 example.com 70000",
        ] {
            assert_eq!(Command::parse(line), Err(CommandError::BadArguments), "{line}");
        }
    }

    #[test]
    fn stop_keeps_invalid_ids_in_order() {
        let command = Command::parse("stop 1 x 3").unwrap();
        assert_eq!(
            command,
            Some(Command::Stop(vec![
                StopArg::Id(1),
                StopArg::Invalid("x".to_string()),
                StopArg::Id(3),
            ]))
        );
    }

    #[test]
    fn size_is_clamped_to_one() {
        assert_eq!(Command::parse("size 4096").unwrap(), Some(Command::Size(4096)));
        assert_eq!(Command::parse("size 0").unwrap(), Some(Command::Size(1)));
        assert_eq!(Command::parse("size -20").unwrap(), Some(Command::Size(1)));
        assert_eq!(Command::parse("size big"), Err(CommandError::BadArguments));
        assert_eq!(Command::parse("size"), Err(CommandError::BadArguments));
    }

    #[test]
    fn blank_and_unknown_lines() {
        assert_eq!(Command::parse("   \n").unwrap(), None);
        assert_eq!(
            Command::parse("launch 1"),
            Err(CommandError::Unknown("launch".to_string()))
        );
        assert_eq!(CommandError::Unknown("launch".into()).to_string(), "Unknown command");
    }

    #[tokio::test]
    async fn operator_errors_are_reported() {
        let mut rules = RuleTable::new(loopback_settings(), None);
        let output = run_script("size 0\nbogus\n\nstop x 5 6\nexit\nsize 9\n", &mut rules).await;

        assert_eq!(
            output,
            "$ $ Unknown command\n$ $ Bad arguments.\nProxy 5 not found.\n$ "
        );
        assert_eq!(rules.buffer_size(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn start_and_stop_rules() {
        let target = echo_target().await;
        let mut rules = RuleTable::new(loopback_settings(), None);
        let script = format!(
            "start 0 127.0.0.1 {target}\nstart 0 127.0.0.1 {target}\nstop 1\nstop 1\n"
        );
        let output = run_script(&script, &mut rules).await;

        assert_eq!(
            output,
            "$ Proxy id 1\n$ Proxy id 2\n$ $ Proxy 1 not found.\n$ "
        );
        assert_eq!(rules.ids(), vec![2]);
        rules.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_start_is_reported_without_id() {
        let target = echo_target().await;
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken_port = taken.local_addr().unwrap().port();
        let mut rules = RuleTable::new(loopback_settings(), None);

        let script = format!("start {taken_port} 127.0.0.1 {target}\nstart 0 127.0.0.1 {target}\n");
        let output = run_script(&script, &mut rules).await;

        assert!(output.starts_with("$ Failed to start proxy: "), "{output}");
        assert!(output.ends_with("$ Proxy id 1\n$ "), "{output}");
        rules.shutdown().await;
    }
}
